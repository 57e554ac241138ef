//! Append-only JSONL trace of command events.
//!
//! One JSON object per line. The file is rotated once it grows past the
//! configured size (`trace.jsonl` → `trace.jsonl.1` → ... → `trace.jsonl.N`).

mod output;

pub use output::RotationPolicy;

use anyhow::Result;
use output::TraceOutput;
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Thread-safe handle to a trace file.
pub struct TraceWriter {
    output: Mutex<TraceOutput>,
}

impl TraceWriter {
    /// Open (or create) the trace file at `path` using the rotation policy
    /// from the environment.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_policy(path, RotationPolicy::from_env())
    }

    pub fn with_policy(path: impl AsRef<Path>, policy: RotationPolicy) -> Result<Self> {
        Ok(Self {
            output: Mutex::new(TraceOutput::new(path, policy)?),
        })
    }

    pub fn path(&self) -> PathBuf {
        self.output.lock().path().to_path_buf()
    }

    /// Append one entry as a single line.
    pub fn append(&self, entry: &serde_json::Value) -> Result<()> {
        let mut output = self.output.lock();
        output.write_line(entry)?;
        trace!(path = %output.path().display(), "appended trace entry");
        Ok(())
    }
}

impl fmt::Debug for TraceWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceWriter")
            .field("path", &self.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serial_test::serial;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn lines(path: &Path) -> Vec<serde_json::Value> {
        fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn appends_one_line_per_entry() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("trace.jsonl");
        let writer = TraceWriter::with_policy(&path, RotationPolicy::default()).unwrap();

        writer.append(&json!({"event_type": "command_start", "n": 1})).unwrap();
        writer.append(&json!({"event_type": "command_complete", "n": 2})).unwrap();

        let entries = lines(&path);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["event_type"], "command_start");
        assert_eq!(entries[1]["n"], 2);
    }

    #[test]
    fn creates_missing_parent_directories() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/dir/trace.jsonl");
        let writer = TraceWriter::with_policy(&path, RotationPolicy::default()).unwrap();
        writer.append(&json!({"ok": true})).unwrap();
        assert_eq!(writer.path(), path);
        assert!(path.exists());
    }

    #[test]
    fn rotates_and_honors_retention() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("trace.jsonl");
        let policy = RotationPolicy {
            max_bytes: 1,
            keep: 2,
        };
        let writer = TraceWriter::with_policy(&path, policy).unwrap();

        for n in 0..4 {
            writer.append(&json!({"n": n})).unwrap();
        }

        assert_eq!(lines(&path)[0]["n"], 3);
        assert_eq!(lines(&path.with_extension("jsonl.1"))[0]["n"], 2);
        assert_eq!(lines(&path.with_extension("jsonl.2"))[0]["n"], 1);
        assert!(!path.with_extension("jsonl.3").exists());
    }

    #[test]
    fn concurrent_appends_stay_line_atomic() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("trace.jsonl");
        let writer = Arc::new(TraceWriter::with_policy(&path, RotationPolicy::default()).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let writer = Arc::clone(&writer);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        writer.append(&json!({"thread": t, "i": i})).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(lines(&path).len(), 100);
    }

    #[test]
    #[serial]
    fn policy_reads_environment() {
        std::env::set_var("PTYEXEC_TRACE_MAX_MB", "2");
        std::env::set_var("PTYEXEC_TRACE_KEEP", "5");
        let policy = RotationPolicy::from_env();
        std::env::remove_var("PTYEXEC_TRACE_MAX_MB");
        std::env::remove_var("PTYEXEC_TRACE_KEEP");

        assert_eq!(
            policy,
            RotationPolicy {
                max_bytes: 2 * 1024 * 1024,
                keep: 5
            }
        );
        assert_eq!(RotationPolicy::from_env(), RotationPolicy::default());
    }
}
