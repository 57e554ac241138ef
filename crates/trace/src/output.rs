use anyhow::{Context, Result};
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const DEFAULT_MAX_MB: u64 = 100;
const DEFAULT_KEEP: usize = 3;

/// When the trace file is rotated and how many rotated files survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub keep: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_MB * 1024 * 1024,
            keep: DEFAULT_KEEP,
        }
    }
}

impl RotationPolicy {
    /// Reads `PTYEXEC_TRACE_MAX_MB` and `PTYEXEC_TRACE_KEEP`, falling back to
    /// 100 MiB and 3 files.
    pub fn from_env() -> Self {
        let max_mb = env::var("PTYEXEC_TRACE_MAX_MB")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_MAX_MB);
        let keep = env::var("PTYEXEC_TRACE_KEEP")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(DEFAULT_KEEP);
        Self {
            max_bytes: max_mb.saturating_mul(1024 * 1024),
            keep,
        }
    }
}

pub(crate) struct TraceOutput {
    writer: BufWriter<File>,
    path: PathBuf,
    policy: RotationPolicy,
}

impl TraceOutput {
    pub(crate) fn new(path: impl AsRef<Path>, policy: RotationPolicy) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = open_append(&path)?;

        Ok(TraceOutput {
            writer: BufWriter::new(file),
            path,
            policy,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    fn rotated(&self, index: usize) -> PathBuf {
        self.path.with_extension(format!("jsonl.{index}"))
    }

    fn rotate_if_needed(&mut self) -> Result<()> {
        self.writer.flush()?;

        let Ok(meta) = fs::metadata(&self.path) else {
            return Ok(());
        };
        if meta.len() < self.policy.max_bytes {
            return Ok(());
        }

        let keep = self.policy.keep;
        if keep == 0 {
            let _ = fs::remove_file(&self.path);
        } else {
            let _ = fs::remove_file(self.rotated(keep));
            for i in (2..=keep).rev() {
                let _ = fs::rename(self.rotated(i - 1), self.rotated(i));
            }
            // The writer still holds the old inode; renaming it away is fine on Unix.
            let _ = fs::rename(&self.path, self.rotated(1));
        }

        tracing::debug!(path = %self.path.display(), keep, "rotated trace file");
        self.writer = BufWriter::new(open_append(&self.path)?);
        Ok(())
    }

    pub(crate) fn write_line(&mut self, entry: &serde_json::Value) -> Result<()> {
        self.rotate_if_needed()?;

        let json = serde_json::to_string(entry)?;
        writeln!(self.writer, "{json}")?;
        self.writer.flush()?;

        if env::var("PTYEXEC_FSYNC").unwrap_or_default() == "1" {
            self.writer.get_ref().sync_all()?;
        }

        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open trace file {}", path.display()))
}
