//! Structured failure of an execution.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Which way an execution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Descriptor allocation or process creation failed. Nothing ran.
    SpawnFailure,
    /// The deadline passed first. The child was killed; output captured up
    /// to that point is kept.
    Timeout,
    /// The child ran to completion and returned a non-zero status.
    NonZeroExit,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::SpawnFailure => "spawn_failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NonZeroExit => "non_zero_exit",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed invocation with everything needed to log, retry, or diagnose it
/// without running the command again.
#[derive(Debug, Error, Serialize)]
#[error("{message}")]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
    pub argv: Vec<String>,
    pub env_overrides: BTreeMap<String, String>,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    #[serde(skip)]
    pub source: Option<io::Error>,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl ExecutionError {
    pub(crate) fn spawn_failure(
        argv: Vec<String>,
        env_overrides: BTreeMap<String, String>,
        context: &str,
        source: io::Error,
    ) -> Self {
        Self {
            kind: ErrorKind::SpawnFailure,
            message: format!("{context}: {source}"),
            argv,
            env_overrides,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            signal: None,
            elapsed: Duration::ZERO,
            source: Some(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// True when the failure is the OS refusing to run the program, either
    /// at spawn time or as the shell's "cannot execute" status 126.
    pub fn is_permission_denied(&self) -> bool {
        match self.kind {
            ErrorKind::SpawnFailure => self
                .source
                .as_ref()
                .is_some_and(|e| e.kind() == io::ErrorKind::PermissionDenied),
            ErrorKind::NonZeroExit => self.exit_code == Some(126),
            ErrorKind::Timeout => false,
        }
    }

    /// True when the program could not be found.
    pub fn is_not_found(&self) -> bool {
        match self.kind {
            ErrorKind::SpawnFailure => self
                .source
                .as_ref()
                .is_some_and(|e| e.kind() == io::ErrorKind::NotFound),
            ErrorKind::NonZeroExit => self.exit_code == Some(127),
            ErrorKind::Timeout => false,
        }
    }
}
