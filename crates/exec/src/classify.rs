//! Maps an observed exit to a result or a structured error.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{ErrorKind, ExecutionError};
use crate::result::ExecutionResult;
use crate::session::ExitInfo;

/// Everything known about a finished child.
#[derive(Debug)]
pub(crate) struct Completion {
    pub(crate) exit: ExitInfo,
    pub(crate) timed_out: bool,
    /// Already sanitized.
    pub(crate) stdout: String,
    pub(crate) stderr: String,
    pub(crate) elapsed: Duration,
}

pub(crate) fn classify(
    completion: Completion,
    argv: Vec<String>,
    env_overrides: BTreeMap<String, String>,
    timeout: Option<Duration>,
) -> Result<ExecutionResult, ExecutionError> {
    let Completion {
        exit,
        timed_out,
        stdout,
        stderr,
        elapsed,
    } = completion;

    let command = argv.join(" ");
    let (kind, message) = if timed_out {
        let limit = timeout.unwrap_or(elapsed).as_millis();
        (
            ErrorKind::Timeout,
            format!("command timed out after {limit}ms: {command}"),
        )
    } else if exit.success() {
        return Ok(ExecutionResult::new(stdout, stderr, 0));
    } else {
        let message = match exit.signal {
            Some(signal) => format!("command terminated by signal {signal}: {command}"),
            None => format!(
                "command exited with status {}: {command}",
                exit.exit_code()
            ),
        };
        (ErrorKind::NonZeroExit, message)
    };

    let exit_code = match (exit.code, exit.signal) {
        (None, None) => None,
        _ => Some(exit.exit_code()),
    };

    Err(ExecutionError {
        kind,
        message,
        argv,
        env_overrides,
        stdout,
        stderr,
        exit_code,
        signal: exit.signal,
        elapsed,
        source: None,
    })
}
