use anyhow::Result;
use chrono::Utc;
use ptyexec_common::{log_schema, redact_argv, redact_env_value};
use ptyexec_trace::TraceWriter;
use serde_json::{json, Value};
use std::env;
use std::io::{self, IsTerminal};
use std::time::Duration;

use crate::error::{ErrorKind, ExecutionError};
use crate::request::ExecutionRequest;
use crate::result::ExecutionResult;

/// How an invocation was run, as recorded in the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TraceMode {
    Capture,
    Interactive,
    Passthrough,
}

impl TraceMode {
    pub(crate) fn for_request(request: &ExecutionRequest) -> Self {
        if request.is_interactive() {
            TraceMode::Interactive
        } else {
            TraceMode::Capture
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            TraceMode::Capture => "capture",
            TraceMode::Interactive => "interactive",
            TraceMode::Passthrough => "passthrough",
        }
    }
}

/// Identity shared by the start and completion events of one command.
pub(crate) struct CommandContext<'a> {
    pub(crate) trace: Option<&'a TraceWriter>,
    pub(crate) cmd_id: &'a str,
    pub(crate) mode: TraceMode,
    pub(crate) argv: &'a [String],
    pub(crate) request: &'a ExecutionRequest,
}

/// Byte counts of the raw channels, before sanitizing.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ChannelBytes {
    pub(crate) stdout: usize,
    pub(crate) stderr: usize,
}

fn log_command_event(ctx: &CommandContext<'_>, event_type: &str, extra: Value) -> Result<()> {
    let Some(trace) = ctx.trace else {
        return Ok(());
    };

    let cwd = match ctx.request.working_dir_path() {
        Some(dir) => dir.display().to_string(),
        None => env::current_dir()?.display().to_string(),
    };
    let env_overrides: serde_json::Map<String, Value> = ctx
        .request
        .env_overrides()
        .iter()
        .map(|(k, v)| (k.clone(), json!(redact_env_value(k, v))))
        .collect();

    let mut entry = json!({
        log_schema::TIMESTAMP: Utc::now().to_rfc3339(),
        log_schema::EVENT_TYPE: event_type,
        log_schema::COMMAND_ID: ctx.cmd_id,
        log_schema::COMPONENT: "exec",
        "argv": redact_argv(ctx.argv),
        "env_overrides": env_overrides,
        "mode": ctx.mode.as_str(),
        "cwd": cwd,
        "host": gethostname::gethostname().to_string_lossy().to_string(),
        "isatty_stdin": io::stdin().is_terminal(),
        "isatty_stdout": io::stdout().is_terminal(),
        "isatty_stderr": io::stderr().is_terminal(),
        "pty": ctx.mode == TraceMode::Interactive,
    });

    if let (Some(entry), Value::Object(extra)) = (entry.as_object_mut(), extra) {
        entry.extend(extra);
    }

    trace.append(&entry)
}

pub(crate) fn command_started(ctx: &CommandContext<'_>) {
    let extra = json!({
        "timeout_ms": ctx.request.timeout_duration().map(|t| t.as_millis() as u64),
    });
    if let Err(e) = log_command_event(ctx, "command_start", extra) {
        log::warn!("[{}] failed to write command_start trace: {e:#}", ctx.cmd_id);
    }
}

pub(crate) fn command_completed(
    ctx: &CommandContext<'_>,
    outcome: &Result<ExecutionResult, ExecutionError>,
    elapsed: Duration,
    bytes: ChannelBytes,
) {
    let mut extra = json!({
        log_schema::DURATION_MS: elapsed.as_millis() as u64,
        "stdout_bytes": bytes.stdout,
        "stderr_bytes": bytes.stderr,
    });

    match outcome {
        Ok(result) => {
            extra[log_schema::OUTCOME] = json!("success");
            extra[log_schema::EXIT_CODE] = json!(result.exit_code());
        }
        Err(err) => {
            extra[log_schema::OUTCOME] = json!(err.kind().as_str());
            if let Some(code) = err.exit_code {
                extra[log_schema::EXIT_CODE] = json!(code);
            }
            if let Some(signal) = err.signal {
                extra[log_schema::TERM_SIGNAL] = json!(signal);
            }
            if err.kind() == ErrorKind::SpawnFailure {
                extra["error"] = json!(err.message);
            }
        }
    }

    if let Err(e) = log_command_event(ctx, "command_complete", extra) {
        log::warn!("[{}] failed to write command_complete trace: {e:#}", ctx.cmd_id);
    }
}
