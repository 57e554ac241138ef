//! Entry points: captured, interactive, and passthrough execution.

use std::fs::File;
use std::io;
use std::os::fd::{AsFd, OwnedFd};
use std::sync::atomic::AtomicI32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ptyexec_common::sanitize;
use ptyexec_trace::TraceWriter;
use uuid::Uuid;

use crate::classify::{classify, Completion};
use crate::error::ExecutionError;
use crate::request::ExecutionRequest;
use crate::result::ExecutionResult;
use crate::session::{spawn, ExitInfo, OpenError, StreamSession};
use crate::settings::ExecSettings;
use crate::telemetry::{self, ChannelBytes, CommandContext, TraceMode};

/// Where interactive sessions read operator input from.
#[derive(Debug, Default)]
pub enum InputSource {
    /// The process's own stdin.
    #[default]
    Stdin,
    /// Any readable descriptor, duplicated for each session.
    Fd(OwnedFd),
    /// No input is forwarded.
    Disabled,
}

/// Runs [`ExecutionRequest`]s. Holds configuration only; every call gets a
/// fresh session, so one executor can serve concurrent callers.
#[derive(Debug)]
pub struct Executor {
    settings: ExecSettings,
    input: InputSource,
    echo: bool,
    trace: Option<TraceWriter>,
    running_child: Option<Arc<AtomicI32>>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self::from_settings(ExecSettings::default())
    }

    /// Build an executor from resolved settings. A trace file that cannot be
    /// opened is reported and tracing is skipped.
    pub fn from_settings(settings: ExecSettings) -> Self {
        let trace = settings.trace_path.as_ref().and_then(|path| {
            TraceWriter::open(path)
                .map_err(|e| log::warn!("Trace disabled, cannot open {}: {e:#}", path.display()))
                .ok()
        });
        Self {
            echo: settings.echo,
            settings,
            input: InputSource::default(),
            trace,
            running_child: None,
        }
    }

    pub fn with_input(mut self, input: InputSource) -> Self {
        self.input = input;
        self
    }

    /// Mirror captured output to this process's stdout/stderr while it
    /// streams. Only interactive sessions echo.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Publish the pid of each captured or interactive child in `slot` while
    /// it runs, and reset it to 0 once the child is reaped. Those children
    /// lead their own process group, so a signal handler can forward to
    /// `killpg(slot)`. With concurrent calls the slot holds the most recent
    /// child. Passthrough children are not published: they share the
    /// caller's group and already receive terminal signals.
    pub fn with_running_child(mut self, slot: Arc<AtomicI32>) -> Self {
        self.running_child = Some(slot);
        self
    }

    pub fn settings(&self) -> &ExecSettings {
        &self.settings
    }

    fn effective_timeout(&self, request: &ExecutionRequest) -> Option<Duration> {
        request.timeout_duration().or(self.settings.default_timeout)
    }

    fn session_input(&self, cmd_id: &str) -> Option<File> {
        let dup = match &self.input {
            InputSource::Stdin => io::stdin().as_fd().try_clone_to_owned(),
            InputSource::Fd(fd) => fd.try_clone(),
            InputSource::Disabled => return None,
        };
        match dup {
            Ok(fd) => Some(File::from(fd)),
            Err(e) => {
                log::debug!("[{cmd_id}] input forwarding disabled: {e}");
                None
            }
        }
    }

    /// Run `request` to completion, capturing both channels.
    ///
    /// Interactive requests run on a pseudo-terminal with operator input
    /// forwarded line by line; the others use plain pipes and no stdin.
    pub fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecutionError> {
        let cmd_id = Uuid::now_v7().to_string();
        let argv = request.resolved_argv(&self.settings.shell);
        let timeout = self.effective_timeout(request);
        let ctx = CommandContext {
            trace: self.trace.as_ref(),
            cmd_id: &cmd_id,
            mode: TraceMode::for_request(request),
            argv: &argv,
            request,
        };

        log::debug!(
            "[{cmd_id}] executing `{}` (interactive: {})",
            request.display_command(),
            request.is_interactive()
        );
        telemetry::command_started(&ctx);
        let started = Instant::now();

        let input = if request.is_interactive() {
            self.session_input(&cmd_id)
        } else {
            None
        };
        let echo = self.echo && self.settings.echo;

        let running = self.running_child.as_deref();
        let (outcome, bytes) =
            match StreamSession::open(&cmd_id, &self.settings, &argv, request, input, echo, running)
            {
                Ok(session) => {
                    let streamed = session.stream(timeout);
                    let bytes = ChannelBytes {
                        stdout: streamed.stdout.byte_len(),
                        stderr: streamed.stderr.byte_len(),
                    };
                    let completion = Completion {
                        exit: streamed.exit,
                        timed_out: streamed.timed_out,
                        stdout: sanitize(streamed.stdout.fragments()),
                        stderr: streamed.stderr.joined(),
                        elapsed: streamed.elapsed,
                    };
                    let outcome = classify(
                        completion,
                        argv.clone(),
                        request.env_overrides().clone(),
                        timeout,
                    );
                    (outcome, bytes)
                }
                Err(OpenError { context, source }) => {
                    let mut err = ExecutionError::spawn_failure(
                        argv.clone(),
                        request.env_overrides().clone(),
                        &format!("{context} for `{}`", request.display_command()),
                        source,
                    );
                    err.elapsed = started.elapsed();
                    (Err(err), ChannelBytes::default())
                }
            };

        log_outcome(&cmd_id, &outcome);
        telemetry::command_completed(&ctx, &outcome, started.elapsed(), bytes);
        outcome
    }

    /// Hand the terminal to the child: stdio is inherited and nothing is
    /// captured. The returned result carries empty transcripts.
    pub fn execute_passthrough(
        &self,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, ExecutionError> {
        let cmd_id = Uuid::now_v7().to_string();
        let argv = request.resolved_argv(&self.settings.shell);
        let timeout = self.effective_timeout(request);
        let ctx = CommandContext {
            trace: self.trace.as_ref(),
            cmd_id: &cmd_id,
            mode: TraceMode::Passthrough,
            argv: &argv,
            request,
        };

        log::debug!("[{cmd_id}] passthrough `{}`", request.display_command());
        telemetry::command_started(&ctx);
        let started = Instant::now();

        let outcome = match spawn::spawn_passthrough(&argv, request) {
            Ok(mut child) => {
                let (status, timed_out) = spawn::wait_with_deadline(
                    &mut child,
                    started,
                    timeout,
                    self.settings.liveness_poll,
                    &cmd_id,
                );
                let completion = Completion {
                    exit: status.map_or_else(ExitInfo::unknown, ExitInfo::from_status),
                    timed_out,
                    stdout: String::new(),
                    stderr: String::new(),
                    elapsed: started.elapsed(),
                };
                classify(completion, argv.clone(), request.env_overrides().clone(), timeout)
            }
            Err(source) => {
                let mut err = ExecutionError::spawn_failure(
                    argv.clone(),
                    request.env_overrides().clone(),
                    &format!("failed to spawn `{}`", request.display_command()),
                    source,
                );
                err.elapsed = started.elapsed();
                Err(err)
            }
        };

        log_outcome(&cmd_id, &outcome);
        telemetry::command_completed(&ctx, &outcome, started.elapsed(), ChannelBytes::default());
        outcome
    }
}

fn log_outcome(cmd_id: &str, outcome: &Result<ExecutionResult, ExecutionError>) {
    match outcome {
        Ok(_) => log::debug!("[{cmd_id}] completed successfully"),
        Err(err) => log::debug!("[{cmd_id}] {}: {}", err.kind(), err.message),
    }
}

/// Run `request` with default settings, reading operator input from stdin.
pub fn execute(request: &ExecutionRequest) -> Result<ExecutionResult, ExecutionError> {
    Executor::new().execute(request)
}
