//! One execution's descriptors, child handle, and transcripts.
//!
//! A [`StreamSession`] is opened by spawning the child, streamed until the
//! child exits (or the deadline passes), and then released. Release kills a
//! surviving child, stops the input forwarder, and closes every descriptor
//! exactly once. It runs from `Drop` too, so early returns and panics take
//! the same path.

pub(crate) mod alloc;
pub(crate) mod control;
pub(crate) mod forwarder;
pub(crate) mod reader;
pub(crate) mod spawn;
pub(crate) mod types;

use std::fs::File;
use std::io::{self, IsTerminal};
use std::os::fd::{AsFd, IntoRawFd, OwnedFd};
use std::process::Child;
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::request::ExecutionRequest;
use crate::settings::ExecSettings;
use control::StopSignal;
use forwarder::InputForwarder;
use reader::{ChannelReader, EchoTarget, Transcript};
pub(crate) use types::{ExitInfo, SessionState};

/// What streaming observed, handed to classification.
#[derive(Debug)]
pub(crate) struct StreamOutcome {
    pub(crate) exit: ExitInfo,
    pub(crate) timed_out: bool,
    pub(crate) stdout: Transcript,
    pub(crate) stderr: Transcript,
    pub(crate) elapsed: Duration,
}

/// Why a session could not be opened.
#[derive(Debug)]
pub(crate) struct OpenError {
    pub(crate) context: &'static str,
    pub(crate) source: io::Error,
}

fn open_error(context: &'static str) -> impl FnOnce(io::Error) -> OpenError {
    move |source| OpenError { context, source }
}

pub(crate) struct StreamSession<'a> {
    cmd_id: &'a str,
    settings: &'a ExecSettings,
    state: SessionState,
    interactive: bool,
    echo: bool,
    child: Option<Child>,
    /// Where the live child's process group is published for signal
    /// forwarding.
    running: Option<&'a AtomicI32>,
    stop: StopSignal,
    input: Option<File>,
    pty_slave: Option<OwnedFd>,
    /// pty master in interactive mode, the stdout pipe otherwise.
    stdout_read: Option<File>,
    stderr_write: Option<OwnedFd>,
    stderr_read: Option<File>,
    stdout: Transcript,
    stderr: Transcript,
}

impl<'a> StreamSession<'a> {
    /// Allocate descriptors and spawn the child. `input` is only used in
    /// interactive mode. Both modes start the child as a process group
    /// leader, and its pid is stored in `running` until it is reaped.
    pub(crate) fn open(
        cmd_id: &'a str,
        settings: &'a ExecSettings,
        argv: &[String],
        request: &ExecutionRequest,
        input: Option<File>,
        echo: bool,
        running: Option<&'a AtomicI32>,
    ) -> Result<Self, OpenError> {
        let interactive = request.is_interactive();
        let mut session = StreamSession {
            cmd_id,
            settings,
            state: SessionState::Idle,
            interactive,
            echo: echo && interactive,
            child: None,
            running,
            stop: StopSignal::new().map_err(open_error("failed to create stop pipe"))?,
            input: if interactive { input } else { None },
            pty_slave: None,
            stdout_read: None,
            stderr_write: None,
            stderr_read: None,
            stdout: Transcript::default(),
            stderr: Transcript::default(),
        };

        if interactive {
            let size = types::initial_pty_size();
            let descriptors =
                alloc::allocate(&size).map_err(open_error("failed to allocate pty"))?;
            session.stdout_read = Some(descriptors.master);
            session.stderr_read = Some(descriptors.stderr_read);
            let slave = session.pty_slave.insert(descriptors.slave);
            let stderr_write = session.stderr_write.insert(descriptors.stderr_write);

            let child = spawn::spawn_on_pty(argv, request, slave, stderr_write, &size)
                .map_err(open_error("failed to spawn child on pty"))?;
            log::debug!(
                "[{cmd_id}] spawned pid {} on pty ({}x{})",
                child.id(),
                size.ws_col,
                size.ws_row
            );
            session.child = Some(child);
        } else {
            let mut child = spawn::spawn_captured(argv, request)
                .map_err(open_error("failed to spawn child"))?;
            session.stdout_read = child.stdout.take().map(|s| File::from(OwnedFd::from(s)));
            session.stderr_read = child.stderr.take().map(|s| File::from(OwnedFd::from(s)));
            log::debug!("[{cmd_id}] spawned pid {} with pipes", child.id());
            session.child = Some(child);
        }

        if let (Some(slot), Some(child)) = (running, session.child.as_ref()) {
            slot.store(child.id() as i32, Ordering::SeqCst);
        }
        session.advance(SessionState::Spawned);
        Ok(session)
    }

    fn advance(&mut self, next: SessionState) {
        advance(&mut self.state, next, self.cmd_id);
    }

    /// Run readers, the forwarder, and the liveness loop until the child is
    /// gone, then release the session.
    pub(crate) fn stream(mut self, timeout: Option<Duration>) -> StreamOutcome {
        let started = Instant::now();
        let watch_resize = self.interactive && self.echo && io::stdout().is_terminal();

        let Self {
            cmd_id,
            settings,
            state,
            echo,
            child,
            running,
            stop,
            input,
            pty_slave,
            stdout_read,
            stderr_read,
            stdout,
            stderr,
            ..
        } = &mut self;
        let cmd_id: &str = *cmd_id;
        let settings: &ExecSettings = *settings;
        let stop: &StopSignal = stop;
        let echo = *echo;

        let (exit, timed_out) = thread::scope(|scope| {
            let mut workers = Vec::new();

            if let Some(source) = stdout_read.as_ref() {
                let reader = ChannelReader {
                    label: "stdout",
                    slice: settings.stdout_slice,
                    chunk_bytes: settings.read_chunk_bytes,
                    drain_grace: settings.drain_grace,
                    echo: echo.then_some(EchoTarget::Stdout),
                    stop,
                    cmd_id,
                };
                let transcript: &mut Transcript = stdout;
                let worker = scope.spawn(move || reader.run(source, transcript));
                workers.push(("stdout reader", worker));
            }

            if let Some(source) = stderr_read.as_ref() {
                let reader = ChannelReader {
                    label: "stderr",
                    slice: settings.stderr_slice,
                    chunk_bytes: settings.read_chunk_bytes,
                    drain_grace: settings.drain_grace,
                    echo: echo.then_some(EchoTarget::Stderr),
                    stop,
                    cmd_id,
                };
                let transcript: &mut Transcript = stderr;
                let worker = scope.spawn(move || reader.run(source, transcript));
                workers.push(("stderr reader", worker));
            }

            if let (Some(input), Some(pty)) = (input.as_ref(), stdout_read.as_ref()) {
                let forwarder = InputForwarder {
                    poll: settings.input_poll,
                    stop,
                    cmd_id,
                    slave: pty_slave.as_ref().map(|fd| fd.as_fd()),
                };
                workers.push((
                    "input forwarder",
                    scope.spawn(move || {
                        forwarder.run(input, pty);
                    }),
                ));
            }

            let resize = match stdout_read.as_ref() {
                Some(master) if watch_resize => control::watch_resize(scope, master, cmd_id),
                _ => None,
            };

            advance(state, SessionState::Streaming, cmd_id);

            let (status, timed_out) = match child.as_mut() {
                Some(proc) => spawn::wait_with_deadline(
                    proc,
                    started,
                    timeout,
                    settings.liveness_poll,
                    cmd_id,
                ),
                None => (None, false),
            };
            unpublish(*running, child.as_ref());

            advance(state, SessionState::Draining, cmd_id);
            stop.trigger();
            if let Some(handle) = resize {
                handle.close();
            }
            for (label, worker) in workers {
                if worker.join().is_err() {
                    log::error!("[{cmd_id}] {label} panicked; its output may be incomplete");
                }
            }

            let exit = status.map_or_else(ExitInfo::unknown, ExitInfo::from_status);
            (exit, timed_out)
        });

        let elapsed = started.elapsed();
        self.release();

        StreamOutcome {
            exit,
            timed_out,
            stdout: std::mem::take(&mut self.stdout),
            stderr: std::mem::take(&mut self.stderr),
            elapsed,
        }
    }

    /// Kill the child if alive, stop the forwarder, then close the slave,
    /// master, stderr write, and stderr read descriptors. Idempotent.
    fn release(&mut self) {
        if self.state == SessionState::Terminated {
            return;
        }
        let cmd_id = self.cmd_id;

        unpublish(self.running, self.child.as_ref());
        if let Some(mut child) = self.child.take() {
            if !matches!(child.try_wait(), Ok(Some(_))) {
                log::debug!("[{cmd_id}] child still running at teardown; killing");
                spawn::kill_and_reap(&mut child, cmd_id);
            }
        }

        self.stop.trigger();
        close_descriptor(cmd_id, "input", self.input.take().map(OwnedFd::from));

        let stdout_role = if self.interactive { "pty master" } else { "stdout pipe" };
        close_descriptor(cmd_id, "pty slave", self.pty_slave.take());
        close_descriptor(cmd_id, stdout_role, self.stdout_read.take().map(OwnedFd::from));
        close_descriptor(cmd_id, "stderr write", self.stderr_write.take());
        close_descriptor(cmd_id, "stderr read", self.stderr_read.take().map(OwnedFd::from));

        self.advance(SessionState::Terminated);
    }
}

impl Drop for StreamSession<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

fn advance(state: &mut SessionState, next: SessionState, cmd_id: &str) {
    debug_assert!(
        state.can_advance_to(next),
        "invalid session transition {state:?} -> {next:?}"
    );
    log::debug!("[{cmd_id}] session {state:?} -> {next:?}");
    *state = next;
}

/// Withdraw `child` from `running`, unless another session has replaced it.
fn unpublish(running: Option<&AtomicI32>, child: Option<&Child>) {
    if let (Some(slot), Some(child)) = (running, child) {
        let _ = slot.compare_exchange(child.id() as i32, 0, Ordering::SeqCst, Ordering::SeqCst);
    }
}

/// Close failures are teardown warnings: logged, never returned.
fn close_descriptor(cmd_id: &str, role: &str, fd: Option<OwnedFd>) {
    let Some(fd) = fd else {
        return;
    };
    if let Err(e) = nix::unistd::close(fd.into_raw_fd()) {
        log::warn!("[{cmd_id}] teardown: failed to close {role}: {e}");
    }
}
