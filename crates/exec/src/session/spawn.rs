//! Child process construction for the three execution modes.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use nix::pty::Winsize;

use crate::request::ExecutionRequest;

/// Current process environment overlaid with `overrides`; overrides win.
pub(crate) fn merged_environment(
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<OsString, OsString> {
    let mut env: BTreeMap<OsString, OsString> = std::env::vars_os().collect();
    for (key, value) in overrides {
        env.insert(OsString::from(key), OsString::from(value));
    }
    env
}

/// Terminal variables a pty child expects. Caller overrides are left alone.
fn apply_terminal_defaults(
    env: &mut BTreeMap<OsString, OsString>,
    size: &Winsize,
    overrides: &BTreeMap<String, String>,
) {
    if !overrides.contains_key("TERM") {
        let term = env.entry(OsString::from("TERM")).or_default();
        if term.is_empty() || term.as_os_str() == "dumb" {
            *term = OsString::from("xterm-256color");
        }
    }
    if !overrides.contains_key("COLUMNS") {
        env.insert("COLUMNS".into(), size.ws_col.to_string().into());
    }
    if !overrides.contains_key("LINES") {
        env.insert("LINES".into(), size.ws_row.to_string().into());
    }
}

fn base_command(
    argv: &[String],
    request: &ExecutionRequest,
    env: BTreeMap<OsString, OsString>,
) -> io::Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty argument vector"))?;

    let mut cmd = Command::new(program);
    cmd.args(args).env_clear().envs(env);
    if let Some(dir) = request.working_dir_path() {
        cmd.current_dir(dir);
    }
    Ok(cmd)
}

/// Start the child on the pty slave with stderr on the dedicated pipe.
///
/// The child gets its own session with the slave as controlling terminal, so
/// job-control aware programs behave as they would in a real terminal.
pub(crate) fn spawn_on_pty(
    argv: &[String],
    request: &ExecutionRequest,
    slave: &OwnedFd,
    stderr_write: &OwnedFd,
    size: &Winsize,
) -> io::Result<Child> {
    let mut env = merged_environment(request.env_overrides());
    apply_terminal_defaults(&mut env, size, request.env_overrides());

    let mut cmd = base_command(argv, request, env)?;
    cmd.stdin(Stdio::from(slave.try_clone()?))
        .stdout(Stdio::from(slave.try_clone()?))
        .stderr(Stdio::from(stderr_write.try_clone()?));

    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            if libc::ioctl(libc::STDIN_FILENO, libc::TIOCSCTTY as _, 0) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    cmd.spawn()
}

/// Start the child with plain pipes and no stdin, in its own process group.
pub(crate) fn spawn_captured(argv: &[String], request: &ExecutionRequest) -> io::Result<Child> {
    let env = merged_environment(request.env_overrides());
    let mut cmd = base_command(argv, request, env)?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);
    cmd.spawn()
}

/// Start the child on the operator's own terminal.
pub(crate) fn spawn_passthrough(argv: &[String], request: &ExecutionRequest) -> io::Result<Child> {
    let env = merged_environment(request.env_overrides());
    let mut cmd = base_command(argv, request, env)?;
    cmd.stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    cmd.spawn()
}

/// Poll `child` every `poll` until it exits. Once `timeout` (counted from
/// `started`) passes, the child is killed and the second value is `true`.
pub(crate) fn wait_with_deadline(
    child: &mut Child,
    started: Instant,
    timeout: Option<Duration>,
    poll: Duration,
    cmd_id: &str,
) -> (Option<ExitStatus>, bool) {
    let deadline = timeout.map(|t| started + t);
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return (Some(status), false),
            Ok(None) => {}
            Err(e) => {
                log::warn!("[{cmd_id}] failed to poll child: {e}");
                return (kill_and_reap(child, cmd_id), false);
            }
        }

        let now = Instant::now();
        let nap = match deadline {
            Some(deadline) if now >= deadline => {
                log::warn!(
                    "[{cmd_id}] timed out after {}ms; killing child",
                    timeout.unwrap_or_default().as_millis()
                );
                return (kill_and_reap(child, cmd_id), true);
            }
            Some(deadline) => poll.min(deadline - now),
            None => poll,
        };
        thread::sleep(nap);
    }
}

/// Kill the child's whole process group, then reap it.
pub(crate) fn kill_and_reap(child: &mut Child, cmd_id: &str) -> Option<ExitStatus> {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(child.id() as i32);
    // Passthrough children share our group, so killpg finds nothing there.
    if let Err(e) = killpg(pid, Signal::SIGKILL) {
        log::debug!("[{cmd_id}] killpg({pid}) failed: {e}; killing child directly");
        if let Err(e) = child.kill() {
            log::debug!("[{cmd_id}] kill({pid}) failed: {e}");
        }
    }

    match child.wait() {
        Ok(status) => Some(status),
        Err(e) => {
            log::warn!("[{cmd_id}] Failed to reap child {pid}: {e}");
            None
        }
    }
}
