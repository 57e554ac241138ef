//! Exit status, session state, and terminal size helpers.

use std::process::ExitStatus;

/// Lifecycle of one [`StreamSession`](super::StreamSession).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Spawned,
    Streaming,
    Draining,
    Terminated,
}

impl SessionState {
    pub(crate) fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Spawned)
                | (Spawned, Streaming)
                | (Streaming, Draining)
                | (Draining, Terminated)
                // Torn down early: spawn failure, unused session, or a panic
                // while streaming.
                | (Idle, Terminated)
                | (Spawned, Terminated)
                | (Streaming, Terminated)
        )
    }
}

/// How the child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub(crate) fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            ExitInfo {
                code: status.code(),
                signal: status.signal(),
            }
        }

        #[cfg(not(unix))]
        {
            ExitInfo {
                code: status.code(),
                signal: None,
            }
        }
    }

    /// Status of a child whose exit could not be observed.
    pub(crate) fn unknown() -> Self {
        ExitInfo {
            code: None,
            signal: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Shell-style exit code: `128 + signal` for signal deaths.
    pub fn exit_code(&self) -> i32 {
        match (self.code, self.signal) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => -1,
        }
    }
}

#[cfg(unix)]
pub(crate) fn terminal_size() -> Option<nix::pty::Winsize> {
    use libc::{ioctl, winsize, TIOCGWINSZ};
    use std::mem;
    use std::os::unix::io::AsRawFd;

    let query = |fd: libc::c_int| -> Option<winsize> {
        unsafe {
            let mut size: winsize = mem::zeroed();
            (ioctl(fd, TIOCGWINSZ, &mut size) == 0 && size.ws_row > 0 && size.ws_col > 0)
                .then_some(size)
        }
    };

    // /dev/tty names the controlling terminal even when stdio is redirected.
    if let Ok(tty) = std::fs::File::open("/dev/tty") {
        if let Some(size) = query(tty.as_raw_fd()) {
            return Some(size);
        }
    }

    [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO]
        .into_iter()
        .find_map(query)
}

/// Size the pty is opened with: the operator's terminal if there is one,
/// then `LINES`/`COLUMNS`, then 50x120.
#[cfg(unix)]
pub(crate) fn initial_pty_size() -> nix::pty::Winsize {
    if let Some(size) = terminal_size() {
        return size;
    }

    let rows = std::env::var("LINES")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|n: &u16| *n > 0)
        .unwrap_or(50);
    let cols = std::env::var("COLUMNS")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|n: &u16| *n > 0)
        .unwrap_or(120);

    nix::pty::Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}
