//! Cross-thread stop signal and pty resize propagation.

use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

/// Create a pipe whose ends are not inherited by spawned children. Both ends
/// carry `O_CLOEXEC` from the moment they exist, so a fork on another thread
/// never sees them.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn cloexec_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    Ok(nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)?)
}

/// Create a pipe whose ends are not inherited by spawned children.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn cloexec_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let (read, write) = nix::unistd::pipe()?;
    set_cloexec(&read)?;
    set_cloexec(&write)?;
    Ok((read, write))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    use std::os::fd::AsRawFd;
    let rc = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Self-pipe used to wake every blocked reader and the input forwarder at
/// once. The byte written by [`StopSignal::trigger`] is never consumed, so
/// the read end stays readable for every poller.
pub(crate) struct StopSignal {
    read: File,
    write: File,
    fired: AtomicBool,
}

impl StopSignal {
    pub(crate) fn new() -> io::Result<Self> {
        let (read, write) = cloexec_pipe()?;
        Ok(Self {
            read: File::from(read),
            write: File::from(write),
            fired: AtomicBool::new(false),
        })
    }

    pub(crate) fn trigger(&self) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            if let Err(e) = (&self.write).write_all(&[1]) {
                log::warn!("Failed to signal session stop: {e}");
            }
        }
    }

    pub(crate) fn is_triggered(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl AsFd for StopSignal {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.read.as_fd()
    }
}

/// Readiness of a data descriptor and, optionally, the stop signal.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Readiness {
    pub(crate) data: bool,
    pub(crate) stop: bool,
}

fn poll_timeout(timeout: Duration) -> PollTimeout {
    let millis = timeout.as_millis().min(u16::MAX as u128) as u16;
    PollTimeout::from(millis)
}

/// Wait up to `timeout` for `data` (and `stop`, if given) to become readable.
/// Hang-ups and errors count as readable so the following read observes them.
pub(crate) fn wait_readable(
    data: BorrowedFd<'_>,
    stop: Option<BorrowedFd<'_>>,
    timeout: Duration,
) -> nix::Result<Readiness> {
    let ready = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL;
    let mut fds = vec![PollFd::new(data, PollFlags::POLLIN)];
    if let Some(stop) = stop {
        fds.push(PollFd::new(stop, PollFlags::POLLIN));
    }

    loop {
        match poll(&mut fds, poll_timeout(timeout)) {
            Ok(0) => return Ok(Readiness::default()),
            Ok(_) => {
                let is_ready = |fd: &PollFd| fd.revents().is_some_and(|r| r.intersects(ready));
                return Ok(Readiness {
                    data: is_ready(&fds[0]),
                    stop: fds.get(1).is_some_and(is_ready),
                });
            }
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Apply a window size to the pty behind `master`.
pub(crate) fn set_window_size(
    master: &impl std::os::fd::AsRawFd,
    size: &nix::pty::Winsize,
) -> io::Result<()> {
    let rc = unsafe { libc::ioctl(master.as_raw_fd(), libc::TIOCSWINSZ, size as *const _) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Follow `SIGWINCH` for the lifetime of a session and copy the operator's
/// terminal size onto the pty. Returns the handle that ends the watcher.
pub(crate) fn watch_resize<'scope, 'env>(
    scope: &'scope std::thread::Scope<'scope, 'env>,
    master: &'env File,
    cmd_id: &'env str,
) -> Option<signal_hook::iterator::Handle> {
    use signal_hook::consts::SIGWINCH;
    use signal_hook::iterator::Signals;

    let mut signals = match Signals::new([SIGWINCH]) {
        Ok(signals) => signals,
        Err(e) => {
            log::warn!("[{cmd_id}] Failed to register SIGWINCH handler: {e}");
            return None;
        }
    };
    let handle = signals.handle();

    scope.spawn(move || {
        for _ in signals.forever() {
            if let Some(size) = super::types::terminal_size() {
                match set_window_size(master, &size) {
                    Ok(()) => log::debug!(
                        "[{cmd_id}] SIGWINCH: resized pty to {}x{}",
                        size.ws_col,
                        size.ws_row
                    ),
                    Err(e) => log::warn!("[{cmd_id}] Failed to resize pty: {e}"),
                }
            }
        }
    });

    Some(handle)
}
