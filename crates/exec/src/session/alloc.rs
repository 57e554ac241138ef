//! Pseudo-terminal and stderr pipe allocation for interactive sessions.

use std::fs::File;
use std::io;
use std::os::fd::{AsFd, OwnedFd};

use nix::pty::Winsize;
use nix::sys::termios::{tcgetattr, tcsetattr, OutputFlags, SetArg};

use super::control::cloexec_pipe;

/// Descriptors backing one interactive session.
///
/// Every field owns its descriptor, so an error part way through
/// [`allocate`] closes whatever was already opened. All four are
/// close-on-exec from creation.
pub(crate) struct DescriptorSet {
    pub(crate) master: File,
    pub(crate) slave: OwnedFd,
    pub(crate) stderr_read: File,
    pub(crate) stderr_write: OwnedFd,
}

pub(crate) fn allocate(size: &Winsize) -> io::Result<DescriptorSet> {
    let (master, slave) = open_pty(size)?;
    disable_output_translation(&slave)?;

    let (stderr_read, stderr_write) = cloexec_pipe()?;

    Ok(DescriptorSet {
        master: File::from(master),
        slave,
        stderr_read: File::from(stderr_read),
        stderr_write,
    })
}

/// Open a master/slave pair with `O_CLOEXEC` set atomically on both ends.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn open_pty(size: &Winsize) -> io::Result<(OwnedFd, OwnedFd)> {
    use nix::fcntl::OFlag;
    use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt};
    use std::fs::OpenOptions;
    use std::os::fd::{FromRawFd, IntoRawFd};
    use std::os::unix::fs::OpenOptionsExt;

    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_CLOEXEC)?;
    grantpt(&master)?;
    unlockpt(&master)?;
    let slave_path = ptsname_r(&master)?;
    // SAFETY: `into_raw_fd` gives up the only handle to the descriptor.
    let master = unsafe { OwnedFd::from_raw_fd(master.into_raw_fd()) };

    // std opens with O_CLOEXEC already.
    let slave = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(&slave_path)?;

    super::control::set_window_size(&master, size)?;
    Ok((master, OwnedFd::from(slave)))
}

/// `openpty` has no flags argument; cloexec is applied right after.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn open_pty(size: &Winsize) -> io::Result<(OwnedFd, OwnedFd)> {
    use super::control::set_cloexec;
    use nix::pty::openpty;
    use nix::sys::termios::Termios;

    let pty = openpty(Some(size), None::<&Termios>)?;
    set_cloexec(&pty.master)?;
    set_cloexec(&pty.slave)?;
    Ok((pty.master, pty.slave))
}

/// Keep `\n` as `\n` on the way out of the slave.
fn disable_output_translation(slave: &OwnedFd) -> io::Result<()> {
    let mut attrs = tcgetattr(slave.as_fd())?;
    attrs.output_flags.remove(OutputFlags::ONLCR);
    tcsetattr(slave.as_fd(), SetArg::TCSANOW, &attrs)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::fd::AsRawFd;

    fn size() -> Winsize {
        Winsize {
            ws_row: 24,
            ws_col: 80,
            ws_xpixel: 0,
            ws_ypixel: 0,
        }
    }

    #[test]
    fn slave_output_keeps_bare_newlines() {
        let set = allocate(&size()).unwrap();
        let mut slave = File::from(set.slave.try_clone().unwrap());
        slave.write_all(b"one\ntwo\n").unwrap();

        let mut buf = [0u8; 64];
        let n = (&set.master).read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"one\ntwo\n");
    }

    #[test]
    fn every_descriptor_is_close_on_exec() {
        let set = allocate(&size()).unwrap();
        for fd in [
            set.master.as_raw_fd(),
            set.slave.as_raw_fd(),
            set.stderr_read.as_raw_fd(),
            set.stderr_write.as_raw_fd(),
        ] {
            let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
            assert_eq!(flags & libc::FD_CLOEXEC, libc::FD_CLOEXEC, "fd {fd}");
        }
    }

    #[test]
    fn pty_starts_with_requested_size() {
        let set = allocate(&size()).unwrap();
        let mut actual: libc::winsize = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::ioctl(set.master.as_raw_fd(), libc::TIOCGWINSZ, &mut actual) };
        assert_eq!(rc, 0);
        assert_eq!((actual.ws_row, actual.ws_col), (24, 80));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn concurrently_spawned_children_inherit_no_session_descriptors() {
        use crate::request::ExecutionRequest;
        use crate::session::spawn::spawn_captured;
        use std::collections::HashSet;
        use std::sync::atomic::{AtomicBool, Ordering};

        fn child_terminal_fds() -> HashSet<String> {
            let request = ExecutionRequest::argv(["sh", "-c", "ls -l /proc/$$/fd"]);
            let argv = request.resolved_argv("/bin/sh");
            let output = spawn_captured(&argv, &request)
                .unwrap()
                .wait_with_output()
                .unwrap();
            String::from_utf8_lossy(&output.stdout)
                .lines()
                .filter(|line| line.contains("/dev/ptmx") || line.contains("/dev/pts/"))
                .filter_map(|line| line.split("->").nth(1).map(|t| t.trim().to_string()))
                .collect()
        }

        // Terminals this test process itself inherited are not ours to judge.
        let inherited = child_terminal_fds();
        let done = AtomicBool::new(false);

        let leaked = std::thread::scope(|scope| {
            for _ in 0..3 {
                scope.spawn(|| {
                    while !done.load(Ordering::SeqCst) {
                        drop(allocate(&size()).unwrap());
                    }
                });
            }
            let leaked = (0..200)
                .filter(|_| !child_terminal_fds().is_subset(&inherited))
                .count();
            done.store(true, Ordering::SeqCst);
            leaked
        });

        assert_eq!(leaked, 0, "children inherited a session pty descriptor");
    }

    #[test]
    fn stderr_pipe_carries_bytes() {
        let set = allocate(&size()).unwrap();
        let mut write = File::from(set.stderr_write);
        write.write_all(b"warn\n").unwrap();
        drop(write);

        let mut out = String::new();
        (&set.stderr_read).read_to_string(&mut out).unwrap();
        assert_eq!(out, "warn\n");
    }
}
