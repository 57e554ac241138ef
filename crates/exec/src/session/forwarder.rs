//! Line forwarding from the operator's input to the pty.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::time::Duration;

use super::control::{wait_readable, StopSignal};

pub(crate) struct InputForwarder<'a> {
    pub(crate) poll: Duration,
    pub(crate) stop: &'a StopSignal,
    pub(crate) cmd_id: &'a str,
    /// pty slave. When set, a line is only read once the child has consumed
    /// the previous one.
    pub(crate) slave: Option<BorrowedFd<'a>>,
}

impl InputForwarder<'_> {
    /// Copy complete lines from `input` to `pty` until the input closes or
    /// the session stops. Returns the number of lines delivered.
    ///
    /// Input is read a byte at a time and nothing past the current line is
    /// consumed, so lines still queued on a shared input when the session
    /// stops stay there for whoever reads it next. A line cut short by the
    /// stop is dropped; at end of input it is sent with a newline added.
    pub(crate) fn run(&self, input: &File, pty: &File) -> usize {
        let mut line = Vec::new();
        let mut delivered = 0;
        let mut awaiting_child = false;

        loop {
            if awaiting_child {
                if !self.wait_until_consumed() {
                    break;
                }
                awaiting_child = false;
            }
            match self.next_byte(input) {
                Next::Byte(byte) => {
                    line.push(byte);
                    if byte != b'\n' {
                        continue;
                    }
                }
                Next::Idle => continue,
                Next::Eof if !line.is_empty() => {}
                Next::Eof | Next::Stop => break,
            }

            let eof = !line.ends_with(b"\n");
            if let Err(e) = write_line(pty, &line) {
                log::debug!("[{}] input forward failed: {e}", self.cmd_id);
                break;
            }
            delivered += 1;
            awaiting_child = true;
            line.clear();
            if eof {
                break;
            }
        }

        if !line.is_empty() {
            log::debug!(
                "[{}] dropped {} bytes of unfinished input at stop",
                self.cmd_id,
                line.len()
            );
        }
        log::trace!("[{}] input forwarder stopped after {delivered} lines", self.cmd_id);
        delivered
    }

    /// Block until the child has read everything already forwarded. False
    /// when the session stopped first.
    fn wait_until_consumed(&self) -> bool {
        let Some(slave) = self.slave else {
            return !self.stop.is_triggered();
        };
        loop {
            // One slice first: the line discipline queues written bytes
            // asynchronously.
            match wait_readable(self.stop.as_fd(), None, self.poll) {
                Ok(readiness) if readiness.data => return false,
                Ok(_) => {}
                Err(e) => {
                    log::warn!("[{}] input poll failed: {e}", self.cmd_id);
                    return false;
                }
            }
            match queued_input(slave) {
                Ok(0) => return true,
                Ok(_) => {}
                Err(e) => {
                    log::debug!("[{}] cannot inspect pty input queue: {e}", self.cmd_id);
                    return true;
                }
            }
        }
    }

    fn next_byte(&self, input: &File) -> Next {
        if self.stop.is_triggered() {
            return Next::Stop;
        }
        let readiness = match wait_readable(input.as_fd(), Some(self.stop.as_fd()), self.poll) {
            Ok(readiness) => readiness,
            Err(e) => {
                log::warn!("[{}] input poll failed: {e}", self.cmd_id);
                return Next::Stop;
            }
        };
        if readiness.stop {
            return Next::Stop;
        }
        if !readiness.data {
            return Next::Idle;
        }

        let mut byte = [0u8; 1];
        let mut reader = input;
        match reader.read(&mut byte) {
            Ok(0) => Next::Eof,
            Ok(_) => Next::Byte(byte[0]),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                ) =>
            {
                Next::Idle
            }
            Err(e) => {
                log::warn!("[{}] input read failed: {e}", self.cmd_id);
                Next::Stop
            }
        }
    }
}

enum Next {
    Byte(u8),
    Idle,
    Eof,
    Stop,
}

/// Bytes written to the pty that the child has not read yet.
fn queued_input(slave: BorrowedFd<'_>) -> io::Result<usize> {
    let mut queued: libc::c_int = 0;
    let rc = unsafe { libc::ioctl(slave.as_raw_fd(), libc::FIONREAD, &mut queued) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(queued.max(0) as usize)
}

fn write_line(pty: &File, line: &[u8]) -> io::Result<()> {
    let mut writer = pty;
    writer.write_all(line)?;
    if !line.ends_with(b"\n") {
        writer.write_all(b"\n")?;
    }
    writer.flush()
}
