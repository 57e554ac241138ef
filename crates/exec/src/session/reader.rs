//! Per-channel read loops and their transcript accumulators.

use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::time::{Duration, Instant};

use super::control::{wait_readable, StopSignal};

/// Longest silence tolerated during the final drain before a channel is
/// considered empty.
const DRAIN_QUIET: Duration = Duration::from_millis(50);

/// Append-only record of one channel. Bytes are decoded as UTF-8 as they
/// arrive; a sequence split across reads is held back until it completes
/// and invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub(crate) struct Transcript {
    fragments: Vec<String>,
    pending: Vec<u8>,
    bytes: usize,
}

impl Transcript {
    pub(crate) fn push(&mut self, chunk: &[u8]) {
        self.bytes += chunk.len();
        self.pending.extend_from_slice(chunk);

        let mut decoded = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    decoded.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    decoded.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        Some(bad) => {
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        if !decoded.is_empty() {
            self.fragments.push(decoded);
        }
    }

    /// Flush a trailing incomplete sequence.
    pub(crate) fn finish(&mut self) {
        if !self.pending.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending).into_owned();
            self.fragments.push(tail);
            self.pending.clear();
        }
    }

    pub(crate) fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub(crate) fn byte_len(&self) -> usize {
        self.bytes
    }

    pub(crate) fn joined(&self) -> String {
        self.fragments.concat()
    }
}

/// Where a channel's bytes are mirrored as they arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EchoTarget {
    Stdout,
    Stderr,
}

impl EchoTarget {
    fn write(self, bytes: &[u8]) -> io::Result<()> {
        match self {
            EchoTarget::Stdout => {
                let mut out = io::stdout().lock();
                out.write_all(bytes)?;
                out.flush()
            }
            EchoTarget::Stderr => {
                let mut err = io::stderr().lock();
                err.write_all(bytes)?;
                err.flush()
            }
        }
    }
}

enum ReadStep {
    Data,
    Closed,
}

/// Time-sliced read loop for one channel.
pub(crate) struct ChannelReader<'a> {
    pub(crate) label: &'static str,
    pub(crate) slice: Duration,
    pub(crate) chunk_bytes: usize,
    pub(crate) drain_grace: Duration,
    pub(crate) echo: Option<EchoTarget>,
    pub(crate) stop: &'a StopSignal,
    pub(crate) cmd_id: &'a str,
}

impl ChannelReader<'_> {
    /// Read until the source closes, or until the stop signal fires and the
    /// final drain completes.
    pub(crate) fn run<R: Read + AsFd>(&self, mut source: R, transcript: &mut Transcript) {
        let mut buf = vec![0u8; self.chunk_bytes.max(1)];

        loop {
            let readiness =
                match wait_readable(source.as_fd(), Some(self.stop.as_fd()), self.slice) {
                    Ok(readiness) => readiness,
                    Err(e) => {
                        log::warn!("[{}] {} poll failed: {e}", self.cmd_id, self.label);
                        break;
                    }
                };

            if readiness.stop {
                self.drain(&mut source, &mut buf, transcript);
                break;
            }
            if readiness.data {
                if let ReadStep::Closed = self.read_once(&mut source, &mut buf, transcript) {
                    break;
                }
            }
        }

        transcript.finish();
        log::trace!(
            "[{}] {} reader done after {} bytes",
            self.cmd_id,
            self.label,
            transcript.byte_len()
        );
    }

    /// Collect whatever the child left behind, bounded by `drain_grace`.
    fn drain<R: Read + AsFd>(&self, source: &mut R, buf: &mut [u8], transcript: &mut Transcript) {
        let deadline = Instant::now() + self.drain_grace;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                log::debug!("[{}] {} drain grace elapsed", self.cmd_id, self.label);
                return;
            }
            match wait_readable(source.as_fd(), None, remaining.min(DRAIN_QUIET)) {
                Ok(readiness) if readiness.data => {
                    if let ReadStep::Closed = self.read_once(source, buf, transcript) {
                        return;
                    }
                }
                Ok(_) => return,
                Err(e) => {
                    log::warn!("[{}] {} drain poll failed: {e}", self.cmd_id, self.label);
                    return;
                }
            }
        }
    }

    fn read_once<R: Read>(
        &self,
        source: &mut R,
        buf: &mut [u8],
        transcript: &mut Transcript,
    ) -> ReadStep {
        match source.read(buf) {
            Ok(0) => ReadStep::Closed,
            Ok(n) => {
                let bytes = &buf[..n];
                transcript.push(bytes);
                if let Some(target) = self.echo {
                    if let Err(e) = target.write(bytes) {
                        log::debug!("[{}] {} echo failed: {e}", self.cmd_id, self.label);
                    }
                }
                ReadStep::Data
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                ) =>
            {
                ReadStep::Data
            }
            // A pty master reports EIO once no slave descriptor remains open.
            Err(e) if e.raw_os_error() == Some(libc::EIO) => ReadStep::Closed,
            Err(e) => {
                log::warn!("[{}] {} read failed: {e}", self.cmd_id, self.label);
                ReadStep::Closed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::control::cloexec_pipe;
    use proptest::prelude::*;
    use std::fs::File;

    #[test]
    fn transcript_reassembles_split_multibyte_sequence() {
        let mut t = Transcript::default();
        let snowman = "☃".as_bytes();
        t.push(b"a");
        t.push(&snowman[..1]);
        t.push(&snowman[1..]);
        t.push(b"b");
        t.finish();
        assert_eq!(t.joined(), "a☃b");
        assert_eq!(t.byte_len(), 5);
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut t = Transcript::default();
        t.push(b"ok\xffok");
        t.push(b"\xe2\x98");
        t.finish();
        assert_eq!(t.joined(), "ok\u{FFFD}ok\u{FFFD}");
    }

    #[test]
    fn fragments_preserve_arrival_order() {
        let mut t = Transcript::default();
        t.push(b"first ");
        t.push(b"second");
        assert_eq!(t.fragments(), ["first ", "second"]);
    }

    fn reader(stop: &StopSignal) -> ChannelReader<'_> {
        ChannelReader {
            label: "stdout",
            slice: Duration::from_millis(50),
            chunk_bytes: 4,
            drain_grace: Duration::from_millis(200),
            echo: None,
            stop,
            cmd_id: "test",
        }
    }

    #[test]
    fn reader_collects_until_eof() {
        let stop = StopSignal::new().unwrap();
        let (read, write) = cloexec_pipe().unwrap();
        let mut write = File::from(write);
        write.write_all(b"hello world\n").unwrap();
        drop(write);

        let mut transcript = Transcript::default();
        reader(&stop).run(File::from(read), &mut transcript);
        assert_eq!(transcript.joined(), "hello world\n");
    }

    #[test]
    fn stop_drains_buffered_output_with_writer_still_open() {
        let stop = StopSignal::new().unwrap();
        let (read, write) = cloexec_pipe().unwrap();
        let mut write = File::from(write);
        write.write_all(b"late output").unwrap();
        stop.trigger();

        let started = Instant::now();
        let mut transcript = Transcript::default();
        reader(&stop).run(File::from(read), &mut transcript);

        assert_eq!(transcript.joined(), "late output");
        assert!(started.elapsed() < Duration::from_secs(1));
        drop(write);
    }

    #[test]
    fn drain_is_bounded_by_grace_period() {
        let stop = StopSignal::new().unwrap();
        let (read, write) = cloexec_pipe().unwrap();
        let read = File::from(read);
        let mut write = File::from(write);
        stop.trigger();

        std::thread::scope(|scope| {
            let producer = scope.spawn(move || {
                for _ in 0..40 {
                    if write.write_all(b"x").is_err() {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
            });

            let started = Instant::now();
            let mut transcript = Transcript::default();
            reader(&stop).run(&read, &mut transcript);
            assert!(started.elapsed() < Duration::from_millis(600));
            producer.join().unwrap();
        });
    }

    proptest! {
        #[test]
        fn any_chunking_of_valid_utf8_decodes_exactly(text in "\\PC{0,64}", cut in 0usize..256) {
            let bytes = text.as_bytes();
            let cut = cut.min(bytes.len());
            let mut t = Transcript::default();
            t.push(&bytes[..cut]);
            t.push(&bytes[cut..]);
            t.finish();
            prop_assert_eq!(t.joined(), text);
        }
    }
}
