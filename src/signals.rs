//! Hand operator signals to the child of `ptyexec run`.
//!
//! Captured and interactive children lead their own process group, so the
//! terminal's Ctrl-C never reaches them. SIGINT, SIGTERM, SIGQUIT and SIGHUP
//! received by ptyexec are forwarded to that group instead; the session then
//! sees the child die and tears down as usual.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use signal_hook::consts::{SIGHUP, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;

pub fn forward_to_child(running_child: Arc<AtomicI32>) -> Result<()> {
    {
        let running = running_child.clone();
        ctrlc::set_handler(move || forward(&running, Signal::SIGINT))?;
    }

    let mut signals = Signals::new([SIGTERM, SIGQUIT, SIGHUP])?;
    thread::spawn(move || {
        for sig in signals.forever() {
            match Signal::try_from(sig) {
                Ok(signal) => forward(&running_child, signal),
                Err(e) => log::warn!("Ignoring unexpected signal {sig}: {e}"),
            }
        }
    });
    Ok(())
}

fn forward(running: &AtomicI32, signal: Signal) {
    let pgid = running.load(Ordering::SeqCst);
    if pgid <= 0 {
        // No child to hand it to: die the way the signal would have.
        std::process::exit(128 + signal as i32);
    }
    log::debug!("forwarding {signal:?} to process group {pgid}");
    if let Err(e) = killpg(Pid::from_raw(pgid), signal) {
        log::warn!("Failed to forward {signal:?} to process group {pgid}: {e}");
    }
}
