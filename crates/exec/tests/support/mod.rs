#![allow(dead_code)]

use ptyexec_exec::{ExecSettings, Executor, InputSource};
use std::fs::File;
use std::io::Write;
use std::os::fd::OwnedFd;
use std::time::{Duration, Instant};

/// Settings with echo off and short slices so tests stay quiet and fast.
pub fn test_settings() -> ExecSettings {
    ExecSettings {
        echo: false,
        shell: "/bin/sh".to_string(),
        trace_path: None,
        default_timeout: None,
        ..ExecSettings::default()
    }
}

pub fn quiet_executor() -> Executor {
    Executor::from_settings(test_settings()).with_input(InputSource::Disabled)
}

/// Executor whose interactive sessions read `script` as operator input.
pub fn scripted_executor(script: &str) -> Executor {
    Executor::from_settings(test_settings()).with_input(InputSource::Fd(scripted_input(script)))
}

/// Read end of a pipe preloaded with `script` and already closed for writing.
pub fn scripted_input(script: &str) -> OwnedFd {
    let (read, write) = nix::unistd::pipe().expect("pipe");
    let mut write = File::from(write);
    write.write_all(script.as_bytes()).expect("write script");
    read
}

pub fn process_alive(pid: i32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

/// Orphans are reaped by init asynchronously, so give them a moment.
pub fn wait_until_gone(pid: i32, limit: Duration) -> bool {
    let started = Instant::now();
    while started.elapsed() < limit {
        if !process_alive(pid) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    !process_alive(pid)
}
