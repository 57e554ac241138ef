#![cfg(unix)]

//! Descriptor accounting lives in its own test binary so no other test can
//! open or close descriptors while it counts.

mod support;

use ptyexec_exec::{ErrorKind, ExecutionRequest, Executor};
use std::fs;
use std::time::Duration;
use support::{quiet_executor, scripted_executor, test_settings};

fn open_descriptors() -> usize {
    let dir = if fs::metadata("/proc/self/fd").is_ok() {
        "/proc/self/fd"
    } else {
        "/dev/fd"
    };
    fs::read_dir(dir).unwrap().count()
}

fn run_mix(executor: &Executor, round: usize) {
    match round % 5 {
        0 => {
            let result = executor
                .execute(&ExecutionRequest::argv(["echo", "hello"]))
                .unwrap();
            assert_eq!(result.stdout(), "hello\n");
        }
        1 => {
            let err = executor
                .execute(&ExecutionRequest::shell_line("echo oops >&2; exit 2").interactive(true))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NonZeroExit);
        }
        2 => {
            let err = executor
                .execute(
                    &ExecutionRequest::argv(["sleep", "5"])
                        .interactive(round % 2 == 0)
                        .timeout(Duration::from_millis(20)),
                )
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Timeout);
        }
        3 => {
            let err = executor
                .execute(&ExecutionRequest::argv(["ptyexec-no-such-program"]).interactive(true))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::SpawnFailure);
        }
        _ => {
            // Each scripted executor owns one pipe, dropped with it.
            let result = scripted_executor("answer\n")
                .execute(
                    &ExecutionRequest::shell_line("read line; echo \"got $line\"")
                        .interactive(true)
                        .timeout(Duration::from_secs(5)),
                )
                .unwrap();
            assert!(result.stdout().contains("got"));
        }
    }
}

#[test]
fn no_descriptor_leaks_across_many_invocations() {
    let executor = quiet_executor();
    let plain = Executor::from_settings(test_settings());

    // Warm up lazily initialised process state before taking the baseline.
    for round in 0..5 {
        run_mix(&executor, round);
    }
    let _ = plain.execute_passthrough(&ExecutionRequest::argv(["true"]));

    let before = open_descriptors();
    for round in 0..100 {
        run_mix(&executor, round);
    }
    for _ in 0..5 {
        plain
            .execute_passthrough(&ExecutionRequest::argv(["true"]))
            .unwrap();
    }
    let after = open_descriptors();

    assert_eq!(before, after, "descriptor count changed across 105 invocations");
}
