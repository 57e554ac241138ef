#![cfg(unix)]

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

/// `ptyexec` with settings isolated from the developer's machine.
fn ptyexec(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ptyexec").unwrap();
    cmd.current_dir(home.path())
        .env("PTYEXEC_HOME", home.path().join(".ptyexec"))
        .env("PTYEXEC_ECHO", "false")
        .env_remove("PTYEXEC_TRACE_LOG")
        .env_remove("PTYEXEC_TIMEOUT_MS");
    cmd
}

#[test]
fn run_prints_captured_stdout_and_succeeds() {
    let home = TempDir::new().unwrap();
    ptyexec(&home)
        .args(["run", "--", "echo", "hello"])
        .assert()
        .success()
        .stdout("hello\n");
}

#[test]
fn run_propagates_child_exit_code_and_stderr() {
    let home = TempDir::new().unwrap();
    ptyexec(&home)
        .args(["run", "--shell-line", "echo bad >&2; exit 3"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("bad"));
}

#[test]
fn run_timeout_exits_124() {
    let home = TempDir::new().unwrap();
    ptyexec(&home)
        .args(["run", "--timeout", "100ms", "--", "sleep", "5"])
        .assert()
        .code(124)
        .stderr(predicate::str::contains("timed out"));
}

#[test]
fn missing_program_exits_127() {
    let home = TempDir::new().unwrap();
    ptyexec(&home)
        .args(["run", "--", "ptyexec-no-such-program"])
        .assert()
        .code(127);
}

#[test]
fn interactive_run_strips_escape_sequences() {
    let home = TempDir::new().unwrap();
    ptyexec(&home)
        .args(["run", "-i", "--shell-line", r"printf '\033[32mgreen\033[0m\n'"])
        .write_stdin("")
        .assert()
        .success()
        .stdout("green\n");
}

#[test]
fn interactive_run_forwards_stdin_lines() {
    let home = TempDir::new().unwrap();
    ptyexec(&home)
        .args([
            "run",
            "-i",
            "--timeout",
            "10s",
            "--shell-line",
            r#"printf 'Continue? [y/n] '; read a; echo "answer=$a""#,
        ])
        .write_stdin("y\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Continue? [y/n]"))
        .stdout(predicate::str::contains("answer=y"));
}

#[test]
fn json_output_describes_failure() {
    let home = TempDir::new().unwrap();
    let output = ptyexec(&home)
        .args(["run", "--json", "--env", "API_TOKEN=x", "--", "false"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let value: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["outcome"], "non_zero_exit");
    assert_eq!(value["error"]["kind"], "non_zero_exit");
    assert_eq!(value["error"]["exit_code"], 1);
    assert_eq!(value["error"]["argv"][0], "false");
    assert_eq!(value["error"]["env_overrides"]["API_TOKEN"], "x");
}

#[test]
fn env_and_cwd_flags_reach_the_child() {
    let home = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let expected = work.path().canonicalize().unwrap();
    ptyexec(&home)
        .args(["run", "--env", "GREETING=hey", "--cwd"])
        .arg(work.path())
        .args(["--shell-line", "echo $GREETING; pwd -P"])
        .assert()
        .success()
        .stdout(format!("hey\n{}\n", expected.display()));
}

#[test]
fn passthrough_inherits_terminal_and_returns_code() {
    let home = TempDir::new().unwrap();
    ptyexec(&home)
        .args(["passthrough", "--shell-line", "echo direct; exit 5"])
        .assert()
        .code(5)
        .stdout("direct\n");
}

#[test]
fn sanitize_strips_csi_from_stdin() {
    let home = TempDir::new().unwrap();
    ptyexec(&home)
        .arg("sanitize")
        .write_stdin("\x1b[1;31mred\x1b[0m plain\n")
        .assert()
        .success()
        .stdout("red plain\n");
}

#[test]
fn config_show_reflects_directory_settings() {
    let home = TempDir::new().unwrap();
    let dir = home.path().join(".ptyexec");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("settings.toml"),
        "[exec]\nstdout_slice_ms = 750\nshell = \"/bin/sh\"\n",
    )
    .unwrap();

    ptyexec(&home)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stdout_slice_ms = 750"))
        .stdout(predicate::str::contains("echo = false"));
}

#[test]
fn trace_log_records_command_events() {
    let home = TempDir::new().unwrap();
    let trace = home.path().join("trace.jsonl");
    ptyexec(&home)
        .env("PTYEXEC_TRACE_LOG", &trace)
        .args(["run", "--", "echo", "traced"])
        .assert()
        .success();

    let events: Vec<Value> = std::fs::read_to_string(&trace)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["event_type"], "command_start");
    assert_eq!(events[1]["event_type"], "command_complete");
    assert_eq!(events[1]["outcome"], "success");
}

#[test]
fn invalid_timeout_is_a_usage_error() {
    let home = TempDir::new().unwrap();
    ptyexec(&home)
        .args(["run", "--timeout", "soon", "--", "true"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid duration"));
}

#[test]
fn interrupt_is_forwarded_to_the_captured_child() {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    use std::process::Stdio;
    use std::time::{Duration, Instant};

    let home = TempDir::new().unwrap();
    let pid_file = home.path().join("child.pid");
    let script = format!("echo $$ > '{}'; exec sleep 30", pid_file.display());
    let mut cli = std::process::Command::new(assert_cmd::cargo::cargo_bin("ptyexec"))
        .current_dir(home.path())
        .env("PTYEXEC_HOME", home.path().join(".ptyexec"))
        .env("PTYEXEC_ECHO", "false")
        .env_remove("PTYEXEC_TRACE_LOG")
        .env_remove("PTYEXEC_TIMEOUT_MS")
        .args(["run", "--shell-line", &script])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let started = Instant::now();
    let child_pid: i32 = loop {
        if let Some(pid) = std::fs::read_to_string(&pid_file)
            .ok()
            .and_then(|s| s.trim().parse().ok())
        {
            break pid;
        }
        assert!(started.elapsed() < Duration::from_secs(10), "child never started");
        std::thread::sleep(Duration::from_millis(20));
    };
    std::thread::sleep(Duration::from_millis(100));

    kill(Pid::from_raw(cli.id() as i32), Signal::SIGINT).unwrap();
    let status = cli.wait().unwrap();

    assert_eq!(status.code(), Some(130));
    assert!(
        kill(Pid::from_raw(child_pid), None).is_err(),
        "child {child_pid} outlived ptyexec"
    );
}
