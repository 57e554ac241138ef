use anyhow::{Context, Result};
use ptyexec_exec::{
    ErrorKind, ExecSettings, ExecutionError, ExecutionRequest, ExecutionResult, Executor,
    SettingsOverrides,
};
use serde_json::json;
use std::env;
use std::io::{self, Read, Write};
use std::sync::atomic::AtomicI32;
use std::sync::Arc;

use crate::cli::{Cli, Command, ConfigAction, RunArgs, TargetArgs};
use crate::signals;

/// Exit status used when the deadline passed, matching coreutils `timeout`.
pub const EXIT_TIMEOUT: i32 = 124;
pub const EXIT_PERMISSION_DENIED: i32 = 126;
pub const EXIT_SPAWN_FAILURE: i32 = 127;

pub fn dispatch(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run(args) => run(args),
        Command::Passthrough(target) => passthrough(target),
        Command::Sanitize => sanitize_stdin(),
        Command::Config(cmd) => match cmd.action {
            ConfigAction::Show => config_show(),
        },
    }
}

fn resolve_settings() -> Result<ExecSettings> {
    let launch_dir = env::current_dir().context("failed to determine current directory")?;
    ExecSettings::resolve(SettingsOverrides::default(), &launch_dir)
}

fn build_request(target: TargetArgs) -> ExecutionRequest {
    let request = match target.shell_line {
        Some(line) => ExecutionRequest::shell_line(line),
        None => ExecutionRequest::argv(target.argv),
    };
    let mut request = request.envs(target.env);
    if let Some(dir) = target.cwd {
        request = request.working_dir(dir);
    }
    if let Some(timeout) = target.timeout {
        request = request.timeout(timeout);
    }
    request
}

fn run(args: RunArgs) -> Result<i32> {
    let settings = resolve_settings()?;
    // Interactive output is mirrored live; don't print it twice.
    let echoed = args.interactive && settings.echo && !args.json;
    let running_child = Arc::new(AtomicI32::new(0));
    if let Err(e) = signals::forward_to_child(running_child.clone()) {
        log::warn!("Signals will not reach the child: {e:#}");
    }
    let executor = Executor::from_settings(settings)
        .with_echo(!args.json)
        .with_running_child(running_child);
    let request = build_request(args.target).interactive(args.interactive);

    let outcome = executor.execute(&request);
    if args.json {
        print_json(&outcome)?;
    } else {
        print_transcripts(&outcome, echoed)?;
    }
    Ok(exit_code(&outcome))
}

fn passthrough(target: TargetArgs) -> Result<i32> {
    let settings = resolve_settings()?;
    let executor = Executor::from_settings(settings);
    let outcome = executor.execute_passthrough(&build_request(target));
    if let Err(err) = &outcome {
        report_error(err);
    }
    Ok(exit_code(&outcome))
}

fn print_transcripts(
    outcome: &Result<ExecutionResult, ExecutionError>,
    echoed: bool,
) -> Result<()> {
    let (stdout, stderr) = match outcome {
        Ok(result) => (result.stdout(), result.stderr()),
        Err(err) => (err.stdout.as_str(), err.stderr.as_str()),
    };
    if !echoed {
        io::stdout().write_all(stdout.as_bytes())?;
        io::stdout().flush()?;
        io::stderr().write_all(stderr.as_bytes())?;
    }
    if let Err(err) = outcome {
        report_error(err);
    }
    Ok(())
}

fn report_error(err: &ExecutionError) {
    match err.kind() {
        // The command already explained itself on stderr.
        ErrorKind::NonZeroExit => log::info!("{}", err.message),
        ErrorKind::Timeout | ErrorKind::SpawnFailure => {
            eprintln!("ptyexec: {}", err.message);
            if err.is_permission_denied() {
                eprintln!("ptyexec: hint: check that the program is executable");
            }
        }
    }
}

fn print_json(outcome: &Result<ExecutionResult, ExecutionError>) -> Result<()> {
    let value = match outcome {
        Ok(result) => json!({ "outcome": "success", "result": result }),
        Err(err) => json!({ "outcome": err.kind(), "error": err }),
    };
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &value)?;
    writeln!(stdout)?;
    Ok(())
}

pub fn exit_code(outcome: &Result<ExecutionResult, ExecutionError>) -> i32 {
    match outcome {
        Ok(result) => result.exit_code(),
        Err(err) => match err.kind() {
            ErrorKind::NonZeroExit => err.exit_code.unwrap_or(1),
            ErrorKind::Timeout => EXIT_TIMEOUT,
            ErrorKind::SpawnFailure if err.is_permission_denied() => EXIT_PERMISSION_DENIED,
            ErrorKind::SpawnFailure => EXIT_SPAWN_FAILURE,
        },
    }
}

fn sanitize_stdin() -> Result<i32> {
    let mut raw = Vec::new();
    io::stdin()
        .read_to_end(&mut raw)
        .context("failed to read stdin")?;
    let text = String::from_utf8_lossy(&raw);
    let mut stdout = io::stdout().lock();
    stdout.write_all(ptyexec_common::strip_csi(&text).as_bytes())?;
    stdout.flush()?;
    Ok(0)
}

fn config_show() -> Result<i32> {
    let settings = resolve_settings()?;
    print!("{}", settings.to_toml_string()?);
    Ok(0)
}
