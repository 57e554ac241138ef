use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "ptyexec")]
#[command(
    version,
    about = "Run commands on a pseudo-terminal with live output and separate stderr capture",
    long_about = None
)]
pub struct Cli {
    /// Log engine activity (session transitions, spawns, teardown) to stderr
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command and capture its output
    Run(RunArgs),
    /// Run a command attached directly to this terminal, without capture
    Passthrough(TargetArgs),
    /// Copy stdin to stdout with ANSI CSI sequences removed
    Sanitize,
    /// Inspect resolved settings
    Config(ConfigCmd),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run on a pseudo-terminal and forward stdin lines to the command
    #[arg(short = 'i', long = "interactive")]
    pub interactive: bool,

    /// Print the result or error as JSON
    #[arg(long = "json")]
    pub json: bool,

    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Kill the command after this long (e.g. 250ms, 5s, 2m, or bare seconds)
    #[arg(long = "timeout", value_name = "DUR", value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Extra environment variable for the command (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Working directory for the command
    #[arg(long = "cwd", value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Run LINE through the configured shell instead of an argument vector
    #[arg(long = "shell-line", value_name = "LINE", conflicts_with = "argv")]
    pub shell_line: Option<String>,

    /// Command and arguments, executed without shell parsing
    #[arg(
        value_name = "ARGV",
        last = true,
        required_unless_present = "shell_line"
    )]
    pub argv: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ConfigCmd {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective settings as TOML
    Show,
}

pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let (number, scale) = if let Some(ms) = raw.strip_suffix("ms") {
        (ms, 0.001)
    } else if let Some(secs) = raw.strip_suffix('s') {
        (secs, 1.0)
    } else if let Some(mins) = raw.strip_suffix('m') {
        (mins, 60.0)
    } else {
        (raw, 1.0)
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration '{raw}' (expected e.g. 250ms, 5s, 2m)"))?;
    Duration::try_from_secs_f64(value * scale)
        .map_err(|_| format!("invalid duration '{raw}': must be a non-negative finite value"))
}

pub fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("invalid environment override '{raw}' (expected KEY=VALUE)")),
    }
}
