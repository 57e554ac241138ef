//! Description of a single command invocation.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What to launch. The enum makes "exactly one of argv or shell line" a type
/// invariant instead of a runtime check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandSpec {
    /// Executed directly, no shell parsing.
    Argv(Vec<String>),
    /// Executed as `<shell> -c <line>`.
    ShellLine(String),
}

/// Immutable description of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionRequest {
    command: CommandSpec,
    env_overrides: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    #[serde(serialize_with = "serialize_timeout")]
    timeout: Option<Duration>,
    interactive: bool,
}

fn serialize_timeout<S: serde::Serializer>(
    timeout: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match timeout {
        Some(t) => serializer.serialize_some(&(t.as_millis() as u64)),
        None => serializer.serialize_none(),
    }
}

impl ExecutionRequest {
    fn new(command: CommandSpec) -> Self {
        Self {
            command,
            env_overrides: BTreeMap::new(),
            working_dir: None,
            timeout: None,
            interactive: false,
        }
    }

    pub fn argv<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(CommandSpec::Argv(argv.into_iter().map(Into::into).collect()))
    }

    pub fn shell_line(line: impl Into<String>) -> Self {
        Self::new(CommandSpec::ShellLine(line.into()))
    }

    /// Override (or add) one variable in the child's environment.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_overrides.insert(key.into(), value.into());
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_overrides
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Select pty-backed execution with live echo and input forwarding.
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn command(&self) -> &CommandSpec {
        &self.command
    }

    pub fn env_overrides(&self) -> &BTreeMap<String, String> {
        &self.env_overrides
    }

    pub fn working_dir_path(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// The argv actually handed to the OS, given the shell used for shell lines.
    pub fn resolved_argv(&self, shell: &str) -> Vec<String> {
        match &self.command {
            CommandSpec::Argv(argv) => argv.clone(),
            CommandSpec::ShellLine(line) => {
                vec![shell.to_string(), "-c".to_string(), line.clone()]
            }
        }
    }

    /// Short human-readable form used in log lines.
    pub fn display_command(&self) -> String {
        match &self.command {
            CommandSpec::Argv(argv) => argv.join(" "),
            CommandSpec::ShellLine(line) => line.clone(),
        }
    }
}
