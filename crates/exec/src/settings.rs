//! Engine settings layered from CLI values, settings files, and environment.
//!
//! Precedence: explicit overrides > `<launch dir>/.ptyexec/settings.toml` >
//! `$PTYEXEC_HOME/settings.toml` > `PTYEXEC_*` environment > defaults.

use anyhow::{anyhow, bail, Context, Result};
use ptyexec_common::paths;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use toml::value::{Table as TomlTable, Value as TomlValue};

const DEFAULT_SHELL: &str = "/bin/sh";

/// Resolved engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSettings {
    /// Read slice for the pty (stdout) channel.
    pub stdout_slice: Duration,
    /// Read slice for the stderr channel.
    pub stderr_slice: Duration,
    /// Readiness timeout of the input forwarder.
    pub input_poll: Duration,
    /// Cadence of child liveness checks.
    pub liveness_poll: Duration,
    /// Upper bound on the post-exit drain of each channel.
    pub drain_grace: Duration,
    pub read_chunk_bytes: usize,
    /// Echo captured output to the operator's terminal as it arrives.
    pub echo: bool,
    /// Shell used for shell-line requests.
    pub shell: String,
    /// Applied when a request carries no timeout of its own.
    pub default_timeout: Option<Duration>,
    pub trace_path: Option<PathBuf>,
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self {
            stdout_slice: Duration::from_millis(1000),
            stderr_slice: Duration::from_millis(500),
            input_poll: Duration::from_millis(100),
            liveness_poll: Duration::from_millis(10),
            drain_grace: Duration::from_millis(250),
            read_chunk_bytes: 4096,
            echo: true,
            shell: default_shell(),
            default_timeout: None,
            trace_path: None,
        }
    }
}

fn default_shell() -> String {
    env::var("SHELL")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SHELL.to_string())
}

/// Partially specified settings from one layer. Also used for explicit
/// (command-line) overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsOverrides {
    pub stdout_slice: Option<Duration>,
    pub stderr_slice: Option<Duration>,
    pub input_poll: Option<Duration>,
    pub liveness_poll: Option<Duration>,
    pub drain_grace: Option<Duration>,
    pub read_chunk_bytes: Option<usize>,
    pub echo: Option<bool>,
    pub shell: Option<String>,
    pub default_timeout: Option<Duration>,
    pub trace_path: Option<PathBuf>,
}

impl SettingsOverrides {
    /// Fill every unset field from `lower`.
    fn or(self, lower: SettingsOverrides) -> SettingsOverrides {
        SettingsOverrides {
            stdout_slice: self.stdout_slice.or(lower.stdout_slice),
            stderr_slice: self.stderr_slice.or(lower.stderr_slice),
            input_poll: self.input_poll.or(lower.input_poll),
            liveness_poll: self.liveness_poll.or(lower.liveness_poll),
            drain_grace: self.drain_grace.or(lower.drain_grace),
            read_chunk_bytes: self.read_chunk_bytes.or(lower.read_chunk_bytes),
            echo: self.echo.or(lower.echo),
            shell: self.shell.or(lower.shell),
            default_timeout: self.default_timeout.or(lower.default_timeout),
            trace_path: self.trace_path.or(lower.trace_path),
        }
    }

    fn apply(self, defaults: ExecSettings) -> ExecSettings {
        ExecSettings {
            stdout_slice: self.stdout_slice.unwrap_or(defaults.stdout_slice),
            stderr_slice: self.stderr_slice.unwrap_or(defaults.stderr_slice),
            input_poll: self.input_poll.unwrap_or(defaults.input_poll),
            liveness_poll: self.liveness_poll.unwrap_or(defaults.liveness_poll),
            drain_grace: self.drain_grace.unwrap_or(defaults.drain_grace),
            read_chunk_bytes: self.read_chunk_bytes.unwrap_or(defaults.read_chunk_bytes),
            echo: self.echo.unwrap_or(defaults.echo),
            shell: self.shell.unwrap_or(defaults.shell),
            default_timeout: self.default_timeout.or(defaults.default_timeout),
            trace_path: self.trace_path.or(defaults.trace_path),
        }
    }
}

impl ExecSettings {
    /// Resolve settings for a process launched in `launch_dir`.
    pub fn resolve(explicit: SettingsOverrides, launch_dir: &Path) -> Result<Self> {
        let dir_settings = load_settings_file(&paths::directory_settings_file(launch_dir))?;
        let global_settings = load_settings_file(&paths::settings_file()?)?;
        let env_settings = load_env_settings()?;

        Ok(explicit
            .or(dir_settings)
            .or(global_settings)
            .or(env_settings)
            .apply(ExecSettings::default()))
    }

    /// Render the settings in the same TOML shape the settings files use.
    pub fn to_toml_string(&self) -> Result<String> {
        let mut exec = TomlTable::new();
        let millis = |d: Duration| TomlValue::Integer(d.as_millis() as i64);
        exec.insert("stdout_slice_ms".into(), millis(self.stdout_slice));
        exec.insert("stderr_slice_ms".into(), millis(self.stderr_slice));
        exec.insert("input_poll_ms".into(), millis(self.input_poll));
        exec.insert("liveness_poll_ms".into(), millis(self.liveness_poll));
        exec.insert("drain_grace_ms".into(), millis(self.drain_grace));
        exec.insert(
            "read_chunk_bytes".into(),
            TomlValue::Integer(self.read_chunk_bytes as i64),
        );
        exec.insert("echo".into(), TomlValue::Boolean(self.echo));
        exec.insert("shell".into(), TomlValue::String(self.shell.clone()));
        if let Some(timeout) = self.default_timeout {
            exec.insert("default_timeout_ms".into(), millis(timeout));
        }

        let mut root = TomlTable::new();
        root.insert("exec".into(), TomlValue::Table(exec));
        if let Some(path) = &self.trace_path {
            let mut trace = TomlTable::new();
            trace.insert(
                "path".into(),
                TomlValue::String(path.to_string_lossy().into_owned()),
            );
            root.insert("trace".into(), TomlValue::Table(trace));
        }

        toml::to_string(&root).context("failed to render settings")
    }
}

fn load_settings_file(path: &Path) -> Result<SettingsOverrides> {
    match fs::read_to_string(path) {
        Ok(contents) => parse_settings(path, &contents),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(SettingsOverrides::default()),
        Err(err) => Err(anyhow!("failed to read {}: {err}", path.display())),
    }
}

fn parse_settings(path: &Path, contents: &str) -> Result<SettingsOverrides> {
    let mut raw: TomlTable =
        toml::from_str(contents).with_context(|| format!("invalid TOML in {}", path.display()))?;

    let mut partial = SettingsOverrides::default();

    if let Some(exec) = raw.remove("exec") {
        let table = section_table(exec, "exec", path)?;
        let file = FileSection {
            table: &table,
            section: "exec",
            path,
        };
        partial.stdout_slice = file.millis("stdout_slice_ms")?;
        partial.stderr_slice = file.millis("stderr_slice_ms")?;
        partial.input_poll = file.millis("input_poll_ms")?;
        partial.liveness_poll = file.millis("liveness_poll_ms")?;
        partial.drain_grace = file.millis("drain_grace_ms")?;
        partial.default_timeout = file.millis("default_timeout_ms")?;
        partial.read_chunk_bytes = file
            .positive_integer("read_chunk_bytes")?
            .map(|n| n as usize);
        partial.echo = file.boolean("echo")?;
        partial.shell = file.string("shell")?;
    }

    if let Some(trace) = raw.remove("trace") {
        let table = section_table(trace, "trace", path)?;
        let file = FileSection {
            table: &table,
            section: "trace",
            path,
        };
        partial.trace_path = file.string("path")?.map(PathBuf::from);
    }

    Ok(partial)
}

fn section_table(value: TomlValue, section: &str, path: &Path) -> Result<TomlTable> {
    match value {
        TomlValue::Table(table) => Ok(table),
        other => bail!(
            "{section} section in {} must be a table (found {})",
            path.display(),
            toml_type_name(&other)
        ),
    }
}

struct FileSection<'a> {
    table: &'a TomlTable,
    section: &'a str,
    path: &'a Path,
}

impl FileSection<'_> {
    fn type_error(&self, key: &str, expected: &str, found: &TomlValue) -> anyhow::Error {
        anyhow!(
            "{}.{key} in {} must be {expected} (found {})",
            self.section,
            self.path.display(),
            toml_type_name(found)
        )
    }

    fn positive_integer(&self, key: &str) -> Result<Option<u64>> {
        match self.table.get(key) {
            Some(TomlValue::Integer(n)) if *n > 0 => Ok(Some(*n as u64)),
            Some(TomlValue::Integer(n)) => bail!(
                "{}.{key} in {} must be positive (found {n})",
                self.section,
                self.path.display()
            ),
            Some(other) => Err(self.type_error(key, "an integer", other)),
            None => Ok(None),
        }
    }

    fn millis(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.positive_integer(key)?.map(Duration::from_millis))
    }

    fn boolean(&self, key: &str) -> Result<Option<bool>> {
        match self.table.get(key) {
            Some(TomlValue::Boolean(value)) => Ok(Some(*value)),
            Some(other) => Err(self.type_error(key, "a boolean", other)),
            None => Ok(None),
        }
    }

    fn string(&self, key: &str) -> Result<Option<String>> {
        match self.table.get(key) {
            Some(TomlValue::String(value)) => {
                let trimmed = value.trim();
                Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
            }
            Some(other) => Err(self.type_error(key, "a string", other)),
            None => Ok(None),
        }
    }
}

fn load_env_settings() -> Result<SettingsOverrides> {
    Ok(SettingsOverrides {
        stdout_slice: env_millis("PTYEXEC_STDOUT_SLICE_MS")?,
        stderr_slice: env_millis("PTYEXEC_STDERR_SLICE_MS")?,
        input_poll: env_millis("PTYEXEC_INPUT_POLL_MS")?,
        liveness_poll: env_millis("PTYEXEC_LIVENESS_POLL_MS")?,
        drain_grace: env_millis("PTYEXEC_DRAIN_GRACE_MS")?,
        read_chunk_bytes: env_positive("PTYEXEC_READ_CHUNK_BYTES")?.map(|n| n as usize),
        echo: env::var("PTYEXEC_ECHO")
            .ok()
            .map(|raw| parse_bool("PTYEXEC_ECHO", &raw))
            .transpose()?,
        shell: env_string("PTYEXEC_SHELL"),
        default_timeout: env_millis("PTYEXEC_TIMEOUT_MS")?,
        trace_path: env_string("PTYEXEC_TRACE_LOG").map(PathBuf::from),
    })
}

fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_positive(name: &str) -> Result<Option<u64>> {
    let Some(raw) = env_string(name) else {
        return Ok(None);
    };
    match raw.parse::<u64>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => bail!("{name} must be a positive integer (found {raw})"),
    }
}

fn env_millis(name: &str) -> Result<Option<Duration>> {
    Ok(env_positive(name)?.map(Duration::from_millis))
}

pub(crate) fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{name} must be a boolean (found {other})"),
    }
}

fn toml_type_name(value: &TomlValue) -> &'static str {
    match value {
        TomlValue::Array(_) => "array",
        TomlValue::Boolean(_) => "boolean",
        TomlValue::Datetime(_) => "datetime",
        TomlValue::Float(_) => "float",
        TomlValue::Integer(_) => "integer",
        TomlValue::String(_) => "string",
        TomlValue::Table(_) => "table",
    }
}
