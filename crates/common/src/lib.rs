//! Shared utilities for ptyexec components

pub mod paths;
pub mod sanitize;

pub use sanitize::{sanitize, strip_csi};

/// Standard log schema constants
pub mod log_schema {
    pub const EVENT_TYPE: &str = "event_type";
    pub const COMMAND_ID: &str = "cmd_id";
    pub const TIMESTAMP: &str = "ts";
    pub const COMPONENT: &str = "component";
    pub const EXIT_CODE: &str = "exit_code";
    pub const TERM_SIGNAL: &str = "term_signal";
    pub const DURATION_MS: &str = "duration_ms";
    pub const OUTCOME: &str = "outcome";
}

const SENSITIVE_ASSIGNMENTS: &[&str] = &["token=", "password=", "secret=", "apikey="];

const SENSITIVE_FLAGS: &[&str] = &["--token", "--password", "--secret", "-p", "-H", "--header"];

const SENSITIVE_ENV_MARKERS: &[&str] = &["TOKEN", "PASSWORD", "SECRET", "API_KEY", "APIKEY"];

fn raw_logging() -> bool {
    std::env::var("PTYEXEC_LOG_OPTS").as_deref() == Ok("raw")
}

/// Redact sensitive information from a single command argument
pub fn redact_sensitive(arg: &str) -> String {
    if raw_logging() {
        return arg.to_string();
    }

    let lowered = arg.to_ascii_lowercase();
    if SENSITIVE_ASSIGNMENTS.iter().any(|needle| lowered.contains(needle)) {
        if let Some(eq_pos) = arg.find('=') {
            return format!("{}=***", &arg[..eq_pos]);
        }
    }

    if SENSITIVE_FLAGS.contains(&arg) {
        return "***".to_string();
    }

    arg.to_string()
}

/// Redact an argv, hiding the value that follows a sensitive flag as well.
///
/// Header values keep their name (`Authorization: ***`) so traces stay readable.
pub fn redact_argv<S: AsRef<str>>(argv: &[S]) -> Vec<String> {
    if raw_logging() {
        return argv.iter().map(|arg| arg.as_ref().to_string()).collect();
    }

    let mut result = Vec::with_capacity(argv.len());
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_ref();
        let redacted = redact_sensitive(arg);
        let was_flag = SENSITIVE_FLAGS.contains(&arg);
        result.push(redacted);

        if was_flag && i + 1 < argv.len() {
            let next = argv[i + 1].as_ref();
            if arg == "-H" || arg == "--header" {
                result.push(redact_header_value(next));
            } else {
                result.push("***".to_string());
            }
            i += 2;
        } else {
            i += 1;
        }
    }

    result
}

fn redact_header_value(header: &str) -> String {
    match header.split_once(':') {
        Some((name, _)) => format!("{}: ***", name.trim()),
        None => "***".to_string(),
    }
}

/// Redact the value of an environment override whose key looks like a credential
pub fn redact_env_value(key: &str, value: &str) -> String {
    if raw_logging() {
        return value.to_string();
    }
    let upper = key.to_ascii_uppercase();
    if SENSITIVE_ENV_MARKERS.iter().any(|marker| upper.contains(marker)) {
        "***".to_string()
    } else {
        value.to_string()
    }
}
