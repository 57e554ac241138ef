//! Command execution on a pseudo-terminal with separate stdout and stderr
//! capture.
//!
//! ```no_run
//! use ptyexec_exec::{execute, ExecutionRequest};
//!
//! let result = execute(&ExecutionRequest::argv(["echo", "hello"])).unwrap();
//! assert_eq!(result.stdout(), "hello\n");
//! ```
//!
//! Three modes are offered:
//!
//! - captured (default): plain pipes, no stdin, output returned;
//! - interactive ([`ExecutionRequest::interactive`]): the child runs on a
//!   pty, sees a real terminal, receives operator input line by line, and
//!   its output is echoed live as well as captured with escape sequences
//!   stripped from stdout;
//! - passthrough ([`Executor::execute_passthrough`]): the child owns the
//!   terminal and nothing is captured.

#[cfg(not(unix))]
compile_error!("ptyexec-exec requires a Unix platform");

mod classify;
pub mod error;
pub mod request;
pub mod result;
mod runner;
mod session;
pub mod settings;
mod telemetry;

pub use error::{ErrorKind, ExecutionError};
pub use ptyexec_common::sanitize;
pub use request::{CommandSpec, ExecutionRequest};
pub use result::ExecutionResult;
pub use runner::{execute, Executor, InputSource};
pub use settings::{ExecSettings, SettingsOverrides};
