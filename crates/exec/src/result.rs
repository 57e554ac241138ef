use serde::Serialize;

/// Successful completion. Built only after every descriptor is drained and
/// closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

impl ExecutionResult {
    pub(crate) fn new(stdout: String, stderr: String, exit_code: i32) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
        }
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn into_parts(self) -> (String, String, i32) {
        (self.stdout, self.stderr, self.exit_code)
    }
}
