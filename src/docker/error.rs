use std::time::Duration;
use thiserror::Error;

/// Errors from `docker` subprocess invocations.
#[derive(Debug, Error)]
pub enum DockerError {
    /// The command ran longer than its allotted timeout.
    #[error("Timed out running '{command}' (exceeded {timeout:?})")]
    Timeout { command: String, timeout: Duration },

    /// The command ran but exited non-zero.
    #[error("'{command}' failed: {stderr}")]
    CommandFailed {
        command: String,
        stderr: String,
        exit_code: Option<i32>,
    },

    /// The docker binary couldn't be executed (not in PATH, permission
    /// denied).
    #[error("Failed to execute '{command}': {source}")]
    ExecFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl DockerError {
    pub fn timeout(cmd: impl Into<String>, dur: Duration) -> Self {
        DockerError::Timeout {
            command: cmd.into(),
            timeout: dur,
        }
    }

    /// Build a command-failed error from an `std::process::Output`.
    pub fn failed(cmd: impl Into<String>, output: &std::process::Output) -> Self {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        DockerError::CommandFailed {
            command: cmd.into(),
            stderr,
            exit_code: output.status.code(),
        }
    }

    pub fn exec_failed(cmd: impl Into<String>, err: std::io::Error) -> Self {
        DockerError::ExecFailed {
            command: cmd.into(),
            source: err,
        }
    }
}
