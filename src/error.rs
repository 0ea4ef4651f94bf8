use crate::docker::DockerError;
use miette::Diagnostic;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    #[diagnostic(code(hostlink::config::error))]
    Config(String),

    #[error("Docker error: {0}")]
    #[diagnostic(
        code(hostlink::docker::error),
        help("Check that Docker is running with `docker ps`")
    )]
    Docker(#[from] DockerError),

    #[error("Process error: {0}")]
    #[diagnostic(
        code(hostlink::process::error),
        help("Check that the command exists and is executable")
    )]
    Process(String),

    #[error("'{command}' never bound to {addr}:{port} within {timeout:?}")]
    #[diagnostic(
        code(hostlink::supervisor::bind_timeout),
        help(
            "The process is running but not listening on the wildcard address. \
             Inspect its log file and the PID file left in the state directory, \
             then run `hostlink stop` to clean up."
        )
    )]
    BindTimeout {
        command: String,
        addr: String,
        port: u16,
        timeout: Duration,
    },

    #[error("Could not subscribe to Docker events after {attempts} attempts")]
    #[diagnostic(
        code(hostlink::events::unavailable),
        help("Is the Docker daemon up? Verify with `docker info`, then retry `hostlink watch`")
    )]
    EventStream { attempts: u32 },

    #[error("Validation error: {0}")]
    #[diagnostic(code(hostlink::validation::error))]
    Validation(String),

    #[error("IO error: {0}")]
    #[diagnostic(code(hostlink::io::error))]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    #[diagnostic(code(hostlink::json::error))]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Actionable hint for the CLI to print below the error message.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Error::Docker(_) => Some("Check that Docker is running with `docker ps`"),
            Error::Process(_) => Some("Check that the command exists and is executable"),
            Error::BindTimeout { .. } => Some(
                "The process is running but not listening on the wildcard address. \
                 Inspect its log file, then run `hostlink stop` to clean up.",
            ),
            Error::EventStream { .. } => {
                Some("Is the Docker daemon up? Verify with `docker info`")
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Validate a PID before it is used for signal operations.
///
/// Rejects 0 (kernel), 1 (init) and values above `i32::MAX`, which cannot be
/// represented for Unix signal calls.
pub fn validate_pid(pid: u32) -> Result<i32> {
    if pid == 0 || pid == 1 {
        return Err(Error::Validation(format!(
            "PID {} is reserved and will never be signalled",
            pid
        )));
    }
    if pid > i32::MAX as u32 {
        return Err(Error::Validation(format!(
            "PID {} exceeds i32::MAX and cannot be used for signal operations",
            pid
        )));
    }
    Ok(pid as i32)
}

/// Validate a PID for a read-only liveness check.
///
/// Unlike [`validate_pid`] this accepts PID 1 (probing init with signal 0 is
/// harmless) and returns `None` instead of an error for unusable values.
pub fn validate_pid_for_check(pid: u32) -> Option<i32> {
    if pid == 0 || pid > i32::MAX as u32 {
        return None;
    }
    Some(pid as i32)
}
