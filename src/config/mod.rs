//! Environment-driven configuration.
//!
//! hostlink deliberately has no config file: every knob is an environment
//! variable with a hard-coded default, so each subcommand can run with zero
//! flags. A `.env` file in the working directory is honoured if present
//! (loaded via dotenvy, never overriding variables already in the
//! environment).

mod duration;

pub use duration::parse_duration_string;

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default port Ollama serves on.
pub const DEFAULT_PORT: u16 = 11434;

/// Everything the coupler needs to know, resolved once at startup.
#[derive(Debug, Clone)]
pub struct CouplerConfig {
    /// Container whose lifecycle drives the supervised process.
    pub container: String,
    /// Program to supervise.
    pub command: String,
    /// Arguments for the supervised program.
    pub args: Vec<String>,
    /// Port the supervised process is expected to claim.
    pub port: u16,
    /// Address the process must bind to. Anything inside a container can only
    /// reach the host gateway if this is the wildcard address.
    pub bind_addr: String,
    /// Name of the environment variable that carries `bind_addr:port` to the
    /// child (`OLLAMA_HOST` for Ollama).
    pub bind_env: String,
    /// Extra environment passed through to the child.
    pub extra_env: HashMap<String, String>,
    /// Directory holding the PID file and log files.
    pub state_dir: PathBuf,
    /// How long `start` waits for the binding to appear.
    pub bind_timeout: Duration,
    /// Interval between bind probes while waiting.
    pub bind_poll_interval: Duration,
    /// Grace period between SIGTERM and SIGKILL on stop.
    pub grace_period: Duration,
    /// Health poller tick interval.
    pub poll_interval: Duration,
    /// Run the health poller alongside the event watcher. When false the
    /// coupling is container→host only.
    pub bidirectional: bool,
    /// HTTP endpoint probed for responsiveness; `None` disables the HTTP
    /// check and liveness falls back to PID + binding alone.
    pub health_url: Option<String>,
    /// Command-line pattern used by the orphan sweep on stop.
    pub sweep_pattern: String,
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_duration(key: &str, default: Duration) -> Result<Duration> {
    match std::env::var(key) {
        Ok(raw) => parse_duration_string(&raw).ok_or_else(|| {
            Error::Config(format!(
                "{} is not a valid duration: '{}' (expected e.g. \"30s\", \"500ms\")",
                key, raw
            ))
        }),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> Result<bool> {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(Error::Config(format!(
                "{} is not a boolean: '{}' (expected true/false)",
                key, other
            ))),
        },
        Err(_) => Ok(default),
    }
}

impl CouplerConfig {
    /// Resolve configuration from the process environment.
    ///
    /// Loads a `.env` file from the working directory first if one exists;
    /// real environment variables always win over `.env` entries.
    pub fn from_env() -> Result<Self> {
        // Ignore a missing .env; any other error (unreadable, malformed) is
        // worth surfacing rather than silently running misconfigured.
        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(e) if e.not_found() => {}
            Err(e) => {
                return Err(Error::Config(format!("Failed to load .env file: {}", e)));
            }
        }

        let container = env_string("HOSTLINK_CONTAINER", "n8n");
        let command = env_string("HOSTLINK_COMMAND", "ollama");
        let args: Vec<String> = env_string("HOSTLINK_ARGS", "serve")
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let port: u16 = match std::env::var("HOSTLINK_PORT") {
            Ok(raw) => raw.trim().parse().map_err(|_| {
                Error::Config(format!("HOSTLINK_PORT is not a valid port: '{}'", raw))
            })?,
            Err(_) => DEFAULT_PORT,
        };
        if port == 0 {
            return Err(Error::Config("HOSTLINK_PORT must be non-zero".to_string()));
        }

        let bind_addr = env_string("HOSTLINK_BIND_ADDR", "0.0.0.0");
        let bind_env = env_string("HOSTLINK_BIND_ENV", "OLLAMA_HOST");
        let state_dir = PathBuf::from(env_string("HOSTLINK_STATE_DIR", "/tmp/hostlink"));

        let bind_timeout = env_duration("HOSTLINK_BIND_TIMEOUT", Duration::from_secs(60))?;
        let bind_poll_interval =
            env_duration("HOSTLINK_BIND_POLL_INTERVAL", Duration::from_secs(1))?;
        let grace_period = env_duration("HOSTLINK_GRACE_PERIOD", Duration::from_secs(2))?;
        let poll_interval = env_duration("HOSTLINK_POLL_INTERVAL", Duration::from_secs(30))?;
        let bidirectional = env_bool("HOSTLINK_BIDIRECTIONAL", true)?;

        // Empty string explicitly disables the HTTP responsiveness probe.
        let health_url = match std::env::var("HOSTLINK_HEALTH_URL") {
            Ok(raw) if raw.trim().is_empty() => None,
            Ok(raw) => Some(raw.trim().to_string()),
            Err(_) => Some(format!("http://127.0.0.1:{}/", port)),
        };

        let default_pattern = match args.first() {
            Some(first) => format!("{} {}", command, first),
            None => command.clone(),
        };
        let sweep_pattern = env_string("HOSTLINK_SWEEP_PATTERN", &default_pattern);

        let config = Self {
            container,
            command,
            args,
            port,
            bind_addr,
            bind_env,
            extra_env: HashMap::new(),
            state_dir,
            bind_timeout,
            bind_poll_interval,
            grace_period,
            poll_interval,
            bidirectional,
            health_url,
            sweep_pattern,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.container.is_empty() {
            return Err(Error::Config("container name must not be empty".to_string()));
        }
        if self.command.is_empty() {
            return Err(Error::Config("command must not be empty".to_string()));
        }
        if self.bind_poll_interval.is_zero() {
            return Err(Error::Config(
                "bind poll interval must be non-zero".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Environment passed to the spawned child: the bind variable plus any
    /// extra entries.
    pub fn child_env(&self) -> HashMap<String, String> {
        let mut env = self.extra_env.clone();
        env.insert(
            self.bind_env.clone(),
            format!("{}:{}", self.bind_addr, self.port),
        );
        env
    }

    /// PID file path, e.g. `/tmp/hostlink/ollama.pid`.
    pub fn pid_file(&self) -> PathBuf {
        self.state_dir.join(format!("{}.pid", self.command))
    }

    /// Supervised process log path, e.g. `/tmp/hostlink/ollama.log`.
    pub fn process_log_file(&self) -> PathBuf {
        self.state_dir.join(format!("{}.log", self.command))
    }

    /// The coupler's own diagnostic log.
    pub fn coupler_log_file(&self) -> PathBuf {
        self.state_dir.join("hostlink.log")
    }
}
