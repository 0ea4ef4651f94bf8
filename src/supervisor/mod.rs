//! Process supervisor: idempotent start/stop of one detached process,
//! tracked through a PID file.
//!
//! The supervisor is deliberately stateless between calls — the PID file is
//! the single source of truth, so the event watcher and the health poller
//! can both drive it without coordination. Start/stop are idempotent and
//! naturally serialized by the OS: two processes cannot both bind the
//! wildcard port, and the second bind failure shows up on the next probe.

pub mod sweep;

use crate::config::CouplerConfig;
use crate::error::{validate_pid, Error, Result};
use crate::{pidfile, probe};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(unix)]
use nix::sys::signal::{self, killpg, Signal};
#[cfg(unix)]
use nix::unistd::{getpgid, Pid};

/// Injectable wildcard-bind probe. The default consults
/// [`probe::is_bound_to_wildcard`]; tests substitute closures so they can
/// supervise arbitrary commands.
pub type BindCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Window after spawn in which an exit is reported as an immediate crash
/// (with the log tail) instead of a bind timeout much later.
const STARTUP_CRASH_WINDOW: Duration = Duration::from_millis(500);

/// Poll cadence while waiting for a signalled process to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lines of the process log attached to immediate-crash errors.
const CRASH_LOG_TAIL: usize = 15;

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new process was launched and observed bound.
    Started(u32),
    /// A correctly-bound instance was already live; nothing was done.
    AlreadyRunning(u32),
}

/// Result of a stop request. Stopping is infallible: "nothing was running"
/// is a satisfied postcondition, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

/// Start/stop seam for the watcher and poller loops, so tests can drive
/// them with mocks.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn start(&self) -> Result<StartOutcome>;
    async fn stop(&self) -> StopOutcome;
}

/// Supervises one detached external process.
pub struct Supervisor {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    pid_file: PathBuf,
    log_file: PathBuf,
    bind_addr: String,
    port: u16,
    bind_timeout: Duration,
    bind_poll_interval: Duration,
    grace_period: Duration,
    sweep_pattern: String,
    bind_check: BindCheck,
}

impl Supervisor {
    pub fn new(config: &CouplerConfig) -> Self {
        let port = config.port;
        Self::with_bind_check(config, move || probe::is_bound_to_wildcard(port))
    }

    /// Construct with a custom bind probe (tests, exotic setups).
    pub fn with_bind_check(
        config: &CouplerConfig,
        bind_check: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.child_env(),
            pid_file: config.pid_file(),
            log_file: config.process_log_file(),
            bind_addr: config.bind_addr.clone(),
            port: config.port,
            bind_timeout: config.bind_timeout,
            bind_poll_interval: config.bind_poll_interval,
            grace_period: config.grace_period,
            sweep_pattern: config.sweep_pattern.clone(),
            bind_check: Arc::new(bind_check),
        }
    }

    pub fn pid_file(&self) -> &PathBuf {
        &self.pid_file
    }

    /// The bind probe, shared with health checkers.
    pub fn bind_check(&self) -> BindCheck {
        Arc::clone(&self.bind_check)
    }

    /// Ensure exactly one correctly-bound instance is running.
    ///
    /// - live PID + correct binding → [`StartOutcome::AlreadyRunning`];
    /// - live PID + wrong binding (loopback-only) → stop, then relaunch;
    /// - otherwise → spawn detached, record the PID, and poll the bind
    ///   probe until it passes or `bind_timeout` elapses.
    ///
    /// On [`Error::BindTimeout`] the PID file is left in place so the stuck
    /// process can be inspected; callers inside supervision loops log the
    /// error and carry on.
    pub async fn start(&self) -> Result<StartOutcome> {
        if let Some(pid) = pidfile::read_live(&self.pid_file) {
            if (self.bind_check)() {
                tracing::info!(
                    "'{}' already running (PID {}) and bound to {}:{}",
                    self.command,
                    pid,
                    self.bind_addr,
                    self.port
                );
                return Ok(StartOutcome::AlreadyRunning(pid));
            }
            tracing::warn!(
                "'{}' (PID {}) is alive but not bound to {}:{}; relaunching",
                self.command,
                pid,
                self.bind_addr,
                self.port
            );
            self.stop().await;
        }

        let pid = self.spawn_detached()?;
        pidfile::write(&self.pid_file, pid)?;
        tracing::info!(
            "Launched '{}' (PID {}); waiting for it to bind {}:{}",
            self.command,
            pid,
            self.bind_addr,
            self.port
        );

        // Catch instant failures (bad flags, missing model dir) with the log
        // tail now rather than a bind timeout a minute later.
        tokio::time::sleep(STARTUP_CRASH_WINDOW).await;
        if !pidfile::is_alive(pid) {
            pidfile::remove(&self.pid_file);
            return Err(Error::Process(format!(
                "'{}' exited immediately after start.\n\n{}",
                self.command,
                self.log_tail(CRASH_LOG_TAIL)
            )));
        }

        let deadline = Instant::now() + self.bind_timeout;
        loop {
            if (self.bind_check)() {
                tracing::info!(
                    "'{}' (PID {}) is listening on {}:{}",
                    self.command,
                    pid,
                    self.bind_addr,
                    self.port
                );
                return Ok(StartOutcome::Started(pid));
            }
            if !pidfile::is_alive(pid) {
                pidfile::remove(&self.pid_file);
                return Err(Error::Process(format!(
                    "'{}' died while waiting for it to bind {}:{}.\n\n{}",
                    self.command,
                    self.bind_addr,
                    self.port,
                    self.log_tail(CRASH_LOG_TAIL)
                )));
            }
            if Instant::now() >= deadline {
                // PID file stays behind for inspection.
                return Err(Error::BindTimeout {
                    command: self.command.clone(),
                    addr: self.bind_addr.clone(),
                    port: self.port,
                    timeout: self.bind_timeout,
                });
            }
            tokio::time::sleep(self.bind_poll_interval).await;
        }
    }

    /// Stop the supervised process: graceful signal, bounded wait, force
    /// kill; then sweep for orphans matching the command pattern; then
    /// remove the PID file unconditionally.
    pub async fn stop(&self) -> StopOutcome {
        let mut outcome = StopOutcome::NotRunning;

        let tracked = pidfile::read_live(&self.pid_file);
        if let Some(pid) = tracked {
            match validate_pid(pid) {
                Ok(raw) => {
                    self.terminate(raw).await;
                    outcome = StopOutcome::Stopped;
                }
                Err(e) => tracing::warn!("Refusing to signal recorded PID {}: {}", pid, e),
            }
        }

        let exclude: Vec<u32> = tracked.into_iter().collect();
        let swept = sweep::terminate_matching(&self.sweep_pattern, &exclude).await;
        if swept > 0 {
            tracing::info!(
                "Swept {} orphaned process(es) matching '{}'",
                swept,
                self.sweep_pattern
            );
            outcome = StopOutcome::Stopped;
        }

        pidfile::remove(&self.pid_file);
        outcome
    }

    /// Synchronous twin of [`Supervisor::stop`] for contexts that cannot
    /// await — the cleanup guard's `Drop` in particular.
    pub fn stop_blocking(&self) -> StopOutcome {
        let mut outcome = StopOutcome::NotRunning;

        let tracked = pidfile::read_live(&self.pid_file);
        if let Some(pid) = tracked {
            match validate_pid(pid) {
                Ok(raw) => {
                    self.terminate_blocking(raw);
                    outcome = StopOutcome::Stopped;
                }
                Err(e) => tracing::warn!("Refusing to signal recorded PID {}: {}", pid, e),
            }
        }

        let exclude: Vec<u32> = tracked.into_iter().collect();
        if sweep::terminate_matching_blocking(&self.sweep_pattern, &exclude) > 0 {
            outcome = StopOutcome::Stopped;
        }

        pidfile::remove(&self.pid_file);
        outcome
    }

    fn spawn_detached(&self) -> Result<u32> {
        if let Some(parent) = self.log_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)?;
        let log_err = log.try_clone()?;

        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            // The child must outlive us: `hostlink start` exits right after
            // launching, and `watch` only kills it through an explicit stop.
            .kill_on_drop(false);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| {
            Error::Process(format!("Failed to spawn '{}': {}", self.command, e))
        })?;
        child.id().ok_or_else(|| {
            Error::Process(format!(
                "'{}' exited before its PID could be captured",
                self.command
            ))
        })
        // The Child handle is dropped here; tokio reaps the process in the
        // background when it eventually exits.
    }

    #[cfg(unix)]
    async fn terminate(&self, raw_pid: i32) {
        let pid = Pid::from_raw(raw_pid);
        let pgid = process_group(pid).unwrap_or(pid);

        if killpg(pgid, Signal::SIGTERM)
            .or_else(|_| signal::kill(pid, Signal::SIGTERM))
            .is_err()
        {
            tracing::debug!("Process {} was gone before SIGTERM", raw_pid);
            return;
        }

        let deadline = Instant::now() + self.grace_period;
        while Instant::now() < deadline {
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
            if !pidfile::is_alive(raw_pid as u32) {
                tracing::debug!("Process {} exited gracefully", raw_pid);
                return;
            }
        }

        tracing::warn!(
            "Process {} did not exit within {:?}; sending SIGKILL",
            raw_pid,
            self.grace_period
        );
        let _ = killpg(pgid, Signal::SIGKILL).or_else(|_| signal::kill(pid, Signal::SIGKILL));
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }

    #[cfg(unix)]
    fn terminate_blocking(&self, raw_pid: i32) {
        let pid = Pid::from_raw(raw_pid);
        let pgid = process_group(pid).unwrap_or(pid);

        if killpg(pgid, Signal::SIGTERM)
            .or_else(|_| signal::kill(pid, Signal::SIGTERM))
            .is_err()
        {
            return;
        }

        let deadline = Instant::now() + self.grace_period;
        while Instant::now() < deadline {
            std::thread::sleep(EXIT_POLL_INTERVAL);
            if !pidfile::is_alive(raw_pid as u32) {
                return;
            }
        }

        let _ = killpg(pgid, Signal::SIGKILL).or_else(|_| signal::kill(pid, Signal::SIGKILL));
        std::thread::sleep(EXIT_POLL_INTERVAL);
    }

    #[cfg(not(unix))]
    async fn terminate(&self, _raw_pid: i32) {
        tracing::warn!("Signal-based termination is not supported on this platform");
    }

    #[cfg(not(unix))]
    fn terminate_blocking(&self, _raw_pid: i32) {}

    fn log_tail(&self, lines: usize) -> String {
        match std::fs::read_to_string(&self.log_file) {
            Ok(contents) => {
                let all: Vec<&str> = contents.lines().collect();
                let tail: Vec<&str> = all.iter().rev().take(lines).rev().cloned().collect();
                if tail.is_empty() {
                    "Log file is empty (process may have crashed before writing output)"
                        .to_string()
                } else {
                    format!("Last {} log lines:\n{}", tail.len(), tail.join("\n"))
                }
            }
            Err(_) => format!("Could not read log file {}", self.log_file.display()),
        }
    }
}

/// PGID lookup for group-wide signal delivery. The PGID can differ from the
/// PID if the process was reparented, in which case killing only the leader
/// would leave its children holding the port.
#[cfg(unix)]
fn process_group(pid: Pid) -> Option<Pid> {
    match getpgid(Some(pid)) {
        Ok(pgid) if pgid.as_raw() > 0 => Some(pgid),
        _ => None,
    }
}

#[async_trait]
impl Lifecycle for Supervisor {
    async fn start(&self) -> Result<StartOutcome> {
        Supervisor::start(self).await
    }

    async fn stop(&self) -> StopOutcome {
        Supervisor::stop(self).await
    }
}
