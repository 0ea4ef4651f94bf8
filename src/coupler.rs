//! Top-level orchestration of the lifecycle coupling.
//!
//! `Coupler::run` is the body of `hostlink watch`: subscribe to container
//! events, reconcile once, then run the event watcher and (in bidirectional
//! mode) the health poller concurrently until either finishes or a
//! termination signal arrives. Whatever the exit path (clean return,
//! subscription loss, signal, panic), the supervised process is stopped:
//! that is the [`CouplingGuard`] invariant.

use crate::config::CouplerConfig;
use crate::docker::{DockerClient, DockerContainer, EventStream, INSPECT_TIMEOUT};
use crate::error::Result;
use crate::healthcheck::{BindingChecker, CompositeChecker, HealthChecker, HttpChecker};
use crate::poller::run_health_poller;
use crate::supervisor::{Lifecycle, Supervisor};
use crate::watcher::run_event_watcher;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Timeout for the HTTP responsiveness probe; liveness polls must stay well
/// under the poll interval.
const HEALTH_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Holds the "we are supervising a process" responsibility.
///
/// While armed, dropping the guard stops the supervised process through the
/// supervisor's synchronous path — this covers panics and early returns,
/// the ways a shell script would rely on `trap`. The normal exit path stops
/// explicitly (with proper async grace handling) and then disarms.
pub struct CouplingGuard {
    supervisor: Arc<Supervisor>,
    armed: bool,
}

impl CouplingGuard {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self {
            supervisor,
            armed: true,
        }
    }

    /// Release the responsibility without stopping: the caller already did.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CouplingGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("Coupling ended unexpectedly; stopping supervised process");
            self.supervisor.stop_blocking();
        }
    }
}

/// The assembled coupling: configuration, Docker client, supervisor and the
/// shared health checker.
pub struct Coupler {
    config: CouplerConfig,
    client: DockerClient,
    supervisor: Arc<Supervisor>,
    checker: Arc<dyn HealthChecker>,
}

impl Coupler {
    pub fn new(config: CouplerConfig) -> Result<Self> {
        let supervisor = Arc::new(Supervisor::new(&config));
        let checker = build_checker(&config, &supervisor)?;
        Ok(Self {
            config,
            client: DockerClient::new(),
            supervisor,
            checker,
        })
    }

    /// Run the coupling until the container goes away, the event stream
    /// closes, or a termination signal arrives. Exit code contract: only a
    /// failure to establish the event subscription is an error.
    pub async fn run(&self) -> Result<()> {
        let cancel = CancellationToken::new();

        let events = EventStream::subscribe(
            self.client.clone(),
            self.config.container.clone(),
            cancel.child_token(),
        )
        .await?;
        tracing::info!(
            "Coupled to container '{}' ({} mode)",
            self.config.container,
            if self.config.bidirectional {
                "bidirectional"
            } else {
                "container-driven"
            }
        );

        // From here on the supervised process must not outlive us.
        let guard = CouplingGuard::new(Arc::clone(&self.supervisor));

        self.reconcile_initial_state().await;

        let lifecycle: Arc<dyn Lifecycle> = Arc::clone(&self.supervisor) as Arc<dyn Lifecycle>;
        let watcher = run_event_watcher(
            events.into_receiver(),
            Arc::clone(&lifecycle),
            Arc::clone(&self.checker),
            cancel.child_token(),
        );

        let poller = async {
            if self.config.bidirectional {
                let container: Arc<dyn crate::docker::ContainerStatus> = Arc::new(
                    DockerContainer::new(self.client.clone(), self.config.container.clone()),
                );
                run_health_poller(
                    self.config.poll_interval,
                    container,
                    Arc::clone(&lifecycle),
                    Arc::clone(&self.checker),
                    cancel.child_token(),
                )
                .await
            } else {
                std::future::pending().await
            }
        };

        // Fan-out/await: first loop to finish (or a signal) ends the
        // coupling; the select drops the other loop at its suspension point.
        tokio::select! {
            _ = watcher => tracing::info!("Event watcher finished"),
            exit = poller => tracing::info!("Health poller finished: {:?}", exit),
            _ = shutdown_signal() => tracing::info!("Termination signal received"),
        }

        cancel.cancel();
        let outcome = self.supervisor.stop().await;
        tracing::info!("Coupling shut down; supervised process: {:?}", outcome);
        guard.disarm();
        Ok(())
    }

    /// One reconcile pass before the loops start: a container that is
    /// already up when `watch` begins gets its process immediately instead
    /// of waiting for the next event or poll tick.
    async fn reconcile_initial_state(&self) {
        if !self
            .client
            .is_running(&self.config.container, INSPECT_TIMEOUT)
            .await
        {
            tracing::info!(
                "Container '{}' is not running; waiting for it to start",
                self.config.container
            );
            return;
        }
        if self.checker.check().await.unwrap_or(false) {
            tracing::info!("Container and supervised process both up; nothing to reconcile");
            return;
        }
        if let Err(e) = self.supervisor.start().await {
            // The loops will retry; startup reconciliation is best-effort.
            tracing::error!("Initial start failed: {}", e);
        }
    }
}

fn build_checker(
    config: &CouplerConfig,
    supervisor: &Arc<Supervisor>,
) -> Result<Arc<dyn HealthChecker>> {
    let binding = BindingChecker::new(config.pid_file(), supervisor.bind_check());
    let mut checkers: Vec<Box<dyn HealthChecker>> = vec![Box::new(binding)];
    if let Some(url) = &config.health_url {
        checkers.push(Box::new(HttpChecker::new(
            url.clone(),
            HEALTH_HTTP_TIMEOUT,
        )?));
    }
    Ok(Arc::new(CompositeChecker::new(checkers)))
}

/// Resolve on SIGINT or SIGTERM. A broken signal handler degrades to
/// "killable from outside", never to a crash.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!("Failed to create SIGINT handler: {}", e);
                None
            }
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!("Failed to create SIGTERM handler: {}", e);
                None
            }
        };

        if sigint.is_none() && sigterm.is_none() {
            tracing::warn!(
                "No signal handlers available - process can only be terminated externally"
            );
            std::future::pending::<()>().await;
            return;
        }

        tokio::select! {
            _ = async {
                match sigint.as_mut() {
                    Some(s) => { s.recv().await; }
                    None => std::future::pending().await,
                }
            } => {}
            _ = async {
                match sigterm.as_mut() {
                    Some(s) => { s.recv().await; }
                    None => std::future::pending().await,
                }
            } => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}
