//! Container event watcher.
//!
//! Consumes the typed event channel and maps container lifecycle actions to
//! supervisor calls: the container going down takes the process down, the
//! container coming up brings it up. Failures inside the loop are logged
//! and the loop continues — supervision must outlive individual bad cycles.

use crate::docker::{Action, ContainerEvent};
use crate::healthcheck::HealthChecker;
use crate::supervisor::{Lifecycle, StartOutcome, StopOutcome};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Run the watcher until the event channel closes or `cancel` fires.
pub async fn run_event_watcher(
    mut events: mpsc::Receiver<ContainerEvent>,
    lifecycle: Arc<dyn Lifecycle>,
    checker: Arc<dyn HealthChecker>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Event watcher cancelled");
                return;
            }
            event = events.recv() => {
                match event {
                    Some(event) => dispatch_event(event, &*lifecycle, &*checker).await,
                    None => {
                        tracing::info!("Event channel closed; watcher exiting");
                        return;
                    }
                }
            }
        }
    }
}

/// Apply one container event to the supervised process.
pub(crate) async fn dispatch_event(
    event: ContainerEvent,
    lifecycle: &dyn Lifecycle,
    checker: &dyn HealthChecker,
) {
    match &event.action {
        Action::Stop | Action::Die | Action::Kill => {
            tracing::info!(
                "Container went down ({}); stopping supervised process",
                event.raw_action
            );
            match lifecycle.stop().await {
                StopOutcome::Stopped => tracing::info!("Supervised process stopped"),
                StopOutcome::NotRunning => {
                    tracing::debug!("Supervised process was not running")
                }
            }
        }
        Action::Start => {
            if checker.check().await.unwrap_or(false) {
                tracing::debug!("Container started; supervised process already healthy");
                return;
            }
            tracing::info!("Container started; bringing up supervised process");
            match lifecycle.start().await {
                Ok(StartOutcome::Started(pid)) => {
                    tracing::info!("Supervised process up (PID {})", pid)
                }
                Ok(StartOutcome::AlreadyRunning(pid)) => {
                    tracing::debug!("Supervised process already running (PID {})", pid)
                }
                // Fatal for this cycle only: no tight retry loop here, the
                // next lifecycle signal or poller tick tries again.
                Err(e) => tracing::error!("Failed to start supervised process: {}", e),
            }
        }
        Action::Other(name) => {
            tracing::debug!("Ignoring container event '{}'", name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockLifecycle {
        starts: AtomicUsize,
        stops: AtomicUsize,
        live: AtomicBool,
    }

    #[async_trait]
    impl Lifecycle for MockLifecycle {
        async fn start(&self) -> Result<StartOutcome> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.live.store(true, Ordering::SeqCst);
            Ok(StartOutcome::Started(4242))
        }

        async fn stop(&self) -> StopOutcome {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if self.live.swap(false, Ordering::SeqCst) {
                StopOutcome::Stopped
            } else {
                StopOutcome::NotRunning
            }
        }
    }

    struct MirrorChecker(Arc<MockLifecycle>);

    #[async_trait]
    impl HealthChecker for MirrorChecker {
        async fn check(&self) -> Result<bool> {
            Ok(self.0.live.load(Ordering::SeqCst))
        }
    }

    fn event(action: &str) -> ContainerEvent {
        ContainerEvent {
            action: Action::classify(action),
            raw_action: action.to_string(),
            timestamp: None,
        }
    }

    async fn run_sequence(actions: &[&str]) -> Arc<MockLifecycle> {
        let lifecycle = Arc::new(MockLifecycle::default());
        let checker = Arc::new(MirrorChecker(Arc::clone(&lifecycle)));
        let (tx, rx) = mpsc::channel(16);

        for action in actions {
            tx.send(event(action)).await.unwrap();
        }
        drop(tx);

        run_event_watcher(
            rx,
            Arc::clone(&lifecycle) as Arc<dyn Lifecycle>,
            checker,
            CancellationToken::new(),
        )
        .await;
        lifecycle
    }

    #[tokio::test]
    async fn down_actions_stop_the_process() {
        for action in ["stop", "die", "kill"] {
            let lifecycle = run_sequence(&["start", action]).await;
            assert_eq!(lifecycle.starts.load(Ordering::SeqCst), 1);
            assert_eq!(lifecycle.stops.load(Ordering::SeqCst), 1);
            assert!(!lifecycle.live.load(Ordering::SeqCst));
        }
    }

    #[tokio::test]
    async fn start_skipped_when_already_healthy() {
        // Second start event arrives while the process is live.
        let lifecycle = run_sequence(&["start", "start"]).await;
        assert_eq!(lifecycle.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_actions_are_ignored() {
        let lifecycle = run_sequence(&["exec_create: sh", "attach", "health_status"]).await;
        assert_eq!(lifecycle.starts.load(Ordering::SeqCst), 0);
        assert_eq!(lifecycle.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sequences_converge_to_last_action() {
        let lifecycle = run_sequence(&["start", "die", "start", "stop"]).await;
        assert!(!lifecycle.live.load(Ordering::SeqCst));

        let lifecycle = run_sequence(&["stop", "start"]).await;
        assert!(lifecycle.live.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn start_failure_does_not_kill_the_loop() {
        struct FailingLifecycle {
            starts: AtomicUsize,
        }

        #[async_trait]
        impl Lifecycle for FailingLifecycle {
            async fn start(&self) -> Result<StartOutcome> {
                self.starts.fetch_add(1, Ordering::SeqCst);
                Err(crate::error::Error::BindTimeout {
                    command: "ollama".into(),
                    addr: "0.0.0.0".into(),
                    port: 11434,
                    timeout: std::time::Duration::from_secs(60),
                })
            }
            async fn stop(&self) -> StopOutcome {
                StopOutcome::NotRunning
            }
        }

        struct NeverHealthy;
        #[async_trait]
        impl HealthChecker for NeverHealthy {
            async fn check(&self) -> Result<bool> {
                Ok(false)
            }
        }

        let lifecycle = Arc::new(FailingLifecycle {
            starts: AtomicUsize::new(0),
        });
        let (tx, rx) = mpsc::channel(16);
        tx.send(event("start")).await.unwrap();
        tx.send(event("start")).await.unwrap();
        drop(tx);

        run_event_watcher(
            rx,
            Arc::clone(&lifecycle) as Arc<dyn Lifecycle>,
            Arc::new(NeverHealthy),
            CancellationToken::new(),
        )
        .await;

        // Both events were processed despite the first failure.
        assert_eq!(lifecycle.starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_exits_promptly() {
        let lifecycle = Arc::new(MockLifecycle::default());
        let checker = Arc::new(MirrorChecker(Arc::clone(&lifecycle)));
        let (_tx, rx) = mpsc::channel::<ContainerEvent>(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        run_event_watcher(rx, lifecycle as Arc<dyn Lifecycle>, checker, cancel).await;
    }
}
