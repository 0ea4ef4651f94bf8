//! Typed container lifecycle events.
//!
//! `docker events --format '{{json .}}'` is a line-oriented stream of JSON
//! objects. [`EventStream::subscribe`] turns it into an mpsc channel of
//! [`ContainerEvent`]s: a background task owns the subprocess, parses lines,
//! and transparently resubscribes when the stream is interrupted. Consumers
//! never see the text protocol.

use super::DockerClient;
use crate::error::{Error, Result};
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Attempts made to reach the daemon before `watch` gives up at startup.
const MAX_SUBSCRIBE_ATTEMPTS: u32 = 5;

/// Timeout for the per-attempt daemon probe.
const DAEMON_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle actions the watcher reacts to. Everything else — exec_create,
/// health_status, attach and friends — is `Other` and only logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Die,
    Kill,
    Other(String),
}

impl Action {
    /// Exact-match classification. Docker emits compound actions like
    /// `exec_die` and `health_status: healthy`; substring matching would
    /// misfile those, so only the four bare verbs are recognised.
    pub fn classify(raw: &str) -> Self {
        match raw {
            "start" => Action::Start,
            "stop" => Action::Stop,
            "die" => Action::Die,
            "kill" => Action::Kill,
            other => Action::Other(other.to_string()),
        }
    }

    /// The container is gone (or going) for all three of these.
    pub fn is_down(&self) -> bool {
        matches!(self, Action::Stop | Action::Die | Action::Kill)
    }
}

/// One observed lifecycle event. Immutable; consumed exactly once by the
/// watcher's dispatch and otherwise only logged.
#[derive(Debug, Clone)]
pub struct ContainerEvent {
    pub action: Action,
    pub raw_action: String,
    /// Daemon-side Unix timestamp, when present.
    pub timestamp: Option<i64>,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "Type")]
    kind: Option<String>,
    #[serde(rename = "Action")]
    action: Option<String>,
    #[serde(rename = "time")]
    time: Option<i64>,
}

/// Parse one `docker events` JSON line into a typed event.
///
/// Returns `None` for non-container event types and for lines that don't
/// parse — a malformed line must never take the watcher down.
pub fn parse_event_line(line: &str) -> Option<ContainerEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let raw: RawEvent = serde_json::from_str(line).ok()?;
    if let Some(kind) = &raw.kind {
        if kind != "container" {
            return None;
        }
    }
    let raw_action = raw.action?;
    Some(ContainerEvent {
        action: Action::classify(&raw_action),
        raw_action,
        timestamp: raw.time,
    })
}

/// Capped exponential backoff with jitter for (re)subscribe attempts:
/// 1s, 2s, 4s, 8s, 16s, then 30s, each ±50% to avoid a thundering herd of
/// couplers hammering a restarting daemon.
fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(5);
    let base_secs = 2u64.pow(exponent).min(30);

    let jitter_range = base_secs / 2;
    let min_delay = base_secs.saturating_sub(jitter_range);
    let max_delay = base_secs.saturating_add(jitter_range);

    let secs = if min_delay < max_delay {
        rand::thread_rng().gen_range(min_delay..=max_delay)
    } else {
        base_secs
    };
    Duration::from_secs(secs)
}

/// Live subscription to one container's lifecycle events.
pub struct EventStream {
    rx: mpsc::Receiver<ContainerEvent>,
}

impl EventStream {
    /// Establish the subscription.
    ///
    /// The daemon is probed with bounded retries and backoff; if it never
    /// answers this returns [`Error::EventStream`] and `watch` should treat
    /// that as fatal. Once established, interruptions of the stream trigger
    /// resubscription in the background — they never surface here.
    pub async fn subscribe(
        client: DockerClient,
        container: String,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let mut attempt = 1u32;
        loop {
            if client.daemon_healthy(DAEMON_PROBE_TIMEOUT).await {
                break;
            }
            if attempt >= MAX_SUBSCRIBE_ATTEMPTS {
                return Err(Error::EventStream {
                    attempts: MAX_SUBSCRIBE_ATTEMPTS,
                });
            }
            let delay = backoff_delay(attempt);
            tracing::warn!(
                "Docker daemon not reachable (attempt {}/{}); retrying in {:?}",
                attempt,
                MAX_SUBSCRIBE_ATTEMPTS,
                delay
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(Error::EventStream { attempts: attempt });
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(pump_events(client, container, tx, cancel));
        Ok(Self { rx })
    }

    /// Receive the next lifecycle event. `None` means the subscription has
    /// shut down (cancellation or consumer gone).
    pub async fn next_event(&mut self) -> Option<ContainerEvent> {
        self.rx.recv().await
    }

    /// Hand the raw channel to a consumer loop.
    pub fn into_receiver(self) -> mpsc::Receiver<ContainerEvent> {
        self.rx
    }
}

/// Background task: own the `docker events` child, feed the channel,
/// resubscribe on interruption until cancelled.
async fn pump_events(
    client: DockerClient,
    container: String,
    tx: mpsc::Sender<ContainerEvent>,
    cancel: CancellationToken,
) {
    let mut attempt = 1u32;

    'resubscribe: loop {
        if cancel.is_cancelled() {
            break;
        }

        let mut child = match client.spawn_events(&container) {
            Ok(child) => child,
            Err(e) => {
                let delay = backoff_delay(attempt);
                tracing::warn!("Failed to start docker events: {}; retrying in {:?}", e, delay);
                attempt = attempt.saturating_add(1);
                tokio::select! {
                    _ = cancel.cancelled() => break 'resubscribe,
                    _ = tokio::time::sleep(delay) => continue 'resubscribe,
                }
            }
        };

        let Some(stdout) = child.stdout.take() else {
            tracing::error!("docker events child has no stdout; retrying");
            let _ = child.start_kill();
            let _ = child.wait().await;
            attempt = attempt.saturating_add(1);
            continue 'resubscribe;
        };

        tracing::debug!("Subscribed to docker events for container '{}'", container);
        let mut lines = BufReader::new(stdout).lines();
        let mut received_any = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    break 'resubscribe;
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            let Some(event) = parse_event_line(&line) else {
                                tracing::trace!("Skipping unparsed event line: {}", line);
                                continue;
                            };
                            received_any = true;
                            tracing::debug!(
                                "Container '{}' event: {}",
                                container,
                                event.raw_action
                            );
                            if tx.send(event).await.is_err() {
                                // Consumer gone; we're done.
                                let _ = child.start_kill();
                                let _ = child.wait().await;
                                break 'resubscribe;
                            }
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
            }
        }

        // Stream ended: daemon restart, docker CLI death, or transient error.
        let _ = child.wait().await;
        attempt = if received_any { 1 } else { attempt.saturating_add(1) };
        let delay = backoff_delay(attempt);
        tracing::warn!(
            "docker events stream for '{}' interrupted; resubscribing in {:?}",
            container,
            delay
        );
        tokio::select! {
            _ = cancel.cancelled() => break 'resubscribe,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    tracing::debug!("Event pump for '{}' shut down", container);
}
