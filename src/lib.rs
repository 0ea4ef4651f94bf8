//! # hostlink
//!
//! Couples a host-native process (Ollama, typically) to a Docker
//! container's lifecycle: when the container starts, the process is brought
//! up bound to the wildcard address so the container can reach it through
//! the host gateway; when the container stops, dies or is killed, the
//! process is taken down with it.
//!
//! ## Pieces
//!
//! - [`probe`]: is something in LISTEN state on `0.0.0.0:port`?
//! - [`supervisor`]: idempotent start/stop of one detached process,
//!   tracked through an atomically-written PID file
//! - [`docker`]: thin CLI client plus the typed container-event stream
//! - [`watcher`] / [`poller`]: the two supervision loops
//! - [`coupler`]: fan-out/await of the loops with guaranteed cleanup
//!
//! ## Concurrency model
//!
//! Two independent loops: the event watcher suspends on the event channel,
//! the health poller on an interval tick. Both drive the supervisor, whose
//! PID file is the only shared state — written whole via rename, so neither
//! loop can observe a torn value, and last-writer-wins is acceptable
//! because both loops agree on the desired end state.

pub mod cli;
pub mod commands;
pub mod config;
pub mod coupler;
pub mod docker;
pub mod error;
pub mod healthcheck;
pub mod logging;
pub mod pidfile;
pub mod poller;
pub mod probe;
pub mod supervisor;
pub mod watcher;

pub use config::CouplerConfig;
pub use coupler::{Coupler, CouplingGuard};
pub use docker::{Action, ContainerEvent, DockerClient, EventStream};
pub use error::{Error, Result};
pub use healthcheck::HealthChecker;
pub use poller::PollerExit;
pub use supervisor::{Lifecycle, StartOutcome, StopOutcome, Supervisor};
