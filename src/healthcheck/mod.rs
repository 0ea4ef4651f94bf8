//! Liveness checks for the supervised process.
//!
//! The watcher and the poller share one question, "is the process alive,
//! correctly bound, and answering?", expressed as a [`HealthChecker`]. The
//! baseline is [`BindingChecker`] (PID alive + wildcard bound); an
//! [`HttpChecker`] can be layered on top through [`CompositeChecker`] when a
//! responsiveness endpoint is configured.

mod binding;
mod http;

pub use binding::BindingChecker;
pub use http::HttpChecker;

use crate::error::Result;
use async_trait::async_trait;

/// Health checker for the supervised process.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Check if the process is healthy. Probe failures read as unhealthy
    /// (`Ok(false)`), not as errors.
    async fn check(&self) -> Result<bool>;
}

/// All-of composition: healthy only if every member checker passes.
/// Evaluated in order with short-circuiting, so put the cheap PID/binding
/// check before any network probe.
pub struct CompositeChecker {
    checkers: Vec<Box<dyn HealthChecker>>,
}

impl CompositeChecker {
    pub fn new(checkers: Vec<Box<dyn HealthChecker>>) -> Self {
        Self { checkers }
    }
}

#[async_trait]
impl HealthChecker for CompositeChecker {
    async fn check(&self) -> Result<bool> {
        for checker in &self.checkers {
            if !checker.check().await.unwrap_or(false) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
