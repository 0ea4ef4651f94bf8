use super::HealthChecker;
use crate::error::Result;
use crate::pidfile;
use crate::supervisor::BindCheck;
use async_trait::async_trait;
use std::path::PathBuf;

/// Baseline liveness: the recorded PID answers signal 0 and something is
/// listening on the wildcard port.
pub struct BindingChecker {
    pid_file: PathBuf,
    bind_check: BindCheck,
}

impl BindingChecker {
    pub fn new(pid_file: PathBuf, bind_check: BindCheck) -> Self {
        Self {
            pid_file,
            bind_check,
        }
    }
}

#[async_trait]
impl HealthChecker for BindingChecker {
    async fn check(&self) -> Result<bool> {
        if pidfile::read_live(&self.pid_file).is_none() {
            return Ok(false);
        }
        Ok((self.bind_check)())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn unhealthy_without_pid_file() {
        let dir = TempDir::new().unwrap();
        let checker = BindingChecker::new(dir.path().join("missing.pid"), Arc::new(|| true));
        assert!(!checker.check().await.unwrap());
    }

    #[tokio::test]
    async fn healthy_needs_live_pid_and_binding() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("proc.pid");

        let mut child = std::process::Command::new("sleep")
            .arg("60")
            .spawn()
            .unwrap();
        crate::pidfile::write(&pid_file, child.id()).unwrap();

        let bound = BindingChecker::new(pid_file.clone(), Arc::new(|| true));
        assert!(bound.check().await.unwrap());

        let unbound = BindingChecker::new(pid_file.clone(), Arc::new(|| false));
        assert!(!unbound.check().await.unwrap());

        child.kill().unwrap();
        child.wait().unwrap();
        assert!(!bound.check().await.unwrap());
    }
}
