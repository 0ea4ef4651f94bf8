//! End-to-end convergence: synthetic container events driving a real
//! supervisor through the watcher loop, the poller restarting a directly
//! killed process, and the cleanup guard stopping the process on drop.

#![cfg(unix)]

use async_trait::async_trait;
use ollama_hostlink::docker::{Action, ContainerEvent, ContainerStatus};
use ollama_hostlink::healthcheck::BindingChecker;
use ollama_hostlink::poller::{run_health_poller, PollerExit};
use ollama_hostlink::supervisor::{Lifecycle, StartOutcome, Supervisor};
use ollama_hostlink::watcher::run_event_watcher;
use ollama_hostlink::{pidfile, CouplerConfig, CouplingGuard, HealthChecker};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn test_config(dir: &TempDir, sleep_secs: &str) -> CouplerConfig {
    CouplerConfig {
        container: "testbox".to_string(),
        command: "sleep".to_string(),
        args: vec![sleep_secs.to_string()],
        port: 19998,
        bind_addr: "0.0.0.0".to_string(),
        bind_env: "TEST_BIND_ADDR".to_string(),
        extra_env: HashMap::new(),
        state_dir: dir.path().to_path_buf(),
        bind_timeout: Duration::from_secs(10),
        bind_poll_interval: Duration::from_millis(100),
        grace_period: Duration::from_secs(2),
        poll_interval: Duration::from_millis(300),
        bidirectional: true,
        health_url: None,
        sweep_pattern: format!("sleep {}", sleep_secs),
    }
}

fn event(action: &str) -> ContainerEvent {
    ContainerEvent {
        action: Action::classify(action),
        raw_action: action.to_string(),
        timestamp: None,
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

struct AlwaysRunning;

#[async_trait]
impl ContainerStatus for AlwaysRunning {
    async fn is_running(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn event_sequence_converges_to_container_state() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, "31536011");
    let pid_file = config.pid_file();

    let supervisor = Arc::new(Supervisor::with_bind_check(&config, || true));
    let checker: Arc<dyn HealthChecker> = Arc::new(BindingChecker::new(
        pid_file.clone(),
        supervisor.bind_check(),
    ));

    let (tx, rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(run_event_watcher(
        rx,
        Arc::clone(&supervisor) as Arc<dyn Lifecycle>,
        Arc::clone(&checker),
        cancel.clone(),
    ));

    // (1) Container starts → process comes up, PID recorded.
    tx.send(event("start")).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            pidfile::read_live(&pid_file).is_some()
        })
        .await,
        "process should be live after a start event"
    );
    let first_pid = pidfile::read(&pid_file).unwrap();

    // (2) Container stops → within the grace period the process is gone and
    // the PID file removed.
    tx.send(event("stop")).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(4), || {
            !pidfile::is_alive(first_pid) && !pid_file.exists()
        })
        .await,
        "process should be stopped shortly after a stop event"
    );

    // (3) Container starts again → process is back.
    tx.send(event("start")).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            pidfile::read_live(&pid_file).is_some()
        })
        .await,
        "process should be live again after the second start event"
    );

    drop(tx);
    watcher.await.unwrap();
    supervisor.stop().await;
}

#[tokio::test]
async fn die_and_kill_events_also_stop_the_process() {
    for action in ["die", "kill"] {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, "31536012");
        let pid_file = config.pid_file();

        let supervisor = Arc::new(Supervisor::with_bind_check(&config, || true));
        let checker: Arc<dyn HealthChecker> = Arc::new(BindingChecker::new(
            pid_file.clone(),
            supervisor.bind_check(),
        ));

        let StartOutcome::Started(pid) = supervisor.start().await.unwrap() else {
            panic!("expected Started");
        };

        let (tx, rx) = mpsc::channel(4);
        let watcher = tokio::spawn(run_event_watcher(
            rx,
            Arc::clone(&supervisor) as Arc<dyn Lifecycle>,
            checker,
            CancellationToken::new(),
        ));

        tx.send(event(action)).await.unwrap();
        drop(tx);
        watcher.await.unwrap();

        assert!(!pidfile::is_alive(pid), "'{}' should stop the process", action);
        assert!(!pid_file.exists());
    }
}

#[tokio::test]
async fn poller_restarts_a_directly_killed_process() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, "31536013");
    let pid_file = config.pid_file();

    let supervisor = Arc::new(Supervisor::with_bind_check(&config, || true));
    let checker: Arc<dyn HealthChecker> = Arc::new(BindingChecker::new(
        pid_file.clone(),
        supervisor.bind_check(),
    ));

    let StartOutcome::Started(pid) = supervisor.start().await.unwrap() else {
        panic!("expected Started");
    };

    let cancel = CancellationToken::new();
    let poller = tokio::spawn(run_health_poller(
        config.poll_interval,
        Arc::new(AlwaysRunning),
        Arc::clone(&supervisor) as Arc<dyn Lifecycle>,
        checker,
        cancel.clone(),
    ));

    // Simulate a crash: kill the process directly, no container event.
    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid as i32),
        nix::sys::signal::Signal::SIGKILL,
    )
    .unwrap();

    // Within one poll interval (plus start latency) it is back, with a new PID.
    assert!(
        wait_until(Duration::from_secs(5), || {
            matches!(pidfile::read_live(&pid_file), Some(new_pid) if new_pid != pid)
        })
        .await,
        "poller should restart the crashed process"
    );

    cancel.cancel();
    assert_eq!(poller.await.unwrap(), PollerExit::Cancelled);
    supervisor.stop().await;
}

#[tokio::test]
async fn poller_exits_when_container_disappears() {
    struct Flag(Arc<AtomicBool>);

    #[async_trait]
    impl ContainerStatus for Flag {
        async fn is_running(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, "31536014");

    let supervisor = Arc::new(Supervisor::with_bind_check(&config, || true));
    let checker: Arc<dyn HealthChecker> = Arc::new(BindingChecker::new(
        config.pid_file(),
        supervisor.bind_check(),
    ));

    let running = Arc::new(AtomicBool::new(true));
    let poller = tokio::spawn(run_health_poller(
        config.poll_interval,
        Arc::new(Flag(Arc::clone(&running))),
        Arc::clone(&supervisor) as Arc<dyn Lifecycle>,
        checker,
        CancellationToken::new(),
    ));

    running.store(false, Ordering::SeqCst);
    assert_eq!(poller.await.unwrap(), PollerExit::ContainerGone);
    supervisor.stop().await;
}

#[tokio::test]
async fn dropping_the_guard_stops_the_process() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, "31536015");
    let pid_file = config.pid_file();

    let supervisor = Arc::new(Supervisor::with_bind_check(&config, || true));
    let StartOutcome::Started(pid) = supervisor.start().await.unwrap() else {
        panic!("expected Started");
    };
    assert!(pidfile::is_alive(pid));

    // The parent "crashing" is modelled by the guard going out of scope
    // without a disarm.
    let guard = CouplingGuard::new(Arc::clone(&supervisor));
    drop(guard);

    assert!(
        wait_until(Duration::from_secs(3), || !pidfile::is_alive(pid)).await,
        "guard drop must stop the supervised process"
    );
    assert!(!pid_file.exists());
}

#[tokio::test]
async fn disarmed_guard_leaves_the_process_alone() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, "31536016");

    let supervisor = Arc::new(Supervisor::with_bind_check(&config, || true));
    let StartOutcome::Started(pid) = supervisor.start().await.unwrap() else {
        panic!("expected Started");
    };

    let guard = CouplingGuard::new(Arc::clone(&supervisor));
    guard.disarm();

    assert!(pidfile::is_alive(pid), "disarmed guard must not stop anything");
    supervisor.stop().await;
    assert!(!pidfile::is_alive(pid));
}
