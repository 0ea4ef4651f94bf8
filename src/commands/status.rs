use crate::config::CouplerConfig;
use crate::docker::{DockerClient, INSPECT_TIMEOUT};
use crate::error::Result;
use crate::healthcheck::{HealthChecker, HttpChecker};
use crate::{pidfile, probe};
use serde::Serialize;
use std::time::Duration;

#[derive(Serialize)]
struct StatusReport {
    container: String,
    container_state: Option<String>,
    container_running: bool,
    command: String,
    pid: Option<u32>,
    process_alive: bool,
    bound_to_wildcard: bool,
    responsive: Option<bool>,
    pid_file: String,
    log_file: String,
}

/// `hostlink status`: one snapshot of container, process and binding state.
pub async fn run(config: &CouplerConfig, json: bool) -> Result<()> {
    let client = DockerClient::new();
    // An absent container (or unreachable daemon) reads as "no state", not
    // as a hard failure; status should always print something.
    let container_state = client
        .inspect_state(&config.container, INSPECT_TIMEOUT)
        .await
        .ok();
    let container_running = container_state.as_deref() == Some("running");

    let pid = pidfile::read(&config.pid_file());
    let live_pid = pidfile::read_live(&config.pid_file());
    let bound = probe::is_bound_to_wildcard(config.port);

    let responsive = match &config.health_url {
        Some(url) => {
            let checker = HttpChecker::new(url.clone(), Duration::from_secs(5))?;
            Some(checker.check().await.unwrap_or(false))
        }
        None => None,
    };

    let report = StatusReport {
        container: config.container.clone(),
        container_state,
        container_running,
        command: config.command.clone(),
        pid,
        process_alive: live_pid.is_some(),
        bound_to_wildcard: bound,
        responsive,
        pid_file: config.pid_file().display().to_string(),
        log_file: config.process_log_file().display().to_string(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let yes_no = |b: bool| if b { "yes" } else { "no" };
    println!("Container '{}':", report.container);
    println!(
        "  state:              {}",
        report.container_state.as_deref().unwrap_or("(absent)")
    );
    println!("Process '{}':", report.command);
    match report.pid {
        Some(pid) => println!("  recorded PID:       {}", pid),
        None => println!("  recorded PID:       (none)"),
    }
    println!("  alive:              {}", yes_no(report.process_alive));
    println!(
        "  bound to {}:{}: {}",
        config.bind_addr,
        config.port,
        yes_no(report.bound_to_wildcard)
    );
    if let Some(responsive) = report.responsive {
        println!("  responsive:         {}", yes_no(responsive));
    }
    println!("  pid file:           {}", report.pid_file);
    println!("  log file:           {}", report.log_file);

    if report.container_running && !report.process_alive {
        println!("\nContainer is up but the process is down; run `hostlink start`");
    }
    Ok(())
}
