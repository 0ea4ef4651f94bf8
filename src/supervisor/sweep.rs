//! Orphan sweep by command pattern.
//!
//! A PID file can be lost (unclean shutdown, manual deletion) while the
//! process it recorded lives on, holding the port. Every `stop` therefore
//! also sweeps for processes whose command line matches the supervised
//! command pattern and terminates them, regardless of PID-file state.
//!
//! Matching scans `/proc/<pid>/cmdline`; where procfs is unavailable it
//! falls back to `pgrep -f`.

use crate::error::validate_pid;
use std::time::Duration;

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// How long swept processes get between SIGTERM and SIGKILL. Shorter than
/// the supervisor's grace period: orphans have already lost their PID file
/// and nothing is tracking their shutdown.
const SWEEP_GRACE: Duration = Duration::from_millis(500);

/// Find PIDs whose command line contains `pattern`.
///
/// Our own process (and anything in `exclude`) is skipped so a `hostlink`
/// invocation can never sweep itself.
pub fn find_matching(pattern: &str, exclude: &[u32]) -> Vec<u32> {
    let own_pid = std::process::id();
    let skip = |pid: u32| pid == own_pid || exclude.contains(&pid);

    if let Some(pids) = scan_proc(pattern) {
        return pids.into_iter().filter(|pid| !skip(*pid)).collect();
    }

    pgrep(pattern)
        .into_iter()
        .filter(|pid| !skip(*pid))
        .collect()
}

/// Scan /proc for matching command lines. `None` if procfs is unreadable.
fn scan_proc(pattern: &str) -> Option<Vec<u32>> {
    let entries = std::fs::read_dir("/proc").ok()?;
    let mut pids = Vec::new();

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        // cmdline is NUL-separated argv; a vanished process reads as empty.
        let Ok(raw) = std::fs::read(entry.path().join("cmdline")) else {
            continue;
        };
        let cmdline: String = raw
            .split(|b| *b == 0)
            .filter(|part| !part.is_empty())
            .map(|part| String::from_utf8_lossy(part))
            .collect::<Vec<_>>()
            .join(" ");
        if cmdline.contains(pattern) {
            pids.push(pid);
        }
    }
    Some(pids)
}

fn pgrep(pattern: &str) -> Vec<u32> {
    let output = match std::process::Command::new("pgrep")
        .args(["-f", pattern])
        .output()
    {
        Ok(o) if o.status.success() => o,
        _ => return Vec::new(),
    };
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect()
}

#[cfg(unix)]
fn send(pid: u32, sig: Option<Signal>) -> bool {
    match validate_pid(pid) {
        Ok(raw) => signal::kill(Pid::from_raw(raw), sig).is_ok(),
        Err(_) => false,
    }
}

#[cfg(unix)]
fn terminate_survivors(victims: &[u32]) {
    for pid in victims {
        if crate::pidfile::is_alive(*pid) {
            tracing::warn!("Swept process {} ignored SIGTERM; sending SIGKILL", pid);
            let _ = send(*pid, Some(Signal::SIGKILL));
        }
    }
}

/// Terminate every process matching `pattern` (SIGTERM, short grace,
/// SIGKILL). Returns how many processes were signalled.
#[cfg(unix)]
pub async fn terminate_matching(pattern: &str, exclude: &[u32]) -> usize {
    let victims: Vec<u32> = find_matching(pattern, exclude)
        .into_iter()
        .filter(|pid| send(*pid, Some(Signal::SIGTERM)))
        .collect();
    if victims.is_empty() {
        return 0;
    }
    tokio::time::sleep(SWEEP_GRACE).await;
    terminate_survivors(&victims);
    victims.len()
}

/// Synchronous twin of [`terminate_matching`] for the cleanup guard.
#[cfg(unix)]
pub fn terminate_matching_blocking(pattern: &str, exclude: &[u32]) -> usize {
    let victims: Vec<u32> = find_matching(pattern, exclude)
        .into_iter()
        .filter(|pid| send(*pid, Some(Signal::SIGTERM)))
        .collect();
    if victims.is_empty() {
        return 0;
    }
    std::thread::sleep(SWEEP_GRACE);
    terminate_survivors(&victims);
    victims.len()
}

#[cfg(not(unix))]
pub async fn terminate_matching(_pattern: &str, _exclude: &[u32]) -> usize {
    tracing::warn!("Orphan sweep is not supported on this platform");
    0
}

#[cfg(not(unix))]
pub fn terminate_matching_blocking(_pattern: &str, _exclude: &[u32]) -> usize {
    0
}
