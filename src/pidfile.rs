//! PID file handling.
//!
//! The PID file is the only durable state the supervisor keeps: a single
//! integer, rewritten via write-then-rename so the watcher and the poller
//! can never observe a torn value. `read_live` layers two checks on top of
//! the raw read: the process must answer signal 0, and on Linux its kernel
//! start time must predate the PID file — a PID recycled by the OS after an
//! unclean shutdown must read as "not running", not get signalled.

use crate::error::validate_pid_for_check;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Slack allowed between PID-file mtime and process start time before a PID
/// is considered recycled. Generous because /proc start times are derived
/// from jiffies and uptime, both of coarse precision.
const REUSE_SLACK: Duration = Duration::from_secs(60);

/// Write `pid` to `path` atomically (temp file + rename).
pub fn write(path: &Path, pid: u32) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("pid.tmp");
    std::fs::write(&tmp, format!("{}\n", pid))?;
    std::fs::rename(&tmp, path)
}

/// Read the recorded PID, if the file exists and parses.
pub fn read(path: &Path) -> Option<u32> {
    let content = std::fs::read_to_string(path).ok()?;
    content.trim().parse::<u32>().ok()
}

/// Remove the PID file. Missing file is fine; anything else is logged and
/// swallowed — removal is a best-effort postcondition, not a failure mode.
pub fn remove(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove PID file {}: {}", path.display(), e),
    }
}

/// Read the recorded PID and return it only if it refers to a live process
/// that plausibly is the one we recorded.
pub fn read_live(path: &Path) -> Option<u32> {
    let pid = read(path)?;
    if !is_alive(pid) {
        return None;
    }
    if pid_recycled(pid, path) {
        tracing::warn!(
            "PID {} in {} was recycled by another process; treating as not running",
            pid,
            path.display()
        );
        return None;
    }
    Some(pid)
}

/// Signal-0 liveness probe. A zombie answers signal 0 but is dead for every
/// purpose we care about (it holds no socket and cannot be stopped), so it
/// reads as not alive.
pub fn is_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let Some(raw) = validate_pid_for_check(pid) else {
            return false;
        };
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), None).is_ok() && !is_zombie(pid)
    }
    #[cfg(not(unix))]
    {
        let _ = validate_pid_for_check(pid);
        false
    }
}

/// Check `/proc/<pid>/status` for the Z (zombie) or X (dead) state. Off
/// Linux, or if /proc is unreadable, assume not a zombie.
#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) else {
        return false;
    };
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("State:") {
            return matches!(rest.trim().chars().next(), Some('Z') | Some('X') | Some('x'));
        }
    }
    false
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// True if the process currently holding `pid` started noticeably *after*
/// the PID file was written — i.e. the kernel recycled the PID. Lenient on
/// any parse failure: an uncertain answer must never block a stop.
fn pid_recycled(pid: u32, path: &Path) -> bool {
    let Some(file_age) = file_age(path) else {
        return false;
    };
    let Some(process_age) = process_age(pid) else {
        return false;
    };
    process_age + REUSE_SLACK < file_age
}

fn file_age(path: &Path) -> Option<Duration> {
    let mtime = std::fs::metadata(path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(mtime).ok()
}

/// Age of a process in seconds, from `/proc/<pid>/stat` starttime (field 22)
/// and `/proc/uptime`. Returns `None` off Linux or on any parse failure.
fn process_age(pid: u32) -> Option<Duration> {
    #[cfg(target_os = "linux")]
    {
        let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
        // The comm field is parenthesised and may contain spaces; parse from
        // the closing paren.
        let rest = &stat[stat.rfind(')')? + 2..];
        let starttime_jiffies: u64 = rest.split_whitespace().nth(19)?.parse().ok()?;

        let uptime_raw = std::fs::read_to_string("/proc/uptime").ok()?;
        let uptime_secs: f64 = uptime_raw.split_whitespace().next()?.parse().ok()?;

        // USER_HZ is 100 on every mainstream Linux configuration.
        let jiffies_per_sec = 100.0;
        let age = uptime_secs - starttime_jiffies as f64 / jiffies_per_sec;
        if age < 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(age))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proc.pid");
        write(&path, 4242).unwrap();
        assert_eq!(read(&path), Some(4242));
        // No temp file left behind
        assert!(!path.with_extension("pid.tmp").exists());
    }

    #[test]
    fn read_tolerates_garbage_and_absence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proc.pid");
        assert_eq!(read(&path), None);
        std::fs::write(&path, "not a pid\n").unwrap();
        assert_eq!(read(&path), None);
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proc.pid");
        remove(&path);
        write(&path, 1234).unwrap();
        remove(&path);
        assert!(!path.exists());
        remove(&path);
    }

    #[test]
    fn write_creates_missing_state_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/state/proc.pid");
        write(&path, 77).unwrap();
        assert_eq!(read(&path), Some(77));
    }

    #[cfg(unix)]
    #[test]
    fn read_live_rejects_dead_process() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proc.pid");

        let mut child = std::process::Command::new("sleep")
            .arg("60")
            .spawn()
            .unwrap();
        let pid = child.id();
        write(&path, pid).unwrap();
        assert_eq!(read_live(&path), Some(pid));

        child.kill().unwrap();
        child.wait().unwrap();
        assert_eq!(read_live(&path), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn zombies_are_not_alive() {
        let mut child = std::process::Command::new("sleep")
            .arg("60")
            .spawn()
            .unwrap();
        let pid = child.id();
        assert!(is_alive(pid));

        // Killed but not yet reaped: a zombie answers signal 0 but must not
        // count as alive.
        child.kill().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(!is_alive(pid));

        child.wait().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn read_live_accepts_own_process() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proc.pid");
        let pid = std::process::id();
        write(&path, pid).unwrap();
        // Our own process started before the file was written.
        assert_eq!(read_live(&path), Some(pid));
    }
}
