//! Wildcard-binding prober.
//!
//! A process inside a container can only reach a host service through the
//! host gateway if that service listens on the wildcard address. This module
//! answers exactly one question: is *something* in LISTEN state on
//! `0.0.0.0:port` (or `[::]:port`)?
//!
//! The primary source is `/proc/net/tcp{,6}`. Where procfs is unavailable
//! the prober falls back to parsing `ss -ltn` output. It never errors: any
//! failure to inspect the socket table reads as "not bound".

use std::path::Path;
use std::process::Command;

/// True if a listener on `port` is bound to the wildcard address.
///
/// Loopback-only listeners (`127.0.0.1`, `::1`) do not count.
pub fn is_bound_to_wildcard(port: u16) -> bool {
    let mut table_seen = false;

    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        if !Path::new(table).exists() {
            continue;
        }
        if let Ok(content) = std::fs::read_to_string(table) {
            table_seen = true;
            if proc_table_has_wildcard_listener(&content, port) {
                return true;
            }
        }
    }

    if table_seen {
        return false;
    }

    // No procfs (macOS, some sandboxes): ask ss.
    match Command::new("ss").args(["-l", "-t", "-n", "-H"]).output() {
        Ok(output) if output.status.success() => {
            ss_has_wildcard_listener(&String::from_utf8_lossy(&output.stdout), port)
        }
        _ => false,
    }
}

/// Scan one `/proc/net/tcp`-format table for a wildcard LISTEN entry on `port`.
///
/// Lines look like:
/// `   0: 00000000:2CAF 00000000:0000 0A ...` — field 1 is `hex_addr:hex_port`,
/// field 3 is the socket state (`0A` = LISTEN). The wildcard address is
/// all-zero hex in both the IPv4 and IPv6 tables.
fn proc_table_has_wildcard_listener(content: &str, port: u16) -> bool {
    let want_port = format!("{:04X}", port);

    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (Some(local), Some(state)) = (fields.get(1), fields.get(3)) else {
            continue;
        };
        if *state != "0A" {
            continue;
        }
        let Some((addr, local_port)) = local.rsplit_once(':') else {
            continue;
        };
        if local_port == want_port && addr.bytes().all(|b| b == b'0') {
            return true;
        }
    }
    false
}

/// Scan `ss -ltn` output for a wildcard listener on `port`.
///
/// The local address column reads `0.0.0.0:11434`, `*:11434` or
/// `[::]:11434` for wildcard binds.
fn ss_has_wildcard_listener(content: &str, port: u16) -> bool {
    let suffix = format!(":{}", port);

    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // With -H the columns are: State Recv-Q Send-Q Local:Port Peer:Port;
        // without it the first line is a header that won't match anyway.
        let Some(local) = fields.iter().find(|f| f.ends_with(&suffix)) else {
            continue;
        };
        let addr = &local[..local.len() - suffix.len()];
        if matches!(addr, "0.0.0.0" | "*" | "[::]" | "::") {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    const PROC_SAMPLE: &str = "\
  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000:2CAF 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 12345 1 0000000000000000 100 0 0 10 0
   1: 0100007F:1538 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 12346 1 0000000000000000 100 0 0 10 0
   2: 00000000:1F90 0100007F:D431 01 00000000:00000000 00:00000000 00000000  1000        0 12347 1 0000000000000000 100 0 0 10 0
";

    #[test]
    fn proc_table_wildcard_listen_detected() {
        // 0x2CAF = 11439, wildcard, LISTEN
        assert!(proc_table_has_wildcard_listener(PROC_SAMPLE, 0x2CAF));
    }

    #[test]
    fn proc_table_loopback_listen_rejected() {
        // 0x1538 = 5432, bound to 127.0.0.1
        assert!(!proc_table_has_wildcard_listener(PROC_SAMPLE, 0x1538));
    }

    #[test]
    fn proc_table_established_rejected() {
        // 0x1F90 = 8080 is wildcard but state 01 (ESTABLISHED), not LISTEN
        assert!(!proc_table_has_wildcard_listener(PROC_SAMPLE, 0x1F90));
    }

    #[test]
    fn ss_output_variants() {
        let sample = "\
LISTEN 0      128          0.0.0.0:11434      0.0.0.0:*
LISTEN 0      128        127.0.0.1:5432       0.0.0.0:*
LISTEN 0      511             [::]:8080          [::]:*
";
        assert!(ss_has_wildcard_listener(sample, 11434));
        assert!(!ss_has_wildcard_listener(sample, 5432));
        assert!(ss_has_wildcard_listener(sample, 8080));
        assert!(!ss_has_wildcard_listener(sample, 9999));
    }

    #[test]
    fn live_loopback_listener_is_not_wildcard() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!is_bound_to_wildcard(port));
    }

    #[test]
    fn live_wildcard_listener_is_detected() {
        let listener = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(is_bound_to_wildcard(port));
    }

    #[test]
    fn unused_port_is_not_bound() {
        // Bind-then-drop guarantees the port is free at probe time.
        let port = {
            let listener = TcpListener::bind("0.0.0.0:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(!is_bound_to_wildcard(port));
    }
}
