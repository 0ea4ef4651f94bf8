//! Duration parsing for environment-provided values.
//!
//! Accepts human-readable strings like "60s", "2s", "500ms", "5m".

use std::time::Duration;

/// Parse a duration string like "10s", "30s", "1m", "500ms".
///
/// Supported formats:
/// - `"Nms"` - N milliseconds (e.g., "500ms")
/// - `"Ns"` - N seconds (e.g., "30s")
/// - `"Nm"` - N minutes (e.g., "5m")
/// - `"N"` - N seconds (no suffix, assumes seconds)
///
/// Returns `None` if the string cannot be parsed.
pub fn parse_duration_string(s: &str) -> Option<Duration> {
    let s = s.trim();

    if s.is_empty() {
        return None;
    }

    if s.ends_with("ms") {
        s.trim_end_matches("ms")
            .parse::<u64>()
            .ok()
            .map(Duration::from_millis)
    } else if s.ends_with('s') {
        s.trim_end_matches('s')
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    } else if s.ends_with('m') {
        s.trim_end_matches('m')
            .parse::<u64>()
            .ok()
            .map(|m| Duration::from_secs(m * 60))
    } else {
        // Default to seconds if no suffix
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suffixed_durations() {
        assert_eq!(parse_duration_string("5s"), Some(Duration::from_secs(5)));
        assert_eq!(
            parse_duration_string("500ms"),
            Some(Duration::from_millis(500))
        );
        assert_eq!(parse_duration_string("1m"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration_string("30"), Some(Duration::from_secs(30)));
    }

    #[test]
    fn trims_whitespace() {
        assert_eq!(parse_duration_string(" 2s "), Some(Duration::from_secs(2)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_duration_string(""), None);
        assert_eq!(parse_duration_string("abc"), None);
        assert_eq!(parse_duration_string("12x"), None);
        assert_eq!(parse_duration_string("-5s"), None);
    }
}
