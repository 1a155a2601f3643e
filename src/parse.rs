//! Parsing utilities for human-readable configuration values

use std::time::Duration;

/// Parse duration string (e.g., "30s", "5m", "2h", "100ms")
///
/// Returns Duration. Defaults to 30 seconds if parsing fails.
///
/// # Supported formats
/// - `"2h"` - hours
/// - `"15m"` - minutes
/// - `"30s"` or `"30"` - seconds
/// - `"100ms"` - milliseconds
pub fn parse_duration(s: &str) -> Duration {
    let s = s.trim().to_lowercase();
    let (num_str, multiplier) = if s.ends_with("ms") {
        (&s[..s.len() - 2], 1)
    } else if s.ends_with('s') {
        (&s[..s.len() - 1], 1000)
    } else if s.ends_with('m') {
        (&s[..s.len() - 1], 60 * 1000)
    } else if s.ends_with('h') {
        (&s[..s.len() - 1], 60 * 60 * 1000)
    } else {
        (s.as_str(), 1000)
    };

    num_str
        .trim()
        .parse::<u64>()
        .map(|n| Duration::from_millis(n * multiplier))
        .unwrap_or(Duration::from_secs(30))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("100ms"), Duration::from_millis(100));
        assert_eq!(parse_duration("30s"), Duration::from_secs(30));
        assert_eq!(parse_duration("15m"), Duration::from_secs(900));
        assert_eq!(parse_duration("2h"), Duration::from_secs(7200));
        assert_eq!(parse_duration("60"), Duration::from_secs(60));
    }

    #[test]
    fn test_parse_duration_fallback() {
        assert_eq!(parse_duration("garbage"), Duration::from_secs(30));
    }
}
