//! Duration string parsing for policy fields ("30s", "5m", "1h", "7d").

use std::time::Duration;

/// Error type for duration parsing.
#[derive(Debug, thiserror::Error)]
#[error("Invalid duration: {0}")]
pub struct DurationParseError(pub String);

/// Parse a duration string to a `Duration`.
///
/// Accepts `s`, `m`, `h`, `d` and `w` suffixes; a bare number is seconds.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let input = input.trim().to_lowercase();
    if input.is_empty() {
        return Err(DurationParseError("empty string".to_string()));
    }

    let (num_str, multiplier) = if let Some(v) = input.strip_suffix('w') {
        (v, 7 * 24 * 60 * 60)
    } else if let Some(v) = input.strip_suffix('d') {
        (v, 24 * 60 * 60)
    } else if let Some(v) = input.strip_suffix('h') {
        (v, 60 * 60)
    } else if let Some(v) = input.strip_suffix('m') {
        (v, 60)
    } else if let Some(v) = input.strip_suffix('s') {
        (v, 1)
    } else {
        (input.as_str(), 1)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| DurationParseError(input.clone()))?;

    Ok(Duration::from_secs(num * multiplier))
}

/// Render a duration in the most compact suffix form.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs != 0 && secs % (24 * 60 * 60) == 0 {
        format!("{}d", secs / (24 * 60 * 60))
    } else if secs != 0 && secs % (60 * 60) == 0 {
        format!("{}h", secs / (60 * 60))
    } else if secs != 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(7 * 86400));
        assert_eq!(parse_duration("2w").unwrap(), Duration::from_secs(14 * 86400));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("abc").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(300)), "5m");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h");
        assert_eq!(format_duration(Duration::from_secs(86400)), "1d");
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
    }

    #[test]
    fn test_round_trip() {
        for s in ["30s", "5m", "12h", "7d"] {
            assert_eq!(format_duration(parse_duration(s).unwrap()), s);
        }
    }
}
