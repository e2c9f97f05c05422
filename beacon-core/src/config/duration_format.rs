//! Duration parsing for configuration files.
//!
//! Supports two formats:
//! - `humantime`: `3s`, `1m 30s`, `500ms`
//! - ISO 8601: `PT3S`, `PT1M30S`

use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Parse a duration string.
///
/// Tries humantime first, then ISO 8601.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }

    if let Ok(d) = iso8601_duration::Duration::parse(s)
        && let Some(std_duration) = d.to_std()
    {
        return Ok(std_duration);
    }

    Err(format!(
        "invalid duration '{s}': expected humantime (3s) or ISO 8601 (PT3S)"
    ))
}

/// Deserialize a duration from a string.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_humantime() {
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1m 30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
    }

    #[test]
    fn test_parse_iso8601() {
        assert_eq!(parse_duration("PT3S").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("PT1M30S").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_deserialize_field() {
        #[derive(Debug, Deserialize)]
        struct Timing {
            #[serde(deserialize_with = "deserialize")]
            interval: Duration,
        }

        let parsed: Timing = serde_saphyr::from_str("interval: 10s\n").unwrap();
        assert_eq!(parsed.interval, Duration::from_secs(10));

        let err = serde_saphyr::from_str::<Timing>("interval: often\n");
        assert!(err.is_err());
    }
}
