//! Utility functions for tsmeta

use crate::common::config::TTL_FOREVER;
use std::time::{SystemTime, UNIX_EPOCH};

/// Parse duration string (e.g., "500ms", "30s", "5m", "1h", "7d") into milliseconds.
/// "forever" and "inf" map to [`TTL_FOREVER`].
pub fn parse_duration_ms(s: &str) -> crate::Result<i64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(crate::Error::InvalidPlan("empty duration".into()));
    }
    if s.eq_ignore_ascii_case("forever") || s.eq_ignore_ascii_case("inf") {
        return Ok(TTL_FOREVER);
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (num_str, unit) = s.split_at(split);

    let num: i64 = num_str
        .parse()
        .map_err(|_| crate::Error::InvalidPlan(format!("invalid duration: {}", s)))?;

    let factor: i64 = match unit {
        "" | "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => {
            return Err(crate::Error::InvalidPlan(format!(
                "unknown duration unit: {}",
                unit
            )))
        }
    };

    num.checked_mul(factor)
        .ok_or_else(|| crate::Error::InvalidPlan(format!("duration overflows: {}", s)))
}

/// Render a millisecond duration the way [`parse_duration_ms`] reads it
pub fn format_duration_ms(ms: i64) -> String {
    if ms == TTL_FOREVER {
        return "forever".to_string();
    }
    const UNITS: &[(i64, &str)] = &[
        (86_400_000, "d"),
        (3_600_000, "h"),
        (60_000, "m"),
        (1_000, "s"),
    ];
    for &(factor, unit) in UNITS {
        if ms != 0 && ms % factor == 0 {
            return format!("{}{}", ms / factor, unit);
        }
    }
    format!("{}ms", ms)
}

/// Get current Unix timestamp (milliseconds)
pub fn timestamp_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Calculate CRC32 checksum
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration_ms("500ms").unwrap(), 500);
        assert_eq!(parse_duration_ms("30s").unwrap(), 30_000);
        assert_eq!(parse_duration_ms("5m").unwrap(), 300_000);
        assert_eq!(parse_duration_ms("1h").unwrap(), 3_600_000);
        assert_eq!(parse_duration_ms("7d").unwrap(), 604_800_000);
        assert_eq!(parse_duration_ms("1234").unwrap(), 1234);
        assert_eq!(parse_duration_ms("forever").unwrap(), TTL_FOREVER);
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration_ms("").is_err());
        assert!(parse_duration_ms("abc").is_err());
        assert!(parse_duration_ms("10x").is_err());
        assert!(parse_duration_ms("99999999999999999d").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration_ms(604_800_000), "7d");
        assert_eq!(format_duration_ms(90_000), "90s");
        assert_eq!(format_duration_ms(1_500), "1500ms");
        assert_eq!(format_duration_ms(TTL_FOREVER), "forever");
    }
}
