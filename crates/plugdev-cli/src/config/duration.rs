//! Human-friendly durations: `200ms`, `45s`, `1.5m`, `2h`.
//!
//! A bare number is read as seconds. Zero and negative values are rejected
//! here; callers that accept `0` as "disabled" check for it first.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

const MS_PER_SECOND: u64 = 1_000;
const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d+(?:\.\d+)?)(ms|s|m|h)?$").expect("duration pattern is a valid regex")
    })
}

/// Parse a duration string. Returns `None` for anything that is not a
/// positive amount with an optional unit.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let trimmed = input.trim().to_ascii_lowercase();
    let captures = pattern().captures(&trimmed)?;
    let amount: f64 = captures.get(1)?.as_str().parse().ok()?;
    let multiplier = match captures.get(2).map(|m| m.as_str()).unwrap_or("s") {
        "ms" => 1,
        "s" => MS_PER_SECOND,
        "m" => MS_PER_MINUTE,
        "h" => MS_PER_HOUR,
        _ => return None,
    };

    let millis = (amount * multiplier as f64).round();
    if !millis.is_finite() || millis <= 0.0 {
        return None;
    }
    Some(Duration::from_millis(millis as u64))
}

/// Format a duration with the largest unit that divides it evenly.
pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis() as u64;
    if ms == 0 {
        return "0ms".to_string();
    }
    if ms % MS_PER_HOUR == 0 {
        format!("{}h", ms / MS_PER_HOUR)
    } else if ms % MS_PER_MINUTE == 0 {
        format!("{}m", ms / MS_PER_MINUTE)
    } else if ms % MS_PER_SECOND == 0 {
        format!("{}s", ms / MS_PER_SECOND)
    } else {
        format!("{}ms", ms)
    }
}
