//! Human duration strings such as `1d7h30m10s` or `2 hours 5 minutes`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

static DURATION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:([0-9]+)\s*d(?:ays?)?)?\s*(?:([0-9]+)\s*h(?:ours?)?)?\s*(?:([0-9]+)\s*m(?:inutes?)?)?\s*(?:([0-9]+)\s*s(?:econds?)?)?\s*$",
    )
    .expect("duration pattern is a valid regex")
});

const UNIT_SECONDS: [u64; 4] = [86_400, 3_600, 60, 1];

/// Parses a compound duration.
///
/// Units must appear in day, hour, minute, second order; each is optional
/// and may be written as a letter or a word. Returns `None` for input that
/// does not match, that sums to zero, or that overflows.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let captures = DURATION_PATTERN.captures(input)?;

    let mut total: u64 = 0;
    for (index, unit) in UNIT_SECONDS.iter().enumerate() {
        if let Some(value) = captures.get(index + 1) {
            let amount: u64 = value.as_str().parse().ok()?;
            total = total.checked_add(amount.checked_mul(*unit)?)?;
        }
    }

    (total > 0).then(|| Duration::from_secs(total))
}

/// Formats a duration as `1d 7h 30m 10s`, omitting zero units.
///
/// Sub-second remainders are dropped; anything under one second is `0s`.
pub fn format_duration(duration: Duration) -> String {
    let mut remaining = duration.as_secs();
    if remaining == 0 {
        return "0s".to_string();
    }

    let mut parts = Vec::with_capacity(4);
    for (unit, suffix) in UNIT_SECONDS.iter().zip(["d", "h", "m", "s"]) {
        let amount = remaining / unit;
        remaining %= unit;
        if amount > 0 {
            parts.push(format!("{amount}{suffix}"));
        }
    }
    parts.join(" ")
}
