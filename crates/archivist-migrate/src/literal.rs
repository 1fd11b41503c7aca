//! Duration, size and boolean literals used in the parameters block.
//!
//! Durations: `<n>[s|sec|m|min|h|hour|d|day|w|week]`, seconds when no unit.
//! Sizes: `<n>[B|KB|MB|GB|TB|PB]`, powers of 1024, bytes when no unit.

use std::time::Duration;

const DURATION_UNITS: &[(&str, u64)] = &[
    ("", 1),
    ("s", 1),
    ("sec", 1),
    ("secs", 1),
    ("m", 60),
    ("min", 60),
    ("mins", 60),
    ("h", 3600),
    ("hour", 3600),
    ("hours", 3600),
    ("d", 86_400),
    ("day", 86_400),
    ("days", 86_400),
    ("w", 604_800),
    ("week", 604_800),
    ("weeks", 604_800),
];

const SIZE_UNITS: &[(&str, u64)] = &[
    ("", 1),
    ("b", 1),
    ("k", 1 << 10),
    ("kb", 1 << 10),
    ("m", 1 << 20),
    ("mb", 1 << 20),
    ("g", 1 << 30),
    ("gb", 1 << 30),
    ("t", 1 << 40),
    ("tb", 1 << 40),
    ("p", 1 << 50),
    ("pb", 1 << 50),
];

fn split_number(literal: &str) -> Option<(u64, String)> {
    let trimmed = literal.trim();
    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    if digits_end == 0 {
        return None;
    }
    let value = trimmed[..digits_end].parse::<u64>().ok()?;
    let unit = trimmed[digits_end..].trim().to_ascii_lowercase();
    Some((value, unit))
}

fn scale(literal: &str, units: &[(&str, u64)]) -> Option<u64> {
    let (value, unit) = split_number(literal)?;
    let factor = units
        .iter()
        .find(|(name, _)| *name == unit)
        .map(|(_, factor)| *factor)?;
    value.checked_mul(factor)
}

/// Parses a duration literal such as `5min` or `2h`.
pub fn parse_duration(literal: &str) -> Option<Duration> {
    scale(literal, DURATION_UNITS).map(Duration::from_secs)
}

/// Parses a size literal such as `10TB`.
pub fn parse_size(literal: &str) -> Option<u64> {
    scale(literal, SIZE_UNITS)
}

/// Parses a boolean literal (`TRUE`/`FALSE`, also `yes`/`no`/`1`/`0`).
pub fn parse_bool(literal: &str) -> Option<bool> {
    match literal.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Renders a duration with the largest unit that divides it exactly.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        return "0s".to_string();
    }
    for (unit, factor) in [("w", 604_800), ("d", 86_400), ("h", 3600), ("min", 60)] {
        if secs % factor == 0 {
            return format!("{}{}", secs / factor, unit);
        }
    }
    format!("{}s", secs)
}

/// Renders a byte count with the largest unit that divides it exactly.
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0".to_string();
    }
    for (unit, shift) in [("PB", 50), ("TB", 40), ("GB", 30), ("MB", 20), ("KB", 10)] {
        let factor = 1u64 << shift;
        if bytes % factor == 0 {
            return format!("{}{}", bytes / factor, unit);
        }
    }
    format!("{}B", bytes)
}

/// Renders a boolean the way the parameters block spells it.
pub fn format_bool(value: bool) -> String {
    if value { "TRUE" } else { "FALSE" }.to_string()
}
