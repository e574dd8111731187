//! Shared helper functions for CLI commands.

use anyhow::{bail, Context};
use chrono::{DateTime, Duration, Utc};

use corpus_ledger::config::SourceSchedule;

/// Parse a duration such as `90s`, `30m`, `24h` or `7d`. A bare number is
/// taken as seconds.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    if digits.is_empty() {
        bail!("invalid duration '{}': expected a number", s);
    }
    let value: i64 = digits
        .parse()
        .with_context(|| format!("invalid duration '{}'", s))?;
    let duration = match unit {
        "" | "s" => Duration::try_seconds(value),
        "m" => Duration::try_minutes(value),
        "h" => Duration::try_hours(value),
        "d" => Duration::try_days(value),
        other => bail!("invalid duration unit '{}' in '{}'", other, s),
    };
    match duration {
        Some(duration) => Ok(duration),
        None => bail!("duration '{}' is out of range", s),
    }
}

/// Format a duration compactly, largest units first.
pub fn format_duration(d: Duration) -> String {
    let total = d.num_seconds().max(0);
    let (days, hours, minutes, seconds) = (
        total / 86_400,
        total % 86_400 / 3_600,
        total % 3_600 / 60,
        total % 60,
    );
    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{}s", seconds));
    }
    parts.join(" ")
}

/// Parse `NAME=CADENCE`, e.g. `news=24h`.
pub fn parse_source_spec(spec: &str) -> anyhow::Result<SourceSchedule> {
    let (name, cadence) = spec
        .split_once('=')
        .with_context(|| format!("expected NAME=CADENCE, got '{}'", spec))?;
    if name.is_empty() {
        bail!("empty source name in '{}'", spec);
    }
    Ok(SourceSchedule::new(name, parse_duration(cadence)?, 0))
}

pub fn format_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30m").unwrap(), Duration::minutes(30));
        assert_eq!(parse_duration("24h").unwrap(), Duration::hours(24));
        assert_eq!(parse_duration("7d").unwrap(), Duration::days(7));
        assert_eq!(parse_duration("90").unwrap(), Duration::seconds(90));
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("5w").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_parse_duration_rejects_overflow() {
        assert!(parse_duration("99999999999999d").is_err());
        assert!(parse_duration("99999999999999999999").is_err());
        assert_eq!(parse_duration("36500d").unwrap(), Duration::days(36_500));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::minutes(90)), "1h 30m");
        assert_eq!(format_duration(Duration::days(1) + Duration::seconds(5)), "1d 5s");
        assert_eq!(format_duration(Duration::zero()), "0s");
        assert_eq!(format_duration(Duration::seconds(-4)), "0s");
    }

    #[test]
    fn test_parse_source_spec() {
        let schedule = parse_source_spec("news=24h").unwrap();
        assert_eq!(schedule.source, "news");
        assert_eq!(schedule.cadence, Duration::hours(24));
        assert!(parse_source_spec("news").is_err());
        assert!(parse_source_spec("=24h").is_err());
    }
}
