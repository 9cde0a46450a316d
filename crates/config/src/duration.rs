//! Go-style durations: `90s`, `5m`, `1h30m`, `1.5h`, `250ms`.

use std::time::Duration;

use crate::ConfigError;

const UNITS: [(&str, f64); 7] = [
    ("ns", 1e-9),
    ("us", 1e-6),
    ("µs", 1e-6),
    ("ms", 1e-3),
    ("s", 1.0),
    ("m", 60.0),
    ("h", 3600.0),
];

fn invalid(value: &str, reason: &str) -> ConfigError {
    ConfigError::Duration { value: value.to_string(), reason: reason.to_string() }
}

pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let s = value.trim();
    if s.is_empty() {
        return Err(invalid(value, "empty"));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    let mut rest = s;
    let mut total = 0f64;
    while !rest.is_empty() {
        let num_len = rest.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(rest.len());
        if num_len == 0 {
            return Err(invalid(value, "expected a number"));
        }
        let n: f64 = rest[..num_len].parse().map_err(|_| invalid(value, "malformed number"))?;
        rest = &rest[num_len..];
        let unit_len = rest.find(|c: char| c.is_ascii_digit() || c == '.').unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        let scale = UNITS
            .iter()
            .find(|(u, _)| *u == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| invalid(value, if unit.is_empty() { "missing unit" } else { "unknown unit" }))?;
        total += n * scale;
        rest = &rest[unit_len..];
    }
    Duration::try_from_secs_f64(total).map_err(|_| invalid(value, "out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_units() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn compound_and_fractional() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("2m10s").unwrap(), Duration::from_secs(130));
    }

    #[test]
    fn zero_without_unit() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn rejects_garbage() {
        for s in ["", "10", "h", "5d", "1h-5m", "1..5s"] {
            assert!(parse_duration(s).is_err(), "{} should fail", s);
        }
    }

    #[test]
    fn oversized_is_out_of_range() {
        match parse_duration("99999999999999999999999h") {
            Err(ConfigError::Duration { reason, .. }) => assert_eq!(reason, "out of range"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
