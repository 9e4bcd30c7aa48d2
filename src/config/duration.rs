use std::time::Duration;

use crate::config::error::{ErrorConfig, Result};

/// Parses a Go-style duration such as `100ms`, `1.5s` or `1m30s`.
///
/// A bare `0` is accepted; every other component needs a unit
/// (`ns`, `us`/`µs`, `ms`, `s`, `m`, `h`).
pub fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = |reason| ErrorConfig::InvalidDuration(input.to_string(), reason);

    let mut rest = input.trim();
    if rest.is_empty() {
        return Err(invalid("empty"));
    }
    if rest == "0" {
        return Ok(Duration::ZERO);
    }

    let mut nanos = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(invalid("expected a number"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| invalid("malformed number"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(invalid("missing unit")),
            _ => return Err(invalid("unknown unit")),
        };
        nanos += value * scale;
        rest = &rest[unit_len..];
    }

    if nanos > u64::MAX as f64 {
        return Err(invalid("out of range"));
    }
    Ok(Duration::from_nanos(nanos.round() as u64))
}
