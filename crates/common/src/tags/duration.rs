//! Parser for time-to-live strings such as `30s`, `1.5h` or `1h30m`.

use std::time::Duration;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SECOND: u128 = 1_000_000_000;

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(NANOS_PER_MICRO),
        "ms" => Some(NANOS_PER_MILLI),
        "s" => Some(NANOS_PER_SECOND),
        "m" => Some(60 * NANOS_PER_SECOND),
        "h" => Some(60 * 60 * NANOS_PER_SECOND),
        _ => None,
    }
}

/// Parses a sequence of decimal numbers each followed by a unit
/// (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`). A bare `0` is accepted.
/// Negative durations are rejected.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let (negative, mut rest) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };

    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let int_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        let (int_digits, after_int) = rest.split_at(int_len);

        let (frac_digits, after_number) = match after_int.strip_prefix('.') {
            Some(after_dot) => {
                let frac_len = after_dot.bytes().take_while(u8::is_ascii_digit).count();
                after_dot.split_at(frac_len)
            }
            None => ("", after_int),
        };
        if int_digits.is_empty() && frac_digits.is_empty() {
            return Err(format!("invalid duration '{}'", input));
        }

        let unit_len = after_number
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit() || *c == '.')
            .map(|(i, _)| i)
            .unwrap_or(after_number.len());
        let (unit, remaining) = after_number.split_at(unit_len);
        if unit.is_empty() {
            return Err(format!("missing unit in duration '{}'", input));
        }
        let scale =
            unit_nanos(unit).ok_or_else(|| format!("unknown unit '{}' in duration '{}'", unit, input))?;

        let whole: u128 = if int_digits.is_empty() {
            0
        } else {
            int_digits
                .parse()
                .map_err(|_| format!("invalid duration '{}'", input))?
        };
        let mut nanos = whole
            .checked_mul(scale)
            .ok_or_else(|| format!("duration '{}' is out of range", input))?;

        if !frac_digits.is_empty() {
            let fraction: f64 = format!("0.{}", frac_digits)
                .parse()
                .map_err(|_| format!("invalid duration '{}'", input))?;
            nanos += (fraction * scale as f64).round() as u128;
        }

        total = total
            .checked_add(nanos)
            .ok_or_else(|| format!("duration '{}' is out of range", input))?;
        rest = remaining;
    }

    if negative && total > 0 {
        return Err("duration must not be negative".to_string());
    }

    let total = u64::try_from(total).map_err(|_| format!("duration '{}' is out of range", input))?;
    Ok(Duration::from_nanos(total))
}
