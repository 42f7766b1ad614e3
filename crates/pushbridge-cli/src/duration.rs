//! Go-style duration strings: `300ms`, `1.5s`, `1m30s`, `1h`.

use std::time::Duration;

const UNITS: &[(&str, u128)] = &[
    ("ns", 1),
    ("us", 1_000),
    ("µs", 1_000),
    ("ms", 1_000_000),
    ("s", 1_000_000_000),
    ("m", 60 * 1_000_000_000),
    ("h", 60 * 60 * 1_000_000_000),
];

/// Parse a sequence of `<number><unit>` pairs. A bare `0` is accepted.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let s = raw.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut rest = s;
    let mut total_nanos: u128 = 0;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_end == 0 {
            return Err(format!("invalid duration `{raw}`: expected a number"));
        }
        let (number, tail) = rest.split_at(num_end);

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_end);
        let Some(&(_, unit_nanos)) = UNITS.iter().find(|(name, _)| *name == unit) else {
            return Err(if unit.is_empty() {
                format!("invalid duration `{raw}`: missing unit")
            } else {
                format!("invalid duration `{raw}`: unknown unit `{unit}`")
            });
        };

        let part = scaled(number, unit_nanos)
            .ok_or_else(|| format!("invalid duration `{raw}`: bad number `{number}`"))?;
        total_nanos = total_nanos
            .checked_add(part)
            .ok_or_else(|| format!("duration `{raw}` is too large"))?;
        rest = tail;
    }

    let secs = u64::try_from(total_nanos / 1_000_000_000)
        .map_err(|_| format!("duration `{raw}` is too large"))?;
    let nanos = (total_nanos % 1_000_000_000) as u32;
    Ok(Duration::new(secs, nanos))
}

/// `number` (integer or decimal) times `unit_nanos`, truncated to whole nanoseconds.
fn scaled(number: &str, unit_nanos: u128) -> Option<u128> {
    let (whole, frac) = match number.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (number, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }

    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut nanos = whole.checked_mul(unit_nanos)?;

    let mut scale = unit_nanos;
    for digit in frac.chars() {
        let digit = u128::from(digit.to_digit(10)?);
        scale /= 10;
        if scale == 0 {
            break;
        }
        nanos = nanos.checked_add(digit * scale)?;
    }
    Some(nanos)
}
