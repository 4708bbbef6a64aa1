use crate::error::{EngineError, EngineResult};

const MAX_IDR: i64 = 1_000_000_000_000;

/// Parse a user-supplied IDR amount.
///
/// Accepts `100.000` (dot thousands), `100,000` (comma thousands), plain
/// `100000`, with an optional `Rp`/`IDR` prefix. A decimal tail after the
/// non-thousands separator is dropped. Must resolve to a positive integer
/// no larger than 10^12.
pub fn parse_idr(input: &str) -> EngineResult<i64> {
    let mut s = input.trim();

    for prefix in ["Rp", "RP", "rp", "IDR", "idr"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.strip_prefix('.').unwrap_or(rest).trim_start();
            break;
        }
    }

    if s.is_empty() {
        return Err(invalid());
    }

    let digits = if let Some(body) = grouped_digits(s, '.', ',') {
        body
    } else if let Some(body) = grouped_digits(s, ',', '.') {
        body
    } else {
        // Plain number, possibly with a decimal tail to drop.
        let head = s
            .split_once(['.', ','])
            .map(|(h, tail)| {
                if tail.chars().all(|c| c.is_ascii_digit()) {
                    Ok(h)
                } else {
                    Err(invalid())
                }
            })
            .transpose()?
            .unwrap_or(s);
        if head.is_empty() || !head.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        head.to_string()
    };

    let value: i64 = digits.parse().map_err(|_| invalid())?;
    if value <= 0 || value > MAX_IDR {
        return Err(EngineError::Validation(
            "amount must be between 1 and 1,000,000,000,000 IDR".into(),
        ));
    }
    Ok(value)
}

/// Match `<1-3 digits>(<sep><3 digits>)+` with an optional `<dec><digits>`
/// tail, returning the concatenated digits. `None` when the shape differs.
fn grouped_digits(s: &str, sep: char, dec: char) -> Option<String> {
    let (body, _tail) = match s.split_once(dec) {
        Some((b, t)) if t.chars().all(|c| c.is_ascii_digit()) && !t.is_empty() => (b, Some(t)),
        Some(_) => return None,
        None => (s, None),
    };

    let groups: Vec<&str> = body.split(sep).collect();
    if groups.len() < 2 {
        return None;
    }
    if groups[0].is_empty() || groups[0].len() > 3 || !all_digits(groups[0]) {
        return None;
    }
    if !groups[1..].iter().all(|g| g.len() == 3 && all_digits(g)) {
        return None;
    }
    Some(groups.concat())
}

fn all_digits(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_digit())
}

fn invalid() -> EngineError {
    EngineError::Validation("could not parse IDR amount".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_thousands() {
        assert_eq!(parse_idr("100.000").unwrap(), 100_000);
        assert_eq!(parse_idr("1.000.000").unwrap(), 1_000_000);
    }

    #[test]
    fn comma_thousands() {
        assert_eq!(parse_idr("100,000").unwrap(), 100_000);
    }

    #[test]
    fn plain() {
        assert_eq!(parse_idr("100000").unwrap(), 100_000);
    }

    #[test]
    fn prefix_and_decimal_tail() {
        assert_eq!(parse_idr("Rp 50.000,50").unwrap(), 50_000);
        assert_eq!(parse_idr("IDR 250000").unwrap(), 250_000);
        assert_eq!(parse_idr("Rp. 75.000").unwrap(), 75_000);
    }

    #[test]
    fn decimal_tail_on_plain_number() {
        assert_eq!(parse_idr("100000.50").unwrap(), 100_000);
        assert_eq!(parse_idr("100.00").unwrap(), 100);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_idr("abc").is_err());
        assert!(parse_idr("").is_err());
        assert!(parse_idr("-5000").is_err());
        assert!(parse_idr("0").is_err());
        assert!(parse_idr("10.00.00").is_err());
    }

    #[test]
    fn rejects_over_cap() {
        assert!(parse_idr("1000000000001").is_err());
    }
}
