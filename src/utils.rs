use crate::error::{EngineError, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Minor units per major currency unit (kopecks per rouble, cents per dollar).
pub const MINOR_UNITS_PER_MAJOR: i64 = 100;

/// Rounds to `scale` decimal places, ties to even.
pub fn round_half_even(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointNearestEven)
}

/// Parses a major-unit amount such as `"104.25"` or `"1 017 922,00"` into minor
/// units. Digits past the second fractional place are rounded half-to-even.
pub fn parse_minor_units(text: &str) -> Result<i64> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    if cleaned.is_empty() {
        return Err(EngineError::InvalidAmount("empty amount".to_string()));
    }

    let major = Decimal::from_str(&cleaned)
        .map_err(|e| EngineError::InvalidAmount(format!("'{}': {}", text, e)))?;

    let minor = major
        .checked_mul(Decimal::from(MINOR_UNITS_PER_MAJOR))
        .ok_or_else(|| EngineError::InvalidAmount(format!("'{}' is out of range", text)))?;

    round_half_even(minor, 0)
        .to_i64()
        .ok_or_else(|| EngineError::InvalidAmount(format!("'{}' is out of range", text)))
}

/// Formats minor units as a major-unit string with two fractional digits.
pub fn format_minor_units(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    let per_major = MINOR_UNITS_PER_MAJOR as u64;
    format!("{}{}.{:02}", sign, abs / per_major, abs % per_major)
}

/// `part / whole * 100`, rounded half-to-even at `scale`. `whole` must be non-zero.
pub fn percent_of(part: i64, whole: i64, scale: u32) -> Option<Decimal> {
    if whole == 0 {
        return None;
    }
    let ratio = Decimal::from(part)
        .checked_mul(Decimal::ONE_HUNDRED)?
        .checked_div(Decimal::from(whole))?;
    Some(round_half_even(ratio, scale))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minor_units() {
        assert_eq!(parse_minor_units("104.25").unwrap(), 10425);
        assert_eq!(parse_minor_units("9308,94").unwrap(), 930894);
        assert_eq!(parse_minor_units("-1 782.26").unwrap(), -178226);
        assert_eq!(parse_minor_units("75").unwrap(), 7500);
        assert_eq!(parse_minor_units("0.125").unwrap(), 12);
        assert_eq!(parse_minor_units("0.135").unwrap(), 14);
    }

    #[test]
    fn test_parse_minor_units_rejects_garbage() {
        assert!(matches!(
            parse_minor_units("   "),
            Err(EngineError::InvalidAmount(_))
        ));
        assert!(matches!(
            parse_minor_units("12.3.4"),
            Err(EngineError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_format_minor_units() {
        assert_eq!(format_minor_units(10425), "104.25");
        assert_eq!(format_minor_units(-178226), "-1782.26");
        assert_eq!(format_minor_units(5), "0.05");
        assert_eq!(format_minor_units(0), "0.00");
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(7500, 10425, 2), Some(Decimal::new(7194, 2)));
        assert_eq!(percent_of(2925, 10425, 2), Some(Decimal::new(2806, 2)));
        assert_eq!(percent_of(1, 0, 2), None);
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_half_even(Decimal::new(25, 1), 0), Decimal::from(2));
        assert_eq!(round_half_even(Decimal::new(35, 1), 0), Decimal::from(4));
    }
}
