//! Fixed-point amounts: an `i64` count of minor units with two implied decimal digits.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("Invalid number: {0:?}")]
    NumberInvalid(String),
}

/// Parses `-?\d+(\.\d{1,2})?` into minor units.
///
/// A single fractional digit is tenths (`"1.5"` is 150). Anything else,
/// including more than two fractional digits, is rejected rather than rounded.
pub fn parse_amount(text: &str) -> Result<i64, AmountError> {
    let invalid = || AmountError::NumberInvalid(text.to_string());

    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };

    let (integer, fraction) = match unsigned.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (unsigned, None),
    };

    if !is_digits(integer) {
        return Err(invalid());
    }

    let fraction_value: i128 = match fraction {
        None => 0,
        Some(f) if f.len() > 2 || !is_digits(f) => return Err(invalid()),
        Some(f) => {
            let value: i128 = f.parse().map_err(|_| invalid())?;
            if f.len() == 1 {
                value * 10
            } else {
                value
            }
        }
    };

    let integer_value: i128 = integer.parse().map_err(|_| invalid())?;
    let mut minor = integer_value
        .checked_mul(100)
        .and_then(|v| v.checked_add(fraction_value))
        .ok_or_else(invalid)?;

    if negative {
        minor = -minor;
    }

    i64::try_from(minor).map_err(|_| invalid())
}

/// Renders minor units as `[-]integer.ff`, the exact inverse of [`parse_amount`].
pub fn format_amount(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_two_fraction_digits() {
        assert_eq!(parse_amount("123.45").unwrap(), 12345);
        assert_eq!(parse_amount("0.12").unwrap(), 12);
        assert_eq!(parse_amount("0.01").unwrap(), 1);
    }

    #[test]
    fn parse_single_fraction_digit_is_tenths() {
        assert_eq!(parse_amount("1.5").unwrap(), 150);
        assert_eq!(parse_amount("-0.5").unwrap(), -50);
    }

    #[test]
    fn parse_integer_only() {
        assert_eq!(parse_amount("100").unwrap(), 10000);
        assert_eq!(parse_amount("0").unwrap(), 0);
        assert_eq!(parse_amount("-7").unwrap(), -700);
    }

    #[test]
    fn parse_rejects_malformed() {
        for bad in ["", "-", ".5", "1.", "1.234", "1,00", "abc", "+1.00", "1.2.3", " 1.00", "--1"] {
            assert!(
                matches!(parse_amount(bad), Err(AmountError::NumberInvalid(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn parse_rejects_overflow() {
        assert!(parse_amount("92233720368547758.08").is_err());
        assert!(parse_amount("99999999999999999999999").is_err());
    }

    #[test]
    fn format_pads_fraction() {
        assert_eq!(format_amount(12345), "123.45");
        assert_eq!(format_amount(5), "0.05");
        assert_eq!(format_amount(-5), "-0.05");
        assert_eq!(format_amount(0), "0.00");
        assert_eq!(format_amount(-100), "-1.00");
    }

    #[test]
    fn format_then_parse_is_identity() {
        let samples = [
            0,
            1,
            -1,
            9,
            10,
            99,
            100,
            -101,
            12345,
            -987654321,
            i64::MAX,
            i64::MIN,
        ];
        for n in samples {
            assert_eq!(parse_amount(&format_amount(n)).unwrap(), n, "round trip of {n}");
        }
    }
}
