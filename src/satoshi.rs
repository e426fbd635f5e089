/// Satoshi Conversion
///
/// Coin amounts arrive from the node as floating point (`12.5`) or decimal
/// strings (`"12.50000000"`). Multiplying the float by 1e8 produces binary
/// fraction artifacts (0.29 * 1e8 = 28999999.999999996), so the amount is
/// instead rendered with exactly 8 fractional digits and the decimal point
/// is dropped.

use crate::error::{LedgerError, Result};

/// Fractional digits of one coin
pub const COIN_DECIMALS: usize = 8;

/// Minimal units per coin
pub const COIN: i64 = 100_000_000;

/// Convert a decimal coin amount string to minimal units.
pub fn convert_to_satoshi(value: &str) -> Result<i64> {
    let parsed: f64 = value
        .trim()
        .parse()
        .map_err(|_| LedgerError::InvalidAmount(value.to_string()))?;
    f64_to_satoshi(parsed)
}

/// Convert a floating point coin amount to minimal units.
///
/// Rounds to 8 fractional digits, halves away from zero.
pub fn f64_to_satoshi(value: f64) -> Result<i64> {
    if !value.is_finite() {
        return Err(LedgerError::InvalidAmount(value.to_string()));
    }

    // `{:.8}` breaks exact ties to even
    if let Some(doubled) = doubled_midpoint(value) {
        let away = (doubled.abs() + 1) / 2;
        let sats = if value < 0.0 { -away } else { away };
        return i64::try_from(sats).map_err(|_| LedgerError::InvalidAmount(value.to_string()));
    }

    let fixed = format!("{:.*}", COIN_DECIMALS, value);
    fixed
        .replace('.', "")
        .parse::<i64>()
        .map_err(|_| LedgerError::InvalidAmount(fixed))
}

/// `2 * value * 1e8` when `value * 1e8` lies exactly halfway between two
/// integers, else None.
///
/// With `value = m * 2^e` (`m` odd) and `2e8 = 5^8 * 2^9`, the product
/// `m * 5^8 * 2^(e + 9)` is an odd integer only when `e == -9`.
fn doubled_midpoint(value: f64) -> Option<i128> {
    let bits = value.to_bits();
    let exp_bits = ((bits >> 52) & 0x7ff) as i32;
    let fraction = bits & ((1u64 << 52) - 1);
    let (mantissa, exp) = if exp_bits == 0 {
        (fraction, -1074)
    } else {
        (fraction | (1u64 << 52), exp_bits - 1075)
    };
    if mantissa == 0 {
        return None;
    }

    let shift = mantissa.trailing_zeros();
    if exp + shift as i32 != -9 {
        return None;
    }
    let odd = (mantissa >> shift) as i128;
    let doubled = odd * 390_625;
    Some(if value < 0.0 { -doubled } else { doubled })
}

/// Render minimal units as a coin amount with 8 fractional digits.
pub fn format_amount(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    let coin = COIN as u64;
    format!("{}{}.{:08}", sign, abs / coin, abs % coin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_amounts() {
        assert_eq!(convert_to_satoshi("1.23456789").unwrap(), 123456789);
        assert_eq!(convert_to_satoshi("0.1").unwrap(), 10000000);
        assert_eq!(convert_to_satoshi("50").unwrap(), 50 * COIN);
        assert_eq!(convert_to_satoshi("0").unwrap(), 0);
        assert_eq!(convert_to_satoshi("0.00000001").unwrap(), 1);
    }

    #[test]
    fn test_float_artifacts_avoided() {
        // 0.29 * 1e8 == 28999999.999999996 in binary floating point
        assert_eq!(f64_to_satoshi(0.29).unwrap(), 29000000);
        assert_eq!(f64_to_satoshi(1.1).unwrap(), 110000000);
        assert_eq!(f64_to_satoshi(4.35).unwrap(), 435000000);
    }

    #[test]
    fn test_round_trip_eight_decimals() {
        for s in ["1.23456789", "0.1", "0.5", "21000000", "123.45678901", "0.00012345"] {
            let sats = convert_to_satoshi(s).unwrap();
            let back = sats as f64 / COIN as f64;
            assert_eq!(back, s.parse::<f64>().unwrap(), "round trip of {}", s);
        }
    }

    #[test]
    fn test_rounds_to_eight_digits() {
        assert_eq!(convert_to_satoshi("0.123456789").unwrap(), 12345679);
    }

    #[test]
    fn test_exact_ties_round_away_from_zero() {
        // 0.001953125 == 2^-9, so 195312.5 units exactly
        assert_eq!(convert_to_satoshi("0.001953125").unwrap(), 195313);
        assert_eq!(convert_to_satoshi("-0.001953125").unwrap(), -195313);
        assert_eq!(f64_to_satoshi(0.001953125).unwrap(), 195313);
        assert_eq!(f64_to_satoshi(1.001953125).unwrap(), 100195313);
        assert_eq!(f64_to_satoshi(-1.001953125).unwrap(), -100195313);
        // 3 * 2^-9: here the even neighbour is also the one away from zero
        assert_eq!(f64_to_satoshi(0.005859375).unwrap(), 585938);
    }

    #[test]
    fn test_non_ties_unaffected() {
        assert_eq!(f64_to_satoshi(1.5625e-8).unwrap(), 2);
        assert_eq!(f64_to_satoshi(0.5).unwrap(), 50000000);
        assert_eq!(f64_to_satoshi(0.0).unwrap(), 0);
        assert_eq!(f64_to_satoshi(-0.0).unwrap(), 0);
        assert_eq!(doubled_midpoint(0.5), None);
        assert_eq!(doubled_midpoint(0.001953125), Some(390625));
        assert_eq!(doubled_midpoint(-0.001953125), Some(-390625));
    }

    #[test]
    fn test_whitespace_and_negative() {
        assert_eq!(convert_to_satoshi(" 2.5 ").unwrap(), 250000000);
        assert_eq!(convert_to_satoshi("-0.5").unwrap(), -50000000);
    }

    #[test]
    fn test_invalid_amounts() {
        assert!(matches!(convert_to_satoshi("abc"), Err(LedgerError::InvalidAmount(_))));
        assert!(matches!(convert_to_satoshi(""), Err(LedgerError::InvalidAmount(_))));
        assert!(matches!(convert_to_satoshi("NaN"), Err(LedgerError::InvalidAmount(_))));
        assert!(matches!(f64_to_satoshi(f64::INFINITY), Err(LedgerError::InvalidAmount(_))));
        // Overflows i64 once scaled
        assert!(f64_to_satoshi(1e30).is_err());
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(123456789), "1.23456789");
        assert_eq!(format_amount(0), "0.00000000");
        assert_eq!(format_amount(-50000000), "-0.50000000");
        assert_eq!(format_amount(i64::MIN), "-92233720368.54775808");
    }
}
