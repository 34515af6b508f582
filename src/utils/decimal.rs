//! Conversions between the `f64` signal engine and `Decimal` exchange values.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// Round down to lot size (quantity precision).
pub fn round_down_to_lot(value: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size <= Decimal::ZERO {
        return value;
    }
    (value / lot_size).floor() * lot_size
}

/// Convert a decimal to `f64`, yielding 0.0 for values outside the `f64` range.
pub fn to_f64_lossy(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Convert an `f64` to a decimal, yielding zero for NaN or infinite input.
pub fn from_f64_lossy(value: f64) -> Decimal {
    if !value.is_finite() {
        return Decimal::ZERO;
    }
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_down_to_lot() {
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.001)), dec!(1.567));
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.01)), dec!(1.56));
        assert_eq!(round_down_to_lot(dec!(0.0123456), dec!(0.000001)), dec!(0.012345));
        assert_eq!(round_down_to_lot(dec!(1.567), Decimal::ZERO), dec!(1.567));
    }

    #[test]
    fn test_f64_conversions() {
        assert_eq!(to_f64_lossy(dec!(50000.5)), 50000.5);
        assert_eq!(from_f64_lossy(0.25), dec!(0.25));
        assert_eq!(from_f64_lossy(f64::NAN), Decimal::ZERO);
        assert_eq!(from_f64_lossy(f64::INFINITY), Decimal::ZERO);
    }
}
