//! Quantity/price precision discipline.
//!
//! Venues reject values whose decimal scale exceeds the per-symbol filter.
//! Everything here rounds DOWN: a quantity is never inflated to reach a
//! minimum, and a serialized string never carries more fractional digits
//! than the step allows.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

/// Lossy but total conversion from the f64 world into Decimal.
pub fn to_dec(x: f64) -> Decimal {
    Decimal::from_f64_retain(x).unwrap_or(Decimal::ZERO)
}

/// Floor `value` to an integer multiple of `step`. A non-positive step
/// leaves the value untouched; a non-positive value floors to zero.
pub fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    if value <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    if step <= Decimal::ZERO {
        return value;
    }
    let n = (value / step).trunc();
    n * step
}

/// Number of fractional digits implied by a step (0.001 -> 3, 1 -> 0).
pub fn scale_of_step(step: Decimal) -> Option<u32> {
    if step <= Decimal::ZERO {
        return None;
    }
    Some(step.normalize().scale().min(18))
}

/// Serialize with the scale strictly bounded by `strict_scale` (round down,
/// trailing zeros stripped). `1.23456` at scale 3 becomes `"1.234"`, never
/// `"1.2340"`.
pub fn format_amount(value: Decimal, strict_scale: Option<u32>) -> String {
    if value == Decimal::ZERO {
        return "0".to_string();
    }
    let bounded = match strict_scale {
        Some(scale) => {
            value.round_dp_with_strategy(scale.min(18), RoundingStrategy::ToZero)
        }
        None => value,
    };
    let normalized = bounded.normalize();
    if normalized == Decimal::ZERO {
        "0".to_string()
    } else {
        normalized.to_string()
    }
}

/// Floor to step and serialize under the step's scale in one move.
pub fn normalize_and_format(value: Decimal, step: Decimal) -> String {
    let floored = floor_to_step(value, step);
    format_amount(floored, scale_of_step(step))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn floor_to_step_rounds_down() {
        assert_eq!(floor_to_step(dec!(1.23456), dec!(0.001)), dec!(1.234));
        assert_eq!(floor_to_step(dec!(0.0009), dec!(0.001)), dec!(0));
        assert_eq!(floor_to_step(dec!(5), dec!(1)), dec!(5));
        assert_eq!(floor_to_step(dec!(-1), dec!(0.001)), dec!(0));
    }

    #[test]
    fn zero_step_is_identity() {
        assert_eq!(floor_to_step(dec!(1.23456), dec!(0)), dec!(1.23456));
        assert_eq!(scale_of_step(dec!(0)), None);
    }

    #[test]
    fn scale_inference_from_step() {
        assert_eq!(scale_of_step(dec!(0.001)), Some(3));
        assert_eq!(scale_of_step(dec!(0.010)), Some(2));
        assert_eq!(scale_of_step(dec!(1)), Some(0));
        assert_eq!(scale_of_step(dec!(0.00000001)), Some(8));
    }

    #[test]
    fn format_is_strictly_bounded_without_trailing_zeros() {
        assert_eq!(format_amount(dec!(1.23456), Some(3)), "1.234");
        assert_eq!(format_amount(dec!(1.2300), Some(3)), "1.23");
        assert_eq!(format_amount(dec!(1.0), Some(3)), "1");
        assert_eq!(format_amount(dec!(0), Some(3)), "0");
        assert_eq!(format_amount(dec!(0.0004), Some(3)), "0");
    }

    #[test]
    fn spec_boundary_case() {
        // stepSize 0.001 and quantity 1.23456 must serialize as exactly 1.234
        assert_eq!(normalize_and_format(dec!(1.23456), dec!(0.001)), "1.234");
    }

    #[test]
    fn integer_step_drops_fraction() {
        assert_eq!(normalize_and_format(dec!(12.9), dec!(1)), "12");
    }
}
