//! Directed-rounding double arithmetic
//!
//! The VM switches between the four IEEE-754 rounding modes at runtime
//! (CFROUND). The mode lives in the VM state instead of the FPU control
//! register, so it can never leak into unrelated code on the same thread.
//!
//! Round-to-nearest uses native `f64` operations. The directed modes go
//! through `rustc_apfloat`, which rounds exactly for every input including
//! subnormal and overflowing results. Square root is not provided by
//! apfloat: the nearest root is corrected one ulp by comparing its exact
//! square, computed in quad precision, with the operand.
//!
//! The bit-level register helpers used to seed and mask float registers
//! live here as well.

use core::cmp::Ordering;

use rustc_apfloat::ieee::{Double, Quad};
use rustc_apfloat::{Float, FloatConvert, Round, StatusAnd};

use crate::config::{
    CONST_EXPONENT_BITS, DYNAMIC_EXPONENT_BITS, DYNAMIC_MANTISSA_MASK, EXPONENT_BIAS, EXPONENT_MASK,
    MANTISSA_MASK, MANTISSA_SIZE, MASK_22_BIT, SCALE_MASK, STATIC_EXPONENT_BITS,
};

/// Rounding modes as encoded by CFROUND (same order as the x86 MXCSR RC field).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum RoundingMode {
    /// Round to nearest, ties to even (default)
    #[default]
    Nearest = 0,
    /// Round toward negative infinity (floor)
    Down = 1,
    /// Round toward positive infinity (ceiling)
    Up = 2,
    /// Round toward zero (truncate)
    Zero = 3,
}

impl From<u64> for RoundingMode {
    fn from(val: u64) -> Self {
        match val & 3 {
            0 => Self::Nearest,
            1 => Self::Down,
            2 => Self::Up,
            _ => Self::Zero,
        }
    }
}

impl RoundingMode {
    fn round(self) -> Round {
        match self {
            Self::Nearest => Round::NearestTiesToEven,
            Self::Down => Round::TowardNegative,
            Self::Up => Round::TowardPositive,
            Self::Zero => Round::TowardZero,
        }
    }
}

type BinaryOp = fn(Double, Double, Round) -> StatusAnd<Double>;

#[inline]
fn to_double(x: f64) -> Double {
    Double::from_bits(u128::from(x.to_bits()))
}

#[inline]
fn to_quad(x: f64) -> Quad {
    let mut loses_info = false;
    let StatusAnd { value, .. } = <Double as FloatConvert<Quad>>::convert(to_double(x), &mut loses_info);
    value
}

/// Returns `native` unless a directed mode is active, in which case the
/// operation is redone in software. NaN results keep the native payload.
#[inline]
fn directed(native: f64, a: f64, b: f64, mode: RoundingMode, op: BinaryOp) -> f64 {
    if mode == RoundingMode::Nearest || native.is_nan() {
        return native;
    }
    let StatusAnd { value, .. } = op(to_double(a), to_double(b), mode.round());
    f64::from_bits(value.to_bits() as u64)
}

/// `a + b` rounded according to `mode`.
#[inline]
pub fn add(a: f64, b: f64, mode: RoundingMode) -> f64 {
    directed(a + b, a, b, mode, Double::add_r)
}

/// `a - b` rounded according to `mode`.
#[inline]
pub fn sub(a: f64, b: f64, mode: RoundingMode) -> f64 {
    directed(a - b, a, b, mode, Double::sub_r)
}

/// `a * b` rounded according to `mode`.
#[inline]
pub fn mul(a: f64, b: f64, mode: RoundingMode) -> f64 {
    directed(a * b, a, b, mode, Double::mul_r)
}

/// `a / b` rounded according to `mode`.
#[inline]
pub fn div(a: f64, b: f64, mode: RoundingMode) -> f64 {
    directed(a / b, a, b, mode, Double::div_r)
}

/// `sqrt(a)` rounded according to `mode`.
///
/// Exact for every non-negative finite `a`: the square of a double needs
/// 106 significant bits and never leaves the quad exponent range.
#[inline]
pub fn sqrt(a: f64, mode: RoundingMode) -> f64 {
    let s = a.sqrt();
    if mode == RoundingMode::Nearest || !s.is_finite() || s == 0.0 {
        return s;
    }
    let wide = to_quad(s);
    let StatusAnd { value: square, .. } = wide.mul_r(wide, Round::NearestTiesToEven);
    match (square.partial_cmp(&to_quad(a)), mode) {
        (Some(Ordering::Greater), RoundingMode::Down | RoundingMode::Zero) => s.next_down(),
        (Some(Ordering::Less), RoundingMode::Up) => s.next_up(),
        _ => s,
    }
}

// =============================================================================
// REGISTER BIT HELPERS
// =============================================================================

/// Positive double with exponent in `[0, 31]` and a random mantissa, used
/// for the A registers.
pub fn small_positive_float_bits(entropy: u64) -> f64 {
    let exponent = ((entropy >> 59) + EXPONENT_BIAS) & EXPONENT_MASK;
    f64::from_bits((exponent << MANTISSA_SIZE) | (entropy & MANTISSA_MASK))
}

/// Exponent bits forced into every E register and FDIV_M divisor.
pub fn static_exponent(entropy: u64) -> u64 {
    let exponent = CONST_EXPONENT_BITS | ((entropy >> (64 - STATIC_EXPONENT_BITS)) << DYNAMIC_EXPONENT_BITS);
    exponent << MANTISSA_SIZE
}

/// Per-program E mask: 22 random mantissa bits plus the static exponent.
pub fn e_mask(entropy: u64) -> u64 {
    (entropy & MASK_22_BIT) | static_exponent(entropy)
}

/// Keeps the low mantissa and dynamic exponent bits of `value` and ORs in
/// `mask`.
#[inline]
pub fn mask_register_exponent_mantissa(value: f64, mask: u64) -> f64 {
    f64::from_bits((value.to_bits() & DYNAMIC_MANTISSA_MASK) | mask)
}

/// FSCAL_R: flips the sign and the top exponent bits.
#[inline]
pub fn scale_negate(value: f64) -> f64 {
    f64::from_bits(value.to_bits() ^ SCALE_MASK)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [RoundingMode; 4] = [
        RoundingMode::Nearest,
        RoundingMode::Down,
        RoundingMode::Up,
        RoundingMode::Zero,
    ];

    #[test]
    fn mode_from_cfround_bits() {
        assert_eq!(RoundingMode::from(0), RoundingMode::Nearest);
        assert_eq!(RoundingMode::from(1), RoundingMode::Down);
        assert_eq!(RoundingMode::from(2), RoundingMode::Up);
        assert_eq!(RoundingMode::from(3), RoundingMode::Zero);
        assert_eq!(RoundingMode::from(7), RoundingMode::Zero);
    }

    #[test]
    fn exact_results_ignore_mode() {
        for mode in ALL {
            assert_eq!(add(1.5, 2.25, mode), 3.75);
            assert_eq!(mul(3.0, 0.5, mode), 1.5);
            assert_eq!(div(9.0, 3.0, mode), 3.0);
            assert_eq!(sqrt(16.0, mode), 4.0);
        }
    }

    #[test]
    fn inexact_add_brackets_exact_sum() {
        let a = 1.0;
        let b = f64::EPSILON / 4.0;
        assert_eq!(add(a, b, RoundingMode::Nearest), 1.0);
        assert_eq!(add(a, b, RoundingMode::Down), 1.0);
        assert_eq!(add(a, b, RoundingMode::Zero), 1.0);
        assert_eq!(add(a, b, RoundingMode::Up), 1.0 + f64::EPSILON);

        assert_eq!(add(-a, -b, RoundingMode::Down), -1.0 - f64::EPSILON);
        assert_eq!(add(-a, -b, RoundingMode::Up), -1.0);
        assert_eq!(add(-a, -b, RoundingMode::Zero), -1.0);
    }

    #[test]
    fn sub_rounds_toward_zero() {
        let r = sub(1.0, f64::EPSILON / 4.0, RoundingMode::Zero);
        assert_eq!(r, 1.0 - f64::EPSILON / 2.0);
        assert_eq!(sub(1.0, f64::EPSILON / 4.0, RoundingMode::Up), 1.0);
    }

    #[test]
    fn exact_zero_sum_sign() {
        assert!(add(1.0, -1.0, RoundingMode::Nearest).is_sign_positive());
        assert!(add(1.0, -1.0, RoundingMode::Up).is_sign_positive());
        assert!(add(1.0, -1.0, RoundingMode::Down).is_sign_negative());
        assert!(add(0.0, 0.0, RoundingMode::Down).is_sign_positive());
        assert!(add(0.0, -0.0, RoundingMode::Down).is_sign_negative());
    }

    #[test]
    fn division_directed() {
        let third_down = div(1.0, 3.0, RoundingMode::Down);
        let third_up = div(1.0, 3.0, RoundingMode::Up);
        assert_eq!(third_up, third_down.next_up());
        assert_eq!(div(1.0, 3.0, RoundingMode::Zero), third_down);
        assert_eq!(div(-1.0, 3.0, RoundingMode::Zero), -third_down);
        assert_eq!(div(1.0, -3.0, RoundingMode::Down), -third_up);
    }

    #[test]
    fn multiplication_directed() {
        let a = 1.0 + f64::EPSILON;
        // (1 + e)^2 = 1 + 2e + e^2: the e^2 tail is dropped by nearest.
        assert_eq!(mul(a, a, RoundingMode::Nearest), 1.0 + 2.0 * f64::EPSILON);
        assert_eq!(mul(a, a, RoundingMode::Down), 1.0 + 2.0 * f64::EPSILON);
        assert_eq!(mul(a, a, RoundingMode::Up), 1.0 + 3.0 * f64::EPSILON);
        assert_eq!(mul(-a, a, RoundingMode::Up), -1.0 - 2.0 * f64::EPSILON);
    }

    #[test]
    fn sqrt_directed() {
        let down = sqrt(2.0, RoundingMode::Down);
        let up = sqrt(2.0, RoundingMode::Up);
        assert_eq!(up, down.next_up());
        assert!(down * down < 2.0);
        assert_eq!(sqrt(2.0, RoundingMode::Zero), down);
    }

    #[test]
    fn small_positive_floats() {
        assert_eq!(small_positive_float_bits(0), 1.0);
        assert_eq!(small_positive_float_bits(1 << 59), 2.0);
        let big = small_positive_float_bits(u64::MAX);
        assert!(big > 0.0 && big < 2f64.powi(32));
    }

    #[test]
    fn e_mask_layout() {
        let mask = e_mask(0xF000_0000_003F_FFFF);
        assert_eq!(mask & MASK_22_BIT, MASK_22_BIT);
        assert_eq!(mask >> MANTISSA_SIZE, 0x3F0);
        assert_eq!(static_exponent(0) >> MANTISSA_SIZE, 0x300);

        let masked = mask_register_exponent_mantissa(-1.5, mask);
        assert!(masked.is_sign_positive());
        assert_eq!(masked.to_bits() & mask, mask);
    }

    #[test]
    fn scale_negate_is_involution() {
        let x = 3.25;
        assert!(scale_negate(x).is_sign_negative());
        assert_eq!(scale_negate(scale_negate(x)), x);
    }

    #[test]
    fn overflow_saturates_per_mode() {
        let big = f64::MAX;
        assert_eq!(add(big, big, RoundingMode::Nearest), f64::INFINITY);
        assert_eq!(add(big, big, RoundingMode::Down), f64::MAX);
        assert_eq!(add(big, big, RoundingMode::Zero), f64::MAX);
        assert_eq!(add(big, big, RoundingMode::Up), f64::INFINITY);
        assert_eq!(mul(-big, 2.0, RoundingMode::Up), f64::MIN);
        assert_eq!(mul(-big, 2.0, RoundingMode::Down), f64::NEG_INFINITY);
        assert_eq!(div(big, 0.5, RoundingMode::Zero), f64::MAX);
    }

    #[test]
    fn subnormal_results_round_exactly() {
        // 3 ulp * 0.5 = 1.5 ulp
        let tiny = f64::from_bits(3);
        assert_eq!(mul(tiny, 0.5, RoundingMode::Down).to_bits(), 1);
        assert_eq!(mul(tiny, 0.5, RoundingMode::Zero).to_bits(), 1);
        assert_eq!(mul(tiny, 0.5, RoundingMode::Up).to_bits(), 2);
        assert_eq!(mul(tiny, 0.5, RoundingMode::Nearest).to_bits(), 2);
        assert_eq!(mul(-tiny, 0.5, RoundingMode::Down).to_bits(), (-f64::from_bits(2)).to_bits());

        assert_eq!(div(tiny, 2.0, RoundingMode::Down).to_bits(), 1);
        assert_eq!(div(tiny, 2.0, RoundingMode::Up).to_bits(), 2);

        let least = f64::from_bits(1);
        assert_eq!(mul(least, 0.25, RoundingMode::Up).to_bits(), 1);
        assert_eq!(mul(least, 0.25, RoundingMode::Down), 0.0);
        assert!(mul(-least, 0.25, RoundingMode::Up).is_sign_negative());
    }

    #[test]
    fn sqrt_of_subnormal() {
        let a = f64::from_bits(2);
        let down = sqrt(a, RoundingMode::Down);
        let up = sqrt(a, RoundingMode::Up);
        assert_eq!(up, down.next_up());
        assert_eq!(sqrt(f64::from_bits(4), RoundingMode::Up), sqrt(f64::from_bits(4), RoundingMode::Down));
    }

    #[test]
    fn nan_keeps_native_payload() {
        let nan = sub(f64::INFINITY, f64::INFINITY, RoundingMode::Down);
        assert_eq!(nan.to_bits(), (f64::INFINITY - f64::INFINITY).to_bits());
    }
}
