//! WAD (1e18) fixed-point arithmetic and the price-representation conversions.
//!
//! Unsigned helpers are thin wrappers over [`mul_div_with`]. Signed helpers work
//! sign-then-magnitude: the magnitude is computed unsigned and the sign is
//! re-applied, so every rounding mode is symmetric around zero.

use crate::error::{Error, MathError};
use crate::math::math_helpers::{mul_div, mul_div_with, Rounding};
use crate::math::tick_math::{get_sqrt_ratio_at_tick, get_tick_at_sqrt_ratio};
use crate::{Q96, WAD};
use alloy_primitives::{Sign, I256, U256};

/// 2^53, the largest range where an `f64` holds every integer exactly.
const SAFE_INTEGER: U256 = U256::from_limbs([1 << 53, 0, 0, 0]);
const Q192: U256 = U256::from_limbs([0, 0, 0, 1]);
const RATIO_TO_WAD: U256 = U256::from_limbs([100_000_000_000_000, 0, 0, 0]);

#[inline]
pub fn wmul(x: U256, y: U256) -> Result<U256, MathError> {
    mul_div_with(x, y, WAD, Rounding::Nearest)
}

#[inline]
pub fn wmul_up(x: U256, y: U256) -> Result<U256, MathError> {
    mul_div_with(x, y, WAD, Rounding::Up)
}

#[inline]
pub fn wmul_down(x: U256, y: U256) -> Result<U256, MathError> {
    mul_div(x, y, WAD)
}

#[inline]
pub fn wdiv(x: U256, y: U256) -> Result<U256, MathError> {
    mul_div_with(x, WAD, y, Rounding::Nearest)
}

#[inline]
pub fn wdiv_up(x: U256, y: U256) -> Result<U256, MathError> {
    mul_div_with(x, WAD, y, Rounding::Up)
}

#[inline]
pub fn wdiv_down(x: U256, y: U256) -> Result<U256, MathError> {
    mul_div(x, WAD, y)
}

/// Builds a signed value from a sign flag and a magnitude.
#[inline]
pub fn to_signed(negative: bool, magnitude: U256) -> Result<I256, MathError> {
    let sign = if negative { Sign::Negative } else { Sign::Positive };
    I256::checked_from_sign_and_abs(sign, magnitude).ok_or(MathError::Overflow)
}

/// Reinterprets a non-negative magnitude as `I256`.
#[inline]
pub fn to_int(x: U256) -> Result<I256, MathError> {
    to_signed(false, x)
}

/// Converts a value that must be non-negative back to `U256`.
#[inline]
pub fn to_uint(x: I256) -> Result<U256, MathError> {
    if x.is_negative() {
        return Err(MathError::Underflow);
    }
    Ok(x.into_raw())
}

/// Signed `a * b / denominator` where the magnitude is rounded with `rounding`.
///
/// `Rounding::Down` truncates toward zero.
pub fn mul_div_int(
    a: I256,
    b: U256,
    denominator: U256,
    rounding: Rounding,
) -> Result<I256, MathError> {
    let magnitude = mul_div_with(a.unsigned_abs(), b, denominator, rounding)?;
    to_signed(a.is_negative(), magnitude)
}

/// Signed WAD multiply, magnitude rounded to nearest (ties away from zero).
pub fn wmul_int(x: I256, y: I256) -> Result<I256, MathError> {
    let magnitude = wmul(x.unsigned_abs(), y.unsigned_abs())?;
    to_signed(x.is_negative() != y.is_negative(), magnitude)
}

/// Signed WAD divide, magnitude rounded to nearest.
pub fn wdiv_int(x: I256, y: I256) -> Result<I256, MathError> {
    let magnitude = wdiv(x.unsigned_abs(), y.unsigned_abs())?;
    to_signed(x.is_negative() != y.is_negative(), magnitude)
}

/// `floor(sqrt(x))`.
///
/// Values below 2^53 go through the hardware square root and are corrected by
/// at most one step; larger values use Newton's iteration seeded at `x/2 + 1`.
pub fn sqrt(x: U256) -> U256 {
    if x < SAFE_INTEGER {
        let v = x.to::<u64>();
        let mut r = (v as f64).sqrt() as u64;
        while r.saturating_mul(r) > v {
            r -= 1;
        }
        while (r + 1).saturating_mul(r + 1) <= v {
            r += 1;
        }
        return U256::from(r);
    }

    let mut z = x;
    let mut y = (x >> 1) + U256::ONE;
    while y < z {
        z = y;
        y = (x / y + y) >> 1;
    }
    z
}

/// `floor(sqrt(x))` for a signed operand; negative input is an error.
pub fn sqrt_int(x: I256) -> Result<U256, MathError> {
    if x.is_negative() {
        return Err(MathError::NegativeSqrt);
    }
    Ok(sqrt(x.into_raw()))
}

/// `(w1 * x1 + w2 * x2) / (w1 + w2)`, rounded down.
pub fn weighted_average(w1: U256, x1: U256, w2: U256, x2: U256) -> Result<U256, MathError> {
    let total = w1.checked_add(w2).ok_or(MathError::Overflow)?;
    let sum = w1
        .checked_mul(x1)
        .and_then(|a| w2.checked_mul(x2).and_then(|b| a.checked_add(b)))
        .ok_or(MathError::Overflow)?;
    if total.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    Ok(sum / total)
}

/// Signed counterpart of [`weighted_average`], rounded toward negative infinity.
pub fn weighted_average_int(w1: U256, x1: I256, w2: U256, x2: I256) -> Result<I256, MathError> {
    let total = w1.checked_add(w2).ok_or(MathError::Overflow)?;
    if total.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    let a = to_int(w1)?.checked_mul(x1).ok_or(MathError::Overflow)?;
    let b = to_int(w2)?.checked_mul(x2).ok_or(MathError::Overflow)?;
    let sum = a.checked_add(b).ok_or(MathError::Overflow)?;
    let rounding = if sum.is_negative() {
        Rounding::Up
    } else {
        Rounding::Down
    };
    mul_div_int(sum, U256::ONE, total, rounding)
}

/// Price (WAD) implied by a Q96 square-root price.
pub fn sqrt_x96_to_wad(sqrt_px96: U256) -> Result<U256, MathError> {
    let px96 = mul_div(sqrt_px96, sqrt_px96, Q96)?;
    mul_div(px96, WAD, Q96)
}

/// Q96 square-root price of a WAD price, rounded down.
pub fn wad_to_sqrt_x96(price: U256) -> Result<U256, MathError> {
    Ok(sqrt(mul_div(price, Q192, WAD)?))
}

/// WAD price at a tick.
pub fn tick_to_wad(tick: i32) -> Result<U256, Error> {
    Ok(sqrt_x96_to_wad(get_sqrt_ratio_at_tick(tick)?)?)
}

/// Greatest tick whose price does not exceed `price`.
pub fn wad_to_tick(price: U256) -> Result<i32, Error> {
    Ok(get_tick_at_sqrt_ratio(wad_to_sqrt_x96(price)?)?)
}

/// Basis-point ratio expressed as a WAD fraction.
pub fn ratio_to_wad(ratio: u32) -> U256 {
    U256::from(ratio) * RATIO_TO_WAD
}
