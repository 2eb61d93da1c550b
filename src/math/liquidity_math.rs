use crate::error::MathError;
use alloy_primitives::{I256, U256};

/// Applies a signed liquidity delta, failing instead of wrapping.
pub fn add_delta(x: u128, y: i128) -> Result<u128, MathError> {
    if y < 0 {
        x.checked_sub(y.unsigned_abs()).ok_or(MathError::Underflow)
    } else {
        x.checked_add(y as u128).ok_or(MathError::Overflow)
    }
}

/// `U256 + I256` for open interest and fund balances that must stay non-negative.
pub fn add_signed(x: U256, y: I256) -> Result<U256, MathError> {
    if y.is_negative() {
        x.checked_sub(y.unsigned_abs()).ok_or(MathError::Underflow)
    } else {
        x.checked_add(y.into_raw()).ok_or(MathError::Overflow)
    }
}

/// Converts a `u128` liquidity amount into a signed delta.
pub fn to_delta(liquidity: u128, negative: bool) -> Result<i128, MathError> {
    let delta = i128::try_from(liquidity).map_err(|_| MathError::Overflow)?;
    Ok(if negative { -delta } else { delta })
}
