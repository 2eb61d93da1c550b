use crate::error::{Error, SwapError};
use crate::math::fixed_point::to_signed;
use crate::math::sqrt_price_math::{
    get_delta_base, get_delta_quote, get_next_sqrt_price_from_input,
    get_next_sqrt_price_from_output,
};
use alloy_primitives::{I256, U256};

/// One constant-liquidity segment of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapStep {
    /// Price after the step; equals the target when `reached`.
    pub sqrt_next_px96: U256,
    /// Base matched by the curve, with the taker's sign.
    pub size: I256,
    /// Quote paid (buys, rounded up) or received (sells, rounded down) by the taker.
    pub quote: U256,
    pub reached: bool,
}

/// Consumes as much of `size` as fits between `sqrt_current` and `sqrt_target`.
///
/// Positive `size` buys base from the curve and moves the price up toward the
/// target; negative `size` sells base and moves it down.
pub fn swap_within_range(
    sqrt_current: U256,
    sqrt_target: U256,
    liquidity: u128,
    size: I256,
) -> Result<SwapStep, Error> {
    if size.is_zero() {
        return Err(SwapError::SizeIsZero.into());
    }
    let amount = size.unsigned_abs();
    let buying = size.is_positive();

    let (sqrt_next_px96, base, reached) = if buying {
        let max_out = get_delta_base(sqrt_current, sqrt_target, liquidity, false)?;
        if amount >= max_out {
            (sqrt_target, max_out, true)
        } else {
            let next = get_next_sqrt_price_from_output(sqrt_current, liquidity, amount, true)?;
            (next, amount, false)
        }
    } else {
        let max_in = get_delta_base(sqrt_target, sqrt_current, liquidity, true)?;
        if amount >= max_in {
            (sqrt_target, max_in, true)
        } else {
            let next = get_next_sqrt_price_from_input(sqrt_current, liquidity, amount, true)?;
            (next, amount, false)
        }
    };

    let quote = get_delta_quote(sqrt_current, sqrt_next_px96, liquidity, buying)?;

    Ok(SwapStep {
        sqrt_next_px96,
        size: to_signed(!buying, base)?,
        quote,
        reached,
    })
}
