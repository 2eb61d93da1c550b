use crate::error::{Error, MathError};
use crate::math::fixed_point::{to_int, wdiv_down, wmul_down};
use crate::pair::state::Amm;
use crate::SECONDS_PER_DAY;
use alloy_primitives::{I256, U256};

/// Funding indices after an update, plus what could not be paid out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FundingUpdate {
    pub long_funding_index: I256,
    pub short_funding_index: I256,
    pub timestamp: u64,
    /// Fee collected from the paying side while the receiving side held no
    /// open interest.
    pub undistributed: U256,
}

impl FundingUpdate {
    pub fn apply(&self, amm: &mut Amm) {
        amm.long_funding_index = self.long_funding_index;
        amm.short_funding_index = self.short_funding_index;
        amm.timestamp = self.timestamp;
    }
}

/// Accrues funding from `amm.timestamp` to `now` at the fair/mark spread.
///
/// Longs pay shorts when the curve trades above mark, and the other way
/// round below it. `now <= amm.timestamp` returns the current indices.
pub fn update_funding_index(amm: &Amm, mark_price: U256, now: u64) -> Result<FundingUpdate, Error> {
    let mut update = FundingUpdate {
        long_funding_index: amm.long_funding_index,
        short_funding_index: amm.short_funding_index,
        timestamp: amm.timestamp,
        undistributed: U256::ZERO,
    };
    if now <= amm.timestamp {
        return Ok(update);
    }
    update.timestamp = now;

    let fair_price = amm.fair_price()?;
    if fair_price == mark_price {
        return Ok(update);
    }
    let longs_pay = fair_price > mark_price;
    let spread = fair_price.abs_diff(mark_price);
    let fee_per_second = spread / SECONDS_PER_DAY;
    let delta = fee_per_second
        .checked_mul(U256::from(now - amm.timestamp))
        .ok_or(MathError::Overflow)?;
    let delta_int = to_int(delta)?;

    let (payer_oi, receiver_oi) = if longs_pay {
        (amm.long_open_interest, amm.short_open_interest)
    } else {
        (amm.short_open_interest, amm.long_open_interest)
    };
    let total_fee = wmul_down(delta, payer_oi)?;
    let (payer_index, receiver_index) = if longs_pay {
        (&mut update.long_funding_index, &mut update.short_funding_index)
    } else {
        (&mut update.short_funding_index, &mut update.long_funding_index)
    };
    *payer_index = payer_index
        .checked_sub(delta_int)
        .ok_or(MathError::Overflow)?;
    if receiver_oi.is_zero() {
        update.undistributed = total_fee;
    } else {
        let share = to_int(wdiv_down(total_fee, receiver_oi)?)?;
        *receiver_index = receiver_index.checked_add(share).ok_or(MathError::Overflow)?;
    }
    Ok(update)
}
