use crate::error::{inconsistency, MathError, Result, StateError};
use crate::ledger::position::Position;
use crate::math::fixed_point::{to_int, wmul, wmul_down, wmul_int};
use crate::math::liquidity_math::{add_delta, to_delta};
use crate::math::sqrt_price_math::{get_delta_base, get_delta_quote};
use crate::math::tick_math::{get_sqrt_ratio_at_tick, MAX_TICK, MIN_TICK};
use crate::pair::state::{Amm, PairState};
use crate::snapshot::{dec, split_pair};
use crate::RANGE_SPACING;
use alloy_primitives::{I256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Liquidity provided between two ticks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    #[serde(with = "dec")]
    pub liquidity: u128,
    #[serde(with = "dec")]
    pub balance: I256,
    #[serde(with = "dec")]
    pub sqrt_entry_px96: U256,
    #[serde(with = "dec")]
    pub entry_fee_index: U256,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RangeKey {
    pub tick_lower: i32,
    pub tick_upper: i32,
}

impl RangeKey {
    pub fn new(tick_lower: i32, tick_upper: i32) -> Self {
        Self {
            tick_lower,
            tick_upper,
        }
    }

    /// Both ends on the range grid, ordered, and inside the tick bounds.
    pub fn validate(&self) -> Result<()> {
        for tick in [self.tick_lower, self.tick_upper] {
            if !(MIN_TICK..=MAX_TICK).contains(&tick) {
                return Err(StateError::TickOutOfBounds.into());
            }
            if tick % RANGE_SPACING != 0 {
                return Err(StateError::TickNotAligned(tick, RANGE_SPACING).into());
            }
        }
        if self.tick_lower >= self.tick_upper {
            return Err(inconsistency(format!("empty range {self}")));
        }
        Ok(())
    }

    /// Whether the range is providing liquidity at `tick`.
    pub fn contains(&self, tick: i32) -> bool {
        self.tick_lower <= tick && tick < self.tick_upper
    }
}

impl fmt::Display for RangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tick_lower, self.tick_upper)
    }
}

impl FromStr for RangeKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        split_pair(s)
            .map(|(tick_lower, tick_upper)| Self::new(tick_lower, tick_upper))
            .ok_or_else(|| format!("expected lower:upper, got {s:?}"))
    }
}

/// Base and quote a range holds when the curve sits at `sqrt_px96`, rounded down.
pub fn holdings(key: RangeKey, liquidity: u128, sqrt_px96: U256) -> Result<(U256, U256)> {
    let sqrt_lower = get_sqrt_ratio_at_tick(key.tick_lower)?;
    let sqrt_upper = get_sqrt_ratio_at_tick(key.tick_upper)?;
    if sqrt_px96 <= sqrt_lower {
        Ok((get_delta_base(sqrt_lower, sqrt_upper, liquidity, false)?, U256::ZERO))
    } else if sqrt_px96 >= sqrt_upper {
        Ok((U256::ZERO, get_delta_quote(sqrt_lower, sqrt_upper, liquidity, false)?))
    } else {
        Ok((
            get_delta_base(sqrt_px96, sqrt_upper, liquidity, false)?,
            get_delta_quote(sqrt_lower, sqrt_px96, liquidity, false)?,
        ))
    }
}

/// Holdings recorded when the range was added.
pub fn entry_delta(key: RangeKey, range: &Range) -> Result<(U256, U256)> {
    holdings(key, range.liquidity, range.sqrt_entry_px96)
}

/// The position a range turns into if removed at the pair's current price.
///
/// Base gained or lost since entry becomes the size, entered at the fair
/// price; the value of the base and quote change plus accrued fees lands in
/// the balance.
pub fn range_to_position(amm: &Amm, key: RangeKey, range: &Range) -> Result<Position> {
    let (entry_base, entry_quote) = entry_delta(key, range)?;
    let (base, quote) = holdings(key, range.liquidity, amm.sqrt_px96)?;
    let fair_price = amm.fair_price()?;

    let base_delta = to_int(base)? - to_int(entry_base)?;
    let quote_delta = to_int(quote)? - to_int(entry_quote)?;
    let fee_delta = amm
        .fee_index
        .checked_sub(range.entry_fee_index)
        .ok_or_else(|| inconsistency(format!("fee index below range {key} entry")))?;
    let fee = wmul_down(fee_delta, U256::from(range.liquidity))?;

    let pnl = wmul_int(base_delta, to_int(fair_price)?)?
        .checked_add(quote_delta)
        .ok_or(MathError::Overflow)?;
    let balance = range
        .balance
        .checked_add(to_int(fee)?)
        .and_then(|b| b.checked_add(pnl))
        .ok_or(MathError::Overflow)?;
    let entry_notional = wmul(base_delta.unsigned_abs(), fair_price)?;
    Ok(Position::open(amm, balance, base_delta, entry_notional))
}

/// Adds or removes a range's liquidity at its boundary pearls and, when the
/// range spans the current tick, on the curve.
pub(crate) fn update_boundaries(
    pair: &mut PairState,
    key: RangeKey,
    liquidity: u128,
    adding: bool,
) -> Result<()> {
    let gross = to_delta(liquidity, !adding)?;
    for (tick, upper) in [(key.tick_lower, false), (key.tick_upper, true)] {
        let mut pearl = pair.pearl(tick);
        pearl.liquidity_gross = add_delta(pearl.liquidity_gross, gross)?;
        // crossing upward enters at the lower boundary and leaves at the upper
        let net = if upper { -gross } else { gross };
        pearl.liquidity_net = pearl
            .liquidity_net
            .checked_add(net)
            .ok_or(MathError::Overflow)?;
        pair.set_pearl(tick, pearl)?;
    }
    if key.contains(pair.amm.tick) {
        pair.amm.liquidity = add_delta(pair.amm.liquidity, gross)?;
    }
    pair.amm.total_liquidity = add_delta(pair.amm.total_liquidity, gross)?;
    Ok(())
}
