use crate::error::{inconsistency, Result, StateError};
use crate::ledger::position::Position;
use crate::math::fixed_point::{mul_div_int, tick_to_wad, wmul};
use crate::math::math_helpers::{mul_div, Rounding};
use crate::math::tick_math::{MAX_TICK, MIN_TICK};
use crate::pair::state::{PairState, Pearl};
use crate::snapshot::{dec, split_pair};
use crate::PEARL_SPACING;
use alloy_primitives::{I256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A resting limit order. Positive size rests as a buy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    #[serde(with = "dec")]
    pub balance: I256,
    #[serde(with = "dec")]
    pub size: I256,
}

/// Identifies an order by its tick and the pearl cycle it joined.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderKey {
    pub tick: i32,
    pub nonce: u32,
}

impl OrderKey {
    pub fn new(tick: i32, nonce: u32) -> Self {
        Self { tick, nonce }
    }

    /// Orders rest on a priced tick.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_TICK..=MAX_TICK).contains(&self.tick) {
            return Err(StateError::TickOutOfBounds.into());
        }
        if self.tick % PEARL_SPACING != 0 {
            return Err(StateError::TickNotAligned(self.tick, PEARL_SPACING).into());
        }
        Ok(())
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tick, self.nonce)
    }
}

impl FromStr for OrderKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        split_pair(s)
            .map(|(tick, nonce)| Self { tick, nonce })
            .ok_or_else(|| format!("expected tick:nonce, got {s:?}"))
    }
}

/// How much of an order was filled and what it is worth as a position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderResolution {
    pub position: Position,
    /// Filled part, with the order's sign.
    pub filled: I256,
    /// Unfilled part still resting in the pearl.
    pub unfilled: I256,
    /// Maker fee credited to the order.
    pub fee: U256,
    /// Whether the order resolved against a checkpoint record.
    pub from_record: bool,
}

fn filled_position(
    order: &Order,
    tick: i32,
    filled: I256,
    fee: U256,
    entry_social_loss_index: U256,
    entry_funding_index: I256,
) -> Result<Position> {
    let balance = order
        .balance
        .checked_add(I256::try_from(fee).map_err(|_| inconsistency("order fee overflow"))?)
        .ok_or_else(|| inconsistency("order balance overflow"))?;
    if filled.is_zero() {
        return Ok(Position::with_balance(balance));
    }
    Ok(Position {
        balance,
        size: filled,
        entry_notional: wmul(tick_to_wad(tick)?, filled.unsigned_abs())?,
        entry_social_loss_index,
        entry_funding_index,
    })
}

fn resolve_from_record(pair: &PairState, key: OrderKey, order: &Order) -> Result<OrderResolution> {
    let record = pair.try_record(key.tick, key.nonce).ok_or_else(|| {
        inconsistency(format!("no record for order {key} behind the pearl checkpoint"))
    })?;
    if record.taken.is_zero() || record.taken.is_negative() != order.size.is_negative() {
        return Err(inconsistency(format!(
            "record {key} took {} but the order rests {}",
            record.taken, order.size
        )));
    }
    let fee = mul_div(record.fee, order.size.unsigned_abs(), record.taken.unsigned_abs())?;
    Ok(OrderResolution {
        position: filled_position(
            order,
            key.tick,
            order.size,
            fee,
            record.entry_social_loss_index,
            record.entry_funding_index,
        )?,
        filled: order.size,
        unfilled: I256::ZERO,
        fee,
        from_record: true,
    })
}

/// Converts a fully filled order into a position.
///
/// The pearl must have moved past the order's cycle, so its accrual is read
/// from the checkpoint record.
pub fn fill_order_to_position(pair: &PairState, key: OrderKey, order: &Order) -> Result<Position> {
    let pearl = pair.pearl(key.tick);
    if key.nonce >= pearl.nonce {
        return Err(inconsistency(format!(
            "order {key} is still in the live cycle {} and cannot be filled",
            pearl.nonce
        )));
    }
    Ok(resolve_from_record(pair, key, order)?.position)
}

/// Resolves a cancelled order: whatever part was already taken becomes a
/// position, the rest leaves the pearl.
pub fn cancel_order_to_position(
    pair: &PairState,
    key: OrderKey,
    order: &Order,
) -> Result<OrderResolution> {
    let pearl = pair.pearl(key.tick);
    if key.nonce < pearl.nonce {
        return resolve_from_record(pair, key, order);
    }
    if key.nonce > pearl.nonce {
        return Err(inconsistency(format!(
            "order {key} is ahead of pearl cycle {}",
            pearl.nonce
        )));
    }

    let cycle = pearl
        .taken
        .checked_add(pearl.left)
        .ok_or_else(|| inconsistency("pearl size overflow"))?;
    if cycle.unsigned_abs() < order.size.unsigned_abs() {
        return Err(inconsistency(format!(
            "order {key} of {} exceeds its pearl cycle of {cycle}",
            order.size
        )));
    }
    let filled = if pearl.taken.is_zero() {
        I256::ZERO
    } else {
        mul_div_int(
            order.size,
            pearl.taken.unsigned_abs(),
            cycle.unsigned_abs(),
            Rounding::Down,
        )?
    };
    let fee = if filled.is_zero() {
        U256::ZERO
    } else {
        mul_div(pearl.fee, filled.unsigned_abs(), pearl.taken.unsigned_abs())?
    };
    Ok(OrderResolution {
        position: filled_position(
            order,
            key.tick,
            filled,
            fee,
            pearl.entry_social_loss_index,
            pearl.entry_funding_index,
        )?,
        filled,
        unfilled: order.size - filled,
        fee,
        from_record: false,
    })
}

/// Takes a cancelled order's share out of its pearl. A cycle left with fills
/// but nothing resting is checkpointed so the remaining makers resolve from
/// the record.
pub(crate) fn withdraw_from_pearl(
    pair: &mut PairState,
    key: OrderKey,
    resolution: &OrderResolution,
) -> Result<()> {
    if resolution.from_record {
        return Ok(());
    }
    let mut pearl: Pearl = pair.pearl(key.tick);
    pearl.left -= resolution.unfilled;
    pearl.taken -= resolution.filled;
    pearl.fee = pearl
        .fee
        .checked_sub(resolution.fee)
        .ok_or_else(|| inconsistency(format!("pearl {} fee below cancelled share", key.tick)))?;
    if pearl.left.is_zero() && !pearl.taken.is_zero() {
        pair.checkpoint(key.tick, &mut pearl);
    }
    pair.set_pearl(key.tick, pearl)
}
