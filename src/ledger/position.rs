//! Position value type and the pure accounting on it.
//!
//! Every function takes the pair's [`Amm`] by reference for the current
//! funding and social-loss indices and never mutates it.

use crate::error::{inconsistency, Error, MathError, Result};
use crate::math::fixed_point::{
    mul_div_int, ratio_to_wad, to_int, wdiv, weighted_average, wmul, wmul_int, wmul_up,
};
use crate::math::math_helpers::{mul_div, Rounding};
use crate::pair::state::{Amm, Side};
use crate::snapshot::dec;
use crate::WAD;
use alloy_primitives::{I256, U256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    #[serde(with = "dec")]
    pub balance: I256,
    #[serde(with = "dec")]
    pub size: I256,
    #[serde(with = "dec")]
    pub entry_notional: U256,
    #[serde(with = "dec")]
    pub entry_social_loss_index: U256,
    #[serde(with = "dec")]
    pub entry_funding_index: I256,
}

impl Position {
    /// Margin only, no exposure.
    pub fn with_balance(balance: I256) -> Self {
        Self {
            balance,
            ..Default::default()
        }
    }

    /// Whether the position carries no size.
    pub fn is_flat(&self) -> bool {
        self.size.is_zero()
    }

    pub fn side(&self) -> Option<Side> {
        Side::of(self.size)
    }

    /// A fresh exposure entered at the pair's current indices.
    pub fn open(amm: &Amm, balance: I256, size: I256, entry_notional: U256) -> Self {
        let (entry_social_loss_index, entry_funding_index) = match Side::of(size) {
            Some(side) => (amm.social_loss_index(side), amm.funding_index(side)),
            None => (U256::ZERO, I256::ZERO),
        };
        Self {
            balance,
            size,
            entry_notional: if size.is_zero() { U256::ZERO } else { entry_notional },
            entry_social_loss_index,
            entry_funding_index,
        }
    }

    fn flatten(mut self) -> Self {
        if self.size.is_zero() {
            self.entry_notional = U256::ZERO;
            self.entry_social_loss_index = U256::ZERO;
            self.entry_funding_index = I256::ZERO;
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CombineResult {
    pub position: Position,
    /// Quantity closed against each other; open interest drops by this on both sides.
    pub closed_size: U256,
    pub realized_pnl: I256,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub equity: I256,
    pub pnl: I256,
    pub social_loss: U256,
}

fn pending_funding(amm: &Amm, position: &Position) -> Result<I256> {
    let Some(side) = position.side() else {
        return Ok(I256::ZERO);
    };
    if !amm.is_perpetual() {
        return Ok(I256::ZERO);
    }
    let index_delta = amm
        .funding_index(side)
        .checked_sub(position.entry_funding_index)
        .ok_or(MathError::Overflow)?;
    Ok(wmul_int(index_delta, to_int(position.size.unsigned_abs())?)?)
}

fn pending_social_loss(amm: &Amm, position: &Position, quantity: U256) -> Result<U256> {
    let Some(side) = position.side() else {
        return Ok(U256::ZERO);
    };
    let index_delta = amm
        .social_loss_index(side)
        .checked_sub(position.entry_social_loss_index)
        .ok_or_else(|| inconsistency("social loss index below position entry"))?;
    Ok(wmul_up(index_delta, quantity)?)
}

/// Moves funding accrued since entry into the balance and snaps the entry
/// index to the current one. Dated pairs carry no funding.
pub fn realize_funding(amm: &Amm, mut position: Position) -> Result<Position> {
    let Some(side) = position.side() else {
        return Ok(position);
    };
    if !amm.is_perpetual() {
        return Ok(position);
    }
    let funding = pending_funding(amm, &position)?;
    position.balance = position.balance.checked_add(funding).ok_or(MathError::Overflow)?;
    position.entry_funding_index = amm.funding_index(side);
    Ok(position)
}

/// Merges two positions of the same account.
pub fn combine(amm: &Amm, a: Position, b: Position) -> Result<CombineResult> {
    let a = realize_funding(amm, a)?;
    let b = realize_funding(amm, b)?;
    let balance = a.balance.checked_add(b.balance).ok_or(MathError::Overflow)?;

    if a.is_flat() || b.is_flat() {
        let mut position = if a.is_flat() { b } else { a };
        position.balance = balance;
        return Ok(CombineResult {
            position: position.flatten(),
            ..Default::default()
        });
    }

    if a.size.is_negative() == b.size.is_negative() {
        let size = a.size.checked_add(b.size).ok_or(MathError::Overflow)?;
        let entry_notional = a
            .entry_notional
            .checked_add(b.entry_notional)
            .ok_or(MathError::Overflow)?;
        let entry_social_loss_index = weighted_average(
            a.size.unsigned_abs(),
            a.entry_social_loss_index,
            b.size.unsigned_abs(),
            b.entry_social_loss_index,
        )?;
        return Ok(CombineResult {
            position: Position {
                balance,
                size,
                entry_notional,
                entry_social_loss_index,
                entry_funding_index: a.entry_funding_index,
            },
            ..Default::default()
        });
    }

    let (long, short) = if a.size.is_positive() { (&a, &b) } else { (&b, &a) };
    let closed = a.size.unsigned_abs().min(b.size.unsigned_abs());
    let closed_long_notional = mul_div(long.entry_notional, closed, long.size.unsigned_abs())?;
    let closed_short_notional = mul_div(short.entry_notional, closed, short.size.unsigned_abs())?;
    let long_social_loss = pending_social_loss(amm, long, closed)?;
    let short_social_loss = pending_social_loss(amm, short, closed)?;

    let realized_pnl = to_int(closed_short_notional)?
        - to_int(closed_long_notional)?
        - to_int(long_social_loss)?
        - to_int(short_social_loss)?;

    let size = a.size.checked_add(b.size).ok_or(MathError::Overflow)?;
    let larger = if a.size.unsigned_abs() >= b.size.unsigned_abs() { &a } else { &b };
    let closed_larger_notional = if larger.size.is_positive() {
        closed_long_notional
    } else {
        closed_short_notional
    };
    let position = Position {
        balance: balance.checked_add(realized_pnl).ok_or(MathError::Overflow)?,
        size,
        entry_notional: larger.entry_notional - closed_larger_notional,
        entry_social_loss_index: larger.entry_social_loss_index,
        entry_funding_index: larger.entry_funding_index,
    };

    Ok(CombineResult {
        position: position.flatten(),
        closed_size: closed,
        realized_pnl,
    })
}

/// Splits off `part_size` (same sign as the position, not larger) and
/// returns `(part, remainder)`. The remainder takes the exact complement, so
/// the two always sum back to `position`.
pub fn split_position(position: &Position, part_size: I256) -> Result<(Position, Position)> {
    let total = position.size.unsigned_abs();
    let part = part_size.unsigned_abs();
    if part_size.is_zero()
        || position.size.is_negative() != part_size.is_negative()
        || part > total
    {
        return Err(inconsistency(format!(
            "cannot split {part_size} out of a position of {}",
            position.size
        )));
    }

    let part_balance = mul_div_int(position.balance, part, total, Rounding::Down)?;
    let part_notional = mul_div(position.entry_notional, part, total)?;
    let head = Position {
        balance: part_balance,
        size: part_size,
        entry_notional: part_notional,
        entry_social_loss_index: position.entry_social_loss_index,
        entry_funding_index: position.entry_funding_index,
    };
    let rest = Position {
        balance: position.balance - part_balance,
        size: position.size - part_size,
        entry_notional: position.entry_notional - part_notional,
        entry_social_loss_index: position.entry_social_loss_index,
        entry_funding_index: position.entry_funding_index,
    };
    Ok((head, rest.flatten()))
}

/// Marks `position` at `mark_price`, including pending funding and social loss.
pub fn tally(amm: &Amm, position: &Position, mark_price: U256) -> Result<Tally> {
    let Some(side) = position.side() else {
        return Ok(Tally {
            equity: position.balance,
            ..Default::default()
        });
    };
    let value = to_int(wmul(mark_price, position.size.unsigned_abs())?)?;
    let entry = to_int(position.entry_notional)?;
    let value_delta = match side {
        Side::Long => value - entry,
        Side::Short => entry - value,
    };
    let funding = pending_funding(amm, position)?;
    let social_loss = pending_social_loss(amm, position, position.size.unsigned_abs())?;
    let pnl = value_delta
        .checked_add(funding)
        .ok_or(MathError::Overflow)?
        - to_int(social_loss)?;
    Ok(Tally {
        equity: position.balance.checked_add(pnl).ok_or(MathError::Overflow)?,
        pnl,
        social_loss,
    })
}

/// Price at which equity meets the maintenance requirement.
///
/// Zero means price alone cannot liquidate the position: it is flat, its
/// margin net of funding and social loss is already non-positive, or the
/// solved price is non-positive.
pub fn calc_liquidation_price(
    amm: &Amm,
    position: &Position,
    maintenance_margin_ratio: u32,
) -> Result<U256> {
    let Some(side) = position.side() else {
        return Ok(U256::ZERO);
    };
    let size = position.size.unsigned_abs();
    let funding = pending_funding(amm, position)?;
    let social_loss = pending_social_loss(amm, position, size)?;
    let effective_balance = position
        .balance
        .checked_add(funding)
        .ok_or(MathError::Overflow)?
        - to_int(social_loss)?;
    if !effective_balance.is_positive() {
        return Ok(U256::ZERO);
    }

    let ratio = ratio_to_wad(maintenance_margin_ratio);
    let notional = to_int(position.entry_notional)?;
    let (numerator, factor) = match side {
        Side::Long => (
            notional - effective_balance,
            WAD.checked_sub(ratio).ok_or(MathError::Underflow)?,
        ),
        Side::Short => (notional + effective_balance, WAD + ratio),
    };
    if !numerator.is_positive() {
        return Ok(U256::ZERO);
    }
    let denominator = wmul(size, factor)?;
    if denominator.is_zero() {
        return Err(Error::MathError(MathError::DivisionByZero));
    }
    Ok(wdiv(numerator.into_raw(), denominator)?)
}
