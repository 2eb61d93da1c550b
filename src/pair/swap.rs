use crate::error::{inconsistency, MathError, Result, SwapError};
use crate::math::fixed_point::{
    tick_to_wad, to_signed, wdiv_down, weighted_average, weighted_average_int, wmul,
};
use crate::math::liquidity_math::add_delta;
use crate::math::math_helpers::{mul_div_rounding_up, unlikely};
use crate::math::swap_math::swap_within_range;
use crate::math::tick_math::{get_sqrt_ratio_at_tick, get_tick_at_sqrt_ratio};
use crate::pair::state::{PairState, Side};
use crate::{PEARL_SPACING, RATIO_BASE};
use alloy_primitives::{I256, U256};
use tracing::{instrument, trace};

/// Result of walking the curve and resting orders for one trade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapOutcome {
    pub tick: i32,
    pub sqrt_px96: U256,
    pub liquidity: u128,
    /// Base matched by the curve, with the taker's sign.
    pub curve_size: I256,
    /// `(liquidity, quote)` of every curve segment, in walk order.
    pub segments: Vec<(u128, U256)>,
    /// Ticks whose resting orders were consumed, in walk order.
    pub ticks: Vec<i32>,
    /// Quantity taken at each of `ticks`, with the makers' sign.
    pub takens: Vec<I256>,
}

/// Notional and fee of a trade once it has been booked on the pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwapSummary {
    pub notional: U256,
    pub fee: U256,
}

// mutable state of the walk, folded into the outcome at the end
struct Walk {
    remaining: I256,
    tick: i32,
    sqrt_px96: U256,
    liquidity: u128,
    outcome: SwapOutcome,
}

impl Walk {
    /// Takes from the resting orders at `tick` that sit on the opposite side of
    /// the taker. No-op when the size is already exhausted.
    fn fill_pearl(&mut self, pair: &PairState, tick: i32) -> Result<()> {
        if self.remaining.is_zero() {
            return Ok(());
        }
        let left = pair.pearl(tick).left;
        let opposite = if self.remaining.is_positive() {
            left.is_negative()
        } else {
            left.is_positive()
        };
        if !opposite {
            return Ok(());
        }
        let quantity = self.remaining.unsigned_abs().min(left.unsigned_abs());
        let taken = to_signed(left.is_negative(), quantity)?;
        trace!(tick, %taken, "fill pearl");
        self.outcome.ticks.push(tick);
        self.outcome.takens.push(taken);
        // makers and taker carry opposite signs
        self.remaining += taken;
        Ok(())
    }

    fn ensure_liquidity(&self) -> Result<()> {
        if unlikely(self.liquidity == 0) {
            return Err(SwapError::InsufficientLiquidity(self.remaining).into());
        }
        Ok(())
    }

    /// Runs the curve toward `target_tick`, returning whether it was reached.
    fn step_to(&mut self, target_tick: i32) -> Result<bool> {
        let target = get_sqrt_ratio_at_tick(target_tick)?;
        let step = swap_within_range(self.sqrt_px96, target, self.liquidity, self.remaining)?;
        trace!(
            target_tick,
            liquidity = self.liquidity,
            size = %step.size,
            quote = %step.quote,
            reached = step.reached,
            "curve step"
        );
        if !step.size.is_zero() {
            self.outcome.segments.push((self.liquidity, step.quote));
            self.outcome.curve_size += step.size;
            self.remaining -= step.size;
        }
        self.sqrt_px96 = step.sqrt_next_px96;
        Ok(step.reached)
    }
}

impl PairState {
    /// Simulates a taker trade of `size` (positive buys base) without touching
    /// the pair.
    ///
    /// Resting orders at a tick are consumed before the curve moves past it.
    /// Liquidity reaching zero with size left is `SwapError::InsufficientLiquidity`.
    #[instrument(
        level = "debug",
        skip(self),
        fields(expiry = self.amm.expiry, tick = self.amm.tick)
    )]
    pub fn swap_cross_range(&self, size: I256) -> Result<SwapOutcome> {
        if size.is_zero() {
            return Err(SwapError::SizeIsZero.into());
        }
        let mut walk = Walk {
            remaining: size,
            tick: self.amm.tick,
            sqrt_px96: self.amm.sqrt_px96,
            liquidity: self.amm.liquidity,
            outcome: SwapOutcome::default(),
        };
        let at_boundary = walk.sqrt_px96 == get_sqrt_ratio_at_tick(walk.tick)?;

        if size.is_positive() {
            if at_boundary {
                walk.fill_pearl(self, walk.tick)?;
            }
            while !walk.remaining.is_zero() {
                walk.ensure_liquidity()?;
                let next = self
                    .bitmap()
                    .next_initialized_tick(walk.tick, PEARL_SPACING, false)?;
                if walk.step_to(next)? {
                    walk.tick = next;
                    walk.fill_pearl(self, next)?;
                    walk.liquidity = add_delta(walk.liquidity, self.pearl(next).liquidity_net)?;
                } else {
                    walk.tick = get_tick_at_sqrt_ratio(walk.sqrt_px96)?;
                }
            }
        } else {
            if at_boundary {
                walk.fill_pearl(self, walk.tick)?;
                if !walk.remaining.is_zero() {
                    self.cross_down(&mut walk)?;
                }
            }
            while !walk.remaining.is_zero() {
                walk.ensure_liquidity()?;
                let next = self
                    .bitmap()
                    .next_initialized_tick(walk.tick, PEARL_SPACING, true)?;
                if walk.step_to(next)? {
                    walk.tick = next;
                    walk.fill_pearl(self, next)?;
                    if !walk.remaining.is_zero() {
                        self.cross_down(&mut walk)?;
                    }
                } else {
                    walk.tick = get_tick_at_sqrt_ratio(walk.sqrt_px96)?.min(walk.tick);
                }
            }
        }

        let mut outcome = walk.outcome;
        outcome.tick = walk.tick;
        outcome.sqrt_px96 = walk.sqrt_px96;
        outcome.liquidity = walk.liquidity;
        Ok(outcome)
    }

    fn cross_down(&self, walk: &mut Walk) -> Result<()> {
        let net = self.pearl(walk.tick).liquidity_net;
        let net = net.checked_neg().ok_or(MathError::Overflow)?;
        walk.liquidity = add_delta(walk.liquidity, net)?;
        walk.tick -= 1;
        Ok(())
    }

    /// Books a simulated trade: moves the curve, accrues curve fees into the
    /// fee index and credits every consumed pearl, checkpointing the ones that
    /// run out of resting size. The pair is left as it was on error.
    pub fn apply_swap(&mut self, outcome: &SwapOutcome, fee_ratio: u32) -> Result<SwapSummary> {
        let mut next = self.clone();
        let summary = next.book_swap(outcome, fee_ratio)?;
        *self = next;
        Ok(summary)
    }

    fn book_swap(&mut self, outcome: &SwapOutcome, fee_ratio: u32) -> Result<SwapSummary> {
        if outcome.ticks.len() != outcome.takens.len() {
            return Err(inconsistency(format!(
                "swap reported {} ticks but {} takens",
                outcome.ticks.len(),
                outcome.takens.len()
            )));
        }
        let ratio = U256::from(fee_ratio);
        let mut summary = SwapSummary::default();

        for (liquidity, quote) in &outcome.segments {
            let fee = mul_div_rounding_up(*quote, ratio, RATIO_BASE)?;
            summary.notional += *quote;
            summary.fee += fee;
            if *liquidity != 0 {
                self.amm.fee_index += wdiv_down(fee, U256::from(*liquidity))?;
            }
        }

        for (tick, taken) in outcome.ticks.iter().zip(&outcome.takens) {
            let (tick, taken) = (*tick, *taken);
            let side =
                Side::of(taken).ok_or_else(|| inconsistency("zero taken in swap outcome"))?;
            let notional = wmul(tick_to_wad(tick)?, taken.unsigned_abs())?;
            let fee = mul_div_rounding_up(notional, ratio, RATIO_BASE)?;
            summary.notional += notional;
            summary.fee += fee;

            let mut pearl = self.pearl(tick);
            let short = pearl.left.unsigned_abs() < taken.unsigned_abs();
            if short || Side::of(pearl.left) != Some(side) {
                return Err(inconsistency(format!(
                    "pearl at tick {tick} cannot give {taken}, {} left",
                    pearl.left
                )));
            }
            let (held, adding) = (pearl.taken.unsigned_abs(), taken.unsigned_abs());
            pearl.entry_social_loss_index = weighted_average(
                held,
                pearl.entry_social_loss_index,
                adding,
                self.amm.social_loss_index(side),
            )?;
            pearl.entry_funding_index = weighted_average_int(
                held,
                pearl.entry_funding_index,
                adding,
                self.amm.funding_index(side),
            )?;
            pearl.taken += taken;
            pearl.left -= taken;
            pearl.fee += fee;
            if pearl.left.is_zero() {
                self.checkpoint(tick, &mut pearl);
            }
            self.set_pearl(tick, pearl)?;
        }

        self.amm.tick = outcome.tick;
        self.amm.sqrt_px96 = outcome.sqrt_px96;
        self.amm.liquidity = outcome.liquidity;
        Ok(summary)
    }

    /// `swap_cross_range` followed by `apply_swap`.
    pub fn trade(&mut self, size: I256, fee_ratio: u32) -> Result<(SwapOutcome, SwapSummary)> {
        let outcome = self.swap_cross_range(size)?;
        let summary = self.apply_swap(&outcome, fee_ratio)?;
        Ok((outcome, summary))
    }
}
