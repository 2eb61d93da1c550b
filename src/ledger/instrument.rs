use crate::config::InstrumentSetting;
use crate::error::{inconsistency, Result};
use crate::events::{Event, LedgerEvent};
use crate::ledger::account::AccountState;
use crate::ledger::order::{
    cancel_order_to_position, fill_order_to_position, withdraw_from_pearl, Order, OrderKey,
};
use crate::ledger::position::{combine, split_position, Position};
use crate::ledger::range::{range_to_position, update_boundaries, Range, RangeKey};
use crate::math::fixed_point::to_int;
use crate::math::funding::update_funding_index;
use crate::pair::state::{AmmStatus, PairState, Side};
use crate::snapshot::{keyed, Snapshot};
use crate::{sorted_keys, FastMap};
use alloy_primitives::{Address, I256, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Condition {
    #[default]
    Normal,
    Frozen,
    Resolved,
}

/// What an applied event changed beyond the instrument itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Effect {
    /// Size closed by merging positions; already taken off both open interests.
    pub closed_size: U256,
    /// Taker notional of a trade.
    pub notional: U256,
    pub fee: U256,
    /// Funding the paying side gave up while the other side was empty.
    pub undistributed_funding: U256,
}

impl Effect {
    fn closed(closed_size: U256) -> Self {
        Self {
            closed_size,
            ..Default::default()
        }
    }
}

/// Accounts of one pair, keyed by trader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountBook(#[serde(with = "keyed")] FastMap<Address, AccountState>);

impl AccountBook {
    pub fn get(&self, trader: &Address) -> Option<&AccountState> {
        self.0.get(trader)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &AccountState)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Traders in ascending order.
    pub fn traders(&self) -> Vec<Address> {
        sorted_keys(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Working copy of the account; the book is untouched until [`Self::store`].
    fn load(&self, trader: &Address) -> AccountState {
        self.0.get(trader).cloned().unwrap_or_default()
    }

    /// Writes the account back, dropping it once nothing is left in it.
    fn store(&mut self, trader: Address, account: AccountState) {
        if account.is_empty() {
            self.0.remove(&trader);
        } else {
            self.0.insert(trader, account);
        }
    }

    /// Inserts an account as read from a remote source.
    pub fn insert(&mut self, trader: Address, account: AccountState) {
        self.store(trader, account);
    }
}

/// Everything the ledger mirrors for one instrument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentState {
    pub condition: Condition,
    pub setting: InstrumentSetting,
    #[serde(with = "keyed")]
    pairs: FastMap<u32, PairState>,
    #[serde(with = "keyed")]
    accounts: FastMap<u32, AccountBook>,
}

impl InstrumentState {
    pub fn new(setting: InstrumentSetting) -> Self {
        Self {
            setting,
            ..Default::default()
        }
    }

    pub fn pair(&self, expiry: u32) -> Option<&PairState> {
        self.pairs.get(&expiry)
    }

    /// Expiries of every pair, ascending.
    pub fn expiries(&self) -> Vec<u32> {
        sorted_keys(&self.pairs)
    }

    pub fn pairs(&self) -> impl Iterator<Item = (u32, &PairState)> {
        self.pairs.iter().map(|(k, v)| (*k, v))
    }

    /// Installs a pair read from a remote source, replacing any local copy.
    pub fn insert_pair(&mut self, pair: PairState) {
        self.pairs.insert(pair.amm.expiry, pair);
    }

    pub fn accounts(&self, expiry: u32) -> Option<&AccountBook> {
        self.accounts.get(&expiry)
    }

    /// Installs an account read from a remote source.
    pub fn insert_account(&mut self, expiry: u32, trader: Address, account: AccountState) {
        let book = self.accounts.entry(expiry).or_default();
        book.insert(trader, account);
        if book.is_empty() {
            self.accounts.remove(&expiry);
        }
    }

    /// The trader's account, empty if never touched.
    pub fn account(&self, expiry: u32, trader: &Address) -> AccountState {
        self.accounts
            .get(&expiry)
            .and_then(|book| book.get(trader))
            .cloned()
            .unwrap_or_default()
    }

    pub fn position(&self, expiry: u32, trader: &Address) -> Position {
        self.account(expiry, trader).position
    }

    pub fn orders(&self, expiry: u32, trader: &Address) -> FastMap<OrderKey, Order> {
        self.account(expiry, trader).orders
    }

    pub fn ranges(&self, expiry: u32, trader: &Address) -> FastMap<RangeKey, Range> {
        self.account(expiry, trader).ranges
    }

    /// Runs `f` on copies of the pair and its accounts and writes them back
    /// only if it succeeds. A book left empty is dropped.
    fn with_pair<T>(
        &mut self,
        expiry: u32,
        f: impl FnOnce(&mut PairState, &mut AccountBook) -> Result<T>,
    ) -> Result<T> {
        let mut pair = self
            .pairs
            .get(&expiry)
            .cloned()
            .ok_or_else(|| inconsistency(format!("no pair at expiry {expiry}")))?;
        let mut book = self.accounts.get(&expiry).cloned().unwrap_or_default();
        let result = f(&mut pair, &mut book)?;
        self.pairs.insert(expiry, pair);
        if book.is_empty() {
            self.accounts.remove(&expiry);
        } else {
            self.accounts.insert(expiry, book);
        }
        Ok(result)
    }

    /// Routes one instrument event to its handler.
    pub fn apply(&mut self, event: &LedgerEvent) -> Result<Effect> {
        let effect = match &event.event {
            Event::NewPair { expiry, sqrt_px96 } => {
                self.apply_new_pair(*expiry, *sqrt_px96, event.timestamp)?;
                Effect::default()
            }
            Event::UpdateCondition { condition } => {
                self.condition = *condition;
                Effect::default()
            }
            Event::UpdateMarginRatio {
                initial,
                maintenance,
            } => {
                self.apply_update_margin_ratio(*initial, *maintenance)?;
                Effect::default()
            }
            Event::Add {
                expiry,
                trader,
                tick_lower,
                tick_upper,
                range,
            } => {
                let key = RangeKey::new(*tick_lower, *tick_upper);
                self.apply_add(*expiry, *trader, key, range.clone())?;
                Effect::default()
            }
            Event::Remove {
                expiry,
                trader,
                tick_lower,
                tick_upper,
            } => {
                let key = RangeKey::new(*tick_lower, *tick_upper);
                Effect::closed(self.apply_remove(*expiry, *trader, key)?)
            }
            Event::Place {
                expiry,
                trader,
                tick,
                nonce,
                order,
            } => {
                self.apply_place(*expiry, *trader, OrderKey::new(*tick, *nonce), order.clone())?;
                Effect::default()
            }
            Event::Cancel {
                expiry,
                trader,
                tick,
                nonce,
            } => Effect::closed(self.apply_cancel(*expiry, *trader, OrderKey::new(*tick, *nonce))?),
            Event::Fill {
                expiry,
                trader,
                tick,
                nonce,
            } => Effect::closed(self.apply_fill(*expiry, *trader, OrderKey::new(*tick, *nonce))?),
            Event::Trade {
                expiry,
                trader,
                size,
                amount,
                fee_ratio,
            } => self.apply_trade(*expiry, *trader, *size, *amount, *fee_ratio)?,
            Event::Sweep {
                expiry,
                trader,
                size,
                fee_ratio,
            } => self.apply_sweep(*expiry, *trader, *size, *fee_ratio)?,
            Event::Adjust {
                expiry,
                trader,
                net,
            } => {
                self.apply_adjust(*expiry, *trader, *net)?;
                Effect::default()
            }
            Event::Liquidate {
                expiry,
                target,
                liquidator,
                size,
            } => Effect::closed(self.apply_liquidate(*expiry, *target, *liquidator, *size)?),
            Event::Settle {
                expiry,
                trader,
                settlement,
            } => {
                self.apply_settle(*expiry, *trader, *settlement)?;
                Effect::default()
            }
            Event::UpdateFundingIndex { expiry, mark_price } => Effect {
                undistributed_funding: self.apply_update_funding_index(
                    *expiry,
                    *mark_price,
                    event.timestamp,
                )?,
                ..Default::default()
            },
            Event::UpdateAmmStatus {
                expiry,
                status,
                mark_price,
            } => {
                self.apply_update_amm_status(*expiry, *status, *mark_price)?;
                Effect::default()
            }
            Event::UpdateSocialLoss {
                expiry,
                long_social_loss_index,
                short_social_loss_index,
                insurance_fund,
            } => {
                let amm = &mut self.pair_mut(*expiry)?.amm;
                amm.long_social_loss_index = *long_social_loss_index;
                amm.short_social_loss_index = *short_social_loss_index;
                amm.insurance_fund = *insurance_fund;
                Effect::default()
            }
            gate => {
                return Err(inconsistency(format!(
                    "vault event {} emitted by instrument {}",
                    gate.name(),
                    event.address
                )))
            }
        };
        Ok(effect)
    }

    pub(crate) fn pair_mut(&mut self, expiry: u32) -> Result<&mut PairState> {
        self.pairs
            .get_mut(&expiry)
            .ok_or_else(|| inconsistency(format!("no pair at expiry {expiry}")))
    }

    pub fn apply_new_pair(&mut self, expiry: u32, sqrt_px96: U256, timestamp: u64) -> Result<()> {
        if self.pairs.contains_key(&expiry) {
            return Err(inconsistency(format!("pair at expiry {expiry} already exists")));
        }
        self.pairs
            .insert(expiry, PairState::new(expiry, sqrt_px96, timestamp)?);
        Ok(())
    }

    pub fn apply_update_margin_ratio(&mut self, initial: u32, maintenance: u32) -> Result<()> {
        if maintenance == 0 || maintenance > initial {
            return Err(inconsistency(format!(
                "maintenance ratio {maintenance} above initial {initial}"
            )));
        }
        self.setting.initial_margin_ratio = initial;
        self.setting.maintenance_margin_ratio = maintenance;
        Ok(())
    }

    pub fn apply_add(
        &mut self,
        expiry: u32,
        trader: Address,
        key: RangeKey,
        range: Range,
    ) -> Result<()> {
        key.validate()?;
        if range.liquidity == 0 {
            return Err(inconsistency(format!("range {key} adds no liquidity")));
        }
        self.with_pair(expiry, |pair, book| {
            let mut account = book.load(&trader);
            if account.ranges.contains_key(&key) {
                return Err(inconsistency(format!("range {key} of {trader} already exists")));
            }
            update_boundaries(pair, key, range.liquidity, true)?;
            pair.amm.add_involved_fund(range.balance)?;
            account.ranges.insert(key, range);
            book.store(trader, account);
            Ok(())
        })
    }

    /// Removes a range and folds its value into the trader's position.
    /// Returns the size closed against the existing position.
    pub fn apply_remove(&mut self, expiry: u32, trader: Address, key: RangeKey) -> Result<U256> {
        self.with_pair(expiry, |pair, book| {
            let mut account = book.load(&trader);
            let range = account
                .ranges
                .remove(&key)
                .ok_or_else(|| inconsistency(format!("{trader} has no range {key}")))?;
            let removed = range_to_position(&pair.amm, key, &range)?;
            update_boundaries(pair, key, range.liquidity, false)?;
            if let Some(side) = removed.side() {
                pair.amm
                    .add_open_interest(side, to_int(removed.size.unsigned_abs())?)?;
            }
            let closed = merge_into(pair, &mut account, removed)?;
            book.store(trader, account);
            Ok(closed)
        })
    }

    pub fn apply_place(
        &mut self,
        expiry: u32,
        trader: Address,
        key: OrderKey,
        order: Order,
    ) -> Result<()> {
        key.validate()?;
        if order.size.is_zero() {
            return Err(inconsistency(format!("order {key} of {trader} has no size")));
        }
        self.with_pair(expiry, |pair, book| {
            let mut pearl = pair.pearl(key.tick);
            if pearl.nonce != key.nonce {
                return Err(inconsistency(format!(
                    "order {key} placed while the pearl is at cycle {}",
                    pearl.nonce
                )));
            }
            if !pearl.left.is_zero() && pearl.left.is_negative() != order.size.is_negative() {
                return Err(inconsistency(format!(
                    "order {key} of {} rests against {} on the other side",
                    order.size, pearl.left
                )));
            }
            pearl.left += order.size;
            pair.set_pearl(key.tick, pearl)?;
            pair.amm.add_involved_fund(order.balance)?;

            let mut account = book.load(&trader);
            let merged = account.orders.entry(key).or_default();
            merged.balance += order.balance;
            merged.size += order.size;
            book.store(trader, account);
            Ok(())
        })
    }

    pub fn apply_cancel(&mut self, expiry: u32, trader: Address, key: OrderKey) -> Result<U256> {
        self.with_pair(expiry, |pair, book| {
            let mut account = book.load(&trader);
            let order = account
                .orders
                .remove(&key)
                .ok_or_else(|| inconsistency(format!("{trader} has no order {key}")))?;
            let resolution = cancel_order_to_position(pair, key, &order)?;
            withdraw_from_pearl(pair, key, &resolution)?;
            let closed = merge_into(pair, &mut account, resolution.position)?;
            book.store(trader, account);
            Ok(closed)
        })
    }

    pub fn apply_fill(&mut self, expiry: u32, trader: Address, key: OrderKey) -> Result<U256> {
        self.with_pair(expiry, |pair, book| {
            let mut account = book.load(&trader);
            let order = account
                .orders
                .remove(&key)
                .ok_or_else(|| inconsistency(format!("{trader} has no order {key}")))?;
            let filled = fill_order_to_position(pair, key, &order)?;
            let closed = merge_into(pair, &mut account, filled)?;
            book.store(trader, account);
            Ok(closed)
        })
    }

    /// Books a taker trade: walks the pair, opens the taker leg with `amount`
    /// of margin net of fees and merges it into the trader's position.
    #[instrument(level = "debug", skip(self))]
    pub fn apply_trade(
        &mut self,
        expiry: u32,
        trader: Address,
        size: I256,
        amount: I256,
        fee_ratio: u32,
    ) -> Result<Effect> {
        self.with_pair(expiry, |pair, book| {
            if pair.amm.status != AmmStatus::Trading {
                return Err(inconsistency(format!(
                    "trade on pair {expiry} in status {:?}",
                    pair.amm.status
                )));
            }
            let (outcome, summary) = pair.trade(size, fee_ratio)?;

            if let Some(side) = Side::of(size) {
                pair.amm.add_open_interest(side, to_int(size.unsigned_abs())?)?;
            }
            for taken in &outcome.takens {
                if let Some(side) = Side::of(*taken) {
                    pair.amm
                        .add_open_interest(side, to_int(taken.unsigned_abs())?)?;
                }
            }

            let taker = Position::open(
                &pair.amm,
                amount - to_int(summary.fee)?,
                size,
                summary.notional,
            );
            let mut account = book.load(&trader);
            let closed_size = merge_into(pair, &mut account, taker)?;
            pair.amm.add_involved_fund(amount)?;
            book.store(trader, account);

            debug!(
                ticks = outcome.ticks.len(),
                notional = %summary.notional,
                closed = %closed_size,
                "trade booked"
            );
            Ok(Effect {
                closed_size,
                notional: summary.notional,
                fee: summary.fee,
                undistributed_funding: U256::ZERO,
            })
        })
    }

    /// A forced trade on `trader` that moves no margin.
    pub fn apply_sweep(
        &mut self,
        expiry: u32,
        trader: Address,
        size: I256,
        fee_ratio: u32,
    ) -> Result<Effect> {
        self.apply_trade(expiry, trader, size, I256::ZERO, fee_ratio)
    }

    pub fn apply_adjust(&mut self, expiry: u32, trader: Address, net: I256) -> Result<()> {
        self.with_pair(expiry, |pair, book| {
            pair.amm.add_involved_fund(net)?;
            let mut account = book.load(&trader);
            account.position.balance += net;
            book.store(trader, account);
            Ok(())
        })
    }

    /// Moves `size` of `target`'s position (same sign) to `liquidator`.
    pub fn apply_liquidate(
        &mut self,
        expiry: u32,
        target: Address,
        liquidator: Address,
        size: I256,
    ) -> Result<U256> {
        if target == liquidator {
            return Err(inconsistency(format!("{target} liquidates itself")));
        }
        self.with_pair(expiry, |pair, book| {
            let mut victim = book.load(&target);
            let (part, rest) = split_position(&victim.position, size)?;
            let mut account = book.load(&liquidator);
            let closed = merge_into(pair, &mut account, part)?;
            victim.position = rest;
            book.store(target, victim);
            book.store(liquidator, account);
            Ok(closed)
        })
    }

    /// Pays out a trader after trading stopped and drops the account.
    ///
    /// Resting orders are cancelled out of their pearls and ranges leave the
    /// curve first, so nothing of the trader stays behind in the pair.
    pub fn apply_settle(&mut self, expiry: u32, trader: Address, settlement: U256) -> Result<()> {
        self.with_pair(expiry, |pair, book| {
            if pair.amm.status == AmmStatus::Trading {
                return Err(inconsistency(format!("settle on trading pair {expiry}")));
            }
            let mut account = book.load(&trader);

            let mut orders: Vec<_> = std::mem::take(&mut account.orders).into_iter().collect();
            orders.sort_by_key(|(key, _)| *key);
            for (key, order) in orders {
                let resolution = cancel_order_to_position(pair, key, &order)?;
                withdraw_from_pearl(pair, key, &resolution)?;
                merge_into(pair, &mut account, resolution.position)?;
            }
            let mut ranges: Vec<_> = std::mem::take(&mut account.ranges).into_iter().collect();
            ranges.sort_by_key(|(key, _)| *key);
            for (key, range) in ranges {
                let removed = range_to_position(&pair.amm, key, &range)?;
                update_boundaries(pair, key, range.liquidity, false)?;
                if let Some(side) = removed.side() {
                    pair.amm
                        .add_open_interest(side, to_int(removed.size.unsigned_abs())?)?;
                }
                merge_into(pair, &mut account, removed)?;
            }

            if let Some(side) = account.position.side() {
                let closed = to_int(account.position.size.unsigned_abs())?;
                pair.amm.add_open_interest(side, -closed)?;
            }
            pair.amm.add_involved_fund(-to_int(settlement)?)?;
            book.store(trader, AccountState::default());
            Ok(())
        })
    }

    /// Accrues funding at the event time. Returns the undistributed part.
    pub fn apply_update_funding_index(
        &mut self,
        expiry: u32,
        mark_price: U256,
        timestamp: u64,
    ) -> Result<U256> {
        let pair = self.pair_mut(expiry)?;
        if !pair.amm.is_perpetual() {
            return Err(inconsistency(format!("funding update on dated pair {expiry}")));
        }
        let update = update_funding_index(&pair.amm, mark_price, timestamp)?;
        update.apply(&mut pair.amm);
        Ok(update.undistributed)
    }

    /// Moves the pair forward in its lifecycle. Reaching `Settled` fixes the
    /// settlement price and drops every account of the pair.
    pub fn apply_update_amm_status(
        &mut self,
        expiry: u32,
        status: AmmStatus,
        mark_price: U256,
    ) -> Result<()> {
        let amm = &mut self.pair_mut(expiry)?.amm;
        if status <= amm.status {
            return Err(inconsistency(format!(
                "pair {expiry} cannot move from {:?} to {status:?}",
                amm.status
            )));
        }
        amm.status = status;
        if status == AmmStatus::Settled {
            amm.settlement_price = mark_price;
            amm.long_open_interest = U256::ZERO;
            amm.short_open_interest = U256::ZERO;
            self.accounts.remove(&expiry);
        }
        Ok(())
    }
}

/// Combines `incoming` into the account's position and takes the closed size
/// off both open interests.
fn merge_into(
    pair: &mut PairState,
    account: &mut AccountState,
    incoming: Position,
) -> Result<U256> {
    let merged = combine(&pair.amm, std::mem::take(&mut account.position), incoming)?;
    pair.amm.close_open_interest(merged.closed_size)?;
    account.position = merged.position;
    Ok(merged.closed_size)
}

impl Snapshot for InstrumentState {
    fn is_blank(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, LedgerError, StateError};
    use crate::math::tick_math::{MAX_TICK, MIN_TICK};
    use crate::{PERP_EXPIRY, Q96, WAD};

    const L: u128 = 1_000_000_000_000_000_000_000_000;

    fn int(n: i128) -> I256 {
        I256::try_from(n).unwrap()
    }

    fn wad(n: i128) -> I256 {
        int(n) * I256::try_from(WAD).unwrap()
    }

    fn uwad(n: u64) -> U256 {
        U256::from(n) * WAD
    }

    fn addr(n: u8) -> Address {
        Address::with_last_byte(n)
    }

    fn is_inconsistency(err: Error) -> bool {
        matches!(err, Error::LedgerError(LedgerError::Inconsistency(_)))
    }

    /// A perpetual pair at tick 0 with one LP range and a resting sell at tick 0.
    fn market() -> InstrumentState {
        let mut inst = InstrumentState::default();
        inst.apply_new_pair(PERP_EXPIRY, Q96, 1_000).unwrap();
        inst.apply_add(
            PERP_EXPIRY,
            addr(1),
            RangeKey::new(-1000, 1000),
            Range {
                liquidity: L,
                balance: wad(1_000),
                sqrt_entry_px96: Q96,
                entry_fee_index: U256::ZERO,
            },
        )
        .unwrap();
        inst.apply_place(
            PERP_EXPIRY,
            addr(2),
            OrderKey::new(0, 0),
            Order {
                balance: wad(50),
                size: wad(-500),
            },
        )
        .unwrap();
        inst
    }

    #[test]
    fn add_and_place_update_the_pair() {
        let inst = market();
        let pair = inst.pair(PERP_EXPIRY).unwrap();
        assert_eq!(pair.amm.liquidity, L);
        assert_eq!(pair.amm.involved_fund, uwad(1_050));
        assert_eq!(pair.pearl(0).left, wad(-500));
        assert_eq!(inst.ranges(PERP_EXPIRY, &addr(1)).len(), 1);
        assert_eq!(
            inst.orders(PERP_EXPIRY, &addr(2))[&OrderKey::new(0, 0)].size,
            wad(-500)
        );
    }

    #[test]
    fn trade_fill_and_close() {
        let mut inst = market();
        let taker = addr(3);

        let effect = inst
            .apply_trade(PERP_EXPIRY, taker, wad(500), wad(100), 5)
            .unwrap();
        assert!(effect.closed_size.is_zero());
        assert_eq!(effect.notional, uwad(500));
        let fee = U256::from(250_000_000_000_000_000u64);
        assert_eq!(effect.fee, fee);

        let pos = inst.position(PERP_EXPIRY, &taker);
        assert_eq!(pos.size, wad(500));
        assert_eq!(pos.entry_notional, uwad(500));
        assert_eq!(pos.balance, wad(100) - I256::try_from(fee).unwrap());
        let amm = &inst.pair(PERP_EXPIRY).unwrap().amm;
        assert_eq!(amm.long_open_interest, uwad(500));
        assert_eq!(amm.short_open_interest, uwad(500));
        assert_eq!(amm.involved_fund, uwad(1_150));

        // the order was consumed whole, so it resolves from the record
        inst.apply_fill(PERP_EXPIRY, addr(2), OrderKey::new(0, 0))
            .unwrap();
        let maker = inst.position(PERP_EXPIRY, &addr(2));
        assert_eq!(maker.size, wad(-500));
        assert_eq!(maker.balance, wad(50) + I256::try_from(fee).unwrap());
        assert!(inst.orders(PERP_EXPIRY, &addr(2)).is_empty());

        // partly close on the curve
        let effect = inst
            .apply_trade(PERP_EXPIRY, taker, wad(-100), I256::ZERO, 5)
            .unwrap();
        assert_eq!(effect.closed_size, uwad(100));
        assert_eq!(inst.position(PERP_EXPIRY, &taker).size, wad(400));
        let amm = &inst.pair(PERP_EXPIRY).unwrap().amm;
        assert_eq!(amm.long_open_interest, uwad(400));
        assert_eq!(amm.short_open_interest, uwad(500));
        assert!(amm.tick < 0);
    }

    #[test]
    fn fill_before_checkpoint_is_rejected() {
        let mut inst = market();
        let err = inst
            .apply_fill(PERP_EXPIRY, addr(2), OrderKey::new(0, 0))
            .unwrap_err();
        assert!(is_inconsistency(err));
        // the order survives a rejected event
        assert_eq!(inst.orders(PERP_EXPIRY, &addr(2)).len(), 1);
    }

    #[test]
    fn cancel_returns_margin_and_clears_pearl() {
        let mut inst = market();
        inst.apply_cancel(PERP_EXPIRY, addr(2), OrderKey::new(0, 0))
            .unwrap();
        let pair = inst.pair(PERP_EXPIRY).unwrap();
        assert!(pair.pearl(0).left.is_zero());
        assert!(!pair.bitmap().is_initialized(0, 1).unwrap());
        assert_eq!(inst.position(PERP_EXPIRY, &addr(2)).balance, wad(50));

        let err = inst
            .apply_cancel(PERP_EXPIRY, addr(2), OrderKey::new(0, 0))
            .unwrap_err();
        assert!(is_inconsistency(err));
    }

    #[test]
    fn place_checks_nonce_and_side() {
        let mut inst = market();
        let buy = Order {
            balance: wad(1),
            size: wad(10),
        };
        let err = inst
            .apply_place(PERP_EXPIRY, addr(4), OrderKey::new(0, 0), buy.clone())
            .unwrap_err();
        assert!(is_inconsistency(err));
        let err = inst
            .apply_place(PERP_EXPIRY, addr(4), OrderKey::new(5, 1), buy.clone())
            .unwrap_err();
        assert!(is_inconsistency(err));

        inst.apply_place(PERP_EXPIRY, addr(4), OrderKey::new(-5, 0), buy.clone())
            .unwrap();
        inst.apply_place(PERP_EXPIRY, addr(4), OrderKey::new(-5, 0), buy)
            .unwrap();
        let order = &inst.orders(PERP_EXPIRY, &addr(4))[&OrderKey::new(-5, 0)];
        assert_eq!(order.size, wad(20));
        assert_eq!(order.balance, wad(2));
    }

    #[test]
    fn remove_converts_range_to_position() {
        let mut inst = market();
        inst.apply_trade(PERP_EXPIRY, addr(3), wad(2_000), wad(100), 5)
            .unwrap();
        inst.apply_remove(PERP_EXPIRY, addr(1), RangeKey::new(-1000, 1000))
            .unwrap();

        let lp = inst.account(PERP_EXPIRY, &addr(1));
        assert!(lp.ranges.is_empty());
        // the curve sold base to the taker
        assert!(lp.position.size.is_negative());
        let pair = inst.pair(PERP_EXPIRY).unwrap();
        assert_eq!(pair.amm.liquidity, 0);
        assert_eq!(pair.amm.total_liquidity, 0);
        assert!(pair.pearl(-1000) == Default::default());

        let err = inst
            .apply_remove(PERP_EXPIRY, addr(1), RangeKey::new(-1000, 1000))
            .unwrap_err();
        assert!(is_inconsistency(err));
    }

    #[test]
    fn liquidation_moves_part_of_a_position() {
        let mut inst = market();
        let taker = addr(3);
        inst.apply_trade(PERP_EXPIRY, taker, wad(500), wad(100), 0)
            .unwrap();
        inst.apply_liquidate(PERP_EXPIRY, taker, addr(9), wad(200))
            .unwrap();
        assert_eq!(inst.position(PERP_EXPIRY, &taker).size, wad(300));
        let taken = inst.position(PERP_EXPIRY, &addr(9));
        assert_eq!(taken.size, wad(200));
        assert_eq!(taken.balance, wad(40));

        let err = inst
            .apply_liquidate(PERP_EXPIRY, taker, addr(9), wad(-1))
            .unwrap_err();
        assert!(is_inconsistency(err));
        assert_eq!(inst.position(PERP_EXPIRY, &taker).size, wad(300));
    }

    #[test]
    fn lifecycle_is_monotonic_and_settles() {
        let mut inst = market();
        let taker = addr(3);
        inst.apply_trade(PERP_EXPIRY, taker, wad(500), wad(100), 0)
            .unwrap();
        let err = inst.apply_settle(PERP_EXPIRY, taker, uwad(1)).unwrap_err();
        assert!(is_inconsistency(err));

        inst.apply_update_amm_status(PERP_EXPIRY, AmmStatus::Settling, WAD)
            .unwrap();
        let err = inst
            .apply_update_amm_status(PERP_EXPIRY, AmmStatus::Trading, WAD)
            .unwrap_err();
        assert!(is_inconsistency(err));
        let err = inst
            .apply_trade(PERP_EXPIRY, taker, wad(1), wad(1), 0)
            .unwrap_err();
        assert!(is_inconsistency(err));

        inst.apply_settle(PERP_EXPIRY, taker, uwad(100)).unwrap();
        assert_eq!(inst.account(PERP_EXPIRY, &taker), AccountState::default());
        let amm = &inst.pair(PERP_EXPIRY).unwrap().amm;
        assert!(amm.long_open_interest.is_zero());
        assert_eq!(amm.involved_fund, uwad(1_050));

        inst.apply_update_amm_status(PERP_EXPIRY, AmmStatus::Settled, WAD)
            .unwrap();
        assert!(inst.accounts(PERP_EXPIRY).is_none());
        assert_eq!(inst.pair(PERP_EXPIRY).unwrap().amm.settlement_price, WAD);
    }

    #[test]
    fn failed_trade_leaves_pair_and_accounts_untouched() {
        let mut inst = market();
        // entered above the pair's social-loss index, so closing it fails
        let short = AccountState {
            position: Position {
                balance: wad(10),
                size: wad(-10),
                entry_notional: uwad(10),
                entry_social_loss_index: WAD,
                entry_funding_index: I256::ZERO,
            },
            ..Default::default()
        };
        inst.insert_account(PERP_EXPIRY, addr(5), short.clone());
        let before = inst.clone();

        let err = inst
            .apply_trade(PERP_EXPIRY, addr(5), wad(100), wad(1), 5)
            .unwrap_err();
        assert!(is_inconsistency(err));
        assert_eq!(inst, before);
        assert_eq!(inst.pair(PERP_EXPIRY).unwrap().pearl(0).left, wad(-500));
        assert_eq!(inst.account(PERP_EXPIRY, &addr(5)), short);
    }

    #[test]
    fn place_rejects_ticks_outside_the_price_range() {
        let mut inst = market();
        let order = Order {
            balance: wad(1),
            size: wad(-1),
        };
        for tick in [MAX_TICK + 1, MIN_TICK - 1] {
            let err = inst
                .apply_place(PERP_EXPIRY, addr(4), OrderKey::new(tick, 0), order.clone())
                .unwrap_err();
            assert_eq!(err, Error::StateError(StateError::TickOutOfBounds));
        }
        assert!(inst.orders(PERP_EXPIRY, &addr(4)).is_empty());
        assert_eq!(inst.pair(PERP_EXPIRY).unwrap().amm.involved_fund, uwad(1_050));
    }

    #[test]
    fn settle_withdraws_orders_and_ranges() {
        let mut inst = market();
        inst.apply_trade(PERP_EXPIRY, addr(3), wad(200), wad(100), 0)
            .unwrap();
        assert_eq!(inst.pair(PERP_EXPIRY).unwrap().pearl(0).left, wad(-300));
        inst.apply_update_amm_status(PERP_EXPIRY, AmmStatus::Settling, WAD)
            .unwrap();

        inst.apply_settle(PERP_EXPIRY, addr(2), uwad(1)).unwrap();
        let pair = inst.pair(PERP_EXPIRY).unwrap();
        assert!(pair.pearl(0).left.is_zero());
        assert!(!pair.bitmap().is_initialized(0, 1).unwrap());
        // the maker's filled part leaves open interest with the account
        assert!(pair.amm.short_open_interest.is_zero());
        assert_eq!(pair.amm.long_open_interest, uwad(200));
        assert_eq!(pair.amm.involved_fund, uwad(1_149));
        assert_eq!(inst.account(PERP_EXPIRY, &addr(2)), AccountState::default());

        inst.apply_settle(PERP_EXPIRY, addr(1), uwad(1_000)).unwrap();
        let pair = inst.pair(PERP_EXPIRY).unwrap();
        assert_eq!(pair.amm.liquidity, 0);
        assert_eq!(pair.amm.total_liquidity, 0);
        assert_eq!(pair.pearl(-1000), Default::default());
        assert_eq!(pair.pearl(1000), Default::default());
        assert!(inst.ranges(PERP_EXPIRY, &addr(1)).is_empty());
    }

    #[test]
    fn condition_social_loss_and_sweep_events() {
        let mut inst = market();
        let log = |event: Event| LedgerEvent {
            address: addr(0x10),
            block_number: 1,
            log_index: 0,
            timestamp: 2_000,
            event,
        };

        inst.apply(&log(Event::UpdateCondition {
            condition: Condition::Frozen,
        }))
        .unwrap();
        assert_eq!(inst.condition, Condition::Frozen);

        inst.apply(&log(Event::UpdateSocialLoss {
            expiry: PERP_EXPIRY,
            long_social_loss_index: U256::from(3u8),
            short_social_loss_index: U256::from(4u8),
            insurance_fund: uwad(9),
        }))
        .unwrap();
        let amm = &inst.pair(PERP_EXPIRY).unwrap().amm;
        assert_eq!(amm.long_social_loss_index, U256::from(3u8));
        assert_eq!(amm.short_social_loss_index, U256::from(4u8));
        assert_eq!(amm.insurance_fund, uwad(9));
        let err = inst
            .apply(&log(Event::UpdateSocialLoss {
                expiry: 1,
                long_social_loss_index: U256::ZERO,
                short_social_loss_index: U256::ZERO,
                insurance_fund: U256::ZERO,
            }))
            .unwrap_err();
        assert!(is_inconsistency(err));

        // a sweep books the trade but moves no margin in
        let effect = inst
            .apply(&log(Event::Sweep {
                expiry: PERP_EXPIRY,
                trader: addr(6),
                size: wad(100),
                fee_ratio: 0,
            }))
            .unwrap();
        assert_eq!(effect.notional, uwad(100));
        let swept = inst.position(PERP_EXPIRY, &addr(6));
        assert_eq!(swept.size, wad(100));
        assert!(swept.balance.is_zero());
        assert_eq!(swept.entry_social_loss_index, U256::from(3u8));
        let amm = &inst.pair(PERP_EXPIRY).unwrap().amm;
        assert_eq!(amm.involved_fund, uwad(1_050));
        assert_eq!(amm.long_open_interest, uwad(100));
    }

    #[test]
    fn funding_only_on_perpetuals_and_duplicate_pairs_rejected() {
        let mut inst = InstrumentState::default();
        inst.apply_new_pair(1_700_000_000, Q96, 0).unwrap();
        let err = inst.apply_new_pair(1_700_000_000, Q96, 0).unwrap_err();
        assert!(is_inconsistency(err));
        let err = inst
            .apply_update_funding_index(1_700_000_000, WAD, 10)
            .unwrap_err();
        assert!(is_inconsistency(err));

        inst.apply_new_pair(PERP_EXPIRY, Q96, 0).unwrap();
        let undistributed = inst
            .apply_update_funding_index(PERP_EXPIRY, WAD, 10)
            .unwrap();
        assert!(undistributed.is_zero());
        assert_eq!(inst.pair(PERP_EXPIRY).unwrap().amm.timestamp, 10);
    }

    #[test]
    fn snapshot_round_trip() {
        let mut inst = market();
        inst.apply_trade(PERP_EXPIRY, addr(3), wad(700), wad(100), 5)
            .unwrap();
        let value = inst.snapshot().unwrap();
        let mut copy = InstrumentState::default();
        copy.restore(value).unwrap();
        assert_eq!(copy, inst);
    }
}
