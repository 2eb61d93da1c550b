use crate::error::{inconsistency, Result};
use crate::events::{Event, LedgerEvent};
use crate::snapshot::{dec, dec_map, keyed, Snapshot};
use crate::FastMap;
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lifetime deposits and withdrawals of one trader in one quote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundFlow {
    #[serde(with = "dec")]
    pub total_in: U256,
    #[serde(with = "dec")]
    pub total_out: U256,
}

impl FundFlow {
    pub fn is_zero(&self) -> bool {
        self.total_in.is_zero() && self.total_out.is_zero()
    }
}

/// A withdrawal held back above the quote's threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pending {
    pub timestamp: u64,
    #[serde(with = "dec")]
    pub amount: U256,
}

/// Vault books of one quote asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteState {
    #[serde(with = "dec")]
    pub threshold: U256,
    #[serde(with = "dec_map")]
    reserves: FastMap<Address, U256>,
    #[serde(with = "keyed")]
    fund_flows: FastMap<Address, FundFlow>,
    #[serde(with = "keyed")]
    pendings: FastMap<Address, Pending>,
}

impl QuoteState {
    pub fn reserve(&self, trader: &Address) -> U256 {
        self.reserves.get(trader).copied().unwrap_or_default()
    }

    pub fn fund_flow(&self, trader: &Address) -> FundFlow {
        self.fund_flows.get(trader).copied().unwrap_or_default()
    }

    pub fn pending(&self, trader: &Address) -> Pending {
        self.pendings.get(trader).copied().unwrap_or_default()
    }

    /// Every trader with any reserve, flow or pending entry.
    pub fn traders(&self) -> Vec<Address> {
        let mut traders: Vec<Address> = self
            .reserves
            .keys()
            .chain(self.fund_flows.keys())
            .chain(self.pendings.keys())
            .copied()
            .collect();
        traders.sort();
        traders.dedup();
        traders
    }

    pub fn set_reserve(&mut self, trader: Address, reserve: U256) {
        if reserve.is_zero() {
            self.reserves.remove(&trader);
        } else {
            self.reserves.insert(trader, reserve);
        }
    }

    pub fn set_fund_flow(&mut self, trader: Address, flow: FundFlow) {
        if flow.is_zero() {
            self.fund_flows.remove(&trader);
        } else {
            self.fund_flows.insert(trader, flow);
        }
    }

    pub fn set_pending(&mut self, trader: Address, pending: Pending) {
        if pending == Pending::default() {
            self.pendings.remove(&trader);
        } else {
            self.pendings.insert(trader, pending);
        }
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn credit(&mut self, trader: Address, quantity: U256) -> Result<()> {
        let reserve = self
            .reserve(&trader)
            .checked_add(quantity)
            .ok_or_else(|| inconsistency(format!("reserve of {trader} overflows")))?;
        self.set_reserve(trader, reserve);
        Ok(())
    }

    fn debit(&mut self, trader: Address, quantity: U256) -> Result<()> {
        let reserve = self.reserve(&trader).checked_sub(quantity).ok_or_else(|| {
            inconsistency(format!(
                "reserve of {trader} is {} but {quantity} leaves it",
                self.reserve(&trader)
            ))
        })?;
        self.set_reserve(trader, reserve);
        Ok(())
    }
}

/// The cross-instrument vault.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateState {
    #[serde(with = "keyed")]
    quotes: FastMap<Address, QuoteState>,
    #[serde(with = "keyed")]
    blacklist: FastMap<Address, bool>,
}

impl GateState {
    pub fn quote(&self, quote: &Address) -> Option<&QuoteState> {
        self.quotes.get(quote)
    }

    pub fn quotes(&self) -> impl Iterator<Item = (&Address, &QuoteState)> {
        self.quotes.iter()
    }

    pub fn reserve(&self, quote: &Address, trader: &Address) -> U256 {
        self.quote(quote).map(|q| q.reserve(trader)).unwrap_or_default()
    }

    pub fn fund_flow(&self, quote: &Address, trader: &Address) -> FundFlow {
        self.quote(quote).map(|q| q.fund_flow(trader)).unwrap_or_default()
    }

    pub fn pending(&self, quote: &Address, trader: &Address) -> Pending {
        self.quote(quote).map(|q| q.pending(trader)).unwrap_or_default()
    }

    pub fn threshold(&self, quote: &Address) -> U256 {
        self.quote(quote).map(|q| q.threshold).unwrap_or_default()
    }

    pub fn is_blacklisted(&self, trader: &Address) -> bool {
        self.blacklist.get(trader).copied().unwrap_or(false)
    }

    pub fn blacklisted(&self) -> impl Iterator<Item = &Address> {
        self.blacklist.keys()
    }

    /// Runs `f` on the quote's books, dropping them if left empty.
    pub fn with_quote<T>(&mut self, quote: Address, f: impl FnOnce(&mut QuoteState) -> T) -> T {
        let state = self.quotes.entry(quote).or_default();
        let out = f(state);
        if state.is_empty() {
            self.quotes.remove(&quote);
        }
        out
    }

    /// Routes one vault event. Returns the change to the trader's fund flow.
    pub fn apply(&mut self, event: &LedgerEvent) -> Result<FundFlow> {
        let flow = match &event.event {
            Event::Deposit {
                quote,
                trader,
                quantity,
            } => self.apply_deposit(*quote, *trader, *quantity)?,
            Event::Withdraw {
                quote,
                trader,
                quantity,
            } => self.apply_withdraw(*quote, *trader, *quantity)?,
            Event::Scatter {
                quote,
                trader,
                quantity,
            } => {
                self.with_quote(*quote, |q| q.debit(*trader, *quantity))?;
                FundFlow::default()
            }
            Event::Gather {
                quote,
                trader,
                quantity,
            } => {
                self.with_quote(*quote, |q| q.credit(*trader, *quantity))?;
                FundFlow::default()
            }
            Event::NewPending {
                quote,
                trader,
                quantity,
            } => {
                self.apply_new_pending(*quote, *trader, *quantity, event.timestamp)?;
                FundFlow::default()
            }
            Event::ReleasePending {
                quote,
                trader,
                released,
            } => self.apply_release_pending(*quote, *trader, *released)?,
            Event::SetThreshold { quote, threshold } => {
                self.with_quote(*quote, |q| q.threshold = *threshold);
                FundFlow::default()
            }
            Event::SetBlacklist { trader, banned } => {
                self.set_blacklisted(*trader, *banned);
                FundFlow::default()
            }
            other => {
                return Err(inconsistency(format!(
                    "instrument event {} emitted by the vault",
                    other.name()
                )))
            }
        };
        Ok(flow)
    }

    pub fn apply_deposit(
        &mut self,
        quote: Address,
        trader: Address,
        quantity: U256,
    ) -> Result<FundFlow> {
        self.with_quote(quote, |q| {
            q.credit(trader, quantity)?;
            let mut flow = q.fund_flow(&trader);
            flow.total_in += quantity;
            q.set_fund_flow(trader, flow);
            Ok(FundFlow {
                total_in: quantity,
                total_out: U256::ZERO,
            })
        })
    }

    pub fn apply_withdraw(
        &mut self,
        quote: Address,
        trader: Address,
        quantity: U256,
    ) -> Result<FundFlow> {
        self.with_quote(quote, |q| {
            q.debit(trader, quantity)?;
            let mut flow = q.fund_flow(&trader);
            flow.total_out += quantity;
            q.set_fund_flow(trader, flow);
            Ok(FundFlow {
                total_in: U256::ZERO,
                total_out: quantity,
            })
        })
    }

    /// Parks `quantity` of the reserve as a pending withdrawal. A trader has at
    /// most one.
    pub fn apply_new_pending(
        &mut self,
        quote: Address,
        trader: Address,
        quantity: U256,
        timestamp: u64,
    ) -> Result<()> {
        self.with_quote(quote, |q| {
            if q.pendings.contains_key(&trader) {
                return Err(inconsistency(format!(
                    "{trader} already has a pending withdrawal of {quote}"
                )));
            }
            q.debit(trader, quantity)?;
            q.set_pending(
                trader,
                Pending {
                    timestamp,
                    amount: quantity,
                },
            );
            Ok(())
        })
    }

    /// Pays out (`released`) or returns to the reserve the pending withdrawal.
    pub fn apply_release_pending(
        &mut self,
        quote: Address,
        trader: Address,
        released: bool,
    ) -> Result<FundFlow> {
        self.with_quote(quote, |q| {
            let pending = q.pendings.remove(&trader).ok_or_else(|| {
                inconsistency(format!("{trader} has no pending withdrawal of {quote}"))
            })?;
            debug!(%trader, amount = %pending.amount, released, "pending withdrawal closed");
            if !released {
                q.credit(trader, pending.amount)?;
                return Ok(FundFlow::default());
            }
            let mut flow = q.fund_flow(&trader);
            flow.total_out += pending.amount;
            q.set_fund_flow(trader, flow);
            Ok(FundFlow {
                total_in: U256::ZERO,
                total_out: pending.amount,
            })
        })
    }

    pub fn set_blacklisted(&mut self, trader: Address, banned: bool) {
        if banned {
            self.blacklist.insert(trader, true);
        } else {
            self.blacklist.remove(&trader);
        }
    }
}

impl Snapshot for GateState {
    fn is_blank(&self) -> bool {
        *self == Self::default()
    }
}
