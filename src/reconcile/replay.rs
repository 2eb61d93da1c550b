use crate::config::InstrumentSetting;
use crate::error::Result;
use crate::events::{Event, LedgerEvent};
use crate::ledger::{Applied, FundFlow, Ledger};
use crate::reconcile::comparator::{compare, Comparison};
use crate::snapshot::Snapshot;
use crate::FastMap;
use alloy_primitives::{Address, U256};
use tracing::debug;

/// Running totals kept beside the replayed ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Totals {
    /// Per (quote, trader): deposits in, withdrawals out.
    flows: FastMap<(Address, Address), FundFlow>,
    /// Per (instrument, trader): taker notional.
    volumes: FastMap<(Address, Address), U256>,
    /// Per (instrument, expiry): funding that went to the insurance fund.
    funding: FastMap<(Address, u32), U256>,
}

impl Totals {
    pub fn fund_flow(&self, quote: &Address, trader: &Address) -> FundFlow {
        self.flows.get(&(*quote, *trader)).copied().unwrap_or_default()
    }

    pub fn volume(&self, instrument: &Address, trader: &Address) -> U256 {
        self.volumes
            .get(&(*instrument, *trader))
            .copied()
            .unwrap_or_default()
    }

    pub fn funding(&self, instrument: &Address, expiry: u32) -> U256 {
        self.funding
            .get(&(*instrument, expiry))
            .copied()
            .unwrap_or_default()
    }

    fn record(&mut self, event: &LedgerEvent, applied: Applied) {
        match (applied, &event.event) {
            (
                Applied::Gate(flow),
                Event::Deposit { quote, trader, .. }
                | Event::Withdraw { quote, trader, .. }
                | Event::ReleasePending { quote, trader, .. },
            ) if !flow.is_zero() => {
                let total = self.flows.entry((*quote, *trader)).or_default();
                total.total_in += flow.total_in;
                total.total_out += flow.total_out;
            }
            (
                Applied::Instrument(effect),
                Event::Trade { trader, .. } | Event::Sweep { trader, .. },
            ) => {
                *self.volumes.entry((event.address, *trader)).or_default() += effect.notional;
            }
            (Applied::Instrument(effect), Event::UpdateFundingIndex { expiry, .. })
                if !effect.undistributed_funding.is_zero() =>
            {
                *self.funding.entry((event.address, *expiry)).or_default() +=
                    effect.undistributed_funding;
            }
            _ => {}
        }
    }
}

/// A ledger rebuilt from events alone, plus [`Totals`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replay {
    ledger: Ledger,
    totals: Totals,
}

impl Replay {
    pub fn new(gate_address: Address) -> Self {
        Self {
            ledger: Ledger::new(gate_address),
            totals: Totals::default(),
        }
    }

    pub fn with_setting(mut self, setting: InstrumentSetting) -> Self {
        self.ledger = self.ledger.with_setting(setting);
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn totals(&self) -> &Totals {
        &self.totals
    }

    /// Applies one event and updates the totals. Undistributed funding is
    /// credited to the pair's insurance fund.
    pub fn apply(&mut self, event: &LedgerEvent) -> Result<Applied> {
        let applied = self.ledger.apply(event)?;
        if let (Applied::Instrument(effect), Event::UpdateFundingIndex { expiry, .. }) =
            (applied, &event.event)
        {
            if !effect.undistributed_funding.is_zero() {
                let amm = &mut self
                    .ledger
                    .instrument_mut(event.address)
                    .pair_mut(*expiry)?
                    .amm;
                amm.insurance_fund += effect.undistributed_funding;
                debug!(
                    instrument = %event.address,
                    expiry,
                    amount = %effect.undistributed_funding,
                    "funding to insurance fund"
                );
            }
        }
        self.totals.record(event, applied);
        Ok(applied)
    }

    pub fn apply_all<'a>(
        &mut self,
        events: impl IntoIterator<Item = &'a LedgerEvent>,
    ) -> Result<()> {
        for event in events {
            self.apply(event)?;
        }
        Ok(())
    }

    /// A disposable copy to simulate on. The ledger goes through a snapshot
    /// so the copy shares nothing with `self`.
    pub fn fork(&self) -> Result<Self> {
        let mut ledger = Ledger::default();
        ledger.restore(self.ledger.snapshot()?)?;
        Ok(Self {
            ledger,
            totals: self.totals.clone(),
        })
    }

    /// Diffs the replayed state against `live`.
    pub fn compare(&self, live: &Ledger) -> Result<Comparison> {
        compare(self, live)
    }
}
