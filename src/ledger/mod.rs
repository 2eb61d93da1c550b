//! The mirrored exchange ledger: instruments with their pairs and accounts,
//! plus the vault.
//!
//! [`Ledger::apply`] is the single entry point for events. It enforces log
//! order and routes by emitter: the configured gate address feeds the vault,
//! every other address is an instrument, created on first reference.

pub mod account;
pub mod gate;
pub mod instrument;
pub mod order;
pub mod position;
pub mod range;

pub use account::AccountState;
pub use gate::{FundFlow, GateState, Pending, QuoteState};
pub use instrument::{AccountBook, Condition, Effect, InstrumentState};
pub use order::{Order, OrderKey};
pub use position::{CombineResult, Position, Tally};
pub use range::{Range, RangeKey};

use crate::config::InstrumentSetting;
use crate::error::{inconsistency, Result};
use crate::events::{LedgerEvent, LogPosition};
use crate::snapshot::{keyed, Snapshot};
use crate::FastMap;
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What applying one event produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Instrument(Effect),
    Gate(FundFlow),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    pub gate_address: Address,
    /// Setting given to instruments first seen through an event.
    pub default_setting: InstrumentSetting,
    gate: GateState,
    #[serde(with = "keyed")]
    instruments: FastMap<Address, InstrumentState>,
    last: Option<LogPosition>,
}

impl Ledger {
    pub fn new(gate_address: Address) -> Self {
        Self {
            gate_address,
            ..Default::default()
        }
    }

    pub fn with_setting(mut self, setting: InstrumentSetting) -> Self {
        self.default_setting = setting;
        self
    }

    pub fn gate(&self) -> &GateState {
        &self.gate
    }

    pub fn gate_mut(&mut self) -> &mut GateState {
        &mut self.gate
    }

    pub fn instrument(&self, address: &Address) -> Option<&InstrumentState> {
        self.instruments.get(address)
    }

    pub fn instruments(&self) -> impl Iterator<Item = (&Address, &InstrumentState)> {
        self.instruments.iter()
    }

    /// The instrument at `address`, created with the default setting if new.
    pub fn instrument_mut(&mut self, address: Address) -> &mut InstrumentState {
        let setting = self.default_setting;
        self.instruments
            .entry(address)
            .or_insert_with(|| InstrumentState::new(setting))
    }

    /// Log position of the newest event the ledger already reflects.
    pub fn last_position(&self) -> Option<LogPosition> {
        self.last
    }

    /// Marks the ledger as reflecting everything up to `position`, as after a
    /// remote read.
    pub fn synced_at(&mut self, position: LogPosition) {
        self.last = Some(position);
    }

    /// Applies one event. Events must arrive in strictly increasing log order.
    pub fn apply(&mut self, event: &LedgerEvent) -> Result<Applied> {
        let position = event.position();
        if let Some(last) = self.last {
            if position <= last {
                return Err(inconsistency(format!(
                    "event at {position} is not after {last}"
                )));
            }
        }
        debug!(
            emitter = %event.address,
            block = event.block_number,
            log_index = event.log_index,
            event = event.event.name(),
            "apply event"
        );

        let applied = if event.address == self.gate_address {
            Applied::Gate(self.gate.apply(event)?)
        } else {
            let fresh = !self.instruments.contains_key(&event.address);
            let result = self.instrument_mut(event.address).apply(event);
            if result.is_err() && fresh {
                self.instruments.remove(&event.address);
            }
            Applied::Instrument(result?)
        };
        self.last = Some(position);
        Ok(applied)
    }

    /// Applies events in order, stopping at the first failure.
    pub fn apply_all<'a>(
        &mut self,
        events: impl IntoIterator<Item = &'a LedgerEvent>,
    ) -> Result<()> {
        for event in events {
            self.apply(event)?;
        }
        Ok(())
    }
}

impl Snapshot for Ledger {
    fn is_blank(&self) -> bool {
        self.gate.is_blank() && self.instruments.is_empty() && self.last.is_none()
    }
}
