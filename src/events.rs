//! Decoded ledger events and their position in the log.

use crate::ledger::instrument::Condition;
use crate::ledger::order::Order;
use crate::ledger::range::Range;
use crate::pair::state::AmmStatus;
use crate::snapshot::dec;
use alloy_primitives::{Address, I256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an event sits in the chain. Events are applied in ascending order.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LogPosition {
    pub block_number: u64,
    pub log_index: u32,
}

impl LogPosition {
    pub fn new(block_number: u64, log_index: u32) -> Self {
        Self {
            block_number,
            log_index,
        }
    }

    /// After every log of `block_number`, as for state read at that block.
    pub fn end_of_block(block_number: u64) -> Self {
        Self::new(block_number, u32::MAX)
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.block_number, self.log_index)
    }
}

/// Arguments of every event the ledger understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "args")]
pub enum Event {
    NewPair {
        expiry: u32,
        #[serde(with = "dec")]
        sqrt_px96: U256,
    },
    UpdateCondition {
        condition: Condition,
    },
    UpdateMarginRatio {
        initial: u32,
        maintenance: u32,
    },
    Add {
        expiry: u32,
        trader: Address,
        tick_lower: i32,
        tick_upper: i32,
        range: Range,
    },
    Remove {
        expiry: u32,
        trader: Address,
        tick_lower: i32,
        tick_upper: i32,
    },
    Place {
        expiry: u32,
        trader: Address,
        tick: i32,
        nonce: u32,
        order: Order,
    },
    Cancel {
        expiry: u32,
        trader: Address,
        tick: i32,
        nonce: u32,
    },
    Fill {
        expiry: u32,
        trader: Address,
        tick: i32,
        nonce: u32,
    },
    Trade {
        expiry: u32,
        trader: Address,
        #[serde(with = "dec")]
        size: I256,
        /// Margin moved into (or out of) the position with the trade.
        #[serde(with = "dec")]
        amount: I256,
        fee_ratio: u32,
    },
    Sweep {
        expiry: u32,
        trader: Address,
        #[serde(with = "dec")]
        size: I256,
        fee_ratio: u32,
    },
    Adjust {
        expiry: u32,
        trader: Address,
        #[serde(with = "dec")]
        net: I256,
    },
    Liquidate {
        expiry: u32,
        target: Address,
        liquidator: Address,
        #[serde(with = "dec")]
        size: I256,
    },
    Settle {
        expiry: u32,
        trader: Address,
        #[serde(with = "dec")]
        settlement: U256,
    },
    UpdateFundingIndex {
        expiry: u32,
        #[serde(with = "dec")]
        mark_price: U256,
    },
    UpdateAmmStatus {
        expiry: u32,
        status: AmmStatus,
        #[serde(with = "dec")]
        mark_price: U256,
    },
    UpdateSocialLoss {
        expiry: u32,
        #[serde(with = "dec")]
        long_social_loss_index: U256,
        #[serde(with = "dec")]
        short_social_loss_index: U256,
        #[serde(with = "dec")]
        insurance_fund: U256,
    },
    Deposit {
        quote: Address,
        trader: Address,
        #[serde(with = "dec")]
        quantity: U256,
    },
    Withdraw {
        quote: Address,
        trader: Address,
        #[serde(with = "dec")]
        quantity: U256,
    },
    /// Reserve moved into an instrument as margin.
    Scatter {
        quote: Address,
        trader: Address,
        #[serde(with = "dec")]
        quantity: U256,
    },
    /// Margin moved back from an instrument into the reserve.
    Gather {
        quote: Address,
        trader: Address,
        #[serde(with = "dec")]
        quantity: U256,
    },
    NewPending {
        quote: Address,
        trader: Address,
        #[serde(with = "dec")]
        quantity: U256,
    },
    ReleasePending {
        quote: Address,
        trader: Address,
        released: bool,
    },
    SetThreshold {
        quote: Address,
        #[serde(with = "dec")]
        threshold: U256,
    },
    SetBlacklist {
        trader: Address,
        banned: bool,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::NewPair { .. } => "NewPair",
            Event::UpdateCondition { .. } => "UpdateCondition",
            Event::UpdateMarginRatio { .. } => "UpdateMarginRatio",
            Event::Add { .. } => "Add",
            Event::Remove { .. } => "Remove",
            Event::Place { .. } => "Place",
            Event::Cancel { .. } => "Cancel",
            Event::Fill { .. } => "Fill",
            Event::Trade { .. } => "Trade",
            Event::Sweep { .. } => "Sweep",
            Event::Adjust { .. } => "Adjust",
            Event::Liquidate { .. } => "Liquidate",
            Event::Settle { .. } => "Settle",
            Event::UpdateFundingIndex { .. } => "UpdateFundingIndex",
            Event::UpdateAmmStatus { .. } => "UpdateAmmStatus",
            Event::UpdateSocialLoss { .. } => "UpdateSocialLoss",
            Event::Deposit { .. } => "Deposit",
            Event::Withdraw { .. } => "Withdraw",
            Event::Scatter { .. } => "Scatter",
            Event::Gather { .. } => "Gather",
            Event::NewPending { .. } => "NewPending",
            Event::ReleasePending { .. } => "ReleasePending",
            Event::SetThreshold { .. } => "SetThreshold",
            Event::SetBlacklist { .. } => "SetBlacklist",
        }
    }

    /// Whether the event is emitted by the vault rather than an instrument.
    pub fn is_gate(&self) -> bool {
        matches!(
            self,
            Event::Deposit { .. }
                | Event::Withdraw { .. }
                | Event::Scatter { .. }
                | Event::Gather { .. }
                | Event::NewPending { .. }
                | Event::ReleasePending { .. }
                | Event::SetThreshold { .. }
                | Event::SetBlacklist { .. }
        )
    }
}

/// An event together with its emitter and log coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub address: Address,
    pub block_number: u64,
    pub log_index: u32,
    pub timestamp: u64,
    pub event: Event,
}

impl LedgerEvent {
    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.block_number, self.log_index)
    }
}
