//! Per-expiry AMM state: curve, pearls, records and the tick bitmap.

pub mod state;
pub mod swap;

pub use state::{Amm, AmmStatus, PairState, Pearl, Record, RecordKey, Side};
pub use swap::{SwapOutcome, SwapSummary};
