//! Event-sourced replay of the ledger and its diff against a live read.
//!
//! A [`Replay`] never reads remote state: it is driven by events alone and
//! keeps running totals on the side. [`compare`] then walks a live ledger
//! and reports, field by field, where the replayed one disagrees. A
//! disagreement is a normal result here, not an error.

pub mod comparator;
pub mod replay;

pub use comparator::{compare, Comparison, Mismatch};
pub use replay::{Replay, Totals};
