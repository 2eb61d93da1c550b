use crate::ledger::order::{Order, OrderKey};
use crate::ledger::position::Position;
use crate::ledger::range::{Range, RangeKey};
use crate::snapshot::{keyed, Snapshot};
use crate::FastMap;
use serde::{Deserialize, Serialize};

/// One trader's holdings in one pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub position: Position,
    #[serde(with = "keyed")]
    pub orders: FastMap<OrderKey, Order>,
    #[serde(with = "keyed")]
    pub ranges: FastMap<RangeKey, Range>,
}

impl AccountState {
    /// Nothing left worth keeping: no margin, no exposure, nothing resting.
    pub fn is_empty(&self) -> bool {
        self.position == Position::default() && self.orders.is_empty() && self.ranges.is_empty()
    }

    pub fn order(&self, key: OrderKey) -> Option<&Order> {
        self.orders.get(&key)
    }

    pub fn range(&self, key: RangeKey) -> Option<&Range> {
        self.ranges.get(&key)
    }
}

impl Snapshot for AccountState {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}
