//! In-process configuration. Loading it from files is left to the caller;
//! every struct deserializes with missing fields falling back to `Default`.

use serde::{Deserialize, Serialize};

/// Remote read fan-out used by [`crate::sync::load_ledger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Reads kept in flight at once.
    pub concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { concurrency: 8 }
    }
}

/// Margin and fee ratios of an instrument, in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentSetting {
    pub initial_margin_ratio: u32,
    pub maintenance_margin_ratio: u32,
    pub trading_fee_ratio: u32,
}

impl Default for InstrumentSetting {
    fn default() -> Self {
        Self {
            initial_margin_ratio: 1000,
            maintenance_margin_ratio: 500,
            trading_fee_ratio: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let setting: InstrumentSetting =
            serde_json::from_value(json!({ "trading_fee_ratio": 3 })).unwrap();
        assert_eq!(setting.trading_fee_ratio, 3);
        assert_eq!(setting.maintenance_margin_ratio, 500);

        let sync: SyncConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(sync.concurrency, 8);
    }
}
