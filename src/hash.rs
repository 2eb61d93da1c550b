//! Map backend selection for every keyed collection in the ledger.
//!
//! `std-hash` wins over everything, then `ahash`, then `rustc-hash` (default).

#[cfg(feature = "std-hash")]
pub type FastMap<K, V> = std::collections::HashMap<K, V>;

#[cfg(all(feature = "ahash", not(feature = "std-hash")))]
pub type FastMap<K, V> = ahash::AHashMap<K, V>;

#[cfg(all(
    feature = "rustc-hash",
    not(any(feature = "ahash", feature = "std-hash"))
))]
pub type FastMap<K, V> = rustc_hash::FxHashMap<K, V>;

#[cfg(not(any(feature = "rustc-hash", feature = "ahash", feature = "std-hash")))]
pub type FastMap<K, V> = std::collections::HashMap<K, V>;

/// Returns the keys of `map` in ascending order.
///
/// Iteration order of `FastMap` is unspecified; anything that must be
/// deterministic (replay, diffing, logging) goes through this.
pub fn sorted_keys<K: Ord + Clone, V>(map: &FastMap<K, V>) -> Vec<K> {
    let mut keys: Vec<K> = map.keys().cloned().collect();
    keys.sort();
    keys
}
