//! Snapshot encoding shared by every stateful entity.
//!
//! Big integers are written as decimal strings and composite map keys as
//! `"a:b"` strings, so a snapshot is plain JSON that any consumer can read
//! without knowing which fields are 256-bit.

use crate::error::{malformed, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// `#[serde(with = "dec")]` for any integer with decimal `Display`/`FromStr`.
pub mod dec {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::{fmt::Display, str::FromStr};

    pub fn serialize<T: Display, S: Serializer>(
        value: &T,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|e| D::Error::custom(format!("invalid integer {s:?}: {e}")))
    }
}

/// A `FastMap` whose keys and values are both decimal-encoded.
pub mod dec_map {
    use crate::FastMap;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::{collections::BTreeMap, fmt::Display, hash::Hash, str::FromStr};

    pub fn serialize<K, V, S>(map: &FastMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Display + Ord,
        V: Display,
        S: Serializer,
    {
        let sorted: BTreeMap<&K, &V> = map.iter().collect();
        serializer.collect_map(sorted.into_iter().map(|(k, v)| (k.to_string(), v.to_string())))
    }

    pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<FastMap<K, V>, D::Error>
    where
        K: FromStr + Hash + Eq,
        K::Err: Display,
        V: FromStr,
        V::Err: Display,
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        let mut map = FastMap::default();
        for (k, v) in raw {
            let key = k
                .parse()
                .map_err(|e| D::Error::custom(format!("invalid key {k:?}: {e}")))?;
            let value = v
                .parse()
                .map_err(|e| D::Error::custom(format!("invalid value {v:?}: {e}")))?;
            map.insert(key, value);
        }
        Ok(map)
    }
}

/// A `FastMap` with string-encoded keys and structured values.
pub mod keyed {
    use crate::FastMap;
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
    use std::{collections::BTreeMap, fmt::Display, hash::Hash, str::FromStr};

    pub fn serialize<K, V, S>(map: &FastMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Display + Ord,
        V: Serialize,
        S: Serializer,
    {
        let sorted: BTreeMap<&K, &V> = map.iter().collect();
        serializer.collect_map(sorted.into_iter().map(|(k, v)| (k.to_string(), v)))
    }

    pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<FastMap<K, V>, D::Error>
    where
        K: FromStr + Hash + Eq,
        K::Err: Display,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, V>::deserialize(deserializer)?;
        let mut map = FastMap::default();
        for (k, v) in raw {
            let key = k.parse().map_err(|e| D::Error::custom(format!("invalid key {k:?}: {e}")))?;
            map.insert(key, v);
        }
        Ok(map)
    }
}

/// Parses the `"a:b"` form used by composite keys.
pub(crate) fn split_pair<A: std::str::FromStr, B: std::str::FromStr>(s: &str) -> Option<(A, B)> {
    let (a, b) = s.split_once(':')?;
    Some((a.parse().ok()?, b.parse().ok()?))
}

/// Serialize/deserialize pair implemented by every stateful entity.
pub trait Snapshot: Serialize + DeserializeOwned {
    /// Whether the instance still holds only default state.
    fn is_blank(&self) -> bool;

    fn snapshot(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| malformed(e.to_string()))
    }

    /// Loads `value` into a blank instance.
    fn restore(&mut self, value: Value) -> Result<()> {
        if !self.is_blank() {
            return Err(malformed("restore into a non-empty instance"));
        }
        *self = serde_json::from_value(value).map_err(|e| malformed(e.to_string()))?;
        Ok(())
    }
}
