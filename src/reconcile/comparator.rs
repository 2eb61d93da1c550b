use crate::error::{malformed, Result};
use crate::ledger::{GateState, InstrumentState, Ledger};
use crate::pair::state::{PairState, RecordKey};
use crate::reconcile::replay::Replay;
use alloy_primitives::Address;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

/// One field where the live read and the replay disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    /// Slash-separated location, e.g. `instruments/<addr>/pairs/<expiry>/amm/tick`.
    pub path: String,
    pub live: Value,
    pub replayed: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Comparison {
    pub has_differences: bool,
    pub mismatches: Vec<Mismatch>,
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| malformed(e.to_string()))
}

struct Comparator<'a> {
    replay: &'a Replay,
    mismatches: Vec<Mismatch>,
}

impl<'a> Comparator<'a> {
    fn report(&mut self, path: String, live: Value, replayed: Value) {
        warn!(%path, %live, %replayed, "reconciliation mismatch");
        self.mismatches.push(Mismatch {
            path,
            live,
            replayed,
        });
    }

    /// Recursive typed diff. Big integers are decimal strings, so scalar
    /// equality is exact.
    fn diff(&mut self, path: &str, live: &Value, replayed: &Value) {
        match (live, replayed) {
            (Value::Object(l), Value::Object(r)) => {
                let mut keys: Vec<&String> = l.keys().chain(r.keys()).collect();
                keys.sort();
                keys.dedup();
                for key in keys {
                    self.diff(
                        &format!("{path}/{key}"),
                        l.get(key).unwrap_or(&Value::Null),
                        r.get(key).unwrap_or(&Value::Null),
                    );
                }
            }
            (Value::Array(l), Value::Array(r)) => {
                for i in 0..l.len().max(r.len()) {
                    self.diff(
                        &format!("{path}/{i}"),
                        l.get(i).unwrap_or(&Value::Null),
                        r.get(i).unwrap_or(&Value::Null),
                    );
                }
            }
            _ if live == replayed => {}
            _ => self.report(path.to_string(), live.clone(), replayed.clone()),
        }
    }

    fn diff_typed<T: Serialize>(
        &mut self,
        path: &str,
        live: &T,
        replayed: Option<&T>,
    ) -> Result<()> {
        let live = to_value(live)?;
        let replayed = match replayed {
            Some(value) => to_value(value)?,
            None => Value::Null,
        };
        self.diff(path, &live, &replayed);
        Ok(())
    }

    fn instrument(
        &mut self,
        address: &Address,
        live: Option<&InstrumentState>,
        replayed: Option<&InstrumentState>,
    ) -> Result<()> {
        let path = format!("instruments/{address}");
        let (live, replayed) = match (live, replayed) {
            (Some(live), Some(replayed)) => (live, replayed),
            (live, replayed) => {
                self.report(path, presence(live.is_some()), presence(replayed.is_some()));
                return Ok(());
            }
        };
        self.diff_typed(&format!("{path}/condition"), &live.condition, Some(&replayed.condition))?;
        self.diff_typed(&format!("{path}/setting"), &live.setting, Some(&replayed.setting))?;

        for expiry in union(live.expiries(), replayed.expiries()) {
            let pair_path = format!("{path}/pairs/{expiry}");
            match (live.pair(expiry), replayed.pair(expiry)) {
                (Some(live_pair), Some(replayed_pair)) => {
                    let orders = order_keys(live, replayed, expiry);
                    self.pair(&pair_path, live_pair, replayed_pair, &orders)?;
                }
                (l, r) => self.report(pair_path, presence(l.is_some()), presence(r.is_some())),
            }
            let traders = |state: &InstrumentState| {
                state.accounts(expiry).map(|book| book.traders()).unwrap_or_default()
            };
            for trader in union(traders(live), traders(replayed)) {
                self.diff_typed(
                    &format!("{path}/accounts/{expiry}/{trader}"),
                    &live.account(expiry, &trader),
                    Some(&replayed.account(expiry, &trader)),
                )?;
            }
        }
        Ok(())
    }

    /// Records are immutable once written and a live read only holds the ones
    /// its orders point at, so the records compared are those the live read
    /// holds plus those behind any order either side has.
    fn pair(
        &mut self,
        path: &str,
        live: &PairState,
        replayed: &PairState,
        orders: &[RecordKey],
    ) -> Result<()> {
        self.diff_typed(&format!("{path}/amm"), &live.amm, Some(&replayed.amm))?;

        let words = |pair: &PairState| -> Vec<i16> {
            pair.bitmap().words().map(|(word, _)| word).collect()
        };
        for word in union(words(live), words(replayed)) {
            let (l, r) = (live.bitmap_word(word), replayed.bitmap_word(word));
            if l != r {
                self.report(
                    format!("{path}/bitmap/{word}"),
                    Value::String(l.to_string()),
                    Value::String(r.to_string()),
                );
            }
        }

        let live_ticks: Vec<i32> = live.pearls().map(|(tick, _)| tick).collect();
        let replayed_ticks: Vec<i32> = replayed
            .pearls()
            .filter(|(_, pearl)| pearl.is_initialized())
            .map(|(tick, _)| tick)
            .collect();
        for tick in union(live_ticks, replayed_ticks) {
            self.diff_typed(
                &format!("{path}/pearls/{tick}"),
                &live.pearl(tick),
                Some(&replayed.pearl(tick)),
            )?;
        }

        let held: Vec<RecordKey> = live.records().map(|(key, _)| key).collect();
        let closed = |key: &RecordKey| {
            let nonce = live.pearl(key.tick).nonce.max(replayed.pearl(key.tick).nonce);
            key.nonce < nonce
        };
        let behind_orders = orders.iter().copied().filter(closed);
        for key in union(held, behind_orders) {
            let record_path = format!("{path}/records/{key}");
            let (l, r) = (
                live.try_record(key.tick, key.nonce),
                replayed.try_record(key.tick, key.nonce),
            );
            match (l, r) {
                (Some(l), r) => self.diff_typed(&record_path, l, r)?,
                (None, Some(_)) => self.report(record_path, Value::Null, presence(true)),
                (None, None) => {}
            }
        }
        Ok(())
    }

    fn gate(&mut self, live: &GateState) -> Result<()> {
        let replay: &'a Replay = self.replay;
        let replayed = replay.ledger().gate();
        let totals = replay.totals();
        let quotes = |gate: &GateState| -> Vec<Address> {
            gate.quotes().map(|(quote, _)| *quote).collect()
        };
        for quote in union(quotes(live), quotes(replayed)) {
            let path = format!("gate/{quote}");
            self.diff_typed(
                &format!("{path}/threshold"),
                &live.threshold(&quote).to_string(),
                Some(&replayed.threshold(&quote).to_string()),
            )?;
            let traders = |gate: &GateState| {
                gate.quote(&quote).map(|q| q.traders()).unwrap_or_default()
            };
            for trader in union(traders(live), traders(replayed)) {
                let trader_path = format!("{path}/{trader}");
                self.diff_typed(
                    &format!("{trader_path}/reserve"),
                    &live.reserve(&quote, &trader).to_string(),
                    Some(&replayed.reserve(&quote, &trader).to_string()),
                )?;
                let flow = live.fund_flow(&quote, &trader);
                self.diff_typed(
                    &format!("{trader_path}/fund_flow"),
                    &flow,
                    Some(&replayed.fund_flow(&quote, &trader)),
                )?;
                self.diff_typed(
                    &format!("{trader_path}/totals"),
                    &flow,
                    Some(&totals.fund_flow(&quote, &trader)),
                )?;
                self.diff_typed(
                    &format!("{trader_path}/pending"),
                    &live.pending(&quote, &trader),
                    Some(&replayed.pending(&quote, &trader)),
                )?;
            }
        }
        let banned = |gate: &GateState| -> Vec<Address> { gate.blacklisted().copied().collect() };
        for trader in union(banned(live), banned(replayed)) {
            let (l, r) = (live.is_blacklisted(&trader), replayed.is_blacklisted(&trader));
            if l != r {
                self.report(format!("blacklist/{trader}"), Value::Bool(l), Value::Bool(r));
            }
        }
        Ok(())
    }
}

fn presence(present: bool) -> Value {
    if present {
        Value::String("present".into())
    } else {
        Value::Null
    }
}

/// Sorted, deduplicated keys of both sides.
fn union<T: Ord>(a: impl IntoIterator<Item = T>, b: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut keys: Vec<T> = a.into_iter().chain(b).collect();
    keys.sort();
    keys.dedup();
    keys
}

/// Record keys behind the orders either ledger holds in the pair.
fn order_keys(live: &InstrumentState, replayed: &InstrumentState, expiry: u32) -> Vec<RecordKey> {
    [live, replayed]
        .into_iter()
        .filter_map(|state| state.accounts(expiry))
        .flat_map(|book| book.iter().flat_map(|(_, account)| account.orders.keys()))
        .map(|key| RecordKey::new(key.tick, key.nonce))
        .collect()
}

/// Walks both ledgers and reports every field they disagree on. An entry
/// only one side holds is compared against its empty default. Only
/// serialization failures are errors; mismatches are the result.
pub fn compare(replay: &Replay, live: &Ledger) -> Result<Comparison> {
    let mut comparator = Comparator {
        replay,
        mismatches: Vec::new(),
    };
    let addresses = |ledger: &Ledger| -> Vec<Address> {
        ledger.instruments().map(|(address, _)| *address).collect()
    };
    let instruments = union(addresses(live), addresses(replay.ledger()));
    for address in &instruments {
        comparator.instrument(
            address,
            live.instrument(address),
            replay.ledger().instrument(address),
        )?;
    }
    comparator.gate(live.gate())?;

    let mismatches = comparator.mismatches;
    info!(
        instruments = instruments.len(),
        mismatches = mismatches.len(),
        "reconciliation finished"
    );
    Ok(Comparison {
        has_differences: !mismatches.is_empty(),
        mismatches,
    })
}
