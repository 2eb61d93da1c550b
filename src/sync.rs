//! Seeding a [`Ledger`] from a remote full-state read.
//!
//! Reads are independent of each other, so they go out in bounded batches
//! through `buffer_unordered`. The pair read follows the same two steps as
//! any tick-indexed pool: bitmap words first, then the pearls behind every
//! set bit. Orders that predate their pearl's checkpoint pull the matching
//! records in a last pass.
//!
//! Every read must come from the same block. A source is expected to pin
//! one; reads that straddle blocks fail the load instead of producing a
//! ledger that would replay some events twice.

use crate::config::{InstrumentSetting, SyncConfig};
use crate::error::{Result, SourceError};
use crate::events::LogPosition;
use crate::ledger::gate::{FundFlow, Pending};
use crate::ledger::instrument::Condition;
use crate::ledger::{AccountState, Ledger, OrderKey};
use crate::math::tick_bitmap::position;
use crate::math::tick_math::{MAX_TICK, MIN_TICK};
use crate::pair::state::{Amm, PairState, Pearl, Record, RecordKey};
use crate::{FastMap, PEARL_SPACING};
use alloy_primitives::{Address, U256};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::ops::RangeInclusive;
use tracing::{debug, info};

/// A value read remotely, with the block it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sourced<T> {
    pub block_number: u64,
    pub value: T,
}

impl<T> Sourced<T> {
    pub fn new(block_number: u64, value: T) -> Self {
        Self {
            block_number,
            value,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstrumentInfo {
    pub condition: Condition,
    pub setting: InstrumentSetting,
    pub expiries: Vec<u32>,
}

/// Everything the vault holds for one (quote, trader).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VaultEntry {
    pub reserve: U256,
    pub fund_flow: FundFlow,
    pub pending: Pending,
    pub threshold: U256,
    pub blacklisted: bool,
}

/// Remote full-state queries. Implementations own transport, batching and
/// retries.
#[allow(async_fn_in_trait)]
pub trait StateSource {
    async fn fetch_instrument(&self, instrument: Address) -> Result<Sourced<InstrumentInfo>>;

    async fn fetch_amm(&self, instrument: Address, expiry: u32) -> Result<Sourced<Amm>>;

    /// Non-zero bitmap words among `words`.
    async fn fetch_bitmap(
        &self,
        instrument: Address,
        expiry: u32,
        words: &[i16],
    ) -> Result<Sourced<FastMap<i16, U256>>>;

    async fn fetch_pearls(
        &self,
        instrument: Address,
        expiry: u32,
        ticks: &[i32],
    ) -> Result<Sourced<FastMap<i32, Pearl>>>;

    async fn fetch_records(
        &self,
        instrument: Address,
        expiry: u32,
        keys: &[RecordKey],
    ) -> Result<Sourced<FastMap<RecordKey, Record>>>;

    async fn fetch_portfolio(
        &self,
        instrument: Address,
        expiry: u32,
        trader: Address,
    ) -> Result<Sourced<AccountState>>;

    async fn fetch_vault(&self, quote: Address, trader: Address) -> Result<Sourced<VaultEntry>>;
}

/// What to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub gate: Address,
    pub instruments: Vec<Address>,
    /// Traders whose portfolios are read in every pair.
    pub traders: Vec<Address>,
    pub quotes: Vec<Address>,
    /// Bitmap words read for every pair.
    pub words: RangeInclusive<i16>,
}

impl SyncRequest {
    /// A request covering the whole tick range.
    pub fn new(gate: Address) -> Self {
        let (min_word, _) = position(MIN_TICK / PEARL_SPACING);
        let (max_word, _) = position(MAX_TICK / PEARL_SPACING);
        Self {
            gate,
            instruments: Vec::new(),
            traders: Vec::new(),
            quotes: Vec::new(),
            words: min_word..=max_word,
        }
    }
}

/// The block all reads of one load agree on.
#[derive(Debug, Default)]
struct SyncBlock(Option<u64>);

impl SyncBlock {
    fn observe(&mut self, block: u64, what: impl FnOnce() -> String) -> Result<()> {
        match self.0 {
            None => {
                self.0 = Some(block);
                Ok(())
            }
            Some(pinned) if pinned == block => Ok(()),
            Some(pinned) => Err(SourceError::Fetch {
                what: what(),
                reason: format!("read at block {block} while earlier reads are at {pinned}"),
            }
            .into()),
        }
    }
}

/// Ticks marked in `words`, ascending within each word.
fn initialized_ticks(words: &FastMap<i16, U256>) -> Vec<i32> {
    let mut ticks = Vec::new();
    for (&word, &bits) in words {
        for bit in 0..256usize {
            if !bits.bit(bit) {
                continue;
            }
            let compressed = (word as i32) * 256 + bit as i32;
            ticks.push(compressed * PEARL_SPACING);
        }
    }
    ticks.sort_unstable();
    ticks
}

async fn fetch_pair<S: StateSource>(
    source: &S,
    instrument: Address,
    expiry: u32,
    words: &[i16],
) -> Result<(u64, PairState)> {
    let what = || format!("pair {instrument}/{expiry}");
    let mut block = SyncBlock::default();
    let amm = source.fetch_amm(instrument, expiry).await?;
    block.observe(amm.block_number, what)?;
    let bitmap = source.fetch_bitmap(instrument, expiry, words).await?;
    block.observe(bitmap.block_number, what)?;
    let ticks = initialized_ticks(&bitmap.value);
    let pearls = if ticks.is_empty() {
        FastMap::default()
    } else {
        let read = source.fetch_pearls(instrument, expiry, &ticks).await?;
        block.observe(read.block_number, what)?;
        read.value
    };
    debug!(%instrument, expiry, ticks = ticks.len(), "pair read");

    let mut pair = PairState::new(expiry, amm.value.sqrt_px96, amm.value.timestamp)?;
    pair.amm = amm.value;
    for (word, bits) in bitmap.value {
        pair.set_bitmap_word(word, bits);
    }
    for tick in ticks {
        let pearl = pearls.get(&tick).cloned().ok_or_else(|| SourceError::Fetch {
            what: format!("pearl {tick} of {instrument}/{expiry}"),
            reason: "bitmap marks a tick the source did not return".into(),
        })?;
        pair.set_pearl(tick, pearl)?;
    }
    Ok((amm.block_number, pair))
}

/// Pearls behind a pair's orders, plus the records of orders whose cycle
/// has closed.
struct OrderPearls {
    instrument: Address,
    expiry: u32,
    block_number: u64,
    pearls: FastMap<i32, Pearl>,
    records: FastMap<RecordKey, Record>,
}

/// A fully taken pearl drops out of the bitmap but keeps its nonce, so
/// order ticks are read directly.
async fn fetch_order_pearls<S: StateSource>(
    source: &S,
    instrument: Address,
    expiry: u32,
    keys: Vec<OrderKey>,
) -> Result<OrderPearls> {
    let mut ticks: Vec<i32> = keys.iter().map(|key| key.tick).collect();
    ticks.sort_unstable();
    ticks.dedup();
    let pearls = source.fetch_pearls(instrument, expiry, &ticks).await?;

    let mut closed: Vec<RecordKey> = keys
        .iter()
        .filter(|key| {
            pearls
                .value
                .get(&key.tick)
                .is_some_and(|pearl| key.nonce < pearl.nonce)
        })
        .map(|key| RecordKey::new(key.tick, key.nonce))
        .collect();
    closed.sort_unstable();
    closed.dedup();
    let records = if closed.is_empty() {
        FastMap::default()
    } else {
        let read = source.fetch_records(instrument, expiry, &closed).await?;
        SyncBlock(Some(pearls.block_number)).observe(read.block_number, || {
            format!("records of {instrument}/{expiry}")
        })?;
        read.value
    };
    Ok(OrderPearls {
        instrument,
        expiry,
        block_number: pearls.block_number,
        pearls: pearls.value,
        records,
    })
}

/// Reads everything `request` names and assembles a ledger marked as synced
/// at the end of the block the reads were taken at.
///
/// Reads answered at different blocks are a [`SourceError`].
pub async fn load_ledger<S: StateSource>(
    source: &S,
    request: &SyncRequest,
    config: &SyncConfig,
) -> Result<Ledger> {
    let limit = config.concurrency.max(1);
    let words: Vec<i16> = request.words.clone().collect();
    let mut block = SyncBlock::default();

    let infos: Vec<(Address, Sourced<InstrumentInfo>)> =
        stream::iter(request.instruments.iter().copied())
            .map(|instrument| async move {
                let read = source.fetch_instrument(instrument).await?;
                Ok::<_, crate::Error>((instrument, read))
            })
            .buffer_unordered(limit)
            .try_collect()
            .await?;

    let mut ledger = Ledger::new(request.gate);
    let mut pair_keys = Vec::new();
    for (instrument, info) in &infos {
        block.observe(info.block_number, || format!("instrument {instrument}"))?;
        let state = ledger.instrument_mut(*instrument);
        state.condition = info.value.condition;
        state.setting = info.value.setting;
        pair_keys.extend(info.value.expiries.iter().map(|expiry| (*instrument, *expiry)));
    }

    let words = &words;
    let pairs: Vec<(Address, u64, PairState)> = stream::iter(pair_keys.iter().copied())
        .map(|(instrument, expiry)| async move {
            let (block, pair) = fetch_pair(source, instrument, expiry, words).await?;
            Ok::<_, crate::Error>((instrument, block, pair))
        })
        .buffer_unordered(limit)
        .try_collect()
        .await?;
    for (instrument, read_at, pair) in pairs {
        block.observe(read_at, || format!("pair {instrument}/{}", pair.amm.expiry))?;
        ledger.instrument_mut(instrument).insert_pair(pair);
    }

    let portfolio_keys: Vec<(Address, u32, Address)> = pair_keys
        .iter()
        .flat_map(|(instrument, expiry)| {
            request
                .traders
                .iter()
                .map(move |trader| (*instrument, *expiry, *trader))
        })
        .collect();
    let portfolios: Vec<(Address, u32, Address, Sourced<AccountState>)> =
        stream::iter(portfolio_keys)
            .map(|(instrument, expiry, trader)| async move {
                let read = source.fetch_portfolio(instrument, expiry, trader).await?;
                Ok::<_, crate::Error>((instrument, expiry, trader, read))
            })
            .buffer_unordered(limit)
            .try_collect()
            .await?;

    let mut wanted: FastMap<(Address, u32), Vec<OrderKey>> = FastMap::default();
    for (instrument, expiry, trader, read) in portfolios {
        block.observe(read.block_number, || {
            format!("portfolio of {trader} in {instrument}/{expiry}")
        })?;
        if !read.value.orders.is_empty() {
            wanted
                .entry((instrument, expiry))
                .or_default()
                .extend(read.value.orders.keys().copied());
        }
        ledger
            .instrument_mut(instrument)
            .insert_account(expiry, trader, read.value);
    }

    let settled: Vec<OrderPearls> = stream::iter(wanted)
        .map(|((instrument, expiry), keys)| async move {
            fetch_order_pearls(source, instrument, expiry, keys).await
        })
        .buffer_unordered(limit)
        .try_collect()
        .await?;
    for read in settled {
        block.observe(read.block_number, || {
            format!("order pearls of {}/{}", read.instrument, read.expiry)
        })?;
        let pair = ledger
            .instrument_mut(read.instrument)
            .pair_mut(read.expiry)?;
        for (tick, pearl) in read.pearls {
            pair.set_pearl(tick, pearl)?;
        }
        for (key, record) in read.records {
            pair.set_record(key.tick, key.nonce, record);
        }
    }

    let vault_keys: Vec<(Address, Address)> = request
        .quotes
        .iter()
        .flat_map(|quote| request.traders.iter().map(move |trader| (*quote, *trader)))
        .collect();
    let vault: Vec<(Address, Address, Sourced<VaultEntry>)> = stream::iter(vault_keys)
        .map(|(quote, trader)| async move {
            let read = source.fetch_vault(quote, trader).await?;
            Ok::<_, crate::Error>((quote, trader, read))
        })
        .buffer_unordered(limit)
        .try_collect()
        .await?;
    for (quote, trader, read) in vault {
        block.observe(read.block_number, || format!("vault of {trader} in {quote}"))?;
        let entry = read.value;
        let gate = ledger.gate_mut();
        gate.with_quote(quote, |q| {
            q.threshold = entry.threshold;
            q.set_reserve(trader, entry.reserve);
            q.set_fund_flow(trader, entry.fund_flow);
            q.set_pending(trader, entry.pending);
        });
        gate.set_blacklisted(trader, entry.blacklisted);
    }

    if let Some(block) = block.0 {
        ledger.synced_at(LogPosition::end_of_block(block));
    }
    info!(
        instruments = infos.len(),
        pairs = pair_keys.len(),
        traders = request.traders.len(),
        block = ?block.0,
        "ledger loaded"
    );
    Ok(ledger)
}

/// Serves reads from an in-memory ledger as of a fixed block, e.g. a
/// persisted snapshot.
#[derive(Debug, Clone)]
pub struct StaticSource {
    ledger: Ledger,
    block_number: u64,
}

impl StaticSource {
    pub fn new(ledger: Ledger, block_number: u64) -> Self {
        Self {
            ledger,
            block_number,
        }
    }

    fn at<T>(&self, value: T) -> Result<Sourced<T>> {
        Ok(Sourced::new(self.block_number, value))
    }

    fn pair(&self, instrument: Address, expiry: u32) -> Result<&PairState> {
        self.ledger
            .instrument(&instrument)
            .and_then(|state| state.pair(expiry))
            .ok_or_else(|| {
                SourceError::Fetch {
                    what: format!("pair {instrument}/{expiry}"),
                    reason: "unknown pair".into(),
                }
                .into()
            })
    }
}

impl StateSource for StaticSource {
    async fn fetch_instrument(&self, instrument: Address) -> Result<Sourced<InstrumentInfo>> {
        let state = self.ledger.instrument(&instrument).ok_or_else(|| SourceError::Fetch {
            what: format!("instrument {instrument}"),
            reason: "unknown instrument".into(),
        })?;
        self.at(InstrumentInfo {
            condition: state.condition,
            setting: state.setting,
            expiries: state.expiries(),
        })
    }

    async fn fetch_amm(&self, instrument: Address, expiry: u32) -> Result<Sourced<Amm>> {
        self.at(self.pair(instrument, expiry)?.amm.clone())
    }

    async fn fetch_bitmap(
        &self,
        instrument: Address,
        expiry: u32,
        words: &[i16],
    ) -> Result<Sourced<FastMap<i16, U256>>> {
        let pair = self.pair(instrument, expiry)?;
        let found = words
            .iter()
            .map(|word| (*word, pair.bitmap_word(*word)))
            .filter(|(_, bits)| !bits.is_zero())
            .collect();
        self.at(found)
    }

    async fn fetch_pearls(
        &self,
        instrument: Address,
        expiry: u32,
        ticks: &[i32],
    ) -> Result<Sourced<FastMap<i32, Pearl>>> {
        let pair = self.pair(instrument, expiry)?;
        self.at(ticks.iter().map(|tick| (*tick, pair.pearl(*tick))).collect())
    }

    async fn fetch_records(
        &self,
        instrument: Address,
        expiry: u32,
        keys: &[RecordKey],
    ) -> Result<Sourced<FastMap<RecordKey, Record>>> {
        let pair = self.pair(instrument, expiry)?;
        self.at(
            keys.iter()
                .filter_map(|key| pair.try_record(key.tick, key.nonce).map(|r| (*key, r.clone())))
                .collect(),
        )
    }

    async fn fetch_portfolio(
        &self,
        instrument: Address,
        expiry: u32,
        trader: Address,
    ) -> Result<Sourced<AccountState>> {
        let account = self
            .ledger
            .instrument(&instrument)
            .map(|state| state.account(expiry, &trader))
            .unwrap_or_default();
        self.at(account)
    }

    async fn fetch_vault(&self, quote: Address, trader: Address) -> Result<Sourced<VaultEntry>> {
        let gate = self.ledger.gate();
        self.at(VaultEntry {
            reserve: gate.reserve(&quote, &trader),
            fund_flow: gate.fund_flow(&quote, &trader),
            pending: gate.pending(&quote, &trader),
            threshold: gate.threshold(&quote),
            blacklisted: gate.is_blacklisted(&trader),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::ledger::{Order, Range, RangeKey};
    use crate::{I256, PERP_EXPIRY, Q96, WAD};
    use futures::executor::block_on;

    fn addr(n: u8) -> Address {
        Address::with_last_byte(n)
    }

    fn wad(n: i128) -> I256 {
        I256::try_from(n).unwrap() * I256::try_from(WAD).unwrap()
    }

    fn live() -> Ledger {
        let mut ledger = Ledger::new(addr(0xee));
        let inst = ledger.instrument_mut(addr(0x10));
        inst.apply_new_pair(PERP_EXPIRY, Q96, 0).unwrap();
        inst.apply_add(
            PERP_EXPIRY,
            addr(1),
            RangeKey::new(-500, 500),
            Range {
                liquidity: 10u128.pow(24),
                balance: wad(100),
                sqrt_entry_px96: Q96,
                entry_fee_index: U256::ZERO,
            },
        )
        .unwrap();
        inst.apply_place(
            PERP_EXPIRY,
            addr(2),
            OrderKey::new(0, 0),
            Order {
                balance: wad(1),
                size: wad(-10),
            },
        )
        .unwrap();
        // takes the whole order, closing its cycle
        inst.apply_trade(PERP_EXPIRY, addr(3), wad(50), wad(10), 5)
            .unwrap();
        ledger
            .gate_mut()
            .apply_deposit(addr(0xc0), addr(1), U256::from(9u8))
            .unwrap();
        ledger
    }

    #[test]
    fn initialized_ticks_decodes_words() {
        let mut words = FastMap::default();
        words.insert(-1i16, U256::from(1u8) << 255usize);
        words.insert(0i16, U256::from(0b101u8));
        assert_eq!(initialized_ticks(&words), vec![-1, 0, 2]);
    }

    #[test]
    fn load_reproduces_the_source() {
        let live = live();
        let source = StaticSource::new(live.clone(), 42);
        let mut request = SyncRequest::new(addr(0xee));
        request.instruments = vec![addr(0x10)];
        request.traders = vec![addr(1), addr(2), addr(3)];
        request.quotes = vec![addr(0xc0)];

        let config = SyncConfig { concurrency: 2 };
        let loaded = block_on(load_ledger(&source, &request, &config)).unwrap();
        assert_eq!(loaded.last_position(), Some(LogPosition::end_of_block(42)));
        let (a, b) = (
            live.instrument(&addr(0x10)).unwrap(),
            loaded.instrument(&addr(0x10)).unwrap(),
        );
        assert_eq!(a.pair(PERP_EXPIRY), b.pair(PERP_EXPIRY));
        for trader in &request.traders {
            assert_eq!(a.account(PERP_EXPIRY, trader), b.account(PERP_EXPIRY, trader));
        }
        assert_eq!(loaded.gate(), live.gate());
    }

    /// Answers vault reads one block later than everything else.
    struct Lagging(StaticSource);

    impl StateSource for Lagging {
        async fn fetch_instrument(&self, instrument: Address) -> Result<Sourced<InstrumentInfo>> {
            self.0.fetch_instrument(instrument).await
        }

        async fn fetch_amm(&self, instrument: Address, expiry: u32) -> Result<Sourced<Amm>> {
            self.0.fetch_amm(instrument, expiry).await
        }

        async fn fetch_bitmap(
            &self,
            instrument: Address,
            expiry: u32,
            words: &[i16],
        ) -> Result<Sourced<FastMap<i16, U256>>> {
            self.0.fetch_bitmap(instrument, expiry, words).await
        }

        async fn fetch_pearls(
            &self,
            instrument: Address,
            expiry: u32,
            ticks: &[i32],
        ) -> Result<Sourced<FastMap<i32, Pearl>>> {
            self.0.fetch_pearls(instrument, expiry, ticks).await
        }

        async fn fetch_records(
            &self,
            instrument: Address,
            expiry: u32,
            keys: &[RecordKey],
        ) -> Result<Sourced<FastMap<RecordKey, Record>>> {
            self.0.fetch_records(instrument, expiry, keys).await
        }

        async fn fetch_portfolio(
            &self,
            instrument: Address,
            expiry: u32,
            trader: Address,
        ) -> Result<Sourced<AccountState>> {
            self.0.fetch_portfolio(instrument, expiry, trader).await
        }

        async fn fetch_vault(
            &self,
            quote: Address,
            trader: Address,
        ) -> Result<Sourced<VaultEntry>> {
            let read = self.0.fetch_vault(quote, trader).await?;
            Ok(Sourced::new(read.block_number + 1, read.value))
        }
    }

    #[test]
    fn reads_across_blocks_fail_the_load() {
        let source = Lagging(StaticSource::new(live(), 42));
        let mut request = SyncRequest::new(addr(0xee));
        request.instruments = vec![addr(0x10)];
        request.traders = vec![addr(1)];
        request.quotes = vec![addr(0xc0)];
        let err = block_on(load_ledger(&source, &request, &SyncConfig::default())).unwrap_err();
        match err {
            Error::SourceError(SourceError::Fetch { what, reason }) => {
                assert!(what.starts_with("vault of"), "{what}");
                assert!(reason.contains("block 43"), "{reason}");
            }
            other => panic!("unexpected {other:?}"),
        }

        // the same reads without the vault agree on one block
        request.quotes.clear();
        let loaded = block_on(load_ledger(&source, &request, &SyncConfig::default())).unwrap();
        assert_eq!(loaded.last_position(), Some(LogPosition::end_of_block(42)));
    }

    #[test]
    fn unknown_instrument_is_a_source_error() {
        let source = StaticSource::new(Ledger::default(), 1);
        let mut request = SyncRequest::new(addr(0xee));
        request.instruments = vec![addr(0x99)];
        let err = block_on(load_ledger(&source, &request, &SyncConfig::default())).unwrap_err();
        assert!(matches!(err, Error::SourceError(SourceError::Fetch { .. })));
    }
}
