use crate::error::{inconsistency, Result};
use crate::math::fixed_point::sqrt_x96_to_wad;
use crate::math::liquidity_math::add_signed;
use crate::math::tick_bitmap::TickBitmap;
use crate::math::tick_math::get_tick_at_sqrt_ratio;
use crate::snapshot::{dec, keyed, split_pair, Snapshot};
use crate::{FastMap, PEARL_SPACING, PERP_EXPIRY};
use alloy_primitives::{I256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Long or short, derived from the sign of a size.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// `None` for a zero size.
    pub fn of(size: I256) -> Option<Side> {
        if size.is_positive() {
            Some(Side::Long)
        } else if size.is_negative() {
            Some(Side::Short)
        } else {
            None
        }
    }
}

#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AmmStatus {
    #[default]
    Trading,
    Settling,
    Settled,
}

/// Curve state of one (instrument, expiry) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amm {
    pub expiry: u32,
    pub timestamp: u64,
    pub status: AmmStatus,
    pub tick: i32,
    #[serde(with = "dec")]
    pub sqrt_px96: U256,
    #[serde(with = "dec")]
    pub liquidity: u128,
    #[serde(with = "dec")]
    pub total_liquidity: u128,
    #[serde(with = "dec")]
    pub long_open_interest: U256,
    #[serde(with = "dec")]
    pub short_open_interest: U256,
    #[serde(with = "dec")]
    pub fee_index: U256,
    #[serde(with = "dec")]
    pub long_funding_index: I256,
    #[serde(with = "dec")]
    pub short_funding_index: I256,
    #[serde(with = "dec")]
    pub long_social_loss_index: U256,
    #[serde(with = "dec")]
    pub short_social_loss_index: U256,
    #[serde(with = "dec")]
    pub involved_fund: U256,
    #[serde(with = "dec")]
    pub insurance_fund: U256,
    #[serde(with = "dec")]
    pub settlement_price: U256,
}

impl Amm {
    pub fn is_perpetual(&self) -> bool {
        self.expiry == PERP_EXPIRY
    }

    /// Price implied by the curve, WAD.
    pub fn fair_price(&self) -> Result<U256> {
        Ok(sqrt_x96_to_wad(self.sqrt_px96)?)
    }

    pub fn funding_index(&self, side: Side) -> I256 {
        match side {
            Side::Long => self.long_funding_index,
            Side::Short => self.short_funding_index,
        }
    }

    pub fn social_loss_index(&self, side: Side) -> U256 {
        match side {
            Side::Long => self.long_social_loss_index,
            Side::Short => self.short_social_loss_index,
        }
    }

    pub fn open_interest(&self, side: Side) -> U256 {
        match side {
            Side::Long => self.long_open_interest,
            Side::Short => self.short_open_interest,
        }
    }

    /// Adds a signed amount to one side's open interest.
    pub fn add_open_interest(&mut self, side: Side, delta: I256) -> Result<()> {
        let slot = match side {
            Side::Long => &mut self.long_open_interest,
            Side::Short => &mut self.short_open_interest,
        };
        *slot = add_signed(*slot, delta)
            .map_err(|_| inconsistency(format!("{side:?} open interest would go negative")))?;
        Ok(())
    }

    /// Removes a closed quantity from both sides.
    pub fn close_open_interest(&mut self, closed: U256) -> Result<()> {
        if closed.is_zero() {
            return Ok(());
        }
        let delta = -I256::try_from(closed).map_err(|_| inconsistency("closed size overflow"))?;
        self.add_open_interest(Side::Long, delta)?;
        self.add_open_interest(Side::Short, delta)
    }

    pub fn add_involved_fund(&mut self, delta: I256) -> Result<()> {
        self.involved_fund = add_signed(self.involved_fund, delta)
            .map_err(|_| inconsistency("involved fund would go negative"))?;
        Ok(())
    }
}

/// Per-tick aggregate of range boundaries and resting orders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pearl {
    #[serde(with = "dec")]
    pub liquidity_gross: u128,
    #[serde(with = "dec")]
    pub liquidity_net: i128,
    /// Resting quantity not yet filled; positive rests as a buy.
    #[serde(with = "dec")]
    pub left: I256,
    /// Filled since the last checkpoint, with the makers' sign.
    #[serde(with = "dec")]
    pub taken: I256,
    #[serde(with = "dec")]
    pub fee: U256,
    pub nonce: u32,
    #[serde(with = "dec")]
    pub entry_social_loss_index: U256,
    #[serde(with = "dec")]
    pub entry_funding_index: I256,
}

impl Pearl {
    /// Whether the tick belongs in the bitmap.
    pub fn is_initialized(&self) -> bool {
        self.liquidity_gross != 0 || !self.left.is_zero()
    }
}

/// Frozen accrual of a pearl's completed fill cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(with = "dec")]
    pub taken: I256,
    #[serde(with = "dec")]
    pub fee: U256,
    #[serde(with = "dec")]
    pub entry_social_loss_index: U256,
    #[serde(with = "dec")]
    pub entry_funding_index: I256,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub tick: i32,
    pub nonce: u32,
}

impl RecordKey {
    pub fn new(tick: i32, nonce: u32) -> Self {
        Self { tick, nonce }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tick, self.nonce)
    }
}

impl FromStr for RecordKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        split_pair(s)
            .map(|(tick, nonce)| Self { tick, nonce })
            .ok_or_else(|| format!("expected tick:nonce, got {s:?}"))
    }
}

/// Everything the exchange stores for one (instrument, expiry) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairState {
    pub amm: Amm,
    #[serde(with = "keyed")]
    pearls: FastMap<i32, Pearl>,
    tbitmap: TickBitmap,
    #[serde(with = "keyed")]
    records: FastMap<RecordKey, Record>,
}

impl PairState {
    /// A freshly opened pair trading at `sqrt_px96`.
    pub fn new(expiry: u32, sqrt_px96: U256, timestamp: u64) -> Result<Self> {
        let tick = get_tick_at_sqrt_ratio(sqrt_px96)?;
        Ok(Self {
            amm: Amm {
                expiry,
                timestamp,
                tick,
                sqrt_px96,
                ..Default::default()
            },
            ..Default::default()
        })
    }

    /// Pearl at `tick`, zero-valued if never touched.
    pub fn pearl(&self, tick: i32) -> Pearl {
        self.pearls.get(&tick).cloned().unwrap_or_default()
    }

    /// Record for `(tick, nonce)`, zero-valued if absent.
    pub fn record(&self, tick: i32, nonce: u32) -> Record {
        self.try_record(tick, nonce).cloned().unwrap_or_default()
    }

    pub fn try_record(&self, tick: i32, nonce: u32) -> Option<&Record> {
        self.records.get(&RecordKey::new(tick, nonce))
    }

    pub fn bitmap_word(&self, word: i16) -> U256 {
        self.tbitmap.word(word)
    }

    pub fn bitmap(&self) -> &TickBitmap {
        &self.tbitmap
    }

    pub fn pearls(&self) -> impl Iterator<Item = (i32, &Pearl)> + '_ {
        self.pearls.iter().map(|(k, v)| (*k, v))
    }

    pub fn records(&self) -> impl Iterator<Item = (RecordKey, &Record)> + '_ {
        self.records.iter().map(|(k, v)| (*k, v))
    }

    /// Stores `pearl` and keeps the bitmap in step with it. All-zero pearls
    /// are dropped.
    pub fn set_pearl(&mut self, tick: i32, pearl: Pearl) -> Result<()> {
        self.tbitmap
            .set_initialized(tick, PEARL_SPACING, pearl.is_initialized())?;
        if pearl == Pearl::default() {
            self.pearls.remove(&tick);
        } else {
            self.pearls.insert(tick, pearl);
        }
        Ok(())
    }

    pub fn set_record(&mut self, tick: i32, nonce: u32, record: Record) {
        self.records.insert(RecordKey::new(tick, nonce), record);
    }

    /// Writes a bitmap word verbatim, for state read from a remote source.
    pub fn set_bitmap_word(&mut self, word: i16, value: U256) {
        self.tbitmap.set_word(word, value);
    }

    /// Freezes the pearl's current cycle into a record and starts the next one.
    pub(crate) fn checkpoint(&mut self, tick: i32, pearl: &mut Pearl) {
        self.set_record(
            tick,
            pearl.nonce,
            Record {
                taken: pearl.taken,
                fee: pearl.fee,
                entry_social_loss_index: pearl.entry_social_loss_index,
                entry_funding_index: pearl.entry_funding_index,
            },
        );
        pearl.nonce += 1;
        pearl.taken = I256::ZERO;
        pearl.fee = U256::ZERO;
        pearl.entry_social_loss_index = U256::ZERO;
        pearl.entry_funding_index = I256::ZERO;
    }
}

impl Snapshot for PairState {
    fn is_blank(&self) -> bool {
        *self == Self::default()
    }
}
