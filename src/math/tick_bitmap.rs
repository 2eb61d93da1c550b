use crate::error::{Error, StateError, SwapError};
use crate::math::bit_math::{
    least_significant_bit, mask_at_or_above, mask_at_or_below, most_significant_bit,
};
use crate::math::tick_math::{MAX_TICK, MIN_TICK};
use crate::snapshot::dec_map;
use crate::FastMap;
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::ops::Shr;

/// Computes the bitmap word index and bit position for a compressed tick.
pub fn position(tick: i32) -> (i16, u8) {
    (tick.shr(8) as i16, (tick % 256) as u8)
}

/// Sparse bitset of initialized ticks, one 256-bit word per `i16` key.
///
/// Zero words are never stored, so two bitmaps marking the same ticks compare
/// equal and serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TickBitmap {
    #[serde(with = "dec_map")]
    words: FastMap<i16, U256>,
}

impl TickBitmap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the word stored at `word`, or zero if absent.
    pub fn word(&self, word: i16) -> U256 {
        self.words.get(&word).copied().unwrap_or(U256::ZERO)
    }

    /// Overwrites a whole word, as read from a remote snapshot.
    pub fn set_word(&mut self, word: i16, value: U256) {
        if value.is_zero() {
            self.words.remove(&word);
        } else {
            self.words.insert(word, value);
        }
    }

    pub fn words(&self) -> impl Iterator<Item = (i16, U256)> + '_ {
        self.words.iter().map(|(k, v)| (*k, *v))
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    fn compress(tick: i32, tick_spacing: i32) -> Result<i32, StateError> {
        if tick % tick_spacing != 0 {
            return Err(StateError::TickNotAligned(tick, tick_spacing));
        }
        Ok(tick / tick_spacing)
    }

    pub fn is_initialized(&self, tick: i32, tick_spacing: i32) -> Result<bool, StateError> {
        let (word_pos, bit_pos) = position(Self::compress(tick, tick_spacing)?);
        Ok(self.word(word_pos).bit(bit_pos as usize))
    }

    /// Toggles the initialized status of `tick`.
    pub fn flip_tick(&mut self, tick: i32, tick_spacing: i32) -> Result<(), StateError> {
        let (word_pos, bit_pos) = position(Self::compress(tick, tick_spacing)?);
        let mask = U256::ONE << bit_pos;
        self.set_word(word_pos, self.word(word_pos) ^ mask);
        Ok(())
    }

    /// Sets the initialized status of `tick`, flipping only when it differs.
    pub fn set_initialized(
        &mut self,
        tick: i32,
        tick_spacing: i32,
        initialized: bool,
    ) -> Result<(), StateError> {
        if self.is_initialized(tick, tick_spacing)? != initialized {
            self.flip_tick(tick, tick_spacing)?;
        }
        Ok(())
    }

    /// Searches the word containing `tick` for the next initialized tick at or
    /// below `tick` (`lte`) or strictly above it.
    ///
    /// Returns the candidate and whether it is actually initialized; an
    /// uninitialized candidate is the word boundary in the search direction.
    pub fn next_initialized_tick_within_one_word(
        &self,
        tick: i32,
        tick_spacing: i32,
        lte: bool,
    ) -> Result<(i32, bool), Error> {
        let mut compressed: i32 = tick / tick_spacing;
        if tick < 0 && tick % tick_spacing != 0 {
            compressed -= 1;
        }

        if lte {
            let (word_pos, bit_pos) = position(compressed);
            let masked = self.word(word_pos) & mask_at_or_below(bit_pos);
            let initialized = !masked.is_zero();

            let next = if initialized {
                (compressed - (bit_pos - most_significant_bit(masked)?) as i32) * tick_spacing
            } else {
                (compressed - bit_pos as i32) * tick_spacing
            };
            Ok((next, initialized))
        } else {
            let (word_pos, bit_pos) = position(compressed + 1);
            let masked = self.word(word_pos) & mask_at_or_above(bit_pos);
            let initialized = !masked.is_zero();

            let next = if initialized {
                (compressed + 1 + (least_significant_bit(masked)? - bit_pos) as i32) * tick_spacing
            } else {
                (compressed + 1 + (255u8 - bit_pos) as i32) * tick_spacing
            };
            Ok((next, initialized))
        }
    }

    /// Walks whole words from `tick` until an initialized tick is found.
    ///
    /// Downward (`lte`) the search includes `tick` itself; upward it starts
    /// strictly above. Running past the word holding `MIN_TICK` or `MAX_TICK`
    /// is `SwapError::SearchExhausted`.
    pub fn next_initialized_tick(
        &self,
        tick: i32,
        tick_spacing: i32,
        lte: bool,
    ) -> Result<i32, Error> {
        let (min_word, _) = position(MIN_TICK.div_euclid(tick_spacing));
        let (max_word, _) = position(MAX_TICK.div_euclid(tick_spacing));

        let mut from = tick;
        loop {
            let (next, initialized) =
                self.next_initialized_tick_within_one_word(from, tick_spacing, lte)?;
            if initialized {
                return Ok(next);
            }
            let (word_pos, _) = position(next.div_euclid(tick_spacing));
            if lte {
                if word_pos <= min_word {
                    return Err(SwapError::SearchExhausted.into());
                }
                from = next - tick_spacing;
            } else {
                if word_pos >= max_word {
                    return Err(SwapError::SearchExhausted.into());
                }
                from = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test_ticks() -> TickBitmap {
        let ticks = vec![-200, -55, -4, 70, 78, 84, 139, 240, 535];
        let mut bitmap = TickBitmap::new();
        for t in ticks {
            bitmap.flip_tick(t, 1).unwrap();
        }
        bitmap
    }

    #[test]
    fn test_position_simple() {
        assert_eq!(position(0), (0, 0));
        assert_eq!(position(1), (0, 1));
        assert_eq!(position(255), (0, 255));
        assert_eq!(position(256), (1, 0));
        assert_eq!(position(300), (1, 44));
    }

    #[test]
    fn test_position_negative() {
        assert_eq!(position(-1), (-1, 255));
        assert_eq!(position(-256), (-1, 0));
        assert_eq!(position(-257), (-2, 255));
    }

    #[test]
    fn test_flip_tick_roundtrip_prunes_zero_word() {
        let mut bm = TickBitmap::new();
        bm.flip_tick(78, 1).unwrap();
        let (word, bit) = position(78);
        assert_eq!(bm.word(word), U256::ONE << bit);
        bm.flip_tick(78, 1).unwrap();
        assert_eq!(bm.word(word), U256::ZERO);
        assert!(bm.is_empty());
        assert_eq!(bm, TickBitmap::new());
    }

    #[test]
    fn test_flip_tick_rejects_unaligned() {
        let mut bm = TickBitmap::new();
        assert!(matches!(
            bm.flip_tick(51, 50),
            Err(StateError::TickNotAligned(51, 50))
        ));
        bm.flip_tick(-100, 50).unwrap();
        assert!(bm.is_initialized(-100, 50).unwrap());
    }

    #[test]
    fn test_set_initialized_is_idempotent() {
        let mut bm = TickBitmap::new();
        bm.set_initialized(7, 1, true).unwrap();
        bm.set_initialized(7, 1, true).unwrap();
        assert!(bm.is_initialized(7, 1).unwrap());
        bm.set_initialized(7, 1, false).unwrap();
        bm.set_initialized(7, 1, false).unwrap();
        assert!(bm.is_empty());
    }

    #[test]
    fn test_right_exact_match() {
        let bm = init_test_ticks();
        let (next, init) = bm.next_initialized_tick_within_one_word(78, 1, false).unwrap();
        assert_eq!(next, 84);
        assert!(init);
    }

    #[test]
    fn test_right_between_ticks() {
        let bm = init_test_ticks();
        let (next, init) = bm.next_initialized_tick_within_one_word(77, 1, false).unwrap();
        assert_eq!(next, 78);
        assert!(init);
    }

    #[test]
    fn test_right_negative_between() {
        let bm = init_test_ticks();
        let (next, init) = bm.next_initialized_tick_within_one_word(-56, 1, false).unwrap();
        assert_eq!(next, -55);
        assert!(init);
    }

    #[test]
    fn test_right_cross_to_next_word() {
        let bm = init_test_ticks();
        let (next, init) = bm.next_initialized_tick_within_one_word(255, 1, false).unwrap();
        assert_eq!(next, 511);
        assert!(!init);
    }

    #[test]
    fn test_left_includes_start() {
        let bm = init_test_ticks();
        let (next, init) = bm.next_initialized_tick_within_one_word(78, 1, true).unwrap();
        assert_eq!(next, 78);
        assert!(init);
        let (next, init) = bm.next_initialized_tick_within_one_word(77, 1, true).unwrap();
        assert_eq!(next, 70);
        assert!(init);
        let (next, init) = bm.next_initialized_tick_within_one_word(-257, 1, true).unwrap();
        assert_eq!(next, -512);
        assert!(!init);
    }

    #[test]
    fn test_multi_word_search() {
        let bm = init_test_ticks();
        assert_eq!(bm.next_initialized_tick(240, 1, false).unwrap(), 535);
        assert_eq!(bm.next_initialized_tick(-4, 1, false).unwrap(), 70);
        assert_eq!(bm.next_initialized_tick(535, 1, true).unwrap(), 535);
        assert_eq!(bm.next_initialized_tick(534, 1, true).unwrap(), 240);
        assert_eq!(bm.next_initialized_tick(-5, 1, true).unwrap(), -55);
        assert_eq!(bm.next_initialized_tick(20_000, 1, true).unwrap(), 535);
    }

    #[test]
    fn test_search_exhausted_at_bounds() {
        let bm = init_test_ticks();
        assert!(matches!(
            bm.next_initialized_tick(535, 1, false),
            Err(Error::SwapError(SwapError::SearchExhausted))
        ));
        assert!(matches!(
            bm.next_initialized_tick(-201, 1, true),
            Err(Error::SwapError(SwapError::SearchExhausted))
        ));
        assert!(matches!(
            TickBitmap::new().next_initialized_tick(0, 50, true),
            Err(Error::SwapError(SwapError::SearchExhausted))
        ));
    }
}
