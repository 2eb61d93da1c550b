use crate::error::MathError;
use alloy_primitives::U256;

/// Returns the index (0–255) of the most significant set bit in a `U256`,
/// or `MathError::ZeroValue` if the input is zero.
///
/// Used when scanning a bitmap word downward for the nearest initialized tick.
pub fn most_significant_bit(x: U256) -> Result<u8, MathError> {
    if x.is_zero() {
        return Err(MathError::ZeroValue);
    }
    Ok(255 - x.leading_zeros() as u8)
}

/// Returns the index (0–255) of the least significant set bit in a `U256`,
/// or `MathError::ZeroValue` if the input is zero.
///
/// Used when scanning a bitmap word upward.
pub fn least_significant_bit(x: U256) -> Result<u8, MathError> {
    if x.is_zero() {
        return Err(MathError::ZeroValue);
    }
    Ok(x.trailing_zeros() as u8)
}

/// Mask with every bit at or below `bit` set.
#[inline]
pub fn mask_at_or_below(bit: u8) -> U256 {
    if bit == 255 {
        U256::MAX
    } else {
        (U256::ONE << (bit as usize + 1)) - U256::ONE
    }
}

/// Mask with `bit` and every bit above it set.
#[inline]
pub fn mask_at_or_above(bit: u8) -> U256 {
    !((U256::ONE << bit) - U256::ONE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msb_errors_on_zero() {
        assert!(matches!(
            most_significant_bit(U256::ZERO),
            Err(MathError::ZeroValue)
        ));
    }

    #[test]
    fn msb_of_multiple_bits() {
        // binary: 1001_0100 (MSB = bit 7)
        assert_eq!(most_significant_bit(U256::from(0b1001_0100u64)).unwrap(), 7);
        assert_eq!(most_significant_bit(U256::MAX).unwrap(), 255);
    }

    #[test]
    fn lsb_of_multiple_bits() {
        // binary: 1011001000 -> LSB is position 3
        assert_eq!(least_significant_bit(U256::from(0b1011001000u64)).unwrap(), 3);
        assert_eq!(least_significant_bit(U256::MAX).unwrap(), 0);
        assert!(matches!(
            least_significant_bit(U256::ZERO),
            Err(MathError::ZeroValue)
        ));
    }

    #[test]
    fn masks_split_the_word() {
        assert_eq!(mask_at_or_below(0), U256::ONE);
        assert_eq!(mask_at_or_below(255), U256::MAX);
        assert_eq!(mask_at_or_above(0), U256::MAX);
        assert_eq!(mask_at_or_above(255), U256::ONE << 255);
        assert_eq!(mask_at_or_below(7) | mask_at_or_above(8), U256::MAX);
        assert_eq!(mask_at_or_below(7) & mask_at_or_above(8), U256::ZERO);
    }
}
