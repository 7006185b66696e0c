//! Typed views of the 32-bit words that travel over the bus, plus the bridge implementations

pub mod mock;

pub use caenvme::Driver;

use crate::error::Result;

/// Types that implement this trait can be read from and written to a single 32-bit register
pub trait RegisterWord: Sized {
    /// Decode a raw register word
    /// # Errors
    /// Returns an error if the word is not a valid instance of this type
    fn from_word(word: u32) -> Result<Self>;

    /// Encode into a raw register word
    /// # Errors
    /// Returns an error if this value has no register representation
    fn to_word(&self) -> Result<u32>;
}

/// Reinterpret the bit pattern of a register word as an IEEE-754 single.
///
/// This is *not* a numeric conversion: `bitcast_f32(1)` is the smallest subnormal, not `1.0`.
#[must_use]
pub fn bitcast_f32(word: u32) -> f32 {
    f32::from_bits(word)
}

/// The inverse of [`bitcast_f32`]
#[must_use]
pub fn bitcast_word(value: f32) -> u32 {
    value.to_bits()
}

macro_rules! word_num {
    ($num:ty) => {
        impl RegisterWord for $num {
            fn from_word(word: u32) -> Result<Self> {
                Ok(<$num>::from_ne_bytes(word.to_ne_bytes()))
            }

            fn to_word(&self) -> Result<u32> {
                Ok(u32::from_ne_bytes(self.to_ne_bytes()))
            }
        }
    };
}

word_num!(u32);
word_num!(i32);

impl RegisterWord for f32 {
    fn from_word(word: u32) -> Result<Self> {
        Ok(bitcast_f32(word))
    }

    fn to_word(&self) -> Result<u32> {
        Ok(bitcast_word(*self))
    }
}

impl RegisterWord for bool {
    fn from_word(word: u32) -> Result<Self> {
        Ok(word & 1 == 1)
    }

    fn to_word(&self) -> Result<u32> {
        Ok(u32::from(*self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paste::paste;

    macro_rules! test_word {
        ($num:ty, $v:literal) => {
            paste! {
                #[test]
                #[allow(clippy::float_cmp)]
                fn [<test_word_$num>]() {
                    let v: $num = $v;
                    let word = v.to_word().unwrap();
                    assert_eq!(<$num>::from_word(word).unwrap(), v);
                }
            }
        };
    }

    test_word!(u32, 0xDEAD_BEEF);
    test_word!(i32, -0x0DEA_DBEE);
    test_word!(f32, 1.618);
    test_word!(bool, true);

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_bitcast_is_not_numeric() {
        assert_eq!(bitcast_f32(0x3F80_0000), 1.0);
        assert_ne!(bitcast_f32(1), 1.0);
        assert_eq!(bitcast_word(-2.0), 0xC000_0000);
    }

    #[test]
    fn test_signed_word_keeps_bits() {
        assert_eq!((-1i32).to_word().unwrap(), 0xFFFF_FFFF);
        assert_eq!(i32::from_word(0x8000_0000).unwrap(), i32::MIN);
    }
}
