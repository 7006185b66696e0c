//! The four logical ADC channels of the VSDC4 and where they live in the board's address space

use crate::error::{Error, Result};
use std::fmt::Display;

/// Offsets of each channel's register block, relative to the board base
const REGISTER_BLOCKS: [u32; 4] = [0x00FF_FF80, 0x01FF_FF80, 0x00FF_FF00, 0x01FF_FF00];

/// Offsets of each channel's waveform buffer, relative to the board base
const WAVEFORM_BUFFERS: [u32; 4] = [0x0000_0000, 0x003F_0000, 0x007E_0000, 0x00BD_0000];

/// Capacity of a single waveform buffer in 32-bit samples (the distance between two buffers)
pub const WAVEFORM_CAPACITY: u32 = 0x003F_0000 / 4;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Ch0 = 0,
    Ch1 = 1,
    Ch2 = 2,
    Ch3 = 3,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Ch0, Channel::Ch1, Channel::Ch2, Channel::Ch3];

    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Offset of this channel's register block
    #[must_use]
    pub fn registers_offset(self) -> u32 {
        REGISTER_BLOCKS[self.index()]
    }

    /// Offset of the first sample of this channel's waveform buffer
    #[must_use]
    pub fn waveform_offset(self) -> u32 {
        WAVEFORM_BUFFERS[self.index()]
    }

    /// The bit of this channel in a per-run readiness mask
    #[must_use]
    pub fn bit(self) -> u8 {
        1 << self.index()
    }
}

impl TryFrom<u8> for Channel {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Channel::Ch0,
            1 => Channel::Ch1,
            2 => Channel::Ch2,
            3 => Channel::Ch3,
            _ => return Err(Error::InvalidChannel(value)),
        })
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel {}", self.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables() {
        assert_eq!(Channel::Ch0.registers_offset(), 0x00FF_FF80);
        assert_eq!(Channel::Ch3.registers_offset(), 0x01FF_FF00);
        assert_eq!(Channel::Ch2.waveform_offset(), 0x007E_0000);
    }

    #[test]
    fn test_buffers_do_not_overlap() {
        for pair in WAVEFORM_BUFFERS.windows(2) {
            assert_eq!(pair[1] - pair[0], WAVEFORM_CAPACITY * 4);
        }
    }

    #[test]
    fn test_try_from() {
        assert_eq!(Channel::try_from(2).unwrap(), Channel::Ch2);
        assert!(matches!(Channel::try_from(4), Err(Error::InvalidChannel(4))));
    }
}
