//! Register map of the VSDC4 integrating ADC.
//!
//! Offsets are relative to the board's A32 base address. Channel registers are further relative
//! to the channel's register block (see [`Channel::registers_offset`](crate::channel::Channel)).

use packed_struct::prelude::*;
use vsdc_derive::{register, RegisterWord};

/// Device identification word
pub const DEV_ID: u32 = 0x01FF_FFC0;
/// Global control register
pub const GCR: u32 = 0x01FF_FFC4;
/// Global status register
pub const GSR: u32 = 0x01FF_FFC8;
/// High reference voltage (float)
pub const REF_H: u32 = 0x01FF_FFCC;
/// Low reference voltage (float)
pub const REF_L: u32 = 0x01FF_FFD0;
/// Seconds per internal timer tick (float)
pub const TIME_QUANT: u32 = 0x01FF_FFD4;
/// The VME interrupt line the board asserts
pub const INT_LINE: u32 = 0x01FF_FFD8;

/// Channel control/status
pub const ADC_CSR: u32 = 0x00;
/// Channel settings
pub const ADC_SR: u32 = 0x04;
/// Integration length in timer ticks
pub const ADC_TIMER: u32 = 0x08;
/// Averaging
pub const ADC_AVGN: u32 = 0x0C;
/// Sample write pointer, which doubles as the sample counter after a stop
pub const ADC_WRITE: u32 = 0x14;
/// Accumulated integral (float)
pub const ADC_INT: u32 = 0x1C;
/// Interrupt vector issued on completion
pub const ADC_IRQ_VEC: u32 = 0x30;

/// Write-one-to-clear mask of the latched result bits in `ADC_CSR`
pub const RESULT_MASK: u32 = 0x11F0;

/// Registers that live inside a channel's register block
pub trait ChannelRegister {
    /// Byte offset inside the block
    const OFFSET: u32;
}

#[derive(Debug, PrimitiveEnum, Default, Copy, Clone, PartialEq, Eq)]
/// What starts an integration
pub enum StartSource {
    /// A start command written to `ADC_CSR`
    #[default]
    Program = 0,
    A = 1,
    B = 2,
    C = 3,
    D = 4,
    Backplane = 5,
}

#[derive(Debug, PrimitiveEnum, Default, Copy, Clone, PartialEq, Eq)]
/// What stops an integration
pub enum StopSource {
    /// The integration timer (`ADC_TIMER` ticks)
    #[default]
    Timer = 0,
    Program = 1,
    A = 2,
    B = 3,
    C = 4,
    D = 5,
    Backplane = 6,
}

#[derive(Debug, PrimitiveEnum, Default, Copy, Clone, PartialEq, Eq)]
/// What the ADC integrates
pub enum InputSource {
    #[default]
    Signal = 0,
    Ground = 1,
    RefHigh = 2,
    RefLow = 3,
}

#[register(0x04)]
#[derive(Debug, PackedStruct, RegisterWord, Default, Copy, Clone, PartialEq, Eq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "4")]
/// `ADC_SR`
pub struct ChannelSettings {
    #[packed_field(bits = "0..=2", ty = "enum")]
    pub start: StartSource,
    #[packed_field(bits = "3..=5", ty = "enum")]
    pub stop: StopSource,
    #[packed_field(bits = "6..=7", ty = "enum")]
    pub input: InputSource,
    #[packed_field(bits = "11")]
    /// Issue the channel's vector on completion
    pub irq_enabled: bool,
}

impl ChannelSettings {
    /// Program start, timer stop, signal input, with or without the completion interrupt
    #[must_use]
    pub fn timed(irq_enabled: bool) -> Self {
        Self {
            irq_enabled,
            ..Default::default()
        }
    }
}

#[register(0x00)]
#[derive(Debug, PackedStruct, RegisterWord, Default, Copy, Clone, PartialEq, Eq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "4")]
/// Commands written to `ADC_CSR`
pub struct ChannelCommand {
    #[packed_field(bits = "0")]
    pub start: bool,
    #[packed_field(bits = "1")]
    pub stop: bool,
    #[packed_field(bits = "2")]
    pub calibrate: bool,
    #[packed_field(bits = "3")]
    /// Reset the sample write pointer
    pub clear_pointer: bool,
}

impl ChannelCommand {
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: true,
            ..Default::default()
        }
    }
}

#[register(0x00)]
#[derive(Debug, PackedStruct, RegisterWord, Default, Copy, Clone, PartialEq, Eq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "4")]
#[allow(clippy::struct_excessive_bools)]
/// Status snapshot read back from `ADC_CSR`
pub struct ChannelStatus {
    #[packed_field(bits = "0")]
    pub running: bool,
    #[packed_field(bits = "4")]
    pub gain_error: bool,
    #[packed_field(bits = "5")]
    pub over_range: bool,
    #[packed_field(bits = "6")]
    pub memory_overflow: bool,
    #[packed_field(bits = "7")]
    pub missed_integration: bool,
    #[packed_field(bits = "8")]
    pub missed_start: bool,
    #[packed_field(bits = "12")]
    pub integral_ready: bool,
}

impl ChannelStatus {
    /// The value that, written back, clears every latched result bit
    #[must_use]
    pub fn result_bits() -> Self {
        Self {
            gain_error: true,
            over_range: true,
            memory_overflow: true,
            missed_integration: true,
            missed_start: true,
            integral_ready: true,
            ..Default::default()
        }
    }

    /// Whether any of the error conditions is latched
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors().is_empty()
    }

    /// Names of the latched error conditions
    #[must_use]
    pub fn errors(&self) -> Vec<&'static str> {
        [
            (self.gain_error, "gain error"),
            (self.over_range, "over range"),
            (self.memory_overflow, "memory overflow"),
            (self.missed_integration, "missed integration"),
            (self.missed_start, "missed start"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RegisterWord;

    #[test]
    fn test_result_mask() {
        assert_eq!(ChannelStatus::result_bits().to_word().unwrap(), RESULT_MASK);
    }

    #[test]
    fn test_start_command() {
        assert_eq!(ChannelCommand::start().to_word().unwrap(), 0x1);
        assert_eq!(<ChannelCommand as ChannelRegister>::OFFSET, ADC_CSR);
    }

    #[test]
    fn test_settings_layout() {
        // Program start, timer stop, signal input, interrupt enabled
        assert_eq!(ChannelSettings::timed(true).to_word().unwrap(), 1 << 11);
        let settings = ChannelSettings {
            start: StartSource::Backplane,
            stop: StopSource::Program,
            input: InputSource::RefLow,
            irq_enabled: false,
        };
        assert_eq!(settings.to_word().unwrap(), 0x5 | (0x1 << 3) | (0x3 << 6));
        assert_eq!(ChannelSettings::from_word(0x5 | (0x1 << 3) | (0x3 << 6)).unwrap(), settings);
        assert_eq!(<ChannelSettings as ChannelRegister>::OFFSET, ADC_SR);
    }

    #[test]
    fn test_status_decode() {
        // The range field (bits 24..=26) is not decoded
        let status = ChannelStatus::from_word((1 << 12) | (1 << 5) | (0x5 << 24)).unwrap();
        assert!(status.integral_ready);
        assert!(status.over_range);
        assert!(!status.gain_error);
        assert_eq!(status.errors(), vec!["over range"]);
    }

    #[test]
    fn test_status_ignores_unmapped_bits() {
        let status = ChannelStatus::from_word(0xF000_0E0E).unwrap();
        assert!(!status.has_errors());
        assert!(!status.integral_ready);
    }
}
