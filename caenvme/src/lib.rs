//! # caenvme
//!
//! The small slice of the CAEN VME bridge driver that the VSDC4 front end consumes: the
//! vocabulary types of the C library, its error codes and their decoding, and the [`Driver`]
//! trait that every bridge implementation (the real library, or a simulator) must provide.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]

#[cfg(feature = "vendor")]
pub mod vendor;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use std::time::Duration;

/// Convenience alias for driver results
pub type Result<T> = std::result::Result<T, Error>;

/// Error codes reported by the bridge library, with the text `CAENVME_DecodeError` gives them
#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum ErrorCode {
    #[error("VME bus error during the cycle")]
    BusError = -1,
    #[error("Communication error")]
    CommError = -2,
    #[error("Unspecified error")]
    GenericError = -3,
    #[error("Invalid parameter")]
    InvalidParam = -4,
    #[error("Timeout error")]
    Timeout = -5,
    #[error("Device already open")]
    AlreadyOpen = -6,
    #[error("Maximum number of boards reached")]
    MaxBoardCount = -7,
    #[error("Not supported")]
    NotSupported = -8,
}

/// Errors that can be returned from bridge interactions
#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Code(#[from] ErrorCode),
    #[error("Unknown error code {0}")]
    Unknown(i32),
}

impl Error {
    /// The driver-level classification, if the code was one we know about
    #[must_use]
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Code(c) => Some(*c),
            Error::Unknown(_) => None,
        }
    }

    /// Whether this error is the driver's timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.code() == Some(ErrorCode::Timeout)
    }
}

/// Turn a raw `CVErrorCodes` value into a result, zero being success
/// # Errors
/// Returns the decoded error for every nonzero code
pub fn check(code: i32) -> Result<()> {
    if code == 0 {
        return Ok(());
    }
    Err(ErrorCode::from_i32(code).map_or(Error::Unknown(code), Error::Code))
}

/// Human-readable text for a raw error code
#[must_use]
pub fn decode_error(code: i32) -> String {
    match check(code) {
        Ok(()) => "Operation completed successfully".to_string(),
        Err(e) => e.to_string(),
    }
}

/// Opaque identifier of an open bridge session
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Handle(pub i32);

/// Bridge models the library knows how to open
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum BoardType {
    V1718 = 0,
    #[default]
    V2718 = 1,
    A2818 = 2,
    A2719 = 3,
    A3818 = 4,
}

/// VME address modifiers. Only the ones this front end issues are listed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AddressModifier {
    /// A32 non-privileged data access
    A32UserData = 0x09,
    /// A32 supervisory data access
    A32SuperData = 0x0D,
    /// A24 non-privileged data access
    A24UserData = 0x39,
}

/// Width of a single bus cycle
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataWidth {
    D8 = 0x01,
    D16 = 0x02,
    D32 = 0x04,
}

impl DataWidth {
    /// The mask of bits that are meaningful for a word of this width
    #[must_use]
    pub fn mask(self) -> u32 {
        match self {
            DataWidth::D8 => 0xFF,
            DataWidth::D16 => 0xFFFF,
            DataWidth::D32 => 0xFFFF_FFFF,
        }
    }
}

/// One of the seven VME interrupt request lines
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IrqLevel {
    L1 = 1,
    L2 = 2,
    L3 = 3,
    L4 = 4,
    L5 = 5,
    L6 = 6,
    L7 = 7,
}

impl IrqLevel {
    /// Build a level from its line number (1..=7)
    #[must_use]
    pub fn from_number(n: u8) -> Option<Self> {
        Some(match n {
            1 => IrqLevel::L1,
            2 => IrqLevel::L2,
            3 => IrqLevel::L3,
            4 => IrqLevel::L4,
            5 => IrqLevel::L5,
            6 => IrqLevel::L6,
            7 => IrqLevel::L7,
            _ => return None,
        })
    }

    /// The line number (1..=7)
    #[must_use]
    pub fn number(self) -> u8 {
        self as u8
    }

    /// The bit this line occupies in an [`IrqMask`] (`cvIRQ1 = 0x01` .. `cvIRQ7 = 0x40`)
    #[must_use]
    pub fn bit(self) -> u8 {
        1 << (self.number() - 1)
    }
}

/// Set of interrupt lines, as reported by `CAENVME_IRQCheck`
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct IrqMask(pub u8);

impl IrqMask {
    /// A mask containing only `level`
    #[must_use]
    pub fn single(level: IrqLevel) -> Self {
        Self(level.bit())
    }

    #[must_use]
    pub fn contains(self, level: IrqLevel) -> bool {
        self.0 & level.bit() != 0
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// The operations the front end consumes from a CAEN VME bridge.
///
/// Implementations are not required to be thread safe themselves; callers serialize all access
/// (the `vsdc` crate does so through its transaction gate), which is why every method takes
/// `&mut self`.
pub trait Driver: Send {
    /// Open a session to bridge `board` on optical/USB link `link`, board number `board_number`
    /// # Errors
    /// Returns the driver error if the bridge can't be opened
    fn init(&mut self, board: BoardType, link: u16, board_number: u16) -> Result<Handle>;

    /// Close a session
    /// # Errors
    /// Returns the driver error if the bridge refuses to close
    fn end(&mut self, handle: Handle) -> Result<()>;

    /// Enable interrupt lines in `mask`
    /// # Errors
    /// Returns the driver error on failure
    fn irq_enable(&mut self, handle: Handle, mask: IrqMask) -> Result<()>;

    /// Which interrupt lines are currently asserted
    /// # Errors
    /// Returns the driver error on failure
    fn irq_check(&mut self, handle: Handle) -> Result<IrqMask>;

    /// Block until one of `mask` is asserted, for at most `timeout`
    /// # Errors
    /// Returns [`ErrorCode::Timeout`] if nothing was asserted in time
    fn irq_wait(&mut self, handle: Handle, mask: IrqMask, timeout: Duration) -> Result<()>;

    /// Run an interrupt acknowledge cycle on `level`, returning the vector
    /// # Errors
    /// Returns the driver error on failure
    fn iack_cycle(&mut self, handle: Handle, level: IrqLevel, width: DataWidth) -> Result<u32>;

    /// Single read cycle
    /// # Errors
    /// Returns the driver error on failure
    fn read_cycle(
        &mut self,
        handle: Handle,
        address: u32,
        modifier: AddressModifier,
        width: DataWidth,
    ) -> Result<u32>;

    /// Single write cycle
    /// # Errors
    /// Returns the driver error on failure
    fn write_cycle(
        &mut self,
        handle: Handle,
        address: u32,
        data: u32,
        modifier: AddressModifier,
        width: DataWidth,
    ) -> Result<()>;
}
