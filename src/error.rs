//! The error type shared by every layer of the front end

use crate::{board::ChannelState, channel::Channel, registers::ChannelStatus};
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the front end's error type
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("CAEN VME ERROR: {0}")]
    Driver(#[from] caenvme::Error),
    #[error("SYSTEM ERROR: {0}")]
    Resource(String),
    #[error("The transaction gate is already held by this thread")]
    Reentrant,
    #[error("Register layout error")]
    Packing(#[from] packed_struct::PackingError),
    #[error("No such channel - `{0}`")]
    InvalidChannel(u8),
    #[error("Can't {op} {channel} while it is {state:?}")]
    InvalidTransition {
        channel: Channel,
        state: ChannelState,
        op: &'static str,
    },
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("The sample counter of {channel} reads {count}, which overruns its waveform buffer")]
    BadSampleCount { channel: Channel, count: u32 },
    #[error("{channel} didn't complete within {waited:?}")]
    Timeout { channel: Channel, waited: Duration },
    #[error("{channel} completed without an integral (status {status:?})")]
    NoResult {
        channel: Channel,
        status: ChannelStatus,
    },
    #[error("File IO error")]
    Io(#[from] std::io::Error),
    #[error("Sample sink error")]
    Csv(#[from] csv::Error),
}

impl From<caenvme::ErrorCode> for Error {
    fn from(code: caenvme::ErrorCode) -> Self {
        Error::Driver(code.into())
    }
}

impl Error {
    /// The bus-level classification, if this error came from the driver
    #[must_use]
    pub fn driver_code(&self) -> Option<caenvme::ErrorCode> {
        match self {
            Error::Driver(e) => e.code(),
            _ => None,
        }
    }
}
