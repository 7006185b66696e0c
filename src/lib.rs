//! Thread-safe access to a VSDC4 integrating ADC behind a CAEN VME bridge.
//!
//! Every bus cycle goes through the non-reentrant transaction gate of a [`device::Device`].
//! [`board::Vsdc4`] adds the board's register map and the per-channel measurement cycle
//! ([`measurement`]), and [`coordination`] runs staggered acquisitions on several threads at once.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod board;
pub mod channel;
pub mod clock;
pub mod coordination;
pub mod device;
pub mod error;
pub mod measurement;
pub mod prelude;
pub mod registers;
pub mod sink;
pub mod transport;

pub use error::{Error, Result};
