//! The VSDC4 board: one [`Device`] session plus where the board sits in A32 space, how its vectors
//! map to channels, and the host-side bookkeeping of every channel's measurement state.

use crate::{
    channel::Channel,
    clock::Clock,
    device::{Device, DeviceConfig},
    error::{Error, Result},
    registers::{DEV_ID, INT_LINE, TIME_QUANT},
    transport::{bitcast_f32, Driver},
};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Where a stock board is jumpered
pub const DEFAULT_BASE: u32 = 0x4400_0000;

/// Where a channel is in its measurement cycle
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Idle,
    Configured,
    Armed,
    AwaitingResult,
    ResultReady,
    ResultAbsent,
    Cleared,
}

impl ChannelState {
    /// Whether a run was started and hasn't been acknowledged with a clear yet
    #[must_use]
    pub fn in_run(self) -> bool {
        matches!(
            self,
            Self::Armed | Self::AwaitingResult | Self::ResultReady | Self::ResultAbsent
        )
    }

    /// Whether the hardware may still be integrating
    #[must_use]
    pub fn in_flight(self) -> bool {
        matches!(self, Self::Armed | Self::AwaitingResult)
    }
}

/// How the board's interrupt vectors map onto channels: `vector = base + channel`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VectorMapping {
    base: u8,
}

impl Default for VectorMapping {
    fn default() -> Self {
        Self { base: 1 }
    }
}

impl VectorMapping {
    /// A mapping with an alternate fixed offset
    /// # Errors
    /// Returns an error if the offset would make a channel use vector 0 ("nothing pending") or
    /// push the last channel past 255
    pub fn with_base(base: u8) -> Result<Self> {
        if base == 0 || base > u8::MAX - 3 {
            return Err(Error::InvalidParameter(format!(
                "Vector base {base} doesn't fit four channels in 1..=255"
            )));
        }
        Ok(Self { base })
    }

    #[must_use]
    pub fn base(self) -> u8 {
        self.base
    }

    /// The vector `channel` raises on completion
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn vector(self, channel: Channel) -> u8 {
        self.base + channel.index() as u8
    }

    /// The channel that raises `vector`, if any
    #[must_use]
    pub fn channel_for_vector(self, vector: u8) -> Option<Channel> {
        vector
            .checked_sub(self.base)
            .and_then(|idx| Channel::try_from(idx).ok())
    }
}

/// Board placement
#[derive(Debug, Clone, Copy)]
pub struct BoardConfig {
    /// A32 base address
    pub base: u32,
    pub vectors: VectorMapping,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE,
            vectors: VectorMapping::default(),
        }
    }
}

/// Host-side view of one channel
#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct Track {
    pub(crate) state: ChannelState,
    /// `integral_ready` was observed since the last arm
    pub(crate) ready_seen: bool,
}

/// A VSDC4 behind an open bridge session
#[derive(Debug)]
pub struct Vsdc4<D: Driver> {
    device: Device<D>,
    config: BoardConfig,
    clock: Arc<dyn Clock>,
    /// Never held across a bus cycle
    tracks: Mutex<[Track; 4]>,
}

impl<D> Vsdc4<D>
where
    D: Driver,
{
    #[must_use]
    pub fn new(device: Device<D>, config: BoardConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            device,
            config,
            clock,
            tracks: Mutex::new([Track::default(); 4]),
        }
    }

    /// Open the bridge and wrap the board behind it
    /// # Errors
    /// Returns an error if the session can't be opened or its interrupt line enabled
    pub fn open(
        driver: D,
        device: DeviceConfig,
        config: BoardConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Ok(Self::new(Device::open(driver, device)?, config, clock))
    }

    /// The underlying session, for raw register access
    #[must_use]
    pub fn device(&self) -> &Device<D> {
        &self.device
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    #[must_use]
    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    #[must_use]
    pub fn vectors(&self) -> VectorMapping {
        self.config.vectors
    }

    /// Absolute address of a global register
    #[must_use]
    pub fn global(&self, offset: u32) -> u32 {
        self.config.base + offset
    }

    /// Absolute address of a register in `channel`'s block
    #[must_use]
    pub fn channel_register(&self, channel: Channel, offset: u32) -> u32 {
        self.config.base + channel.registers_offset() + offset
    }

    /// Absolute address of sample `index` of `channel`'s waveform buffer
    #[must_use]
    pub fn waveform_sample(&self, channel: Channel, index: u32) -> u32 {
        self.config.base + channel.waveform_offset() + 4 * index
    }

    /// The device identification word
    /// # Errors
    /// Returns an error on bus failure
    pub fn device_id(&self) -> Result<u32> {
        self.device.read(self.global(DEV_ID))
    }

    /// Seconds per timer tick
    /// # Errors
    /// Returns an error on bus failure
    pub fn time_quantum(&self) -> Result<f32> {
        Ok(bitcast_f32(self.device.read(self.global(TIME_QUANT))?))
    }

    /// The VME interrupt line the board asserts
    /// # Errors
    /// Returns an error on bus failure
    pub fn interrupt_line(&self) -> Result<u32> {
        self.device.read(self.global(INT_LINE))
    }

    /// The vector of the pending interrupt, or 0 if nothing is pending
    /// # Errors
    /// Returns an error on bus failure
    pub fn irq_vector(&self) -> Result<u8> {
        self.device.irq_vector()
    }

    /// The host's view of where `channel` is in its cycle
    /// # Errors
    /// Returns an error if the bookkeeping lock was poisoned
    pub fn state(&self, channel: Channel) -> Result<ChannelState> {
        Ok(self.tracks()?[channel.index()].state)
    }

    pub(crate) fn tracks(&self) -> Result<MutexGuard<'_, [Track; 4]>> {
        self.tracks
            .lock()
            .map_err(|_| Error::Resource("channel bookkeeping poisoned".to_string()))
    }

    /// Move `channel` to `state`
    pub(crate) fn set_state(&self, channel: Channel, state: ChannelState) -> Result<()> {
        let mut tracks = self.tracks()?;
        let track = &mut tracks[channel.index()];
        if track.state != state {
            debug!(%channel, from = ?track.state, to = ?state, "Channel state");
            track.state = state;
        }
        Ok(())
    }

    /// Close the session
    /// # Errors
    /// Returns the driver error if the bridge refuses to close
    pub fn close(self) -> Result<()> {
        self.device.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        transport::mock::{MockVme, DEVICE_ID, TIME_QUANTUM},
    };

    fn board() -> Vsdc4<MockVme> {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let mock = MockVme::new(clock.clone());
        Vsdc4::open(mock, DeviceConfig::default(), BoardConfig::default(), clock).unwrap()
    }

    #[test]
    fn test_default_mapping() {
        let map = VectorMapping::default();
        assert_eq!(map.vector(Channel::Ch0), 1);
        assert_eq!(map.vector(Channel::Ch3), 4);
        assert_eq!(map.channel_for_vector(3), Some(Channel::Ch2));
        assert_eq!(map.channel_for_vector(0), None);
        assert_eq!(map.channel_for_vector(5), None);
    }

    #[test]
    fn test_offset_mapping() {
        let map = VectorMapping::with_base(0x40).unwrap();
        assert_eq!(map.vector(Channel::Ch1), 0x41);
        assert_eq!(map.channel_for_vector(0x43), Some(Channel::Ch3));
        assert_eq!(map.channel_for_vector(0x3F), None);
        assert!(VectorMapping::with_base(0).is_err());
        assert!(VectorMapping::with_base(253).is_err());
        assert!(VectorMapping::with_base(252).is_ok());
    }

    #[test]
    fn test_global_reads() {
        let board = board();
        assert_eq!(board.device_id().unwrap(), DEVICE_ID);
        assert_eq!(board.time_quantum().unwrap().to_bits(), TIME_QUANTUM.to_bits());
        assert_eq!(board.interrupt_line().unwrap(), 5);
        board.close().unwrap();
    }

    #[test]
    fn test_addresses() {
        let board = board();
        assert_eq!(board.global(DEV_ID), 0x45FF_FFC0);
        assert_eq!(board.channel_register(Channel::Ch1, 0x1C), 0x45FF_FF9C);
        assert_eq!(board.waveform_sample(Channel::Ch2, 3), 0x447E_000C);
    }

    #[test]
    fn test_starts_idle() {
        let board = board();
        for ch in Channel::ALL {
            assert_eq!(board.state(ch).unwrap(), ChannelState::Idle);
        }
    }
}
