//! The per-channel measurement cycle: configure, arm, wait, read the status, clear, then read the
//! integral and optionally the waveform.
//!
//! Every step is one method on [`Vsdc4`], and the host keeps track of where each channel is in the
//! cycle:
//!
//! ```text
//! Idle -> Configured -> Armed -> AwaitingResult -> ResultReady | ResultAbsent -> Cleared -> Armed ...
//! ```
//!
//! A channel must be cleared before it is armed again. The integral can only be read once
//! `integral_ready` was seen since the last arm, before or after the clear.
//!
//! [`Vsdc4::measure`] strings the steps together with a choice of how to detect completion.

use crate::{
    board::{ChannelState, Vsdc4},
    channel::{Channel, WAVEFORM_CAPACITY},
    error::{Error, Result},
    registers::{
        ChannelCommand, ChannelRegister, ChannelSettings, ChannelStatus, ADC_INT, ADC_IRQ_VEC,
        ADC_TIMER, ADC_WRITE, TIME_QUANT,
    },
    sink::SampleSink,
    transport::{bitcast_f32, Driver},
};
use std::time::Duration;
use tracing::{debug, warn};

/// Samples the hardware appends after a stop condition
pub const WAVEFORM_PADDING: usize = 128;

/// Convert an integration time into timer ticks of `quantum` seconds, rounding to the nearest tick
/// # Errors
/// Returns an error if the quantum isn't a positive number or the tick count doesn't fit the timer
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn integration_ticks(integration_time: Duration, quantum: f32) -> Result<u32> {
    if !quantum.is_finite() || quantum <= 0.0 {
        return Err(Error::InvalidParameter(format!(
            "Time quantum must be a positive number of seconds, got {quantum}"
        )));
    }
    let ticks = (integration_time.as_secs_f64() / f64::from(quantum)).round();
    if ticks > f64::from(u32::MAX) {
        return Err(Error::InvalidParameter(format!(
            "{integration_time:?} is {ticks} ticks of {quantum}s, which overflows the timer"
        )));
    }
    Ok(ticks as u32)
}

/// Samples read back from a channel's waveform buffer, trailing pad included
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Waveform {
    pub samples: Vec<f32>,
}

impl Waveform {
    /// The samples before the trailing pad
    #[must_use]
    pub fn payload(&self) -> &[f32] {
        &self.samples[..self.samples.len().saturating_sub(WAVEFORM_PADDING)]
    }

    /// The trailing pad
    #[must_use]
    pub fn padding(&self) -> &[f32] {
        &self.samples[self.payload().len()..]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// The outcome of one completed measurement
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementResult {
    pub channel: Channel,
    pub status: ChannelStatus,
    pub integral: f32,
    pub waveform: Option<Waveform>,
}

impl MeasurementResult {
    /// Write the waveform payload (if one was read) to `sink`
    /// # Errors
    /// Returns the sink's error
    pub fn write_waveform<S: SampleSink>(&self, sink: &mut S) -> Result<()> {
        match &self.waveform {
            Some(wf) => sink.write_samples(wf.payload()),
            None => Ok(()),
        }
    }
}

/// How [`Vsdc4::measure`] finds out a run is over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Poll the channel's status register every `interval`
    Polling { interval: Duration, timeout: Duration },
    /// Enable the completion interrupt and poll for the channel's vector every `interval`
    Interrupt { interval: Duration, timeout: Duration },
}

impl Default for Completion {
    fn default() -> Self {
        Completion::Polling {
            interval: Duration::from_millis(10),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Everything about a measurement except the channel and integration time
#[derive(Debug, Clone, Copy, Default)]
pub struct Acquisition {
    pub completion: Completion,
    /// Read the waveform buffer as well as the integral
    pub waveform: bool,
}

impl<D> Vsdc4<D>
where
    D: Driver,
{
    /// Configure `channel` for a program-started, timer-stopped integration of the signal input
    /// # Errors
    /// See [`Vsdc4::configure_with`]
    pub fn configure(
        &self,
        channel: Channel,
        integration_time: Duration,
        irq_enabled: bool,
    ) -> Result<()> {
        self.configure_with(
            channel,
            integration_time,
            ChannelSettings::timed(irq_enabled),
        )
    }

    /// Program `channel`'s settings, vector and timer, and reset its sample pointer, all under one
    /// gate. On failure the channel is left `Idle` and must be configured again before arming.
    /// # Errors
    /// Returns an error if the channel is mid-run, on a bad integration time, or on bus failure
    pub fn configure_with(
        &self,
        channel: Channel,
        integration_time: Duration,
        settings: ChannelSettings,
    ) -> Result<()> {
        {
            let mut tracks = self.tracks()?;
            let track = &mut tracks[channel.index()];
            if track.state.in_flight() {
                return Err(Error::InvalidTransition {
                    channel,
                    state: track.state,
                    op: "configure",
                });
            }
            track.state = ChannelState::Idle;
            track.ready_seen = false;
        }
        match self.program(channel, integration_time, &settings) {
            Ok(ticks) => {
                debug!(%channel, ticks, ?settings, "Configured");
                self.set_state(channel, ChannelState::Configured)
            }
            Err(e) => {
                self.set_state(channel, ChannelState::Idle)?;
                Err(e)
            }
        }
    }

    fn program(
        &self,
        channel: Channel,
        integration_time: Duration,
        settings: &ChannelSettings,
    ) -> Result<u32> {
        let mut gate = self.device().acquire()?;
        let quantum = bitcast_f32(gate.read_cycle(self.global(TIME_QUANT))?);
        let ticks = integration_ticks(integration_time, quantum)?;
        gate.write_as(
            self.channel_register(channel, ChannelSettings::OFFSET),
            settings,
        )?;
        gate.write_cycle(
            self.channel_register(channel, ADC_IRQ_VEC),
            u32::from(self.vectors().vector(channel)),
        )?;
        gate.write_cycle(self.channel_register(channel, ADC_TIMER), ticks)?;
        gate.write_cycle(self.channel_register(channel, ADC_WRITE), 0)?;
        Ok(ticks)
    }

    /// Start an integration
    /// # Errors
    /// Returns an error unless the channel is freshly configured or cleared, or on bus failure
    pub fn arm(&self, channel: Channel) -> Result<()> {
        {
            let mut tracks = self.tracks()?;
            let track = &mut tracks[channel.index()];
            if !matches!(
                track.state,
                ChannelState::Configured | ChannelState::Cleared
            ) {
                return Err(Error::InvalidTransition {
                    channel,
                    state: track.state,
                    op: "arm",
                });
            }
            // Claimed before the start command so a fast completion can't be overwritten
            track.state = ChannelState::Armed;
            track.ready_seen = false;
        }
        debug!(%channel, "Armed");
        let start = self.device().write_as(
            self.channel_register(channel, ChannelCommand::OFFSET),
            &ChannelCommand::start(),
        );
        if start.is_err() {
            self.set_state(channel, ChannelState::Idle)?;
        }
        start
    }

    /// Read and decode `channel`'s status. Both the error flags and `integral_ready` are reported
    /// as found; a read failure leaves the channel's state alone. Error flags only end the run
    /// once `running` has dropped.
    /// # Errors
    /// Returns an error on bus failure
    pub fn read_status(&self, channel: Channel) -> Result<ChannelStatus> {
        let status: ChannelStatus = self
            .device()
            .read_as(self.channel_register(channel, ChannelStatus::OFFSET))?;
        let mut tracks = self.tracks()?;
        let track = &mut tracks[channel.index()];
        if track.state.in_run() {
            let next = if status.integral_ready {
                ChannelState::ResultReady
            } else if !status.running && status.has_errors() {
                ChannelState::ResultAbsent
            } else {
                ChannelState::AwaitingResult
            };
            track.ready_seen |= status.integral_ready;
            if track.state != next {
                debug!(%channel, from = ?track.state, to = ?next, "Channel state");
                track.state = next;
            }
        }
        if status.has_errors() {
            debug!(%channel, errors = ?status.errors(), "Status flags");
        }
        Ok(status)
    }

    /// Acknowledge `channel`'s latched result bits. A channel that may still be integrating keeps
    /// its state, only the latched bits are dropped.
    /// # Errors
    /// Returns an error on bus failure
    pub fn clear(&self, channel: Channel) -> Result<()> {
        self.device().write_as(
            self.channel_register(channel, ChannelStatus::OFFSET),
            &ChannelStatus::result_bits(),
        )?;
        let state = self.state(channel)?;
        if state != ChannelState::Idle && !state.in_flight() {
            self.set_state(channel, ChannelState::Cleared)?;
        }
        Ok(())
    }

    /// Stop a run in progress and clear what it latched, under one gate
    /// # Errors
    /// Returns an error on bus failure
    pub fn abort(&self, channel: Channel) -> Result<()> {
        {
            let mut gate = self.device().acquire()?;
            let stop = ChannelCommand {
                stop: true,
                ..Default::default()
            };
            gate.write_as(self.channel_register(channel, ChannelCommand::OFFSET), &stop)?;
            gate.write_as(
                self.channel_register(channel, ChannelStatus::OFFSET),
                &ChannelStatus::result_bits(),
            )?;
        }
        if self.state(channel)? != ChannelState::Idle {
            self.set_state(channel, ChannelState::Cleared)?;
        }
        warn!(%channel, "Aborted");
        Ok(())
    }

    /// The accumulated integral of the last run
    /// # Errors
    /// Returns an error if `integral_ready` wasn't seen since the channel was armed, or on bus
    /// failure
    pub fn read_integral(&self, channel: Channel) -> Result<f32> {
        let track = self.tracks()?[channel.index()];
        if !track.ready_seen {
            return Err(Error::InvalidTransition {
                channel,
                state: track.state,
                op: "read the integral of",
            });
        }
        Ok(bitcast_f32(
            self.device()
                .read(self.channel_register(channel, ADC_INT))?,
        ))
    }

    /// Read as many samples as the sample counter says were written, under one gate.
    /// The last [`WAVEFORM_PADDING`] of them are the pad written after the stop.
    /// # Errors
    /// Returns an error if the counter overruns the buffer, or on bus failure
    pub fn read_waveform(&self, channel: Channel) -> Result<Waveform> {
        let mut gate = self.device().acquire()?;
        let count = gate.read_cycle(self.channel_register(channel, ADC_WRITE))?;
        if count > WAVEFORM_CAPACITY {
            return Err(Error::BadSampleCount { channel, count });
        }
        let samples = (0..count)
            .map(|i| {
                gate.read_cycle(self.waveform_sample(channel, i))
                    .map(bitcast_f32)
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(%channel, count, "Read waveform");
        Ok(Waveform { samples })
    }

    /// Poll the status register until the run is over
    fn poll_status(
        &self,
        channel: Channel,
        interval: Duration,
        timeout: Duration,
    ) -> Result<ChannelStatus> {
        let clock = self.clock();
        let start = clock.now();
        loop {
            let status = self.read_status(channel)?;
            if status.integral_ready || (!status.running && status.has_errors()) {
                return Ok(status);
            }
            let waited = clock.now().saturating_sub(start);
            if waited >= timeout {
                return Err(Error::Timeout { channel, waited });
            }
            clock.sleep(interval);
        }
    }

    /// Poll the interrupt vector until `channel`'s arrives, dropping anyone else's
    fn await_vector(&self, channel: Channel, interval: Duration, timeout: Duration) -> Result<()> {
        let clock = self.clock();
        let start = clock.now();
        loop {
            let vector = self.irq_vector()?;
            if vector != 0 {
                match self.vectors().channel_for_vector(vector) {
                    Some(ch) if ch == channel => return Ok(()),
                    Some(other) => warn!(vector, %other, "Dropping the vector of another channel"),
                    None => warn!(vector, "Dropping an out-of-range vector"),
                }
                continue;
            }
            let waited = clock.now().saturating_sub(start);
            if waited >= timeout {
                return Err(Error::Timeout { channel, waited });
            }
            clock.sleep(interval);
        }
    }

    /// Run one full measurement cycle on `channel`. A run that times out is aborted.
    /// # Errors
    /// Returns [`Error::Timeout`] if the run doesn't finish in time, [`Error::NoResult`] if it
    /// finished without an integral, and bus errors as they happen
    pub fn measure(
        &self,
        channel: Channel,
        integration_time: Duration,
        acquisition: &Acquisition,
    ) -> Result<MeasurementResult> {
        let interrupt = matches!(acquisition.completion, Completion::Interrupt { .. });
        self.configure(channel, integration_time, interrupt)?;
        self.arm(channel)?;
        let waited = match acquisition.completion {
            Completion::Polling { interval, timeout } => {
                self.poll_status(channel, interval, timeout).map(Some)
            }
            Completion::Interrupt { interval, timeout } => self
                .await_vector(channel, interval, timeout)
                .map(|()| None),
        };
        let status = match waited {
            Ok(Some(status)) => status,
            Ok(None) => self.read_status(channel)?,
            Err(e @ Error::Timeout { .. }) => {
                self.abort(channel)?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        self.clear(channel)?;
        if !status.integral_ready {
            return Err(Error::NoResult { channel, status });
        }
        let integral = self.read_integral(channel)?;
        let waveform = if acquisition.waveform {
            Some(self.read_waveform(channel)?)
        } else {
            None
        };
        debug!(%channel, integral, "Measured");
        Ok(MeasurementResult {
            channel,
            status,
            integral,
            waveform,
        })
    }

    /// Measure `channels` one after the other, stopping at the first failure
    /// # Errors
    /// Returns the first measurement's error
    pub fn scan(
        &self,
        channels: &[Channel],
        integration_time: Duration,
        acquisition: &Acquisition,
    ) -> Result<Vec<MeasurementResult>> {
        channels
            .iter()
            .map(|ch| self.measure(*ch, integration_time, acquisition))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        board::BoardConfig,
        clock::{Clock, ManualClock},
        device::DeviceConfig,
        registers::{ADC_CSR, ADC_SR},
        sink::MemorySink,
        transport::mock::{MockVme, Op, STOP_PADDING},
    };
    use caenvme::ErrorCode;
    use std::sync::Arc;

    fn board() -> (Vsdc4<MockVme>, MockVme, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let mock = MockVme::new(clock.clone());
        let board = Vsdc4::open(
            mock.clone(),
            DeviceConfig::default(),
            BoardConfig::default(),
            clock.clone(),
        )
        .unwrap();
        (board, mock, clock)
    }

    fn polling() -> Acquisition {
        Acquisition {
            completion: Completion::Polling {
                interval: Duration::from_millis(1),
                timeout: Duration::from_secs(1),
            },
            waveform: true,
        }
    }

    #[test]
    fn test_ticks_round_to_nearest() {
        assert_eq!(
            integration_ticks(Duration::from_millis(10), 1e-6).unwrap(),
            10_000
        );
        assert_eq!(
            integration_ticks(Duration::from_micros(1_250), 1e-3).unwrap(),
            1
        );
        assert_eq!(
            integration_ticks(Duration::from_micros(1_750), 1e-3).unwrap(),
            2
        );
    }

    #[test]
    fn test_ticks_exactly_divisible() {
        assert_eq!(integration_ticks(Duration::from_secs(2), 0.5).unwrap(), 4);
        assert_eq!(
            integration_ticks(Duration::from_millis(1_000), 0.125).unwrap(),
            8
        );
        // Halfway rounds away from zero
        assert_eq!(
            integration_ticks(Duration::from_millis(1_125), 0.25).unwrap(),
            5
        );
        assert_eq!(integration_ticks(Duration::ZERO, 0.25).unwrap(), 0);
    }

    #[test]
    fn test_ticks_reject_bad_quantum() {
        for q in [0.0, -1e-6, f32::NAN, f32::INFINITY] {
            assert!(matches!(
                integration_ticks(Duration::from_millis(1), q),
                Err(Error::InvalidParameter(_))
            ));
        }
        assert!(integration_ticks(Duration::from_secs(10_000), 1e-6).is_err());
    }

    #[test]
    fn test_configure_programs_registers() {
        let (board, mock, _) = board();
        let ch = Channel::Ch1;
        mock.set_register(board.channel_register(ch, ADC_WRITE), 77);
        board
            .configure(ch, Duration::from_millis(10), true)
            .unwrap();
        assert_eq!(mock.register(board.channel_register(ch, ADC_TIMER)), 10_000);
        assert_eq!(mock.register(board.channel_register(ch, ADC_IRQ_VEC)), 2);
        assert_eq!(mock.register(board.channel_register(ch, ADC_SR)), 1 << 11);
        assert_eq!(mock.register(board.channel_register(ch, ADC_WRITE)), 0);
        assert_eq!(board.state(ch).unwrap(), ChannelState::Configured);
    }

    #[test]
    fn test_failed_configure_cant_be_armed() {
        let (board, mock, _) = board();
        let ch = Channel::Ch0;
        mock.fail_next(
            Op::Write,
            Some(board.channel_register(ch, ADC_TIMER)),
            ErrorCode::BusError,
        );
        let err = board
            .configure(ch, Duration::from_millis(1), false)
            .unwrap_err();
        assert_eq!(err.driver_code(), Some(ErrorCode::BusError));
        assert_eq!(board.state(ch).unwrap(), ChannelState::Idle);
        assert!(matches!(
            board.arm(ch),
            Err(Error::InvalidTransition { op: "arm", .. })
        ));
    }

    #[test]
    fn test_arm_requires_configure() {
        let (board, _, _) = board();
        assert!(matches!(
            board.arm(Channel::Ch3),
            Err(Error::InvalidTransition {
                state: ChannelState::Idle,
                ..
            })
        ));
    }

    #[test]
    fn test_rearm_without_clear_is_rejected() {
        let (board, _, clock) = board();
        let ch = Channel::Ch2;
        board.configure(ch, Duration::from_millis(1), false).unwrap();
        board.arm(ch).unwrap();
        assert!(matches!(
            board.arm(ch),
            Err(Error::InvalidTransition {
                state: ChannelState::Armed,
                ..
            })
        ));
        clock.advance(Duration::from_millis(2));
        assert!(board.read_status(ch).unwrap().integral_ready);
        assert!(matches!(
            board.arm(ch),
            Err(Error::InvalidTransition {
                state: ChannelState::ResultReady,
                ..
            })
        ));
        board.clear(ch).unwrap();
        board.arm(ch).unwrap();
    }

    #[test]
    fn test_configure_refused_mid_run() {
        let (board, _, _) = board();
        board
            .configure(Channel::Ch0, Duration::from_millis(5), false)
            .unwrap();
        board.arm(Channel::Ch0).unwrap();
        assert!(matches!(
            board.configure(Channel::Ch0, Duration::from_millis(5), false),
            Err(Error::InvalidTransition { op: "configure", .. })
        ));
    }

    #[test]
    fn test_status_progression() {
        let (board, mock, clock) = board();
        let ch = Channel::Ch1;
        board.configure(ch, Duration::from_millis(4), false).unwrap();
        board.arm(ch).unwrap();
        let status = board.read_status(ch).unwrap();
        assert!(status.running && !status.integral_ready);
        assert_eq!(board.state(ch).unwrap(), ChannelState::AwaitingResult);
        assert!(board.read_integral(ch).is_err());

        clock.advance(Duration::from_millis(4));
        assert!(board.read_status(ch).unwrap().integral_ready);
        assert_eq!(board.state(ch).unwrap(), ChannelState::ResultReady);
        board.clear(ch).unwrap();
        assert_eq!(board.state(ch).unwrap(), ChannelState::Cleared);
        assert_eq!(mock.register(board.channel_register(ch, ADC_CSR)), 0);
        // Ready was seen, so the integral is still readable after the clear
        let integral = board.read_integral(ch).unwrap();
        assert!((integral - 1.0 * 0.004).abs() < 1e-6);
    }

    #[test]
    fn test_errors_without_ready_are_absent() {
        let (board, mock, _) = board();
        let ch = Channel::Ch3;
        board.configure(ch, Duration::from_millis(4), false).unwrap();
        board.arm(ch).unwrap();
        let csr = board.channel_register(ch, ADC_CSR);
        mock.set_register(csr, 1 << 7);
        let status = board.read_status(ch).unwrap();
        assert!(status.missed_integration);
        assert_eq!(board.state(ch).unwrap(), ChannelState::ResultAbsent);
    }

    #[test]
    fn test_error_flag_mid_run_keeps_channel_in_flight() {
        let (board, mock, clock) = board();
        let ch = Channel::Ch0;
        board.configure(ch, Duration::from_secs(1), false).unwrap();
        board.arm(ch).unwrap();
        let csr = board.channel_register(ch, ADC_CSR);
        mock.set_register(csr, mock.register(csr) | 1 << 5);
        let status = board.read_status(ch).unwrap();
        assert!(status.running && status.over_range);
        assert_eq!(board.state(ch).unwrap(), ChannelState::AwaitingResult);

        board.clear(ch).unwrap();
        assert_eq!(board.state(ch).unwrap(), ChannelState::AwaitingResult);
        assert!(matches!(
            board.arm(ch),
            Err(Error::InvalidTransition {
                state: ChannelState::AwaitingResult,
                ..
            })
        ));
        assert!(matches!(
            board.configure(ch, Duration::from_secs(1), false),
            Err(Error::InvalidTransition { op: "configure", .. })
        ));

        // Once the run is over it can be cleared and armed again
        clock.advance(Duration::from_secs(1));
        assert!(board.read_status(ch).unwrap().integral_ready);
        board.clear(ch).unwrap();
        board.arm(ch).unwrap();
    }

    #[test]
    fn test_read_status_failure_propagates() {
        let (board, mock, _) = board();
        let ch = Channel::Ch1;
        board.configure(ch, Duration::from_millis(1), true).unwrap();
        board.arm(ch).unwrap();
        mock.fail_next(
            Op::Read,
            Some(board.channel_register(ch, ADC_CSR)),
            ErrorCode::CommError,
        );
        let err = board.read_status(ch).unwrap_err();
        assert_eq!(err.driver_code(), Some(ErrorCode::CommError));
        assert_eq!(board.state(ch).unwrap(), ChannelState::Armed);
    }

    #[test]
    fn test_waveform_of_only_padding() {
        let (board, _, clock) = board();
        let ch = Channel::Ch0;
        // Shorter than one sample period
        board
            .configure(ch, Duration::from_micros(500), false)
            .unwrap();
        board.arm(ch).unwrap();
        clock.advance(Duration::from_millis(1));
        assert!(board.read_status(ch).unwrap().integral_ready);
        let wf = board.read_waveform(ch).unwrap();
        assert_eq!(wf.len(), WAVEFORM_PADDING);
        assert!(wf.payload().is_empty());
        assert!(wf.padding().iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_waveform_length_follows_counter() {
        let (board, mock, _) = board();
        let ch = Channel::Ch2;
        mock.set_register(board.channel_register(ch, ADC_WRITE), 3);
        mock.set_register(board.waveform_sample(ch, 2), 2.5f32.to_bits());
        let wf = board.read_waveform(ch).unwrap();
        assert_eq!(wf.samples, vec![0.0, 0.0, 2.5]);
        assert!(wf.payload().is_empty());
    }

    #[test]
    fn test_waveform_counter_overrun() {
        let (board, mock, _) = board();
        let ch = Channel::Ch3;
        mock.set_register(
            board.channel_register(ch, ADC_WRITE),
            WAVEFORM_CAPACITY + 1,
        );
        assert!(matches!(
            board.read_waveform(ch),
            Err(Error::BadSampleCount { count, .. }) if count == WAVEFORM_CAPACITY + 1
        ));
    }

    #[test]
    fn test_measure_polling() {
        let (board, mock, clock) = board();
        let result = board
            .measure(Channel::Ch2, Duration::from_millis(10), &polling())
            .unwrap();
        assert!(result.status.integral_ready);
        assert!((result.integral - 1.5 * 0.01).abs() < 1e-6);
        let wf = result.waveform.as_ref().unwrap();
        assert_eq!(wf.len(), 10 + STOP_PADDING as usize);
        assert!(wf.payload().iter().all(|s| *s == 1.5));
        // Polling leaves the interrupt off
        assert!(mock.pending_vectors().is_empty());
        assert!(clock.now() >= Duration::from_millis(10));
        assert_eq!(board.state(Channel::Ch2).unwrap(), ChannelState::Cleared);

        let mut sink = MemorySink::default();
        result.write_waveform(&mut sink).unwrap();
        assert_eq!(sink.samples.len(), 10);
    }

    #[test]
    fn test_measure_interrupt_drops_foreign_vectors() {
        let (board, mock, clock) = board();
        board
            .configure(Channel::Ch0, Duration::from_millis(1), true)
            .unwrap();
        board.arm(Channel::Ch0).unwrap();
        clock.advance(Duration::from_millis(2));
        assert_eq!(mock.pending_vectors(), vec![1]);

        let acquisition = Acquisition {
            completion: Completion::Interrupt {
                interval: Duration::from_millis(1),
                timeout: Duration::from_secs(1),
            },
            waveform: false,
        };
        let result = board
            .measure(Channel::Ch1, Duration::from_millis(5), &acquisition)
            .unwrap();
        assert_eq!(result.channel, Channel::Ch1);
        assert!(result.waveform.is_none());
        assert!(mock.pending_vectors().is_empty());
    }

    #[test]
    fn test_measure_timeout_aborts() {
        let (board, _, _) = board();
        let acquisition = Acquisition {
            completion: Completion::Polling {
                interval: Duration::from_millis(1),
                timeout: Duration::from_millis(20),
            },
            waveform: false,
        };
        let err = board
            .measure(Channel::Ch0, Duration::from_secs(1), &acquisition)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Timeout { channel: Channel::Ch0, waited } if waited >= Duration::from_millis(20)
        ));
        assert_eq!(board.state(Channel::Ch0).unwrap(), ChannelState::Cleared);
        // The channel is usable again
        board
            .measure(Channel::Ch0, Duration::from_millis(2), &polling())
            .unwrap();
    }

    #[test]
    fn test_scan_in_order() {
        let (board, _, _) = board();
        let results = board
            .scan(
                &[Channel::Ch3, Channel::Ch0],
                Duration::from_millis(3),
                &polling(),
            )
            .unwrap();
        let channels: Vec<_> = results.iter().map(|r| r.channel).collect();
        assert_eq!(channels, vec![Channel::Ch3, Channel::Ch0]);
    }
}
