//! Three tasks sharing one board: an arm sequencer that starts staggered runs, a completion waiter
//! that collects results as their vectors come in, and a load generator that keeps the transaction
//! gate contended until the waiter is done.
//!
//! The tasks only talk through the hardware and a [`StopFlag`]. The waiter raises it once every
//! channel is in (or its deadline passed), the arm sequencer raises it if it fails, and the load
//! generator watches it to know when to quit.

use crate::{
    board::Vsdc4,
    channel::Channel,
    error::{Error, Result},
    measurement::Waveform,
    registers::{ChannelStatus, INT_LINE},
    transport::Driver,
};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tracing::{debug, error, info, warn};

/// Shared "we're done" signal. Visibility is eventual, readers just keep polling.
#[derive(Debug, Default)]
pub struct StopFlag(AtomicBool);

impl StopFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Which channels completed during a run
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ReadinessMask(u8);

impl ReadinessMask {
    pub const FULL: u8 = 0b1111;

    /// Mark `channel` complete, returning whether it wasn't already
    pub fn mark(&mut self, channel: Channel) -> bool {
        let fresh = !self.contains(channel);
        self.0 |= channel.bit();
        fresh
    }

    #[must_use]
    pub fn contains(self, channel: Channel) -> bool {
        self.0 & channel.bit() != 0
    }

    #[must_use]
    pub fn is_full(self) -> bool {
        self.0 == Self::FULL
    }

    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }
}

/// One step of the arm sequencer's plan
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ArmStep {
    Arm(Channel),
    Delay(Duration),
}

/// Channels 3 and 2 together, 1 half a second later, 0 two seconds after that
#[must_use]
pub fn default_plan() -> Vec<ArmStep> {
    vec![
        ArmStep::Arm(Channel::Ch3),
        ArmStep::Arm(Channel::Ch2),
        ArmStep::Delay(Duration::from_millis(500)),
        ArmStep::Arm(Channel::Ch1),
        ArmStep::Delay(Duration::from_secs(2)),
        ArmStep::Arm(Channel::Ch0),
    ]
}

/// What the load generator reads, and what it expects to find
#[derive(Debug, Clone, Copy)]
pub struct LoadConfig {
    /// Register offset from the board base
    pub address: u32,
    pub expected: u32,
    /// Rest between reads, if any
    pub pause: Option<Duration>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            address: INT_LINE,
            expected: 5,
            pause: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub integration_time: Duration,
    pub plan: Vec<ArmStep>,
    /// How long the waiter sleeps when no vector is pending
    pub poll_interval: Duration,
    pub load: LoadConfig,
    /// Give up waiting this long after the waiter starts
    pub deadline: Option<Duration>,
    pub read_waveforms: bool,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            integration_time: Duration::from_millis(100),
            plan: default_plan(),
            poll_interval: Duration::from_millis(50),
            load: LoadConfig::default(),
            deadline: None,
            read_waveforms: false,
        }
    }
}

impl ScenarioConfig {
    /// The same scenario with every delay in the plan multiplied by `factor`
    #[must_use]
    pub fn scaled(mut self, factor: f64) -> Self {
        for step in &mut self.plan {
            if let ArmStep::Delay(d) = step {
                *d = d.mul_f64(factor);
            }
        }
        self
    }
}

/// What every task gets to work with
#[derive(Debug)]
pub struct TaskContext<'a, D: Driver> {
    pub board: &'a Vsdc4<D>,
    pub stop: &'a StopFlag,
    pub config: &'a ScenarioConfig,
}

/// Something the hardware did that it shouldn't have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// A vector that maps to no channel
    UnexpectedVector(u8),
    /// The load generator's register didn't hold what it should
    UnexpectedLoadValue { expected: u32, got: u32 },
}

/// A vector the waiter acted on
#[derive(Debug, Clone)]
pub struct CompletionRecord {
    pub channel: Channel,
    pub vector: u8,
    pub status: ChannelStatus,
    /// Only read when the status said it was ready
    pub integral: Option<f32>,
    pub waveform: Option<Waveform>,
    /// When the vector was picked up, on the board's clock
    pub at: Duration,
}

#[derive(Debug, Default)]
pub struct WaiterOutcome {
    pub completions: Vec<CompletionRecord>,
    pub mask: ReadinessMask,
    pub violations: Vec<Violation>,
    pub errors: usize,
    /// When this task raised the stop flag
    pub stop_set_at: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub reads: u64,
    pub violations: Vec<Violation>,
    pub errors: usize,
    pub exited_at: Duration,
}

#[derive(Debug)]
pub struct ScenarioReport {
    pub completions: Vec<CompletionRecord>,
    pub mask: ReadinessMask,
    pub violations: Vec<Violation>,
    pub waiter_errors: usize,
    pub load_errors: usize,
    pub load_reads: u64,
    pub stop_set_at: Option<Duration>,
    pub load_exited_at: Duration,
}

impl ScenarioReport {
    /// The vectors in the order the waiter saw them
    #[must_use]
    pub fn vectors(&self) -> Vec<u8> {
        self.completions.iter().map(|c| c.vector).collect()
    }
}

fn run_plan<D: Driver>(ctx: &TaskContext<'_, D>) -> Result<()> {
    let board = ctx.board;
    for channel in Channel::ALL {
        board.configure(channel, ctx.config.integration_time, true)?;
    }
    for step in &ctx.config.plan {
        match step {
            ArmStep::Arm(channel) => {
                board.arm(*channel)?;
                info!(%channel, at = ?board.clock().now(), "Armed");
            }
            ArmStep::Delay(d) => board.clock().sleep(*d),
        }
    }
    Ok(())
}

/// Configure every channel, then walk the arm plan. A failure stops the plan, raises the stop flag
/// so the other tasks wind down, and is returned.
/// # Errors
/// Returns the first register failure
pub fn arm_sequencer<D: Driver>(ctx: &TaskContext<'_, D>) -> Result<()> {
    let res = run_plan(ctx);
    if let Err(e) = &res {
        error!(%e, "Arm sequencer failed");
        ctx.stop.raise();
    }
    res
}

fn collect<D: Driver>(
    ctx: &TaskContext<'_, D>,
    channel: Channel,
    vector: u8,
) -> Result<CompletionRecord> {
    let board = ctx.board;
    let at = board.clock().now();
    let status = board.read_status(channel)?;
    board.clear(channel)?;
    let (integral, waveform) = if status.integral_ready {
        let integral = board.read_integral(channel)?;
        let waveform = if ctx.config.read_waveforms {
            Some(board.read_waveform(channel)?)
        } else {
            None
        };
        (Some(integral), waveform)
    } else {
        (None, None)
    };
    Ok(CompletionRecord {
        channel,
        vector,
        status,
        integral,
        waveform,
        at,
    })
}

/// Poll for vectors until every channel has produced an integral, then raise the stop flag.
/// Errors are logged and counted, and the loop carries on.
pub fn completion_waiter<D: Driver>(ctx: &TaskContext<'_, D>) -> WaiterOutcome {
    let board = ctx.board;
    let clock = board.clock();
    let start = clock.now();
    let mut out = WaiterOutcome::default();
    loop {
        if ctx.stop.is_raised() {
            info!("Stop raised elsewhere, waiter exiting");
            break;
        }
        if let Some(deadline) = ctx.config.deadline {
            if clock.now().saturating_sub(start) >= deadline {
                error!(mask = out.mask.bits(), "Gave up waiting for completions");
                out.errors += 1;
                ctx.stop.raise();
                out.stop_set_at = Some(clock.now());
                break;
            }
        }
        let vector = match board.irq_vector() {
            Ok(0) => {
                clock.sleep(ctx.config.poll_interval);
                continue;
            }
            Ok(v) => v,
            Err(e) => {
                error!(%e, "Vector poll failed");
                out.errors += 1;
                clock.sleep(ctx.config.poll_interval);
                continue;
            }
        };
        let Some(channel) = board.vectors().channel_for_vector(vector) else {
            warn!(vector, "Unexpected vector");
            out.violations.push(Violation::UnexpectedVector(vector));
            continue;
        };
        match collect(ctx, channel, vector) {
            Ok(record) => {
                debug!(%channel, vector, integral = ?record.integral, "Completion");
                if record.integral.is_some() {
                    out.mask.mark(channel);
                }
                out.completions.push(record);
                if out.mask.is_full() {
                    ctx.stop.raise();
                    out.stop_set_at = Some(clock.now());
                    info!("All channels complete");
                    break;
                }
            }
            Err(e) => {
                error!(%channel, %e, "Failed to collect a completion");
                out.errors += 1;
            }
        }
    }
    out
}

/// Read the load register over and over until the stop flag goes up. A wrong value is recorded
/// once per change of value, not once per read.
pub fn load_generator<D: Driver>(ctx: &TaskContext<'_, D>) -> LoadOutcome {
    let board = ctx.board;
    let load = ctx.config.load;
    let address = board.global(load.address);
    let mut out = LoadOutcome::default();
    let mut last_bad = None;
    while !ctx.stop.is_raised() {
        match board.device().read(address) {
            Ok(got) => {
                out.reads += 1;
                if got == load.expected {
                    last_bad = None;
                } else if last_bad != Some(got) {
                    warn!(expected = load.expected, got, "Unexpected load register value");
                    out.violations.push(Violation::UnexpectedLoadValue {
                        expected: load.expected,
                        got,
                    });
                    last_bad = Some(got);
                }
            }
            Err(e) => {
                warn!(%e, "Load read failed");
                out.errors += 1;
            }
        }
        match load.pause {
            Some(pause) => board.clock().sleep(pause),
            None => std::thread::yield_now(),
        }
    }
    out.exited_at = board.clock().now();
    debug!(reads = out.reads, "Load generator exiting");
    out
}

/// Run the three tasks to completion on `board`. The session stays open.
/// # Errors
/// Returns the arm sequencer's error, or a resource error if a task panicked
pub fn run_scenario<D: Driver>(
    board: &Vsdc4<D>,
    config: &ScenarioConfig,
) -> Result<ScenarioReport> {
    let stop = StopFlag::new();
    let ctx = TaskContext {
        board,
        stop: &stop,
        config,
    };
    let (armed, waiter, load) = std::thread::scope(|s| {
        let armed = s.spawn(|| arm_sequencer(&ctx));
        let waiter = s.spawn(|| completion_waiter(&ctx));
        let load = s.spawn(|| load_generator(&ctx));
        (armed.join(), waiter.join(), load.join())
    });
    let panicked = |task: &str| Error::Resource(format!("{task} panicked"));
    armed.map_err(|_| panicked("arm sequencer"))??;
    let waiter = waiter.map_err(|_| panicked("completion waiter"))?;
    let load = load.map_err(|_| panicked("load generator"))?;

    let mut violations = waiter.violations;
    violations.extend(load.violations);
    Ok(ScenarioReport {
        completions: waiter.completions,
        mask: waiter.mask,
        violations,
        waiter_errors: waiter.errors,
        load_errors: load.errors,
        load_reads: load.reads,
        stop_set_at: waiter.stop_set_at,
        load_exited_at: load.exited_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask() {
        let mut mask = ReadinessMask::default();
        assert!(mask.mark(Channel::Ch3));
        assert!(!mask.mark(Channel::Ch3));
        assert!(mask.contains(Channel::Ch3));
        assert!(!mask.contains(Channel::Ch0));
        for ch in [Channel::Ch0, Channel::Ch1] {
            mask.mark(ch);
        }
        assert_eq!(mask.bits(), 0b1011);
        assert!(!mask.is_full());
        mask.mark(Channel::Ch2);
        assert!(mask.is_full());
    }

    #[test]
    fn test_stop_flag() {
        let flag = StopFlag::new();
        assert!(!flag.is_raised());
        std::thread::scope(|s| {
            s.spawn(|| flag.raise());
        });
        assert!(flag.is_raised());
    }

    #[test]
    fn test_default_plan_staggers() {
        let plan = default_plan();
        let armed: Vec<_> = plan
            .iter()
            .filter_map(|s| match s {
                ArmStep::Arm(ch) => Some(*ch),
                ArmStep::Delay(_) => None,
            })
            .collect();
        assert_eq!(
            armed,
            vec![Channel::Ch3, Channel::Ch2, Channel::Ch1, Channel::Ch0]
        );
    }

    #[test]
    fn test_scaled_only_touches_delays() {
        let config = ScenarioConfig::default().scaled(0.1);
        assert_eq!(config.plan[2], ArmStep::Delay(Duration::from_millis(50)));
        assert_eq!(config.plan[4], ArmStep::Delay(Duration::from_millis(200)));
        assert_eq!(config.plan[0], ArmStep::Arm(Channel::Ch3));
        assert_eq!(config.integration_time, Duration::from_millis(100));
    }
}
