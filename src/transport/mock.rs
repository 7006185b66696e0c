//! Mock bridge with a simulated VSDC4 behind it, used in testing the front end.
//!
//! The simulation is lazy: whenever the bridge is touched, every channel whose integration
//! deadline (as seen by the injected [`Clock`]) has passed is completed, in deadline order. A
//! completion latches `integral_ready`, stores the integral and the waveform (with the trailing
//! stop pad), and queues the channel's vector if its interrupt is enabled.

use crate::{
    board::DEFAULT_BASE,
    channel::{Channel, WAVEFORM_CAPACITY},
    clock::Clock,
    registers::{
        ADC_CSR, ADC_INT, ADC_IRQ_VEC, ADC_SR, ADC_TIMER, ADC_WRITE, DEV_ID, INT_LINE,
        RESULT_MASK, TIME_QUANT,
    },
    transport::{bitcast_f32, bitcast_word},
};
use caenvme::{
    AddressModifier, BoardType, DataWidth, Driver, ErrorCode, Handle, IrqLevel, IrqMask, Result,
};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

/// What the simulated board reports in `DEV_ID`
pub const DEVICE_ID: u32 = 0x0005_DC40;
/// Seconds per timer tick of the simulated board
pub const TIME_QUANTUM: f32 = 1e-6;
/// Samples the hardware keeps writing after a stop
pub const STOP_PADDING: u32 = 128;

/// Size of the board's A32 window
const WINDOW: u32 = 0x0200_0000;
/// Bits of `ADC_CSR` that hold state rather than commands
const PSTART: u32 = 1 << 0;
const PSTOP: u32 = 1 << 1;
const MISS_START: u32 = 1 << 8;
const MEM_OVF: u32 = 1 << 6;
const INTEGRAL_RDY: u32 = 1 << 12;
const IRQ_ENABLED: u32 = 1 << 11;

/// Bridge operations faults can be injected into
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Op {
    Init,
    IrqEnable,
    IrqCheck,
    IrqWait,
    Iack,
    Read,
    Write,
}

/// An injected failure: the next `count` matching operations fail with `code`
#[derive(Debug, Copy, Clone)]
pub struct Fault {
    pub op: Op,
    /// Only fail cycles to this absolute address (`None` matches any)
    pub address: Option<u32>,
    pub code: ErrorCode,
    pub count: usize,
}

#[derive(Debug, Copy, Clone)]
struct Run {
    deadline: Duration,
}

#[derive(Debug)]
struct State {
    clock: Arc<dyn Clock>,
    base: u32,
    memory: HashMap<u32, u32>,
    runs: [Option<Run>; 4],
    pending: VecDeque<u8>,
    enabled: IrqMask,
    handle: Option<Handle>,
    next_handle: i32,
    faults: Vec<Fault>,
    levels: [f32; 4],
    ticks_per_sample: u32,
    cycle_delay: Duration,
}

/// A simulated V2718 bridge with one VSDC4 behind it. Clones share the same simulated hardware,
/// so a test can keep one to inspect and inject faults while the [`Device`](crate::device::Device)
/// owns the other.
#[derive(Debug, Clone)]
pub struct MockVme {
    state: Arc<Mutex<State>>,
    in_flight: Arc<AtomicUsize>,
    overlaps: Arc<AtomicUsize>,
}

/// Marks a bridge call in progress, so overlapping callers can be detected
struct Entry<'a>(&'a AtomicUsize);

impl Drop for Entry<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockVme {
    /// A board at [`DEFAULT_BASE`] asserting interrupt line 5
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_base(clock, DEFAULT_BASE, IrqLevel::L5)
    }

    #[must_use]
    pub fn with_base(clock: Arc<dyn Clock>, base: u32, line: IrqLevel) -> Self {
        let memory = HashMap::from([
            (base + DEV_ID, DEVICE_ID),
            (base + TIME_QUANT, bitcast_word(TIME_QUANTUM)),
            (base + INT_LINE, u32::from(line.number())),
        ]);
        Self {
            state: Arc::new(Mutex::new(State {
                clock,
                base,
                memory,
                runs: [None; 4],
                pending: VecDeque::new(),
                enabled: IrqMask::default(),
                handle: None,
                next_handle: 0,
                faults: vec![],
                levels: [0.5, 1.0, 1.5, 2.0],
                ticks_per_sample: 1000,
                cycle_delay: Duration::ZERO,
            })),
            in_flight: Arc::new(AtomicUsize::new(0)),
            overlaps: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // The simulation has no invariants a panicking test could break halfway
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self) -> Entry<'_> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let delay = self.state().cycle_delay;
        if !delay.is_zero() {
            // Widen the window in which a second caller would be caught
            std::thread::sleep(delay);
        }
        Entry(&self.in_flight)
    }

    /// Queue a fault
    pub fn inject(&self, fault: Fault) {
        self.state().faults.push(fault);
    }

    /// Fail the next `op` (to `address`, if given) once with `code`
    pub fn fail_next(&self, op: Op, address: Option<u32>, code: ErrorCode) {
        self.inject(Fault {
            op,
            address,
            code,
            count: 1,
        });
    }

    /// How many bridge calls ran while another was still in progress
    #[must_use]
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    /// Make every bridge call take at least `delay` of real time
    pub fn set_cycle_delay(&self, delay: Duration) {
        self.state().cycle_delay = delay;
    }

    /// The constant input level integrated by `channel`
    pub fn set_level(&self, channel: Channel, level: f32) {
        self.state().levels[channel.index()] = level;
    }

    /// How many timer ticks make one waveform sample
    pub fn set_ticks_per_sample(&self, ticks: u32) {
        self.state().ticks_per_sample = ticks.max(1);
    }

    /// Peek at a register (absolute address) without going through the bus
    #[must_use]
    pub fn register(&self, address: u32) -> u32 {
        self.state().memory.get(&address).copied().unwrap_or(0)
    }

    /// Poke a register (absolute address) without going through the bus
    pub fn set_register(&self, address: u32, word: u32) {
        self.state().memory.insert(address, word);
    }

    /// Vectors that have been raised but not acknowledged yet
    #[must_use]
    pub fn pending_vectors(&self) -> Vec<u8> {
        let mut state = self.state();
        state.advance();
        state.pending.iter().copied().collect()
    }

    /// Whether a session is currently open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state().handle.is_some()
    }
}

impl State {
    fn take_fault(&mut self, op: Op, address: Option<u32>) -> Result<()> {
        let hit = self
            .faults
            .iter()
            .position(|f| {
                f.op == op && f.count > 0 && (f.address.is_none() || f.address == address)
            });
        if let Some(idx) = hit {
            let code = self.faults[idx].code;
            self.faults[idx].count -= 1;
            if self.faults[idx].count == 0 {
                self.faults.remove(idx);
            }
            return Err(code.into());
        }
        Ok(())
    }

    fn check_handle(&self, handle: Handle) -> Result<()> {
        if self.handle == Some(handle) {
            Ok(())
        } else {
            Err(ErrorCode::InvalidParam.into())
        }
    }

    fn channel_reg(&self, channel: Channel, reg: u32) -> u32 {
        self.base + channel.registers_offset() + reg
    }

    fn word(&self, address: u32) -> u32 {
        self.memory.get(&address).copied().unwrap_or(0)
    }

    fn line(&self) -> Option<IrqLevel> {
        u8::try_from(self.word(self.base + INT_LINE))
            .ok()
            .and_then(IrqLevel::from_number)
    }

    /// Which channel's `ADC_CSR` lives at `address`, if any
    fn csr_channel(&self, address: u32) -> Option<Channel> {
        Channel::ALL
            .into_iter()
            .find(|ch| self.channel_reg(*ch, ADC_CSR) == address)
    }

    /// Complete every run whose deadline has passed, earliest first
    fn advance(&mut self) {
        let now = self.clock.now();
        let mut due: Vec<(Duration, Channel)> = Channel::ALL
            .into_iter()
            .filter_map(|ch| match self.runs[ch.index()] {
                Some(run) if run.deadline <= now => Some((run.deadline, ch)),
                _ => None,
            })
            .collect();
        due.sort();
        for (_, ch) in due {
            self.complete(ch);
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn complete(&mut self, ch: Channel) {
        self.runs[ch.index()] = None;
        let ticks = self.word(self.channel_reg(ch, ADC_TIMER));
        let quantum = bitcast_f32(self.word(self.base + TIME_QUANT));
        let level = self.levels[ch.index()];
        let csr_addr = self.channel_reg(ch, ADC_CSR);
        let mut csr = (self.word(csr_addr) & !PSTART) | INTEGRAL_RDY;

        // Keep appending after whatever the write pointer says is already there
        let start = self.word(self.channel_reg(ch, ADC_WRITE));
        let wanted = start + ticks / self.ticks_per_sample + STOP_PADDING;
        let written = if wanted > WAVEFORM_CAPACITY {
            csr |= MEM_OVF;
            WAVEFORM_CAPACITY
        } else {
            wanted
        };
        let payload_end = written.saturating_sub(STOP_PADDING);
        let wf_base = self.base + ch.waveform_offset();
        for i in start..written {
            let sample = if i < payload_end { level } else { 0.0 };
            self.memory.insert(wf_base + 4 * i, bitcast_word(sample));
        }
        let write_addr = self.channel_reg(ch, ADC_WRITE);
        let int_addr = self.channel_reg(ch, ADC_INT);
        let integral = level * (ticks as f32 * quantum);
        self.memory.insert(write_addr, written);
        self.memory.insert(int_addr, bitcast_word(integral));
        self.memory.insert(csr_addr, csr);

        if self.word(self.channel_reg(ch, ADC_SR)) & IRQ_ENABLED != 0 {
            #[allow(clippy::cast_possible_truncation)]
            let vector = (self.word(self.channel_reg(ch, ADC_IRQ_VEC)) & 0xFF) as u8;
            self.pending.push_back(vector);
        }
    }

    fn write_csr(&mut self, ch: Channel, address: u32, word: u32) {
        let mut csr = self.word(address) & !(word & RESULT_MASK);
        if word & PSTART != 0 {
            if self.runs[ch.index()].is_some() {
                csr |= MISS_START;
            } else {
                let ticks = self.word(self.channel_reg(ch, ADC_TIMER));
                let quantum = bitcast_f32(self.word(self.base + TIME_QUANT));
                let length = Duration::from_secs_f64(f64::from(ticks) * f64::from(quantum));
                self.runs[ch.index()] = Some(Run {
                    deadline: self.clock.now() + length,
                });
                csr |= PSTART;
            }
        }
        self.memory.insert(address, csr);
        if word & PSTOP != 0 && self.runs[ch.index()].is_some() {
            self.complete(ch);
        }
    }

    fn in_window(&self, address: u32) -> bool {
        address >= self.base && address - self.base < WINDOW
    }
}

impl Driver for MockVme {
    fn init(&mut self, _board: BoardType, _link: u16, _board_number: u16) -> Result<Handle> {
        let _entry = self.enter();
        let mut state = self.state();
        state.take_fault(Op::Init, None)?;
        if state.handle.is_some() {
            return Err(ErrorCode::AlreadyOpen.into());
        }
        let handle = Handle(state.next_handle);
        state.next_handle += 1;
        state.handle = Some(handle);
        Ok(handle)
    }

    fn end(&mut self, handle: Handle) -> Result<()> {
        let _entry = self.enter();
        let mut state = self.state();
        state.check_handle(handle)?;
        state.handle = None;
        state.enabled = IrqMask::default();
        Ok(())
    }

    fn irq_enable(&mut self, handle: Handle, mask: IrqMask) -> Result<()> {
        let _entry = self.enter();
        let mut state = self.state();
        state.check_handle(handle)?;
        state.take_fault(Op::IrqEnable, None)?;
        state.enabled.0 |= mask.0;
        Ok(())
    }

    fn irq_check(&mut self, handle: Handle) -> Result<IrqMask> {
        let _entry = self.enter();
        let mut state = self.state();
        state.check_handle(handle)?;
        state.take_fault(Op::IrqCheck, None)?;
        state.advance();
        Ok(match state.line() {
            Some(line) if !state.pending.is_empty() && state.enabled.contains(line) => {
                IrqMask::single(line)
            }
            _ => IrqMask::default(),
        })
    }

    fn irq_wait(&mut self, handle: Handle, mask: IrqMask, timeout: Duration) -> Result<()> {
        let _entry = self.enter();
        let clock = {
            let mut state = self.state();
            state.check_handle(handle)?;
            state.take_fault(Op::IrqWait, None)?;
            Arc::clone(&state.clock)
        };
        let deadline = clock.now() + timeout;
        loop {
            {
                let mut state = self.state();
                state.advance();
                if let Some(line) = state.line() {
                    if !state.pending.is_empty() && mask.contains(line) {
                        return Ok(());
                    }
                }
            }
            let now = clock.now();
            if now >= deadline {
                return Err(ErrorCode::Timeout.into());
            }
            clock.sleep((deadline - now).min(Duration::from_millis(1)));
        }
    }

    fn iack_cycle(&mut self, handle: Handle, level: IrqLevel, width: DataWidth) -> Result<u32> {
        let _entry = self.enter();
        let mut state = self.state();
        state.check_handle(handle)?;
        state.take_fault(Op::Iack, None)?;
        state.advance();
        if state.line() != Some(level) {
            return Err(ErrorCode::BusError.into());
        }
        let vector = state.pending.pop_front().ok_or(ErrorCode::BusError)?;
        Ok(u32::from(vector) & width.mask())
    }

    fn read_cycle(
        &mut self,
        handle: Handle,
        address: u32,
        modifier: AddressModifier,
        width: DataWidth,
    ) -> Result<u32> {
        let _entry = self.enter();
        let mut state = self.state();
        state.check_handle(handle)?;
        state.take_fault(Op::Read, Some(address))?;
        if modifier != AddressModifier::A32UserData || !state.in_window(address) {
            return Err(ErrorCode::BusError.into());
        }
        state.advance();
        Ok(state.word(address) & width.mask())
    }

    fn write_cycle(
        &mut self,
        handle: Handle,
        address: u32,
        data: u32,
        modifier: AddressModifier,
        width: DataWidth,
    ) -> Result<()> {
        let _entry = self.enter();
        let mut state = self.state();
        state.check_handle(handle)?;
        state.take_fault(Op::Write, Some(address))?;
        if modifier != AddressModifier::A32UserData || !state.in_window(address) {
            return Err(ErrorCode::BusError.into());
        }
        state.advance();
        let data = data & width.mask();
        match state.csr_channel(address) {
            Some(ch) => state.write_csr(ch, address, data),
            None => {
                state.memory.insert(address, data);
            }
        }
        Ok(())
    }
}
