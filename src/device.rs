//! The device session and its transaction gate.
//!
//! Every bus transaction must go through the gate. [`Device::read`], [`Device::write`] and
//! [`Device::irq_vector`] take and release it themselves, so they must not be called by a thread
//! that already holds a [`Gate`]. Sequences that other threads must see as a unit take the gate
//! once with [`Device::acquire`] and issue several raw cycles through it before releasing.
//!
//! The gate is strictly non-reentrant: acquiring it twice on one thread fails fast with
//! [`Error::Reentrant`] instead of deadlocking.

use crate::{
    error::{Error, Result},
    transport::RegisterWord,
};
use caenvme::{AddressModifier, BoardType, DataWidth, Driver, Handle, IrqLevel, IrqMask};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};
use tracing::{debug, info, trace, warn};

/// Address space qualifier of every register cycle
pub const ADDRESS_MODIFIER: AddressModifier = AddressModifier::A32UserData;
/// Width of every register cycle
pub const DATA_WIDTH: DataWidth = DataWidth::D32;

/// Where to find the bridge and which interrupt line to listen on
#[derive(Debug, Clone, Copy)]
pub struct DeviceConfig {
    pub board: BoardType,
    pub link: u16,
    pub board_number: u16,
    pub irq: IrqLevel,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            board: BoardType::V2718,
            link: 0,
            board_number: 0,
            irq: IrqLevel::L5,
        }
    }
}

/// The open bridge session, only reachable through a [`Gate`]
#[derive(Debug)]
struct Session<D: Driver> {
    driver: D,
    handle: Handle,
    open: bool,
}

/// A thread-safe, exclusively locked session to one bridge
#[derive(Debug)]
pub struct Device<D: Driver> {
    session: Mutex<Session<D>>,
    /// Tag of the thread currently holding the gate, 0 when free
    holder: AtomicU64,
    irq: IrqLevel,
}

fn thread_tag() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static TAG: u64 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    TAG.with(|t| *t)
}

impl<D> Device<D>
where
    D: Driver,
{
    /// Open the bridge and enable the configured interrupt line
    /// # Errors
    /// Returns the driver error if either step fails. A half-opened session is closed again.
    pub fn open(mut driver: D, config: DeviceConfig) -> Result<Self> {
        let handle = driver.init(config.board, config.link, config.board_number)?;
        if let Err(e) = driver.irq_enable(handle, IrqMask::single(config.irq)) {
            if let Err(end) = driver.end(handle) {
                warn!(%end, "Failed to close the half-opened session");
            }
            return Err(e.into());
        }
        info!(
            handle = handle.0,
            link = config.link,
            board = config.board_number,
            irq = config.irq.number(),
            "Opened VME session"
        );
        Ok(Self {
            session: Mutex::new(Session {
                driver,
                handle,
                open: true,
            }),
            holder: AtomicU64::new(0),
            irq: config.irq,
        })
    }

    /// The interrupt line this session listens on
    #[must_use]
    pub fn irq(&self) -> IrqLevel {
        self.irq
    }

    /// Block until no other thread holds the gate, then take it.
    /// The gate is released when the returned [`Gate`] is dropped (or [`Gate::release`]d).
    /// # Errors
    /// Returns [`Error::Reentrant`] if this thread already holds the gate and
    /// [`Error::Resource`] if a previous holder panicked
    pub fn acquire(&self) -> Result<Gate<'_, D>> {
        let tag = thread_tag();
        // Only the holder ever stores its own tag, so a thread can only see its own tag here
        // when it really holds the gate
        if self.holder.load(Ordering::Relaxed) == tag {
            return Err(Error::Reentrant);
        }
        let guard = self
            .session
            .lock()
            .map_err(|_| Error::Resource("transaction gate poisoned".to_string()))?;
        self.holder.store(tag, Ordering::Relaxed);
        Ok(Gate {
            guard,
            holder: &self.holder,
        })
    }

    /// Read one register word
    /// # Errors
    /// Returns an error on bus failure
    pub fn read(&self, address: u32) -> Result<u32> {
        self.acquire()?.read_cycle(address)
    }

    /// Read one register word as `T`
    /// # Errors
    /// Returns an error on bus failure or if the word doesn't decode
    pub fn read_as<T>(&self, address: u32) -> Result<T>
    where
        T: RegisterWord,
    {
        T::from_word(self.read(address)?)
    }

    /// Write one register word
    /// # Errors
    /// Returns an error on bus failure. The register's state is then undefined.
    pub fn write(&self, address: u32, word: u32) -> Result<()> {
        self.acquire()?.write_cycle(address, word)
    }

    /// Write a `T` as one register word
    /// # Errors
    /// Returns an error on bus failure
    pub fn write_as<T>(&self, address: u32, value: &T) -> Result<()>
    where
        T: RegisterWord,
    {
        self.write(address, value.to_word()?)
    }

    /// The vector of the pending interrupt on our line, or 0 if nothing is pending
    /// # Errors
    /// Returns an error on bus failure
    pub fn irq_vector(&self) -> Result<u8> {
        let mut gate = self.acquire()?;
        if gate.irq_check()?.contains(self.irq) {
            gate.iack_cycle(self.irq)
        } else {
            Ok(0)
        }
    }

    /// Like [`Device::irq_vector`], but blocks in the driver for up to `timeout` waiting for an
    /// interrupt. The gate is held for the whole wait.
    /// # Errors
    /// Returns an error on bus failure. Running out of time is not an error, it yields 0.
    pub fn wait_vector(&self, timeout: Duration) -> Result<u8> {
        let mut gate = self.acquire()?;
        match gate.irq_wait(IrqMask::single(self.irq), timeout) {
            Ok(()) => gate.iack_cycle(self.irq),
            Err(Error::Driver(e)) if e.is_timeout() => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Close the session
    /// # Errors
    /// Returns the driver error if the bridge refuses to close
    pub fn close(self) -> Result<()> {
        // A panicked holder doesn't stop us from closing the bridge
        let mut session = self
            .session
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        session.close()
    }
}

impl<D> Session<D>
where
    D: Driver,
{
    fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.driver.end(self.handle)?;
        info!(handle = self.handle.0, "Closed VME session");
        Ok(())
    }
}

impl<D: Driver> Drop for Session<D> {
    fn drop(&mut self) {
        if self.open {
            warn!(handle = self.handle.0, "VME session dropped without being closed");
            if let Err(e) = self.close() {
                warn!(%e, "Failed to close the VME session");
            }
        }
    }
}

/// Exclusive access to the session. Dropping it releases the gate.
#[derive(Debug)]
pub struct Gate<'a, D: Driver> {
    guard: MutexGuard<'a, Session<D>>,
    holder: &'a AtomicU64,
}

impl<'a, D> Gate<'a, D>
where
    D: Driver,
{
    /// The bridge handle, for callers that need to issue their own cycles
    #[must_use]
    pub fn handle(&self) -> Handle {
        self.guard.handle
    }

    /// Release the gate. Equivalent to dropping it.
    pub fn release(self) {}

    /// Raw A32/D32 read cycle
    /// # Errors
    /// Returns the driver error
    pub fn read_cycle(&mut self, address: u32) -> Result<u32> {
        let session = &mut *self.guard;
        let word = session
            .driver
            .read_cycle(session.handle, address, ADDRESS_MODIFIER, DATA_WIDTH)?;
        trace!("read {address:#010X} -> {word:#010X}");
        Ok(word)
    }

    /// Raw A32/D32 write cycle
    /// # Errors
    /// Returns the driver error
    pub fn write_cycle(&mut self, address: u32, word: u32) -> Result<()> {
        let session = &mut *self.guard;
        trace!("write {address:#010X} <- {word:#010X}");
        Ok(session
            .driver
            .write_cycle(session.handle, address, word, ADDRESS_MODIFIER, DATA_WIDTH)?)
    }

    /// Typed read cycle
    /// # Errors
    /// Returns the driver error or a decoding error
    pub fn read_as<T>(&mut self, address: u32) -> Result<T>
    where
        T: RegisterWord,
    {
        T::from_word(self.read_cycle(address)?)
    }

    /// Typed write cycle
    /// # Errors
    /// Returns the driver error or an encoding error
    pub fn write_as<T>(&mut self, address: u32, value: &T) -> Result<()>
    where
        T: RegisterWord,
    {
        let word = value.to_word()?;
        self.write_cycle(address, word)
    }

    /// Which interrupt lines are asserted
    /// # Errors
    /// Returns the driver error
    pub fn irq_check(&mut self) -> Result<IrqMask> {
        let session = &mut *self.guard;
        Ok(session.driver.irq_check(session.handle)?)
    }

    /// Block in the driver until a line in `mask` is asserted
    /// # Errors
    /// Returns the driver error, including its timeout
    pub fn irq_wait(&mut self, mask: IrqMask, timeout: Duration) -> Result<()> {
        let session = &mut *self.guard;
        Ok(session.driver.irq_wait(session.handle, mask, timeout)?)
    }

    /// 8-bit interrupt acknowledge cycle on `level`
    /// # Errors
    /// Returns the driver error
    #[allow(clippy::cast_possible_truncation)]
    pub fn iack_cycle(&mut self, level: IrqLevel) -> Result<u8> {
        let session = &mut *self.guard;
        let vector = session
            .driver
            .iack_cycle(session.handle, level, DataWidth::D8)?;
        debug!(level = level.number(), vector, "IACK");
        Ok((vector & 0xFF) as u8)
    }
}

impl<'a, D: Driver> Drop for Gate<'a, D> {
    fn drop(&mut self) {
        // Runs before `guard` is dropped, so the tag is cleared while we still hold the lock
        self.holder.store(0, Ordering::Relaxed);
    }
}
