//! [`Driver`] implementation over the vendor `libCAENVME` shared library

use crate::{
    check, AddressModifier, BoardType, DataWidth, Driver, Handle, IrqLevel, IrqMask, Result,
};
use std::{ffi::c_void, time::Duration};
use tracing::debug;

#[link(name = "CAENVME")]
extern "C" {
    fn CAENVME_Init(board: i32, link: i16, board_number: i16, handle: *mut i32) -> i32;
    fn CAENVME_End(handle: i32) -> i32;
    fn CAENVME_IRQEnable(handle: i32, mask: u32) -> i32;
    fn CAENVME_IRQCheck(handle: i32, mask: *mut u8) -> i32;
    fn CAENVME_IRQWait(handle: i32, mask: u32, timeout_ms: u32) -> i32;
    fn CAENVME_IACKCycle(handle: i32, level: i32, vector: *mut c_void, width: i32) -> i32;
    fn CAENVME_ReadCycle(
        handle: i32,
        address: u32,
        data: *mut c_void,
        modifier: i32,
        width: i32,
    ) -> i32;
    fn CAENVME_WriteCycle(
        handle: i32,
        address: u32,
        data: *mut c_void,
        modifier: i32,
        width: i32,
    ) -> i32;
}

/// The real bridge, driven through the vendor library
#[derive(Debug, Default)]
pub struct CaenVme;

impl CaenVme {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Driver for CaenVme {
    fn init(&mut self, board: BoardType, link: u16, board_number: u16) -> Result<Handle> {
        let mut handle = 0i32;
        // Safety: `handle` is valid rust memory for the duration of the call
        check(unsafe {
            CAENVME_Init(
                board as i32,
                i16::try_from(link).map_err(|_| crate::ErrorCode::InvalidParam)?,
                i16::try_from(board_number).map_err(|_| crate::ErrorCode::InvalidParam)?,
                &mut handle,
            )
        })?;
        debug!(handle, "CAENVME_Init");
        Ok(Handle(handle))
    }

    fn end(&mut self, handle: Handle) -> Result<()> {
        // Safety: plain value arguments
        check(unsafe { CAENVME_End(handle.0) })
    }

    fn irq_enable(&mut self, handle: Handle, mask: IrqMask) -> Result<()> {
        // Safety: plain value arguments
        check(unsafe { CAENVME_IRQEnable(handle.0, u32::from(mask.0)) })
    }

    fn irq_check(&mut self, handle: Handle) -> Result<IrqMask> {
        let mut mask = 0u8;
        // Safety: `mask` outlives the call
        check(unsafe { CAENVME_IRQCheck(handle.0, &mut mask) })?;
        Ok(IrqMask(mask))
    }

    fn irq_wait(&mut self, handle: Handle, mask: IrqMask, timeout: Duration) -> Result<()> {
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        // Safety: plain value arguments
        check(unsafe { CAENVME_IRQWait(handle.0, u32::from(mask.0), timeout_ms) })
    }

    fn iack_cycle(&mut self, handle: Handle, level: IrqLevel, width: DataWidth) -> Result<u32> {
        // Wide enough for any data width, the library writes only `width` bytes
        let mut vector = 0u32;
        // Safety: `vector` is a 4 byte buffer that outlives the call
        check(unsafe {
            CAENVME_IACKCycle(
                handle.0,
                i32::from(level.bit()),
                std::ptr::addr_of_mut!(vector).cast(),
                width as i32,
            )
        })?;
        Ok(vector & width.mask())
    }

    fn read_cycle(
        &mut self,
        handle: Handle,
        address: u32,
        modifier: AddressModifier,
        width: DataWidth,
    ) -> Result<u32> {
        let mut data = 0u32;
        // Safety: `data` is a 4 byte buffer that outlives the call
        check(unsafe {
            CAENVME_ReadCycle(
                handle.0,
                address,
                std::ptr::addr_of_mut!(data).cast(),
                modifier as i32,
                width as i32,
            )
        })?;
        Ok(data & width.mask())
    }

    fn write_cycle(
        &mut self,
        handle: Handle,
        address: u32,
        data: u32,
        modifier: AddressModifier,
        width: DataWidth,
    ) -> Result<()> {
        let mut data = data;
        // Safety: the library only reads from `data`
        check(unsafe {
            CAENVME_WriteCycle(
                handle.0,
                address,
                std::ptr::addr_of_mut!(data).cast(),
                modifier as i32,
                width as i32,
            )
        })
    }
}
