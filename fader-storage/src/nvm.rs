//! NVM primitive layer
//!
//! Verified single-unit mutations of the storage region: one half-word
//! program or one page erase per call. Every mutation runs inside a critical
//! section with the controller unlocked for exactly the duration of the
//! operation, and the read-back must match what was requested.
//!
//! Callers address the region by offset from its base. The absolute address
//! handed to the controller is computed here and nowhere else.

use core::ops::{Deref, DerefMut};

use embedded_storage::nor_flash::{ErrorType, NorFlash, ReadNorFlash};
use fader_hal::flash::{ERASED_BYTE, WRITE_SIZE};
use fader_hal::{FlashController, FlashStatus, NvmError};

use crate::fmt::log_warn;

/// Maximum number of status polls before giving up on the controller
///
/// A half-word program takes tens of microseconds and a page erase a few
/// milliseconds; this bound is well above either at 48 MHz.
pub const POLL_LIMIT: u32 = 1_000_000;

/// Chunk size used when reading back an erased page
const VERIFY_CHUNK: usize = 32;

/// Unlocked controller, re-locked when dropped
///
/// Dropping the guard leaves program/erase mode and locks the control
/// register, so early returns cannot leave the controller writable.
struct ControllerGuard<'a, C: FlashController> {
    controller: &'a mut C,
}

impl<'a, C: FlashController> ControllerGuard<'a, C> {
    fn unlock(controller: &'a mut C) -> Self {
        if controller.is_locked() {
            controller.unlock();
        }
        Self { controller }
    }
}

impl<C: FlashController> Deref for ControllerGuard<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.controller
    }
}

impl<C: FlashController> DerefMut for ControllerGuard<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.controller
    }
}

impl<C: FlashController> Drop for ControllerGuard<'_, C> {
    fn drop(&mut self) {
        self.controller.finish();
        self.controller.lock();
    }
}

/// Busy-poll the status register until the controller is idle
fn wait_idle<C: FlashController>(controller: &C) -> Result<FlashStatus, NvmError> {
    for _ in 0..POLL_LIMIT {
        let status = controller.status();
        if !status.busy {
            return Ok(status);
        }
    }
    Err(NvmError::HardwareTimeout)
}

/// Flash region driven through a [`FlashController`]
///
/// `base` must be page aligned and `len` a multiple of the page size.
pub struct Nvm<C> {
    controller: C,
    base: u32,
    len: u32,
}

impl<C: FlashController> Nvm<C> {
    /// Create an NVM layer over `len` bytes of flash starting at `base`
    pub fn new(controller: C, base: u32, len: u32) -> Self {
        Self {
            controller,
            base,
            len,
        }
    }

    /// Size of the region in bytes
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether the region is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Absolute address of the region start
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Erase granularity in bytes
    pub fn page_size(&self) -> u32 {
        C::PAGE_SIZE
    }

    /// Borrow the controller
    pub fn controller(&self) -> &C {
        &self.controller
    }

    /// Mutably borrow the controller
    pub fn controller_mut(&mut self) -> &mut C {
        &mut self.controller
    }

    /// Give back the controller
    pub fn release(self) -> C {
        self.controller
    }

    fn check_range(&self, offset: u32, len: u32) -> Result<u32, NvmError> {
        let end = offset.checked_add(len).ok_or(NvmError::OutOfBounds)?;
        if end > self.len {
            return Err(NvmError::OutOfBounds);
        }
        Ok(self.base + offset)
    }

    /// Read `buf.len()` bytes starting at `offset`
    pub fn read_into(&self, offset: u32, buf: &mut [u8]) -> Result<(), NvmError> {
        let address = self.check_range(offset, buf.len() as u32)?;
        self.controller.read(address, buf);
        Ok(())
    }

    /// Program one half-word at `offset`
    ///
    /// The location must be erased, except that any programmed half-word
    /// may be overwritten with `0x0000`.
    pub fn write_halfword(&mut self, offset: u32, halfword: u16) -> Result<(), NvmError> {
        if offset % WRITE_SIZE != 0 {
            return Err(NvmError::Unaligned);
        }
        let address = self.check_range(offset, WRITE_SIZE)?;

        let result = critical_section::with(|_| {
            let mut guard = ControllerGuard::unlock(&mut self.controller);
            guard.start_program(address, halfword);
            let status = wait_idle(&*guard)?;
            guard.clear_status();

            if status.write_protect_error {
                return Err(NvmError::WriteProtect);
            }
            if status.program_error {
                return Err(NvmError::Program);
            }

            let mut readback = [0u8; 2];
            guard.read(address, &mut readback);
            if u16::from_le_bytes(readback) != halfword {
                return Err(NvmError::Verify);
            }
            Ok(())
        });

        if let Err(e) = result {
            log_warn!("flash program at {=u32:#x} failed: {}", address, e);
        }
        result
    }

    /// Erase the page containing `offset`
    pub fn erase_page(&mut self, offset: u32) -> Result<(), NvmError> {
        let page_offset = offset - offset % C::PAGE_SIZE;
        let address = self.check_range(page_offset, C::PAGE_SIZE)?;

        let result = critical_section::with(|_| {
            let mut guard = ControllerGuard::unlock(&mut self.controller);
            guard.start_page_erase(address);
            let status = wait_idle(&*guard)?;
            guard.clear_status();

            if status.write_protect_error {
                return Err(NvmError::ErasePageWriteProtect);
            }
            if status.program_error {
                return Err(NvmError::EraseProgram);
            }

            let mut chunk = [0u8; VERIFY_CHUNK];
            let mut checked = 0;
            while checked < C::PAGE_SIZE {
                let n = (C::PAGE_SIZE - checked).min(VERIFY_CHUNK as u32) as usize;
                guard.read(address + checked, &mut chunk[..n]);
                if chunk[..n].iter().any(|&b| b != ERASED_BYTE) {
                    return Err(NvmError::Verify);
                }
                checked += n as u32;
            }
            Ok(())
        });

        if let Err(e) = result {
            log_warn!("flash erase at {=u32:#x} failed: {}", address, e);
        }
        result
    }
}

impl<C: FlashController> ErrorType for Nvm<C> {
    type Error = NvmError;
}

impl<C: FlashController> ReadNorFlash for Nvm<C> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), NvmError> {
        self.read_into(offset, bytes)
    }

    fn capacity(&self) -> usize {
        self.len as usize
    }
}

impl<C: FlashController> NorFlash for Nvm<C> {
    const WRITE_SIZE: usize = WRITE_SIZE as usize;
    const ERASE_SIZE: usize = C::PAGE_SIZE as usize;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), NvmError> {
        if from % C::PAGE_SIZE != 0 || to % C::PAGE_SIZE != 0 || from > to {
            return Err(NvmError::Unaligned);
        }
        if to > self.len {
            return Err(NvmError::OutOfBounds);
        }
        let mut page = from;
        while page < to {
            self.erase_page(page)?;
            page += C::PAGE_SIZE;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), NvmError> {
        if offset % WRITE_SIZE != 0 || bytes.len() % WRITE_SIZE as usize != 0 {
            return Err(NvmError::Unaligned);
        }
        self.check_range(offset, bytes.len() as u32)?;
        for (i, pair) in bytes.chunks_exact(2).enumerate() {
            let halfword = u16::from_le_bytes([pair[0], pair[1]]);
            self.write_halfword(offset + (i as u32) * WRITE_SIZE, halfword)?;
        }
        Ok(())
    }
}
