//! Flash controller driver for STM32F0
//!
//! Register-level access to the embedded flash controller, for the NVM layer
//! in `fader-storage` to drive. STM32F042 parts have 32KB of flash in 1KB
//! pages; the last two pages hold the parameter storage segments.
//!
//! ```text
//! 0x0800_0000  0x0800_2000                        0x0800_7800  0x0800_8000
//! ┌────────────┬──────────────────────────────────┬──────┬──────┐
//! │ bootloader │ user program                     │ seg A│ seg B│
//! └────────────┴──────────────────────────────────┴──────┴──────┘
//! ```

use embassy_stm32::pac::FLASH;
use embassy_stm32::peripherals;
use embassy_stm32::Peri;
use fader_hal::{FlashController, FlashStatus};

/// Start of the flash in the address space
pub const FLASH_BASE: u32 = 0x0800_0000;

/// Flash size for STM32F042x6
#[cfg(any(feature = "stm32f042f6", feature = "stm32f042k6"))]
pub const FLASH_SIZE: u32 = 32 * 1024;

#[cfg(not(any(feature = "stm32f042f6", feature = "stm32f042k6")))]
pub const FLASH_SIZE: u32 = 32 * 1024; // Default

/// Flash page size for STM32F0 series
pub const FLASH_PAGE_SIZE: u32 = 1024;

/// Bytes per storage segment
pub const SEGMENT_SIZE: u32 = FLASH_PAGE_SIZE;

/// Bytes covered by both storage segments
pub const STORAGE_SIZE: u32 = 2 * SEGMENT_SIZE;

/// Address of storage segment A; segment B follows immediately
pub const STORAGE_BASE: u32 = FLASH_BASE + FLASH_SIZE - STORAGE_SIZE;

/// Unlock key sequence for FLASH_KEYR
const KEY1: u32 = 0x4567_0123;
const KEY2: u32 = 0xCDEF_89AB;

/// The flash controller, owned for the lifetime of the firmware
pub struct Stm32f0Flash<'d> {
    _peri: Peri<'d, peripherals::FLASH>,
}

impl<'d> Stm32f0Flash<'d> {
    /// Take ownership of the flash controller
    ///
    /// Nothing else may program or erase flash while this exists.
    pub fn new(peri: Peri<'d, peripherals::FLASH>) -> Self {
        Self { _peri: peri }
    }
}

impl FlashController for Stm32f0Flash<'_> {
    const PAGE_SIZE: u32 = FLASH_PAGE_SIZE;

    fn is_locked(&self) -> bool {
        FLASH.cr().read().lock()
    }

    fn unlock(&mut self) {
        FLASH.keyr().write_value(KEY1);
        FLASH.keyr().write_value(KEY2);
    }

    fn lock(&mut self) {
        FLASH.cr().modify(|w| w.set_lock(true));
    }

    fn start_program(&mut self, address: u32, halfword: u16) {
        FLASH.cr().modify(|w| w.set_pg(true));
        // SAFETY: the NVM layer only passes aligned addresses inside the
        // storage region, and PG is set so the store starts a program cycle
        unsafe { core::ptr::write_volatile(address as *mut u16, halfword) };
    }

    fn start_page_erase(&mut self, address: u32) {
        FLASH.cr().modify(|w| w.set_per(true));
        FLASH.ar().write(|w| w.set_far(address));
        FLASH.cr().modify(|w| w.set_strt(true));
    }

    fn status(&self) -> FlashStatus {
        let sr = FLASH.sr().read();
        FlashStatus {
            busy: sr.bsy(),
            end_of_operation: sr.eop(),
            write_protect_error: sr.wrprt(),
            program_error: sr.pgerr(),
        }
    }

    fn clear_status(&mut self) {
        // Write-one-to-clear
        FLASH.sr().write(|w| {
            w.set_eop(true);
            w.set_wrprt(true);
            w.set_pgerr(true);
        });
    }

    fn finish(&mut self) {
        FLASH.cr().modify(|w| {
            w.set_pg(false);
            w.set_per(false);
        });
    }

    fn read(&self, address: u32, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            // SAFETY: flash is memory mapped and always readable
            *byte = unsafe { core::ptr::read_volatile((address as usize + i) as *const u8) };
        }
    }
}
