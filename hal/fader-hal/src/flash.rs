//! Flash controller abstractions
//!
//! The flash controller of the target parts programs one half-word at a
//! time and erases whole pages. This module describes the controller at the
//! register level; policy (locking discipline, polling, verification) lives
//! in the NVM layer of `fader-storage`.

use embedded_storage::nor_flash::{NorFlashError, NorFlashErrorKind};

/// Program granularity in bytes
pub const WRITE_SIZE: u32 = 2;

/// Value of an erased half-word
pub const ERASED_HALFWORD: u16 = 0xFFFF;

/// Value of an erased byte
pub const ERASED_BYTE: u8 = 0xFF;

/// Snapshot of the flash status register
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashStatus {
    /// An operation is in progress
    pub busy: bool,
    /// The last operation completed successfully
    pub end_of_operation: bool,
    /// The last operation targeted a write-protected page
    pub write_protect_error: bool,
    /// The last program targeted a location that was not erased
    pub program_error: bool,
}

/// Register-level flash controller
///
/// Implementations perform exactly the register access each method names
/// and nothing else. They are driven by `fader_storage::nvm::Nvm`, which
/// wraps every mutation in a critical section and guarantees that
/// [`finish`](FlashController::finish) and [`lock`](FlashController::lock)
/// run on every exit path.
///
/// All addresses are absolute.
pub trait FlashController {
    /// Erase granularity in bytes
    const PAGE_SIZE: u32;

    /// Whether the control register is locked against mutation
    fn is_locked(&self) -> bool;

    /// Write the key sequence that unlocks the control register
    fn unlock(&mut self);

    /// Lock the control register
    fn lock(&mut self);

    /// Enter program mode and store `halfword` at `address`
    fn start_program(&mut self, address: u32, halfword: u16);

    /// Enter page-erase mode and start erasing the page containing `address`
    fn start_page_erase(&mut self, address: u32);

    /// Read the status register
    fn status(&self) -> FlashStatus;

    /// Clear the sticky end-of-operation and error flags
    fn clear_status(&mut self);

    /// Leave program/erase mode
    fn finish(&mut self);

    /// Read memory-mapped flash starting at `address`
    fn read(&self, address: u32, buf: &mut [u8]);
}

/// Errors from the NVM primitive layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NvmError {
    /// Program rejected: page is write protected
    WriteProtect,
    /// Program rejected: target was not erased
    Program,
    /// Read-back after program or erase did not match
    Verify,
    /// Erase rejected: page is write protected
    ErasePageWriteProtect,
    /// Erase failed
    EraseProgram,
    /// Controller never cleared its busy flag
    HardwareTimeout,
    /// Offset outside the storage region
    OutOfBounds,
    /// Offset not aligned to the program unit
    Unaligned,
}

impl NvmError {
    /// Signed error code reported to collaborators
    pub const fn code(self) -> i32 {
        match self {
            NvmError::WriteProtect => -2001,
            NvmError::Program => -2002,
            NvmError::Verify => -2003,
            NvmError::ErasePageWriteProtect => -2004,
            NvmError::EraseProgram => -2005,
            NvmError::HardwareTimeout => -2006,
            NvmError::OutOfBounds => -2007,
            NvmError::Unaligned => -2008,
        }
    }
}

impl NorFlashError for NvmError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            NvmError::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            NvmError::Unaligned => NorFlashErrorKind::NotAligned,
            _ => NorFlashErrorKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_negative_and_distinct() {
        let all = [
            NvmError::WriteProtect,
            NvmError::Program,
            NvmError::Verify,
            NvmError::ErasePageWriteProtect,
            NvmError::EraseProgram,
            NvmError::HardwareTimeout,
            NvmError::OutOfBounds,
            NvmError::Unaligned,
        ];
        for (i, a) in all.iter().enumerate() {
            assert!(a.code() < 0);
            for b in &all[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
        }
    }

    #[test]
    fn test_nor_flash_error_kind() {
        assert_eq!(NvmError::OutOfBounds.kind(), NorFlashErrorKind::OutOfBounds);
        assert_eq!(NvmError::Unaligned.kind(), NorFlashErrorKind::NotAligned);
        assert_eq!(NvmError::Verify.kind(), NorFlashErrorKind::Other);
    }
}
