//! Bootloader entry records
//!
//! The bootloader decides at reset whether to jump into the user program
//! from two stored words:
//!
//! - [`BOOTLOADER_USER_VTOR`]: vector table of the installed program, zero
//!   while none is installed or one is being reprogrammed
//! - [`BOOTLOADER_MAGIC`]: [`BOOTLOADER_MAGIC_SKIP`] to boot into the
//!   program once even though the reset cause asks for the bootloader
//!
//! Every path that fails to update storage leaves the device in bootloader
//! mode rather than risk starting a half-written image.

use embedded_storage::nor_flash::NorFlash;
use fader_storage::error::NvmError;
use fader_storage::{Storage, StorageError};

use crate::params::{BOOTLOADER_MAGIC, BOOTLOADER_USER_VTOR};

/// Skip-magic value
pub const BOOTLOADER_MAGIC_SKIP: u32 = 0x3C65_A95A;

/// First address a user program may occupy
pub const USER_FLASH_START: u32 = 0x0800_2000;

/// Last address a user program may occupy
pub const USER_FLASH_END: u32 = 0x0800_77FF;

/// Bootloader errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootError {
    /// Reading or writing an entry record failed
    Storage(StorageError),
    /// Program address outside the user flash region
    BadAddress,
}

impl BootError {
    /// Signed status code reported to the host
    pub const fn code(self) -> i32 {
        match self {
            BootError::Storage(e) => e.code(),
            BootError::BadAddress => -3003,
        }
    }
}

impl From<StorageError> for BootError {
    fn from(e: StorageError) -> Self {
        BootError::Storage(e)
    }
}

/// Reset causes latched by the reset controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResetFlags {
    pub window_watchdog: bool,
    pub independent_watchdog: bool,
    pub software: bool,
    pub pin: bool,
    pub power_on: bool,
}

impl ResetFlags {
    /// Whether this reset should stay in the bootloader
    ///
    /// Watchdog and software resets always do; a pin reset does when it was
    /// not accompanied by a power-on reset.
    pub fn requests_bootloader(&self) -> bool {
        if self.window_watchdog || self.independent_watchdog || self.software {
            return true;
        }
        self.pin && !self.power_on
    }
}

/// The two entry records as read at reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootEntry {
    /// Vector table address of the user program, zero if none
    pub user_vtor: u32,
    /// Skip-magic word, zero if unset
    pub magic: u32,
}

impl BootEntry {
    /// Read both records; a missing record reads as zero
    pub fn load<F>(storage: &mut Storage<F>) -> Result<Self, BootError>
    where
        F: NorFlash<Error = NvmError>,
    {
        Ok(Self {
            user_vtor: read_word(storage, BOOTLOADER_USER_VTOR)?,
            magic: read_word(storage, BOOTLOADER_MAGIC)?,
        })
    }

    /// Whether to jump into the user program
    pub fn should_start_user_program(&self, reset_requests_bootloader: bool) -> bool {
        self.user_vtor != 0 && (!reset_requests_bootloader || self.magic == BOOTLOADER_MAGIC_SKIP)
    }

    /// Clear the skip magic so it only applies to one reset
    pub fn consume_skip_magic<F>(&mut self, storage: &mut Storage<F>) -> Result<(), BootError>
    where
        F: NorFlash<Error = NvmError>,
    {
        if self.magic != 0 {
            write_word(storage, BOOTLOADER_MAGIC, 0)?;
            self.magic = 0;
        }
        Ok(())
    }
}

/// Forget the installed program before it is overwritten
pub fn clear_user_program<F>(storage: &mut Storage<F>) -> Result<(), BootError>
where
    F: NorFlash<Error = NvmError>,
{
    if read_word(storage, BOOTLOADER_USER_VTOR)? != 0 {
        write_word(storage, BOOTLOADER_USER_VTOR, 0)?;
    }
    Ok(())
}

/// Record `address` as the vector table of a freshly written program
pub fn set_user_program<F>(storage: &mut Storage<F>, address: u32) -> Result<(), BootError>
where
    F: NorFlash<Error = NvmError>,
{
    if !(USER_FLASH_START..=USER_FLASH_END).contains(&address) {
        return Err(BootError::BadAddress);
    }
    write_word(storage, BOOTLOADER_USER_VTOR, address)?;
    Ok(())
}

/// Prepare for a reset straight into the user program
///
/// If the skip magic cannot be written the program address is cleared as
/// well, so the next reset stays in the bootloader.
pub fn arm_reset_into_user_program<F>(storage: &mut Storage<F>) -> Result<(), BootError>
where
    F: NorFlash<Error = NvmError>,
{
    if let Err(e) = write_word(storage, BOOTLOADER_MAGIC, BOOTLOADER_MAGIC_SKIP) {
        let _ = write_word(storage, BOOTLOADER_USER_VTOR, 0);
        return Err(e.into());
    }
    Ok(())
}

fn read_word<F>(storage: &mut Storage<F>, parameter: u16) -> Result<u32, StorageError>
where
    F: NorFlash<Error = NvmError>,
{
    let mut buf = [0u8; 4];
    match storage.read(parameter, &mut buf) {
        Ok(_) => Ok(u32::from_le_bytes(buf)),
        Err(StorageError::NotFound) => Ok(0),
        Err(e) => Err(e),
    }
}

fn write_word<F>(storage: &mut Storage<F>, parameter: u16, value: u32) -> Result<(), StorageError>
where
    F: NorFlash<Error = NvmError>,
{
    storage.write(parameter, &value.to_le_bytes())
}
