//! Typed parameter values
//!
//! Values are encoded with postcard into a fixed stack buffer, so any
//! `serde` type up to [`MAX_VALUE_SIZE`] encoded bytes can be stored.

use embedded_storage::nor_flash::NorFlash;
use fader_hal::NvmError;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::engine::Storage;
use crate::error::StorageError;

/// Largest encoded value accepted by [`Storage::store`]
pub const MAX_VALUE_SIZE: usize = 64;

impl<F> Storage<F>
where
    F: NorFlash<Error = NvmError>,
{
    /// Encode `value` and store it under `parameter`
    pub fn store<T: Serialize>(&mut self, parameter: u16, value: &T) -> Result<(), StorageError> {
        let mut buf = [0u8; MAX_VALUE_SIZE];
        let encoded = postcard::to_slice(value, &mut buf).map_err(|_| StorageError::Serialize)?;
        self.write(parameter, encoded)
    }

    /// Load and decode the value stored under `parameter`
    pub fn load<T: DeserializeOwned>(&mut self, parameter: u16) -> Result<T, StorageError> {
        let mut buf = [0u8; MAX_VALUE_SIZE];
        let outcome = self.read(parameter, &mut buf)?;
        if outcome.truncated {
            return Err(StorageError::Deserialize);
        }
        postcard::from_bytes(&buf[..outcome.len]).map_err(|_| StorageError::Deserialize)
    }
}
