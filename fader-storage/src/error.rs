//! Storage error taxonomy
//!
//! Errors are plain enums so callers can match on them, and each maps to a
//! stable signed code for the configuration protocol: zero is success,
//! negative codes are fatal and positive codes are warnings.

pub use fader_hal::NvmError;

/// Warning code: caller buffer was smaller than the stored value
pub const WARN_INSUFFICIENT_BUFFER: i32 = 1000;

/// Success code
pub const CODE_OK: i32 = 0;

/// Errors from the storage engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// Neither segment carries the in-use magic
    NoStorage,
    /// Migration destination is already marked in use
    MigrateMagic,
    /// No live record for the parameter
    NotFound,
    /// The record walk left the segment or found an impossible header
    Corrupt,
    /// The value does not fit even after compaction
    TooLarge,
    /// Parameter id is one of the reserved values
    InvalidParameter,
    /// Typed value could not be encoded
    Serialize,
    /// Stored bytes could not be decoded as the requested type
    Deserialize,
    /// Segment geometry does not match the flash
    InvalidLayout,
    /// Flash primitive failed
    Nvm(NvmError),
}

impl StorageError {
    /// Signed error code reported to collaborators
    pub const fn code(self) -> i32 {
        match self {
            StorageError::NoStorage => -1001,
            StorageError::MigrateMagic => -1002,
            StorageError::NotFound => -1003,
            StorageError::Corrupt => -1004,
            StorageError::TooLarge => -1005,
            StorageError::InvalidParameter => -1006,
            StorageError::Serialize => -1007,
            StorageError::Deserialize => -1008,
            StorageError::InvalidLayout => -1009,
            StorageError::Nvm(e) => e.code(),
        }
    }

    /// Whether the error came from the flash hardware rather than the log structure
    pub const fn is_hardware(self) -> bool {
        matches!(self, StorageError::Nvm(_))
    }
}

impl From<NvmError> for StorageError {
    fn from(e: NvmError) -> Self {
        StorageError::Nvm(e)
    }
}
