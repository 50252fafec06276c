//! On-flash record format
//!
//! Each record is a 4-byte header followed by the payload, padded so the
//! next record starts on a 4-byte boundary:
//!
//! ```text
//! ┌───────────┬────────┬────────────────┬─────────┐
//! │ PARAMETER │ SIZE   │ DATA           │ PADDING │
//! │ u16 LE    │ u16 LE │ SIZE bytes     │ 0-3B    │
//! └───────────┴────────┴────────────────┴─────────┘
//! ```
//!
//! There is no next pointer; the walk advances by address arithmetic. A
//! parameter of 0xFFFF marks the end of the log and nothing after it is
//! trusted. A parameter of 0x0000 marks a superseded record.

use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};
use fader_hal::flash::{ERASED_BYTE, ERASED_HALFWORD};
use fader_hal::NvmError;

use crate::error::StorageError;

/// Header size in bytes
pub const HEADER_SIZE: u32 = 4;

/// Record alignment in bytes
pub const RECORD_ALIGN: u32 = 4;

/// Parameter value of an invalidated record
pub const PARAMETER_TOMBSTONE: u16 = 0x0000;

/// Parameter value of unwritten flash
pub const PARAMETER_ERASED: u16 = ERASED_HALFWORD;

/// Size value of unwritten flash, never a genuine size
pub const SIZE_ERASED: u16 = ERASED_HALFWORD;

/// Largest payload a record can describe
pub const MAX_PAYLOAD_SIZE: usize = SIZE_ERASED as usize - 1;

/// Byte offset of the parameter field within the header
const PARAMETER_FIELD: u32 = 0;

/// Byte offset of the size field within the header
const SIZE_FIELD: u32 = 2;

/// Whether `parameter` may be used for a live record
pub const fn is_valid_parameter(parameter: u16) -> bool {
    parameter != PARAMETER_TOMBSTONE && parameter != PARAMETER_ERASED
}

/// Offset of the record following one of `size` payload bytes at `offset`
pub const fn next_record_offset(offset: u32, size: u16) -> u32 {
    let end = offset + HEADER_SIZE + size as u32;
    (end + RECORD_ALIGN - 1) & !(RECORD_ALIGN - 1)
}

/// Record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RecordHeader {
    /// Parameter id, or one of the reserved values
    pub parameter: u16,
    /// Payload length in bytes
    pub size: u16,
}

impl RecordHeader {
    /// Decode from the raw little-endian header bytes
    pub fn from_bytes(bytes: [u8; HEADER_SIZE as usize]) -> Self {
        Self {
            parameter: u16::from_le_bytes([bytes[0], bytes[1]]),
            size: u16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }

    /// Encode as little-endian header bytes
    pub fn to_bytes(self) -> [u8; HEADER_SIZE as usize] {
        let p = self.parameter.to_le_bytes();
        let s = self.size.to_le_bytes();
        [p[0], p[1], s[0], s[1]]
    }

    /// End-of-log sentinel
    pub fn is_erased(&self) -> bool {
        self.parameter == PARAMETER_ERASED
    }

    /// Superseded record
    pub fn is_tombstone(&self) -> bool {
        self.parameter == PARAMETER_TOMBSTONE
    }

    /// Record holding a current or stale value for a real parameter
    pub fn is_live(&self) -> bool {
        is_valid_parameter(self.parameter)
    }
}

/// A record located in flash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Record {
    /// Offset of the header from the storage base
    pub offset: u32,
    /// Decoded header
    pub header: RecordHeader,
}

impl Record {
    /// Offset of the first payload byte
    pub fn data_offset(&self) -> u32 {
        self.offset + HEADER_SIZE
    }

    /// Offset of the following record
    pub fn next_offset(&self) -> u32 {
        next_record_offset(self.offset, self.header.size)
    }

    /// Bytes occupied including header and padding
    pub fn span(&self) -> u32 {
        self.next_offset() - self.offset
    }

    /// Offset of the parameter field, the one patched to invalidate
    pub fn parameter_field(&self) -> u32 {
        self.offset + PARAMETER_FIELD
    }

    /// Offset of the size field
    pub fn size_field(&self) -> u32 {
        self.offset + SIZE_FIELD
    }
}

/// Bounds-checked walk over the records of one segment
///
/// Every step is validated against the segment end before the next header
/// is read, so a corrupt size can never send the walk outside the segment.
#[derive(Debug, Clone)]
pub struct RecordCursor {
    position: u32,
    end: u32,
    done: bool,
}

impl RecordCursor {
    /// Walk from the first record at `start` up to (excluding) `end`
    pub fn new(start: u32, end: u32) -> Self {
        Self {
            position: start,
            end,
            done: false,
        }
    }

    /// Offset the walk stopped at, or will read next
    ///
    /// Once [`advance`](Self::advance) returns `None` this is the append
    /// point of the log.
    pub fn position(&self) -> u32 {
        self.position
    }

    /// Read the next record
    ///
    /// Returns `None` at the erased sentinel or when no header fits
    /// before the segment end.
    pub fn advance<F>(&mut self, flash: &mut F) -> Result<Option<Record>, StorageError>
    where
        F: ReadNorFlash<Error = NvmError>,
    {
        if self.done || self.position + HEADER_SIZE > self.end {
            self.done = true;
            return Ok(None);
        }

        let mut raw = [0u8; HEADER_SIZE as usize];
        flash.read(self.position, &mut raw)?;
        let header = RecordHeader::from_bytes(raw);

        if header.is_erased() {
            self.done = true;
            return Ok(None);
        }
        if header.size == SIZE_ERASED {
            self.done = true;
            return Err(StorageError::Corrupt);
        }

        let record = Record {
            offset: self.position,
            header,
        };
        if record.data_offset() + header.size as u32 > self.end {
            self.done = true;
            return Err(StorageError::Corrupt);
        }

        self.position = record.next_offset().min(self.end);
        Ok(Some(record))
    }
}

/// Program the header of `record`
///
/// The size goes first. The parameter is the last half-word of a record to
/// be programmed; until it lands the walk still sees the erased sentinel.
pub(crate) fn commit_header<F>(flash: &mut F, record: &Record) -> Result<(), StorageError>
where
    F: NorFlash<Error = NvmError>,
{
    flash.write(record.size_field(), &record.header.size.to_le_bytes())?;
    flash.write(
        record.parameter_field(),
        &record.header.parameter.to_le_bytes(),
    )?;
    Ok(())
}

/// Invalidate `record` in place by clearing its parameter field
pub(crate) fn tombstone<F>(flash: &mut F, record: &Record) -> Result<(), StorageError>
where
    F: NorFlash<Error = NvmError>,
{
    flash.write(record.parameter_field(), &PARAMETER_TOMBSTONE.to_le_bytes())?;
    Ok(())
}

/// Whether another record for the same parameter follows `record` before `end`
pub(crate) fn has_later_copy<F>(flash: &mut F, record: &Record, end: u32) -> Result<bool, StorageError>
where
    F: ReadNorFlash<Error = NvmError>,
{
    let mut cursor = RecordCursor::new(record.next_offset(), end);
    while let Some(next) = cursor.advance(flash)? {
        if next.header.parameter == record.header.parameter {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Whether `len` bytes starting at `offset` are all erased
pub fn is_blank<F>(flash: &mut F, offset: u32, len: u32) -> Result<bool, StorageError>
where
    F: ReadNorFlash<Error = NvmError>,
{
    let mut chunk = [0u8; 32];
    let mut checked = 0;
    while checked < len {
        let n = (len - checked).min(chunk.len() as u32) as usize;
        flash.read(offset + checked, &mut chunk[..n])?;
        if chunk[..n].iter().any(|&b| b != ERASED_BYTE) {
            return Ok(false);
        }
        checked += n as u32;
    }
    Ok(true)
}
