//! Segment layout
//!
//! The storage region is split into two equal segments, A followed
//! immediately by B. Each starts with a 16-bit magic word: erased means the
//! segment is scratch space, [`SEGMENT_MAGIC_IN_USE`] means it holds the
//! current log. Records follow the magic directly.
//!
//! ```text
//! base                     base + segment_size       base + 2 * segment_size
//! ┌───────┬────────────────┬───────┬────────────────┐
//! │ magic │ records (A)    │ magic │ records (B)    │
//! └───────┴────────────────┴───────┴────────────────┘
//! ```

use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};
use fader_hal::NvmError;

use crate::error::StorageError;

/// Magic word of the segment holding the current log
pub const SEGMENT_MAGIC_IN_USE: u16 = 0x5AA5;

/// Size of the magic word in bytes
pub const MAGIC_SIZE: u32 = 2;

/// Segment identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SegmentId {
    /// First segment, at the start of the storage region
    A,
    /// Second segment, immediately after A
    B,
}

impl SegmentId {
    /// The segment a migration from `self` writes into
    pub const fn other(self) -> Self {
        match self {
            SegmentId::A => SegmentId::B,
            SegmentId::B => SegmentId::A,
        }
    }
}

/// Storage geometry, fixed at build time by the memory map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StorageLayout {
    /// Bytes per segment, a whole number of flash pages
    pub segment_size: u32,
}

impl StorageLayout {
    /// Two segments of `segment_size` bytes each
    pub const fn new(segment_size: u32) -> Self {
        Self { segment_size }
    }

    /// Bytes covered by both segments
    pub const fn total_size(&self) -> u32 {
        self.segment_size * 2
    }
}

/// One segment's bounds, as offsets from the storage base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Segment {
    /// Which segment this is
    pub id: SegmentId,
    /// Offset of the magic word
    pub start: u32,
    /// Offset one past the last byte
    pub end: u32,
}

impl Segment {
    /// Offset of the first record
    pub fn first_record(&self) -> u32 {
        self.start + MAGIC_SIZE
    }

    /// Segment size in bytes
    pub fn size(&self) -> u32 {
        self.end - self.start
    }
}

/// Both segments, built once from the layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentTable {
    a: Segment,
    b: Segment,
}

impl SegmentTable {
    /// Build the table, checking the layout against the flash geometry
    pub fn new(layout: StorageLayout, capacity: u32, page_size: u32) -> Result<Self, StorageError> {
        let size = layout.segment_size;
        if size == 0 || page_size == 0 || size % page_size != 0 {
            return Err(StorageError::InvalidLayout);
        }
        if layout.total_size() > capacity {
            return Err(StorageError::InvalidLayout);
        }
        Ok(Self {
            a: Segment {
                id: SegmentId::A,
                start: 0,
                end: size,
            },
            b: Segment {
                id: SegmentId::B,
                start: size,
                end: size * 2,
            },
        })
    }

    /// Bounds of segment `id`
    pub fn segment(&self, id: SegmentId) -> Segment {
        match id {
            SegmentId::A => self.a,
            SegmentId::B => self.b,
        }
    }

    /// Read the magic word of segment `id`
    pub fn read_magic<F>(&self, flash: &mut F, id: SegmentId) -> Result<u16, StorageError>
    where
        F: ReadNorFlash<Error = NvmError>,
    {
        let mut raw = [0u8; MAGIC_SIZE as usize];
        flash.read(self.segment(id).start, &mut raw)?;
        Ok(u16::from_le_bytes(raw))
    }

    /// Whether segment `id` carries the in-use magic
    pub fn is_active<F>(&self, flash: &mut F, id: SegmentId) -> Result<bool, StorageError>
    where
        F: ReadNorFlash<Error = NvmError>,
    {
        Ok(self.read_magic(flash, id)? == SEGMENT_MAGIC_IN_USE)
    }

    /// Locate the active segment, preferring A
    pub fn find_active<F>(&self, flash: &mut F) -> Result<Segment, StorageError>
    where
        F: ReadNorFlash<Error = NvmError>,
    {
        if self.is_active(flash, SegmentId::A)? {
            Ok(self.a)
        } else if self.is_active(flash, SegmentId::B)? {
            Ok(self.b)
        } else {
            Err(StorageError::NoStorage)
        }
    }

    /// Mark segment `id` as holding the current log
    pub fn mark_active<F>(&self, flash: &mut F, id: SegmentId) -> Result<(), StorageError>
    where
        F: NorFlash<Error = NvmError>,
    {
        flash.write(self.segment(id).start, &SEGMENT_MAGIC_IN_USE.to_le_bytes())?;
        Ok(())
    }

    /// Erase every page of segment `id`
    pub fn erase<F>(&self, flash: &mut F, id: SegmentId) -> Result<(), StorageError>
    where
        F: NorFlash<Error = NvmError>,
    {
        let segment = self.segment(id);
        flash.erase(segment.start, segment.end)?;
        Ok(())
    }
}
