//! Segment migration
//!
//! Copies the current record of every live parameter from the active
//! segment into the other one, then activates the destination and erases
//! the source. Tombstones and superseded duplicates are dropped, so the
//! destination is packed with no waste.
//!
//! Crash behavior:
//!
//! - Before the destination magic is written the source is still the only
//!   active segment; the half-filled destination is erased by the next
//!   migration or by [`Storage::recover`](crate::Storage::recover).
//! - After the magic is written and before the source erase completes both
//!   segments read as active and hold the same live set; recovery keeps A.

use embedded_storage::nor_flash::NorFlash;
use fader_hal::NvmError;

use crate::error::StorageError;
use crate::fmt::{log_debug, log_info, log_warn};
use crate::layout::{Segment, SegmentId, SegmentTable};
use crate::record::{
    commit_header, has_later_copy, is_blank, next_record_offset, Record, RecordCursor, HEADER_SIZE,
};

/// Bytes moved per read/program round while copying a payload
const COPY_CHUNK: usize = 32;

/// Result of a completed migration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Migration {
    /// Segment that was compacted and erased
    pub from: SegmentId,
    /// Segment that is now active
    pub to: SegmentId,
    /// Records copied
    pub copied: u16,
    /// Bytes of log space freed
    pub reclaimed: u32,
}

/// Migrate `source` into the other segment
pub(crate) fn migrate<F>(
    flash: &mut F,
    table: &SegmentTable,
    source: Segment,
) -> Result<Migration, StorageError>
where
    F: NorFlash<Error = NvmError>,
{
    let dest = table.segment(source.id.other());

    if table.is_active(flash, dest.id)? {
        log_warn!("migration target {} already in use", dest.id);
        return Err(StorageError::MigrateMagic);
    }
    if !is_blank(flash, dest.start, dest.size())? {
        log_warn!("migration target {} dirty, erasing", dest.id);
        table.erase(flash, dest.id)?;
    }

    log_debug!("migrating {} -> {}", source.id, dest.id);

    let mut cursor = RecordCursor::new(source.first_record(), source.end);
    let mut write_at = dest.first_record();
    let mut copied: u16 = 0;

    while let Some(record) = cursor.advance(flash)? {
        if !record.header.is_live() || has_later_copy(flash, &record, source.end)? {
            continue;
        }
        copy_record(flash, &record, write_at, dest.end)?;
        write_at = next_record_offset(write_at, record.header.size);
        copied += 1;
    }

    table.mark_active(flash, dest.id)?;
    table.erase(flash, source.id)?;

    let used_before = cursor.position() - source.start;
    let used_after = write_at - dest.start;
    let reclaimed = used_before.saturating_sub(used_after);

    log_info!(
        "migrated {} -> {}: {} records, {} bytes reclaimed",
        source.id,
        dest.id,
        copied,
        reclaimed
    );

    Ok(Migration {
        from: source.id,
        to: dest.id,
        copied,
        reclaimed,
    })
}

/// Copy `record` to offset `to`, payload first and header last
fn copy_record<F>(flash: &mut F, record: &Record, to: u32, end: u32) -> Result<(), StorageError>
where
    F: NorFlash<Error = NvmError>,
{
    let size = record.header.size as u32;
    if to + HEADER_SIZE + size > end {
        return Err(StorageError::Corrupt);
    }

    // An odd payload carries its erased pad byte along
    let padded = (size + 1) & !1;
    let mut chunk = [0u8; COPY_CHUNK];
    let mut done = 0;
    while done < padded {
        let n = (padded - done).min(COPY_CHUNK as u32) as usize;
        flash.read(record.data_offset() + done, &mut chunk[..n])?;
        flash.write(to + HEADER_SIZE + done, &chunk[..n])?;
        done += n as u32;
    }

    let copy = Record {
        offset: to,
        header: record.header,
    };
    commit_header(flash, &copy)
}
