//! Storage engine
//!
//! Lookup, append and invalidate over the active segment, with compaction
//! when the log is full and a mount-time recovery pass.
//!
//! A write programs the new record at the tail (payload, size, then
//! parameter) before tombstoning the old one. A crash in between leaves two
//! live copies; lookups return the most recent, and the next write or
//! migration removes the stale one.

use embedded_storage::nor_flash::NorFlash;
use fader_hal::NvmError;

use crate::compact::{self, Migration};
use crate::error::{StorageError, CODE_OK, WARN_INSUFFICIENT_BUFFER};
use crate::fmt::{log_debug, log_info, log_warn};
use crate::layout::{Segment, SegmentId, SegmentTable, StorageLayout};
use crate::record::{
    commit_header, has_later_copy, is_blank, is_valid_parameter, next_record_offset, tombstone,
    Record, RecordCursor, RecordHeader, MAX_PAYLOAD_SIZE,
};

/// Result of a successful [`Storage::read`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReadOutcome {
    /// Bytes copied into the caller's buffer
    pub len: usize,
    /// The stored value was longer than the buffer; `len` bytes are a prefix
    pub truncated: bool,
}

impl ReadOutcome {
    /// Protocol status code: success or the insufficient-buffer warning
    pub const fn code(&self) -> i32 {
        if self.truncated {
            WARN_INSUFFICIENT_BUFFER
        } else {
            CODE_OK
        }
    }
}

/// Occupancy of the active segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SegmentStats {
    /// Segment holding the log
    pub active: SegmentId,
    /// Bytes from the segment start to the tail, magic included
    pub used: u32,
    /// Records with a live parameter id
    pub live: u16,
    /// Records invalidated by a later write
    pub tombstoned: u16,
    /// Bytes from the tail to the segment end
    pub free: u32,
}

/// What [`Storage::recover`] found and repaired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Recovery {
    /// One active segment and a blank spare
    Clean,
    /// Both segments were marked in use; B was erased
    DuplicateActive,
    /// The spare held leftovers of an aborted migration and was erased
    DirtyInactive,
    /// Neither segment is in use; the device needs [`Storage::format`]
    Unprovisioned,
}

/// Result of walking the active segment for one parameter
struct Scan {
    segment: Segment,
    latest: Option<Record>,
    tail: u32,
}

/// Log-structured parameter store over a pair of flash segments
///
/// Offsets handed to `F` are relative to the start of the storage region.
/// The engine is not reentrant; callers sharing it between contexts must
/// serialize access.
pub struct Storage<F> {
    flash: F,
    table: SegmentTable,
}

impl<F> Storage<F>
where
    F: NorFlash<Error = NvmError>,
{
    /// Create the engine over `flash`, which must cover both segments
    pub fn new(flash: F, layout: StorageLayout) -> Result<Self, StorageError> {
        let table = SegmentTable::new(layout, flash.capacity() as u32, F::ERASE_SIZE as u32)?;
        Ok(Self { flash, table })
    }

    /// Underlying flash
    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// Underlying flash, mutable
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Consume the engine and return the flash
    pub fn release(self) -> F {
        self.flash
    }

    /// Segment table built from the layout
    pub fn segments(&self) -> &SegmentTable {
        &self.table
    }

    /// Bounds of the active segment
    pub fn find_start_end(&mut self) -> Result<Segment, StorageError> {
        self.table.find_active(&mut self.flash)
    }

    /// Copy the current value of `parameter` into `buf`
    ///
    /// A buffer shorter than the value receives a prefix and the outcome is
    /// flagged as truncated.
    pub fn read(&mut self, parameter: u16, buf: &mut [u8]) -> Result<ReadOutcome, StorageError> {
        if !is_valid_parameter(parameter) {
            return Err(StorageError::InvalidParameter);
        }
        let segment = self.find_start_end()?;
        let scan = self.scan(segment, parameter)?;
        let record = scan.latest.ok_or(StorageError::NotFound)?;

        let size = record.header.size as usize;
        let len = size.min(buf.len());
        self.flash.read(record.data_offset(), &mut buf[..len])?;

        Ok(ReadOutcome {
            len,
            truncated: len < size,
        })
    }

    /// Whether `parameter` has a live value
    pub fn contains(&mut self, parameter: u16) -> Result<bool, StorageError> {
        if !is_valid_parameter(parameter) {
            return Ok(false);
        }
        let segment = self.find_start_end()?;
        Ok(self.scan(segment, parameter)?.latest.is_some())
    }

    /// Store `data` as the new value of `parameter`
    ///
    /// Runs one compaction if the record does not fit at the tail, then
    /// fails with [`StorageError::TooLarge`] if it still does not. A value
    /// too large for an empty segment fails without compacting.
    pub fn write(&mut self, parameter: u16, data: &[u8]) -> Result<(), StorageError> {
        if !is_valid_parameter(parameter) {
            return Err(StorageError::InvalidParameter);
        }
        if data.len() > MAX_PAYLOAD_SIZE {
            return Err(StorageError::TooLarge);
        }
        let size = data.len() as u16;

        let scan = match self.reserve(parameter, size)? {
            Some(scan) => scan,
            None => {
                let segment = self.find_start_end()?;
                if next_record_offset(segment.first_record(), size) > segment.end {
                    return Err(StorageError::TooLarge);
                }
                self.compact()?;
                self.reserve(parameter, size)?
                    .ok_or(StorageError::TooLarge)?
            }
        };

        let record = Record {
            offset: scan.tail,
            header: RecordHeader { parameter, size },
        };
        self.program_payload(&record, data)?;
        commit_header(&mut self.flash, &record)?;
        log_debug!(
            "stored {=u16:#x} ({} bytes) at {=u32:#x}",
            parameter,
            size,
            record.offset
        );

        if scan.latest.is_some() {
            self.invalidate_before(scan.segment, parameter, record.offset)?;
        }
        Ok(())
    }

    /// Invalidate every live record of `parameter`
    pub fn remove(&mut self, parameter: u16) -> Result<(), StorageError> {
        if !is_valid_parameter(parameter) {
            return Err(StorageError::InvalidParameter);
        }
        let segment = self.find_start_end()?;
        let scan = self.scan(segment, parameter)?;
        if scan.latest.is_none() {
            return Err(StorageError::NotFound);
        }
        self.invalidate_before(segment, parameter, scan.tail)
    }

    /// Walk the active segment and count its records
    pub fn stats(&mut self) -> Result<SegmentStats, StorageError> {
        let segment = self.find_start_end()?;
        let mut cursor = RecordCursor::new(segment.first_record(), segment.end);
        let mut live = 0;
        let mut tombstoned = 0;
        while let Some(record) = cursor.advance(&mut self.flash)? {
            if record.header.is_tombstone() {
                tombstoned += 1;
            } else {
                live += 1;
            }
        }
        Ok(SegmentStats {
            active: segment.id,
            used: cursor.position() - segment.start,
            live,
            tombstoned,
            free: segment.end - cursor.position(),
        })
    }

    /// Call `visit(parameter, size)` for the current record of every parameter
    pub fn for_each_live<V>(&mut self, mut visit: V) -> Result<(), StorageError>
    where
        V: FnMut(u16, u16),
    {
        let segment = self.find_start_end()?;
        let mut cursor = RecordCursor::new(segment.first_record(), segment.end);
        while let Some(record) = cursor.advance(&mut self.flash)? {
            if record.header.is_live() && !has_later_copy(&mut self.flash, &record, segment.end)? {
                visit(record.header.parameter, record.header.size);
            }
        }
        Ok(())
    }

    /// Erase both segments and start an empty log in A
    pub fn format(&mut self) -> Result<(), StorageError> {
        self.table.erase(&mut self.flash, SegmentId::A)?;
        self.table.erase(&mut self.flash, SegmentId::B)?;
        self.table.mark_active(&mut self.flash, SegmentId::A)?;
        log_info!("storage formatted");
        Ok(())
    }

    /// Repair the leftovers of an interrupted migration
    ///
    /// Run once at boot, before the first read or write.
    pub fn recover(&mut self) -> Result<Recovery, StorageError> {
        let a = self.table.is_active(&mut self.flash, SegmentId::A)?;
        let b = self.table.is_active(&mut self.flash, SegmentId::B)?;

        let spare = match (a, b) {
            (false, false) => {
                log_warn!("no active storage segment");
                return Ok(Recovery::Unprovisioned);
            }
            (true, true) => {
                log_warn!("both segments in use, erasing B");
                self.table.erase(&mut self.flash, SegmentId::B)?;
                return Ok(Recovery::DuplicateActive);
            }
            (true, false) => SegmentId::B,
            (false, true) => SegmentId::A,
        };

        let segment = self.table.segment(spare);
        if is_blank(&mut self.flash, segment.start, segment.size())? {
            return Ok(Recovery::Clean);
        }
        log_warn!("spare segment {} dirty, erasing", spare);
        self.table.erase(&mut self.flash, spare)?;
        Ok(Recovery::DirtyInactive)
    }

    /// Migrate the live records into the other segment
    pub fn compact(&mut self) -> Result<Migration, StorageError> {
        let source = self.find_start_end()?;
        compact::migrate(&mut self.flash, &self.table, source)
    }

    /// Find the latest record of `parameter` and the tail of the log
    fn scan(&mut self, segment: Segment, parameter: u16) -> Result<Scan, StorageError> {
        let mut cursor = RecordCursor::new(segment.first_record(), segment.end);
        let mut latest = None;
        while let Some(record) = cursor.advance(&mut self.flash)? {
            if record.header.parameter == parameter {
                latest = Some(record);
            }
        }
        Ok(Scan {
            segment,
            latest,
            tail: cursor.position(),
        })
    }

    /// Scan for an append of `size` bytes; `None` when the tail cannot take it
    fn reserve(&mut self, parameter: u16, size: u16) -> Result<Option<Scan>, StorageError> {
        let segment = self.find_start_end()?;
        let scan = self.scan(segment, parameter)?;

        let next = next_record_offset(scan.tail, size);
        if next > segment.end {
            return Ok(None);
        }
        // An append interrupted before its parameter landed leaves
        // programmed bytes past the sentinel. Everything up to the segment
        // end must be erased, or a short append would leave stale payload
        // where the walk expects the next header.
        if !is_blank(&mut self.flash, scan.tail, segment.end - scan.tail)? {
            log_warn!("dirty tail at {=u32:#x}", scan.tail);
            return Ok(None);
        }
        Ok(Some(scan))
    }

    fn program_payload(&mut self, record: &Record, data: &[u8]) -> Result<(), StorageError> {
        let even = data.len() & !1;
        self.flash.write(record.data_offset(), &data[..even])?;
        if let Some(&last) = data.get(even) {
            self.flash
                .write(record.data_offset() + even as u32, &[last, 0xFF])?;
        }
        Ok(())
    }

    /// Tombstone every live record of `parameter` that starts before `limit`
    fn invalidate_before(
        &mut self,
        segment: Segment,
        parameter: u16,
        limit: u32,
    ) -> Result<(), StorageError> {
        let mut cursor = RecordCursor::new(segment.first_record(), limit);
        while let Some(record) = cursor.advance(&mut self.flash)? {
            if record.header.parameter == parameter {
                tombstone(&mut self.flash, &record)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nvm::Nvm;
    use crate::sim::SimFlash;
    use proptest::prelude::*;

    type TestStorage = Storage<Nvm<SimFlash<2048>>>;
    type SmallStorage = Storage<Nvm<SimFlash<256, 128>>>;

    fn storage() -> TestStorage {
        let nvm = Nvm::new(SimFlash::new(0), 0, 2048);
        let mut storage = Storage::new(nvm, StorageLayout::new(1024)).unwrap();
        storage.format().unwrap();
        storage
    }

    fn small_storage() -> SmallStorage {
        let nvm = Nvm::new(SimFlash::new(0), 0, 256);
        let mut storage = Storage::new(nvm, StorageLayout::new(128)).unwrap();
        storage.format().unwrap();
        storage
    }

    fn read_vec<F: NorFlash<Error = NvmError>>(storage: &mut Storage<F>, parameter: u16) -> Vec<u8> {
        let mut buf = [0u8; 256];
        let outcome = storage.read(parameter, &mut buf).unwrap();
        assert!(!outcome.truncated);
        buf[..outcome.len].to_vec()
    }

    /// Live (non-tombstoned) records of `parameter` in the active segment
    fn live_copies<F: NorFlash<Error = NvmError>>(storage: &mut Storage<F>, parameter: u16) -> usize {
        let segment = storage.find_start_end().unwrap();
        let mut cursor = RecordCursor::new(segment.first_record(), segment.end);
        let mut count = 0;
        while let Some(record) = cursor.advance(storage.flash_mut()).unwrap() {
            if record.header.parameter == parameter {
                count += 1;
            }
        }
        count
    }

    #[test]
    fn test_write_then_read() {
        let mut storage = storage();
        storage.write(0x2001, &[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(read_vec(&mut storage, 0x2001), vec![1, 2, 3, 4, 5]);
        assert!(storage.contains(0x2001).unwrap());
        assert!(!storage.contains(0x2002).unwrap());
    }

    #[test]
    fn test_empty_value() {
        let mut storage = storage();
        storage.write(0x2001, &[]).unwrap();
        assert_eq!(read_vec(&mut storage, 0x2001), Vec::<u8>::new());
    }

    #[test]
    fn test_missing_parameter() {
        let mut storage = storage();
        let mut buf = [0u8; 4];
        assert_eq!(storage.read(0x2001, &mut buf), Err(StorageError::NotFound));
    }

    #[test]
    fn test_reserved_parameters_rejected() {
        let mut storage = storage();
        assert_eq!(
            storage.write(0x0000, &[1]),
            Err(StorageError::InvalidParameter)
        );
        assert_eq!(
            storage.write(0xFFFF, &[1]),
            Err(StorageError::InvalidParameter)
        );
        let mut buf = [0u8; 4];
        assert_eq!(
            storage.read(0xFFFF, &mut buf),
            Err(StorageError::InvalidParameter)
        );
    }

    #[test]
    fn test_short_buffer_truncates() {
        let mut storage = storage();
        storage.write(0x2001, &[1, 2, 3, 4, 5, 6]).unwrap();

        let mut buf = [0u8; 4];
        let outcome = storage.read(0x2001, &mut buf).unwrap();
        assert_eq!(outcome.len, 4);
        assert!(outcome.truncated);
        assert_eq!(outcome.code(), WARN_INSUFFICIENT_BUFFER);
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn test_supersession_tombstones_old_record() {
        let mut storage = storage();
        storage.write(0x2001, &[0xAA; 4]).unwrap();
        storage.write(0x2002, &[0x11]).unwrap();
        storage.write(0x2001, &[0xBB; 4]).unwrap();

        assert_eq!(read_vec(&mut storage, 0x2001), vec![0xBB; 4]);
        assert_eq!(live_copies(&mut storage, 0x2001), 1);

        let stats = storage.stats().unwrap();
        assert_eq!(stats.live, 2);
        assert_eq!(stats.tombstoned, 1);
        assert_eq!(stats.used + stats.free, 1024);
    }

    #[test]
    fn test_odd_payload_padding_stays_erased() {
        let mut storage = storage();
        storage.write(0x2001, &[1, 2, 3]).unwrap();
        // Record at 2: header 2..6, data 6..9, pad 9..12
        let memory = storage.flash().controller().memory();
        assert_eq!(&memory[2..10], &[0x01, 0x20, 0x03, 0x00, 1, 2, 3, 0xFF]);
        assert_eq!(&memory[10..12], &[0xFF, 0xFF]);
    }

    #[test]
    fn test_remove() {
        let mut storage = storage();
        storage.write(0x4001, &[7]).unwrap();
        storage.remove(0x4001).unwrap();
        assert!(!storage.contains(0x4001).unwrap());
        assert_eq!(storage.remove(0x4001), Err(StorageError::NotFound));
    }

    #[test]
    fn test_garbage_after_sentinel_ignored() {
        let mut storage = storage();
        storage.write(0x2001, &[1, 2]).unwrap();

        // Tail is at 8; plant a plausible record one header later
        let memory = storage.flash_mut().controller_mut().memory_mut();
        memory[12..18].copy_from_slice(&[0x42, 0x00, 0x02, 0x00, 0xCA, 0xFE]);

        let mut buf = [0u8; 4];
        assert_eq!(storage.read(0x0042, &mut buf), Err(StorageError::NotFound));
        assert_eq!(storage.stats().unwrap().live, 1);

        // The dirty tail forces the next append into a fresh segment
        storage.write(0x0042, &[3, 4]).unwrap();
        assert_eq!(storage.stats().unwrap().active, SegmentId::B);
        assert_eq!(read_vec(&mut storage, 0x0042), vec![3, 4]);
        assert_eq!(read_vec(&mut storage, 0x2001), vec![1, 2]);
    }

    #[test]
    fn test_unprovisioned_device() {
        let nvm = Nvm::new(SimFlash::<2048>::new(0), 0, 2048);
        let mut storage = Storage::new(nvm, StorageLayout::new(1024)).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(storage.read(0x2001, &mut buf), Err(StorageError::NoStorage));
        assert_eq!(storage.write(0x2001, &[1]), Err(StorageError::NoStorage));
        assert_eq!(storage.stats(), Err(StorageError::NoStorage));
        assert_eq!(storage.recover().unwrap(), Recovery::Unprovisioned);
        assert_eq!(storage.flash().controller().mutations(), 0);
    }

    #[test]
    fn test_layout_must_fit_flash() {
        let nvm = Nvm::new(SimFlash::<2048>::new(0), 0, 2048);
        assert!(matches!(
            Storage::new(nvm, StorageLayout::new(2048)),
            Err(StorageError::InvalidLayout)
        ));
    }

    #[test]
    fn test_ten_records_fit_eleventh_compacts() {
        let mut storage = small_storage();
        let after_format = storage.flash().controller().erase_count(0);

        for i in 0..10u8 {
            storage.write(0x2001, &[i; 8]).unwrap();
            assert_eq!(storage.stats().unwrap().active, SegmentId::A);
        }
        let stats = storage.stats().unwrap();
        assert_eq!(stats.live, 1);
        assert_eq!(stats.tombstoned, 9);
        assert_eq!(storage.flash().controller().erase_count(0), after_format);

        storage.write(0x2001, &[10; 8]).unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.active, SegmentId::B);
        assert_eq!(stats.live, 1);
        assert_eq!(stats.tombstoned, 1);
        assert_eq!(storage.flash().controller().erase_count(0), after_format + 1);
        assert_eq!(read_vec(&mut storage, 0x2001), vec![10; 8]);
        assert_eq!(live_copies(&mut storage, 0x2001), 1);
    }

    #[test]
    fn test_compaction_preserves_latest_values() {
        let mut storage = storage();
        let mut expected = [[0u8; 12]; 4];
        let mut compacted = false;

        for round in 0..120u16 {
            let id = round % 4;
            let value = [round as u8; 12];
            storage.write(0x2001 + id, &value).unwrap();
            expected[id as usize] = value;
            compacted |= storage.stats().unwrap().active == SegmentId::B;
        }
        assert!(compacted);

        for id in 0..4u16 {
            assert_eq!(read_vec(&mut storage, 0x2001 + id), expected[id as usize].to_vec());
            assert_eq!(live_copies(&mut storage, 0x2001 + id), 1);
        }
    }

    #[test]
    fn test_compaction_reclaims_space() {
        let mut storage = storage();
        for round in 0..10u8 {
            for id in 0..3u16 {
                storage.write(0x4001 + id, &[round; 8]).unwrap();
            }
        }
        let migration = storage.compact().unwrap();
        assert_eq!(migration.from, SegmentId::A);
        assert_eq!(migration.copied, 3);

        let stats = storage.stats().unwrap();
        assert_eq!(stats.tombstoned, 0);
        assert_eq!(stats.live, 3);
        // Magic, alignment pad and three 12-byte records, as in a fresh segment
        assert_eq!(stats.used, 2 + 2 + 3 * 12);
    }

    #[test]
    fn test_value_too_large() {
        let mut storage = storage();
        storage.write(0x2002, &[1]).unwrap();
        let mutations = storage.flash().controller().mutations();
        assert_eq!(
            storage.write(0x2001, &[0u8; 1020]),
            Err(StorageError::TooLarge)
        );
        // Rejected without migrating
        assert_eq!(storage.flash().controller().mutations(), mutations);
        assert_eq!(storage.stats().unwrap().active, SegmentId::A);
        assert_eq!(
            storage.write(0x2001, &vec![0u8; MAX_PAYLOAD_SIZE + 1]),
            Err(StorageError::TooLarge)
        );
        // The largest value that fits after the magic
        storage.remove(0x2002).unwrap();
        storage.write(0x2001, &[0x5A; 1018]).unwrap();
        assert_eq!(read_vec_large(&mut storage, 0x2001).len(), 1018);
    }

    fn read_vec_large(storage: &mut TestStorage, parameter: u16) -> Vec<u8> {
        let mut buf = [0u8; 1024];
        let outcome = storage.read(parameter, &mut buf).unwrap();
        buf[..outcome.len].to_vec()
    }

    #[test]
    fn test_crash_before_tombstone_newest_wins() {
        let mut storage = storage();
        storage.write(0x2001, &[0xAA; 4]).unwrap();

        // Payload, size and parameter land; the tombstone does not
        storage.flash_mut().controller_mut().power_fail_after(4);
        assert!(storage.write(0x2001, &[0xBB; 4]).is_err());
        storage.flash_mut().controller_mut().restore_power();

        assert_eq!(live_copies(&mut storage, 0x2001), 2);
        assert_eq!(read_vec(&mut storage, 0x2001), vec![0xBB; 4]);

        let mut visited = Vec::new();
        storage.for_each_live(|p, size| visited.push((p, size))).unwrap();
        assert_eq!(visited, vec![(0x2001, 4)]);

        // The next write clears both older copies
        storage.write(0x2001, &[0xCC; 4]).unwrap();
        assert_eq!(live_copies(&mut storage, 0x2001), 1);
        assert_eq!(read_vec(&mut storage, 0x2001), vec![0xCC; 4]);
    }

    #[test]
    fn test_crash_mid_append_keeps_old_value() {
        let mut storage = storage();
        storage.write(0x2001, &[0xAA; 4]).unwrap();

        // Payload lands, header does not
        storage.flash_mut().controller_mut().power_fail_after(2);
        assert!(storage.write(0x2001, &[0xBB; 4]).is_err());
        storage.flash_mut().controller_mut().restore_power();

        assert_eq!(read_vec(&mut storage, 0x2001), vec![0xAA; 4]);

        storage.write(0x2001, &[0xCC; 4]).unwrap();
        assert_eq!(read_vec(&mut storage, 0x2001), vec![0xCC; 4]);
        assert_eq!(storage.stats().unwrap().active, SegmentId::B);
    }

    #[test]
    fn test_short_append_after_crashed_append() {
        let mut storage = storage();
        storage.write(0x2001, &[1, 2]).unwrap();

        // Only the first half of a payload shaped like a header lands
        storage.flash_mut().controller_mut().power_fail_after(2);
        assert!(storage
            .write(0x3000, &[0x42, 0x00, 0x02, 0x00, 0xCA, 0xFE, 0x00, 0x00])
            .is_err());
        storage.flash_mut().controller_mut().restore_power();

        // An empty value would fit in the erased header slot at the tail
        storage.write(0x2002, &[]).unwrap();
        assert_eq!(storage.stats().unwrap().active, SegmentId::B);

        let mut buf = [0u8; 4];
        assert_eq!(storage.read(0x0042, &mut buf), Err(StorageError::NotFound));
        assert_eq!(storage.read(0x3000, &mut buf), Err(StorageError::NotFound));
        assert_eq!(storage.stats().unwrap().live, 2);
        assert_eq!(read_vec(&mut storage, 0x2001), vec![1, 2]);
        assert_eq!(read_vec(&mut storage, 0x2002), Vec::<u8>::new());
    }

    /// Fill A so the next write needs a migration
    fn fill_segment(storage: &mut TestStorage) {
        let mut round = 0u8;
        loop {
            let stats = storage.stats().unwrap();
            if stats.free < 12 {
                break;
            }
            storage.write(0x2001 + (round % 3) as u16, &[round; 8]).unwrap();
            round = round.wrapping_add(1);
        }
    }

    #[test]
    fn test_aborted_migration_leaves_source_active() {
        let mut storage = storage();
        fill_segment(&mut storage);
        let before: Vec<Vec<u8>> = (0..3).map(|i| read_vec(&mut storage, 0x2001 + i)).collect();

        // Fails partway through copying into B
        storage.flash_mut().controller_mut().power_fail_after(3);
        assert!(storage.write(0x2005, &[1; 8]).is_err());
        storage.flash_mut().controller_mut().restore_power();

        let active = storage.find_start_end().unwrap();
        assert_eq!(active.id, SegmentId::A);
        for i in 0..3 {
            assert_eq!(read_vec(&mut storage, 0x2001 + i), before[i as usize]);
        }

        assert_eq!(storage.recover().unwrap(), Recovery::DirtyInactive);
        let b = storage.segments().segment(SegmentId::B);
        assert!(is_blank(storage.flash_mut(), b.start, b.size()).unwrap());
        assert_eq!(storage.recover().unwrap(), Recovery::Clean);
    }

    #[test]
    fn test_retry_after_aborted_migration() {
        let mut storage = storage();
        fill_segment(&mut storage);

        storage.flash_mut().controller_mut().power_fail_after(3);
        assert!(storage.write(0x2005, &[1; 8]).is_err());
        storage.flash_mut().controller_mut().restore_power();

        // No recovery pass: the migration erases the dirty target itself
        storage.write(0x2005, &[2; 8]).unwrap();
        assert_eq!(storage.stats().unwrap().active, SegmentId::B);
        assert_eq!(read_vec(&mut storage, 0x2005), vec![2; 8]);
    }

    #[test]
    fn test_recover_both_active() {
        let mut storage = storage();
        storage.write(0x2001, &[1, 2]).unwrap();
        storage.compact().unwrap();

        // Crash after B's magic, before A's erase: A still a full copy
        let table = *storage.segments();
        table.erase(storage.flash_mut(), SegmentId::A).unwrap();
        table.mark_active(storage.flash_mut(), SegmentId::A).unwrap();
        let a = table.segment(SegmentId::A);
        storage.flash_mut().write(a.first_record() + 4, &[1, 2]).unwrap();
        storage.flash_mut().write(a.first_record() + 2, &2u16.to_le_bytes()).unwrap();
        storage.flash_mut().write(a.first_record(), &0x2001u16.to_le_bytes()).unwrap();

        assert_eq!(storage.recover().unwrap(), Recovery::DuplicateActive);
        assert!(!table.is_active(storage.flash_mut(), SegmentId::B).unwrap());
        assert_eq!(storage.find_start_end().unwrap().id, SegmentId::A);
        assert_eq!(read_vec(&mut storage, 0x2001), vec![1, 2]);
    }

    #[test]
    fn test_compact_refuses_active_destination() {
        let mut storage = storage();
        let table = *storage.segments();
        table.mark_active(storage.flash_mut(), SegmentId::B).unwrap();
        assert_eq!(storage.compact(), Err(StorageError::MigrateMagic));
    }

    #[test]
    fn test_segments_alternate() {
        let mut storage = small_storage();
        let mut seen_b = false;
        let mut back_to_a = false;
        for i in 0..40u8 {
            storage.write(0x2001, &[i; 8]).unwrap();
            let active = storage.stats().unwrap().active;
            seen_b |= active == SegmentId::B;
            back_to_a |= seen_b && active == SegmentId::A;
        }
        assert!(back_to_a);
        assert!(storage.flash().controller().erase_count(1) >= 2);
    }

    #[test]
    fn test_hardware_error_propagates() {
        let mut storage = storage();
        storage.flash_mut().controller_mut().protect_page(0);
        assert_eq!(
            storage.write(0x2001, &[1, 2]),
            Err(StorageError::Nvm(NvmError::WriteProtect))
        );
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            parameter in 1u16..0xFFFF,
            payload in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let mut storage = storage();
            storage.write(parameter, &payload).unwrap();
            prop_assert_eq!(read_vec(&mut storage, parameter), payload);
        }

        #[test]
        fn prop_last_write_wins(
            parameter in 1u16..0xFFFF,
            values in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..24), 1..60),
        ) {
            let mut storage = storage();
            for value in &values {
                storage.write(parameter, value).unwrap();
            }
            prop_assert_eq!(&read_vec(&mut storage, parameter), values.last().unwrap());
            prop_assert_eq!(live_copies(&mut storage, parameter), 1);
        }
    }
}
