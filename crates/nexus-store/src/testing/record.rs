//! Ten byte test record format
//!
//! ```text
//! offset  size  field
//!      0     1  flags (bit 0: in use)
//!      1     8  value
//!      9     1  tag
//! ```

use crate::format::{RecordFormat, StoreHeaderFormat};
use crate::page_cache::{PageCursor, PagedFile};
use crate::record::Record;
use crate::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Record size of [`TestRecordFormat`]
pub const TEST_RECORD_SIZE: usize = 10;

/// Record with one value and one tag byte
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestRecord {
    /// Record id
    pub id: u64,
    /// Slot in use
    pub in_use: bool,
    /// Payload value
    pub value: u64,
    /// Payload tag
    pub tag: u8,
}

impl TestRecord {
    /// In-use record carrying `value`
    pub fn new(id: u64, value: u64) -> Self {
        Self {
            id,
            in_use: true,
            value,
            tag: 0,
        }
    }
}

impl Record for TestRecord {
    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn in_use(&self) -> bool {
        self.in_use
    }

    fn set_in_use(&mut self, in_use: bool) {
        self.in_use = in_use;
    }

    fn clear(&mut self) {
        self.in_use = false;
        self.value = 0;
        self.tag = 0;
    }
}

/// Format of [`TestRecord`], usable with any header format
///
/// Clones share their counters.
#[derive(Debug, Clone, Default)]
pub struct TestRecordFormat {
    reads: Arc<AtomicUsize>,
    new_store_files: Arc<AtomicUsize>,
    prepares: Arc<AtomicUsize>,
}

impl TestRecordFormat {
    /// Format with zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of record decodes so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of times a new store file was initialised
    pub fn new_store_files(&self) -> usize {
        self.new_store_files.load(Ordering::SeqCst)
    }

    /// Number of `prepare` calls
    pub fn prepares(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }
}

impl<H: StoreHeaderFormat> RecordFormat<H> for TestRecordFormat {
    type Record = TestRecord;

    fn new_record(&self) -> TestRecord {
        TestRecord::default()
    }

    fn record_size(&self, _header: &H::Header) -> Result<usize> {
        Ok(TEST_RECORD_SIZE)
    }

    fn is_in_use(&self, cursor: &mut dyn PageCursor, offset: usize) -> Result<bool> {
        Ok(cursor.get_u8(offset)? & 0x01 != 0)
    }

    fn read(
        &self,
        record: &mut TestRecord,
        cursor: &mut dyn PageCursor,
        offset: usize,
        record_size: usize,
    ) -> Result<()> {
        if record_size < TEST_RECORD_SIZE {
            return Err(Error::layout("Test records need 10 bytes"));
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        record.in_use = cursor.get_u8(offset)? & 0x01 != 0;
        record.value = cursor.get_u64(offset + 1)?;
        record.tag = cursor.get_u8(offset + 9)?;
        Ok(())
    }

    fn write(
        &self,
        record: &TestRecord,
        cursor: &mut dyn PageCursor,
        offset: usize,
        _record_size: usize,
    ) -> Result<()> {
        cursor.put_u8(offset, u8::from(record.in_use))?;
        cursor.put_u64(offset + 1, record.value)?;
        cursor.put_u8(offset + 9, record.tag)
    }

    fn prepare(&self, record: &mut TestRecord, _record_size: usize) -> Result<()> {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        if !record.in_use {
            record.value = 0;
        }
        Ok(())
    }

    fn initialise_new_store_file(&self, _file: &dyn PagedFile) -> Result<()> {
        self.new_store_files.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
