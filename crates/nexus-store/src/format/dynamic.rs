//! Dynamic (block) record format
//!
//! Strings and arrays are split into fixed-size blocks chained through
//! `next_block`. The block size is persisted in the store header, so the
//! record size of a dynamic store is decided when the store is created.
//!
//! ```text
//! offset  size  field
//!      0     1  flags (bit 0: in use)
//!      1     4  payload length
//!      5     8  next block id
//!     13     n  payload
//! ```

use super::{IN_USE_BIT, IntStoreHeader, IntStoreHeaderFormat, RecordFormat, flags_in_use};
use crate::page_cache::PageCursor;
use crate::record::Record;
use crate::{Error, Result};

/// Bytes in front of the payload of every block
pub const DYNAMIC_RECORD_HEADER_SIZE: usize = 13;

/// End of a block chain
pub const NO_NEXT_BLOCK: u64 = u64::MAX;

/// One block of a dynamic value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicRecord {
    /// Record id
    pub id: u64,
    /// Slot in use
    pub in_use: bool,
    /// Next block of the chain
    pub next_block: u64,
    /// Payload bytes held by this block
    pub data: Vec<u8>,
}

impl Default for DynamicRecord {
    fn default() -> Self {
        Self {
            id: 0,
            in_use: false,
            next_block: NO_NEXT_BLOCK,
            data: Vec::new(),
        }
    }
}

impl DynamicRecord {
    /// In-use block holding `data`
    pub fn new(id: u64, data: Vec<u8>) -> Self {
        Self {
            id,
            in_use: true,
            next_block: NO_NEXT_BLOCK,
            data,
        }
    }
}

impl Record for DynamicRecord {
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
        self.next_block = NO_NEXT_BLOCK;
        self.data.clear();
    }
}

/// Format of string and array block stores
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicRecordFormat;

impl DynamicRecordFormat {
    /// Header format for new stores with `payload_size` bytes per block
    pub fn header_format(payload_size: u32) -> IntStoreHeaderFormat {
        IntStoreHeaderFormat::new(payload_size.saturating_add(DYNAMIC_RECORD_HEADER_SIZE as u32))
    }

    fn payload_capacity(record_size: usize) -> usize {
        record_size.saturating_sub(DYNAMIC_RECORD_HEADER_SIZE)
    }
}

impl RecordFormat<IntStoreHeaderFormat> for DynamicRecordFormat {
    type Record = DynamicRecord;

    fn new_record(&self) -> DynamicRecord {
        DynamicRecord::default()
    }

    fn record_size(&self, header: &IntStoreHeader) -> Result<usize> {
        let size = header.value() as usize;
        if size <= DYNAMIC_RECORD_HEADER_SIZE {
            return Err(Error::layout(format!(
                "Dynamic block size {} leaves no room for payload",
                size
            )));
        }
        Ok(size)
    }

    fn is_in_use(&self, cursor: &mut dyn PageCursor, offset: usize) -> Result<bool> {
        flags_in_use(cursor, offset)
    }

    fn read(
        &self,
        record: &mut DynamicRecord,
        cursor: &mut dyn PageCursor,
        offset: usize,
        record_size: usize,
    ) -> Result<()> {
        let capacity = Self::payload_capacity(record_size);
        record.in_use = cursor.get_u8(offset)? & IN_USE_BIT != 0;
        let length = cursor.get_u32(offset + 1)? as usize;
        record.next_block = cursor.get_u64(offset + 5)?;

        if length > capacity {
            if record.in_use {
                return Err(Error::layout(format!(
                    "Dynamic block length {} exceeds payload capacity {}",
                    length, capacity
                )));
            }
            record.data.clear();
            return Ok(());
        }

        record.data.resize(length, 0);
        cursor.get_bytes(offset + DYNAMIC_RECORD_HEADER_SIZE, &mut record.data)
    }

    fn write(
        &self,
        record: &DynamicRecord,
        cursor: &mut dyn PageCursor,
        offset: usize,
        record_size: usize,
    ) -> Result<()> {
        let capacity = Self::payload_capacity(record_size);
        if record.data.len() > capacity {
            return Err(Error::layout(format!(
                "Dynamic block {} holds {} bytes, capacity is {}",
                record.id,
                record.data.len(),
                capacity
            )));
        }

        let flags = if record.in_use { IN_USE_BIT } else { 0 };
        cursor.put_u8(offset, flags)?;
        cursor.put_u32(offset + 1, record.data.len() as u32)?;
        cursor.put_u64(offset + 5, record.next_block)?;

        let payload = offset + DYNAMIC_RECORD_HEADER_SIZE;
        cursor.put_bytes(payload, &record.data)?;
        cursor.put_bytes(
            payload + record.data.len(),
            &vec![0u8; capacity - record.data.len()],
        )
    }

    /// Deleted blocks drop their payload and chain pointer
    fn prepare(&self, record: &mut DynamicRecord, _record_size: usize) -> Result<()> {
        if !record.in_use {
            record.data.clear();
            record.next_block = NO_NEXT_BLOCK;
        }
        Ok(())
    }
}
