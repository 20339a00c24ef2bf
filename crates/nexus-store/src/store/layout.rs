//! Record id to page coordinate translation

use crate::{Error, Result};

/// Page geometry of an open store
///
/// Records never straddle pages: each page holds `records_per_page` slots and
/// any tail shorter than a record is unused. When the store has a header
/// block, the first `reserved_slots` slots hold it and record `id` lives in
/// slot `id + reserved_slots`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLayout {
    page_size: usize,
    record_size: usize,
    records_per_page: u64,
    reserved_slots: u64,
}

impl StoreLayout {
    /// Layout for `record_size` records in `page_size` pages behind a header
    /// block of `header_len` bytes
    pub fn new(page_size: usize, record_size: usize, header_len: usize) -> Result<Self> {
        if record_size == 0 {
            return Err(Error::layout("Record size must be > 0"));
        }
        if record_size > page_size {
            return Err(Error::layout(format!(
                "Record size {} exceeds page size {}",
                record_size, page_size
            )));
        }
        if header_len > page_size {
            return Err(Error::layout(format!(
                "Store header of {} bytes does not fit a {} byte page",
                header_len, page_size
            )));
        }

        Ok(Self {
            page_size,
            record_size,
            records_per_page: (page_size / record_size) as u64,
            reserved_slots: header_len.div_ceil(record_size) as u64,
        })
    }

    /// Page size in bytes
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Record size in bytes
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Whole records per page
    pub fn records_per_page(&self) -> u64 {
        self.records_per_page
    }

    /// Slots taken by the header block
    pub fn reserved_slots(&self) -> u64 {
        self.reserved_slots
    }

    /// Page holding record `id`
    pub fn page_id_for_record(&self, id: u64) -> u64 {
        id.saturating_add(self.reserved_slots) / self.records_per_page
    }

    /// Byte offset of record `id` inside its page
    pub fn offset_for_id(&self, id: u64) -> usize {
        (id.saturating_add(self.reserved_slots) % self.records_per_page) as usize * self.record_size
    }

    /// Record ids stored on `page_id`, lowest first
    pub fn ids_on_page(&self, page_id: u64) -> std::ops::Range<u64> {
        let first_slot = page_id.saturating_mul(self.records_per_page);
        let end_slot = first_slot.saturating_add(self.records_per_page);
        first_slot.saturating_sub(self.reserved_slots)..end_slot.saturating_sub(self.reserved_slots)
    }
}
