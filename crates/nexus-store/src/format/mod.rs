//! Record formats
//!
//! A [`RecordFormat`] turns one record into a fixed number of bytes at an
//! offset inside a pinned page, and back. A [`StoreHeaderFormat`] describes
//! the optional header block a store keeps at the start of page 0.
//!
//! Formats never retry: they decode whatever bytes the cursor shows and the
//! record cursor decides whether the decode has to be repeated.

mod dynamic;
mod node;
mod relationship;

pub use dynamic::{DYNAMIC_RECORD_HEADER_SIZE, DynamicRecord, DynamicRecordFormat, NO_NEXT_BLOCK};
pub use node::{NODE_RECORD_SIZE, NodeRecord, NodeRecordFormat};
pub use relationship::{
    RELATIONSHIP_RECORD_SIZE, RelationshipRecord, RelationshipRecordFormat,
};

use crate::page_cache::{PageCursor, PagedFile};
use crate::record::Record;
use crate::{Error, Result};
use std::fmt::Debug;

/// End of a relationship chain
pub const NO_NEXT_RELATIONSHIP: u64 = u64::MAX;

/// End of a property chain
pub const NO_NEXT_PROPERTY: u64 = u64::MAX;

/// Largest id the 35-bit record pointers of the standard formats address
pub const STANDARD_MAX_ID: u64 = (1 << 35) - 1;

/// In-use bit of the flags byte shared by the standard formats
pub(crate) const IN_USE_BIT: u8 = 0x01;

/// Layout of the header block at the start of a store file
pub trait StoreHeaderFormat: Send + Sync + 'static {
    /// Decoded header
    type Header: Clone + Debug + Send + Sync;

    /// Header size in bytes; zero means the store has no header block
    fn header_size(&self) -> usize;

    /// Write the header of a new store at `offset` in page 0
    fn write_header(&self, cursor: &mut dyn PageCursor, offset: usize) -> Result<()>;

    /// Decode the header at `offset` in page 0
    fn read_header(&self, cursor: &mut dyn PageCursor, offset: usize) -> Result<Self::Header>;

    /// Header of a store without any header bytes on disk
    fn empty_header(&self) -> Self::Header;
}

/// Marker header of stores without a header block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoStoreHeader;

/// Store header format with no bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStoreHeaderFormat;

impl StoreHeaderFormat for NoStoreHeaderFormat {
    type Header = NoStoreHeader;

    fn header_size(&self) -> usize {
        0
    }

    fn write_header(&self, _cursor: &mut dyn PageCursor, _offset: usize) -> Result<()> {
        Ok(())
    }

    fn read_header(&self, _cursor: &mut dyn PageCursor, _offset: usize) -> Result<NoStoreHeader> {
        Ok(NoStoreHeader)
    }

    fn empty_header(&self) -> NoStoreHeader {
        NoStoreHeader
    }
}

/// Header holding a single 32-bit value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntStoreHeader(pub u32);

impl IntStoreHeader {
    /// Stored value
    pub fn value(&self) -> u32 {
        self.0
    }
}

/// Header format storing one u32, written once at creation
///
/// Dynamic stores keep their block size here so a store reopened with a
/// different configured block size keeps its on-disk layout.
#[derive(Debug, Clone, Copy)]
pub struct IntStoreHeaderFormat {
    initial: u32,
}

impl IntStoreHeaderFormat {
    /// Format writing `initial` into new stores
    pub fn new(initial: u32) -> Self {
        Self { initial }
    }
}

impl StoreHeaderFormat for IntStoreHeaderFormat {
    type Header = IntStoreHeader;

    fn header_size(&self) -> usize {
        4
    }

    fn write_header(&self, cursor: &mut dyn PageCursor, offset: usize) -> Result<()> {
        cursor.put_u32(offset, self.initial)
    }

    fn read_header(&self, cursor: &mut dyn PageCursor, offset: usize) -> Result<IntStoreHeader> {
        Ok(IntStoreHeader(cursor.get_u32(offset)?))
    }

    fn empty_header(&self) -> IntStoreHeader {
        IntStoreHeader(self.initial)
    }
}

/// Serializes the records of one store type
pub trait RecordFormat<H: StoreHeaderFormat = NoStoreHeaderFormat>: Send + Sync + 'static {
    /// Record type of the store
    type Record: Record;

    /// Fresh record with every field empty
    fn new_record(&self) -> Self::Record;

    /// Record size for a store with `header`
    fn record_size(&self, header: &H::Header) -> Result<usize>;

    /// Largest id the format can address
    fn max_id(&self) -> u64 {
        STANDARD_MAX_ID
    }

    /// Read only the in-use flag of the record at `offset`
    fn is_in_use(&self, cursor: &mut dyn PageCursor, offset: usize) -> Result<bool>;

    /// Decode the record at `offset` into `record`, in use or not
    fn read(
        &self,
        record: &mut Self::Record,
        cursor: &mut dyn PageCursor,
        offset: usize,
        record_size: usize,
    ) -> Result<()>;

    /// Encode `record` at `offset`
    fn write(
        &self,
        record: &Self::Record,
        cursor: &mut dyn PageCursor,
        offset: usize,
        record_size: usize,
    ) -> Result<()>;

    /// Finalize derived fields before the record is written; idempotent
    fn prepare(&self, _record: &mut Self::Record, _record_size: usize) -> Result<()> {
        Ok(())
    }

    /// Seed format specific content into a freshly created store file
    fn initialise_new_store_file(&self, _file: &dyn PagedFile) -> Result<()> {
        Ok(())
    }
}

/// Reads the flags byte at `offset` and tests the in-use bit
pub(crate) fn flags_in_use(cursor: &mut dyn PageCursor, offset: usize) -> Result<bool> {
    Ok(cursor.get_u8(offset)? & IN_USE_BIT != 0)
}

/// Fixed record size check for formats that ignore the header
pub(crate) fn fixed_size(size: usize, record_size: usize, name: &str) -> Result<()> {
    if record_size < size {
        return Err(Error::layout(format!(
            "{} records need {} bytes, slot has {}",
            name, size, record_size
        )));
    }
    Ok(())
}
