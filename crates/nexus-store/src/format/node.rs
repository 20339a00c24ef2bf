//! Node record format
//!
//! ```text
//! offset  size  field
//!      0     1  flags (bit 0: in use, bit 1: dense)
//!      1     8  first relationship id
//!      9     8  first property id
//!     17     8  label bitmap
//!     25     7  padding
//! ```

use super::{IN_USE_BIT, NO_NEXT_PROPERTY, NO_NEXT_RELATIONSHIP, NoStoreHeader, RecordFormat};
use super::{fixed_size, flags_in_use};
use crate::Result;
use crate::page_cache::PageCursor;
use crate::record::Record;

/// Node record size in bytes
pub const NODE_RECORD_SIZE: usize = 32;

const DENSE_BIT: u8 = 0x02;

/// Node record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    /// Record id
    pub id: u64,
    /// Slot in use
    pub in_use: bool,
    /// Relationships are grouped by type
    pub dense: bool,
    /// Head of the relationship chain
    pub next_rel: u64,
    /// Head of the property chain
    pub next_prop: u64,
    /// Bitmap of label ids (up to 64 labels)
    pub label_bits: u64,
}

impl Default for NodeRecord {
    fn default() -> Self {
        Self {
            id: 0,
            in_use: false,
            dense: false,
            next_rel: NO_NEXT_RELATIONSHIP,
            next_prop: NO_NEXT_PROPERTY,
            label_bits: 0,
        }
    }
}

impl NodeRecord {
    /// In-use node with empty chains
    pub fn new(id: u64) -> Self {
        Self {
            id,
            in_use: true,
            ..Self::default()
        }
    }

    /// Check if the node carries `label_id`
    pub fn has_label(&self, label_id: u32) -> bool {
        label_id < 64 && self.label_bits & (1u64 << label_id) != 0
    }

    /// Add a label to the bitmap; ids of 64 and above are ignored
    pub fn add_label(&mut self, label_id: u32) {
        if label_id < 64 {
            self.label_bits |= 1u64 << label_id;
        }
    }

    /// Remove a label from the bitmap
    pub fn remove_label(&mut self, label_id: u32) {
        if label_id < 64 {
            self.label_bits &= !(1u64 << label_id);
        }
    }
}

impl Record for NodeRecord {
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
        *self = Self {
            id: self.id,
            ..Self::default()
        };
    }
}

/// Format of the node store
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeRecordFormat;

impl RecordFormat for NodeRecordFormat {
    type Record = NodeRecord;

    fn new_record(&self) -> NodeRecord {
        NodeRecord::default()
    }

    fn record_size(&self, _header: &NoStoreHeader) -> Result<usize> {
        Ok(NODE_RECORD_SIZE)
    }

    fn is_in_use(&self, cursor: &mut dyn PageCursor, offset: usize) -> Result<bool> {
        flags_in_use(cursor, offset)
    }

    fn read(
        &self,
        record: &mut NodeRecord,
        cursor: &mut dyn PageCursor,
        offset: usize,
        record_size: usize,
    ) -> Result<()> {
        fixed_size(NODE_RECORD_SIZE, record_size, "Node")?;
        let flags = cursor.get_u8(offset)?;
        record.in_use = flags & IN_USE_BIT != 0;
        record.dense = flags & DENSE_BIT != 0;
        record.next_rel = cursor.get_u64(offset + 1)?;
        record.next_prop = cursor.get_u64(offset + 9)?;
        record.label_bits = cursor.get_u64(offset + 17)?;
        Ok(())
    }

    fn write(
        &self,
        record: &NodeRecord,
        cursor: &mut dyn PageCursor,
        offset: usize,
        record_size: usize,
    ) -> Result<()> {
        fixed_size(NODE_RECORD_SIZE, record_size, "Node")?;
        let mut flags = 0;
        if record.in_use {
            flags |= IN_USE_BIT;
        }
        if record.dense {
            flags |= DENSE_BIT;
        }
        cursor.put_u8(offset, flags)?;
        cursor.put_u64(offset + 1, record.next_rel)?;
        cursor.put_u64(offset + 9, record.next_prop)?;
        cursor.put_u64(offset + 17, record.label_bits)?;
        cursor.put_bytes(offset + 25, &[0u8; NODE_RECORD_SIZE - 25])
    }
}
