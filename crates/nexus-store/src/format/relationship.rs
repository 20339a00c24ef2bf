//! Relationship record format
//!
//! ```text
//! offset  size  field
//!      0     1  flags (bit 0: in use, bit 1: first in first node's chain,
//!               bit 2: first in second node's chain)
//!      1     8  first node
//!      9     8  second node
//!     17     4  relationship type
//!     21     8  next relationship of first node
//!     29     8  next relationship of second node
//!     37     8  first property id
//!     45     3  padding
//! ```

use super::{IN_USE_BIT, NO_NEXT_PROPERTY, NO_NEXT_RELATIONSHIP, NoStoreHeader, RecordFormat};
use super::{fixed_size, flags_in_use};
use crate::Result;
use crate::page_cache::PageCursor;
use crate::record::Record;

/// Relationship record size in bytes
pub const RELATIONSHIP_RECORD_SIZE: usize = 48;

const FIRST_IN_FIRST_CHAIN_BIT: u8 = 0x02;
const FIRST_IN_SECOND_CHAIN_BIT: u8 = 0x04;

/// Relationship record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipRecord {
    /// Record id
    pub id: u64,
    /// Slot in use
    pub in_use: bool,
    /// Source node
    pub first_node: u64,
    /// Target node
    pub second_node: u64,
    /// Relationship type id
    pub rel_type: u32,
    /// Next relationship in the source node's chain
    pub first_next_rel: u64,
    /// Next relationship in the target node's chain
    pub second_next_rel: u64,
    /// Head of the property chain
    pub next_prop: u64,
    /// Head of the source node's chain
    pub first_in_first_chain: bool,
    /// Head of the target node's chain
    pub first_in_second_chain: bool,
}

impl Default for RelationshipRecord {
    fn default() -> Self {
        Self {
            id: 0,
            in_use: false,
            first_node: 0,
            second_node: 0,
            rel_type: 0,
            first_next_rel: NO_NEXT_RELATIONSHIP,
            second_next_rel: NO_NEXT_RELATIONSHIP,
            next_prop: NO_NEXT_PROPERTY,
            first_in_first_chain: false,
            first_in_second_chain: false,
        }
    }
}

impl RelationshipRecord {
    /// In-use relationship between two nodes
    pub fn new(id: u64, first_node: u64, second_node: u64, rel_type: u32) -> Self {
        Self {
            id,
            in_use: true,
            first_node,
            second_node,
            rel_type,
            ..Self::default()
        }
    }
}

impl Record for RelationshipRecord {
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

/// Format of the relationship store
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationshipRecordFormat;

impl RecordFormat for RelationshipRecordFormat {
    type Record = RelationshipRecord;

    fn new_record(&self) -> RelationshipRecord {
        RelationshipRecord::default()
    }

    fn record_size(&self, _header: &NoStoreHeader) -> Result<usize> {
        Ok(RELATIONSHIP_RECORD_SIZE)
    }

    fn is_in_use(&self, cursor: &mut dyn PageCursor, offset: usize) -> Result<bool> {
        flags_in_use(cursor, offset)
    }

    fn read(
        &self,
        record: &mut RelationshipRecord,
        cursor: &mut dyn PageCursor,
        offset: usize,
        record_size: usize,
    ) -> Result<()> {
        fixed_size(RELATIONSHIP_RECORD_SIZE, record_size, "Relationship")?;
        let flags = cursor.get_u8(offset)?;
        record.in_use = flags & IN_USE_BIT != 0;
        record.first_in_first_chain = flags & FIRST_IN_FIRST_CHAIN_BIT != 0;
        record.first_in_second_chain = flags & FIRST_IN_SECOND_CHAIN_BIT != 0;
        record.first_node = cursor.get_u64(offset + 1)?;
        record.second_node = cursor.get_u64(offset + 9)?;
        record.rel_type = cursor.get_u32(offset + 17)?;
        record.first_next_rel = cursor.get_u64(offset + 21)?;
        record.second_next_rel = cursor.get_u64(offset + 29)?;
        record.next_prop = cursor.get_u64(offset + 37)?;
        Ok(())
    }

    fn write(
        &self,
        record: &RelationshipRecord,
        cursor: &mut dyn PageCursor,
        offset: usize,
        record_size: usize,
    ) -> Result<()> {
        fixed_size(RELATIONSHIP_RECORD_SIZE, record_size, "Relationship")?;
        let mut flags = 0;
        if record.in_use {
            flags |= IN_USE_BIT;
        }
        if record.first_in_first_chain {
            flags |= FIRST_IN_FIRST_CHAIN_BIT;
        }
        if record.first_in_second_chain {
            flags |= FIRST_IN_SECOND_CHAIN_BIT;
        }
        cursor.put_u8(offset, flags)?;
        cursor.put_u64(offset + 1, record.first_node)?;
        cursor.put_u64(offset + 9, record.second_node)?;
        cursor.put_u32(offset + 17, record.rel_type)?;
        cursor.put_u64(offset + 21, record.first_next_rel)?;
        cursor.put_u64(offset + 29, record.second_next_rel)?;
        cursor.put_u64(offset + 37, record.next_prop)?;
        cursor.put_bytes(offset + 45, &[0u8; RELATIONSHIP_RECORD_SIZE - 45])
    }
}
