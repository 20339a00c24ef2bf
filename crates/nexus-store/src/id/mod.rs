//! Id allocation and reclamation
//!
//! Every store owns one [`IdGenerator`]. Ids are handed out densely from zero;
//! freed ids are reused before the high id grows. [`DefaultIdGenerator`]
//! persists the high id and the free set to `<store>.id` when it is closed.

mod factory;
mod file;
mod generator;

pub use factory::DefaultIdGeneratorFactory;
pub use generator::DefaultIdGenerator;

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 32-bit null pointer of the record formats, never handed out as an id
pub const INTEGER_MINUS_ONE: u64 = u32::MAX as u64;

/// Kind of id a generator allocates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdType {
    /// Node records
    Node,
    /// Relationship records
    Relationship,
    /// Property records
    Property,
    /// Dynamic string blocks
    StringBlock,
    /// Dynamic array blocks
    ArrayBlock,
    /// Label tokens
    Label,
    /// Relationship type tokens
    RelationshipType,
    /// Property key tokens
    PropertyKey,
}

impl IdType {
    /// Lower-case name used in logs and file names
    pub fn name(&self) -> &'static str {
        match self {
            IdType::Node => "node",
            IdType::Relationship => "relationship",
            IdType::Property => "property",
            IdType::StringBlock => "string_block",
            IdType::ArrayBlock => "array_block",
            IdType::Label => "label",
            IdType::RelationshipType => "relationship_type",
            IdType::PropertyKey => "property_key",
        }
    }
}

/// Allocates and reclaims the ids of one store
///
/// Implementations serialize all calls internally; two concurrent
/// `next_id` calls never return the same id.
pub trait IdGenerator: Send + Sync {
    /// Id type this generator serves
    fn id_type(&self) -> IdType;

    /// Take a reusable id, or the high id when none is free
    fn next_id(&self) -> Result<u64>;

    /// Return `id` for reuse
    ///
    /// Freeing an id that is already free, or an id at or above the high id,
    /// fails with [`Error::InvalidIdOperation`](crate::Error::InvalidIdOperation).
    fn free_id(&self, id: u64) -> Result<()>;

    /// Fail exactly as [`free_id`](IdGenerator::free_id) would for `id`,
    /// without freeing it
    fn check_free(&self, id: u64) -> Result<()>;

    /// One past the greatest id ever handed out
    fn high_id(&self) -> Result<u64>;

    /// Set the high id, forgetting free ids at or above it
    fn set_high_id(&self, high_id: u64) -> Result<()>;

    /// Raise the high id to at least `high_id`
    fn raise_high_id(&self, high_id: u64) -> Result<()>;

    /// Ids below the high id that are not free
    fn number_of_ids_in_use(&self) -> Result<u64>;

    /// Number of free ids available for reuse
    fn defrag_count(&self) -> Result<u64>;

    /// Replace the high id and free set with freshly scanned values
    fn rebuild(&self, high_id: u64, free_ids: &[u64]) -> Result<()>;

    /// True when the persisted state was missing or stale at open and no
    /// rebuild has run since
    fn needs_rebuild(&self) -> bool;

    /// Persist state and refuse further calls
    fn close(&self) -> Result<()>;
}

/// Opens id generators for stores
pub trait IdGeneratorFactory: Send + Sync {
    /// Open or create the generator persisted at `path`
    ///
    /// `high_id` is called only when the persisted state cannot be trusted.
    fn open(
        &self,
        path: &Path,
        grab_size: usize,
        id_type: IdType,
        high_id: &dyn Fn() -> Result<u64>,
        max_id: u64,
    ) -> Result<Arc<dyn IdGenerator>>;

    /// Generator most recently opened for `id_type`
    fn get(&self, id_type: IdType) -> Option<Arc<dyn IdGenerator>>;
}

/// Path of the id file kept next to a store file
pub fn id_file_path(store_path: &Path) -> PathBuf {
    let mut name = store_path.as_os_str().to_owned();
    name.push(".id");
    PathBuf::from(name)
}
