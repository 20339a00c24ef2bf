//! Nexus Store - fixed-size record stores
//!
//! This crate provides the record storage layer of Nexus:
//! - Record stores keeping fixed-size records in page-mapped files
//! - Id generators with persisted free lists and crash recovery
//! - Record cursors with optimistic, retrying page reads
//! - A page cache port and a file-backed clock-evicting page cache
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              RecordStore<F, H>               │
//! │   (layout, version marker, create/open)     │
//! └──────┬──────────────┬──────────────┬────────┘
//!        │              │              │
//! ┌──────┴──────┐ ┌─────┴──────┐ ┌─────┴────────┐
//! │ RecordFormat│ │RecordCursor│ │ IdGenerator  │
//! │ (+ header)  │ │  (retry)   │ │ (<store>.id) │
//! └─────────────┘ └─────┬──────┘ └──────────────┘
//!                       │
//! ┌─────────────────────┴───────────────────────┐
//! │          PageCache / PagedFile               │
//! │     (pin, should_retry, flush, close)        │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use nexus_store::config::{PageCacheConfig, StoreConfig};
//! use nexus_store::format::NodeRecord;
//! use nexus_store::id::DefaultIdGeneratorFactory;
//! use nexus_store::page_cache::StandardPageCache;
//! use nexus_store::{RecordLoad, RecordStore};
//! use std::sync::Arc;
//!
//! # fn main() -> nexus_store::Result<()> {
//! let page_cache = Arc::new(StandardPageCache::new(PageCacheConfig::default())?);
//! let id_factory = Arc::new(DefaultIdGeneratorFactory::new());
//!
//! let mut nodes = RecordStore::node_store(
//!     "/data/nodes.store",
//!     StoreConfig::default(),
//!     id_factory,
//!     page_cache,
//! )?;
//! nodes.initialise(true)?;
//!
//! let id = nodes.next_id()?;
//! let mut node = NodeRecord::new(id);
//! node.add_label(1);
//! nodes.update_record(&node)?;
//!
//! let mut read = nodes.new_record();
//! assert!(nodes.get_record(id, &mut read, RecordLoad::Normal)?);
//! nodes.close()?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod format;
pub mod id;
pub mod page_cache;
pub mod record;
pub mod store;
pub mod testing;

pub use config::{PageCacheConfig, StoreConfig};
pub use error::{Error, Result};
pub use id::{IdGenerator, IdGeneratorFactory, IdType};
pub use page_cache::{PageCache, PageCursor, PageIntent, PagedFile};
pub use record::{Record, RecordLoad};
pub use store::{RecordCursor, RecordStore, StoreLayout};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::layout("Record size must be > 0");
        assert_eq!(
            err.to_string(),
            "Invalid store layout: Record size must be > 0"
        );
        assert!(matches!(
            Error::closed("nodes"),
            Error::StoreClosed(msg) if msg == "nodes"
        ));
    }

    #[test]
    fn test_default_configs_are_valid() {
        StoreConfig::default().validate().unwrap();
        PageCacheConfig::default().validate().unwrap();
    }
}
