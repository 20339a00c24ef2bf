//! Error types for Nexus record stores

use crate::id::IdType;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the store Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by record stores, id generators and the page cache port
#[derive(Error, Debug)]
pub enum Error {
    /// Store file is missing and creation was not requested
    #[error("Store not found: {}", path.display())]
    StoreNotFound {
        /// Path of the missing store file
        path: PathBuf,
    },

    /// On-disk version marker does not match the expected one
    #[error("Store version mismatch for {}: expected '{expected}', found '{found}'", path.display())]
    StoreVersionMismatch {
        /// Store file path
        path: PathBuf,
        /// Marker the running format writes
        expected: String,
        /// Marker read from disk
        found: String,
    },

    /// Record size, header size and page size cannot be combined
    #[error("Invalid store layout: {0}")]
    InvalidStoreLayout(String),

    /// Double free, out-of-range free or similar caller bug
    #[error("Invalid id operation: {0}")]
    InvalidIdOperation(String),

    /// Record slot is not in use and the read was made in CHECK mode
    #[error("{store} record {id} is not in use")]
    RecordNotInUse {
        /// Record id
        id: u64,
        /// Store type descriptor
        store: String,
    },

    /// I/O errors from the page cache or id files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Page cache refused to map a file
    #[error("File mapping error: {0}")]
    FileMapping(String),

    /// Page cache errors (unpinned access, all frames pinned, ...)
    #[error("Page cache error: {0}")]
    PageCache(String),

    /// Page cursor access outside the page
    #[error(
        "Page access out of bounds: page {page_id}, offset {offset}, len {len}, page size {page_size}"
    )]
    PageOutOfBounds {
        /// Page id the cursor is pinned to
        page_id: u64,
        /// Offset inside the page
        offset: usize,
        /// Number of bytes requested
        len: usize,
        /// Page size of the mapped file
        page_size: usize,
    },

    /// Id generator used after close
    #[error("Id generator for {0:?} is closed")]
    GeneratorClosed(IdType),

    /// No more ids can be handed out
    #[error("Id capacity exceeded for {id_type:?}: max id is {max_id}")]
    IdCapacityExceeded {
        /// Id type of the exhausted generator
        id_type: IdType,
        /// Highest id the format can address
        max_id: u64,
    },

    /// Store used before initialise or after close
    #[error("Store is not open: {0}")]
    StoreClosed(String),

    /// Record cursor used after close
    #[error("Record cursor is closed")]
    CursorClosed,

    /// Both steps of an ordered close failed
    #[error("Close failed: page file: {page_file}; id generator: {id_generator}")]
    Close {
        /// Error from closing the page-mapped file
        page_file: Box<Error>,
        /// Error from closing the id generator
        id_generator: Box<Error>,
    },

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create an invalid store layout error
    pub fn layout(msg: impl Into<String>) -> Self {
        Self::InvalidStoreLayout(msg.into())
    }

    /// Create an invalid id operation error
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidIdOperation(msg.into())
    }

    /// Create a file mapping error
    pub fn mapping(msg: impl Into<String>) -> Self {
        Self::FileMapping(msg.into())
    }

    /// Create a page cache error
    pub fn page_cache(msg: impl Into<String>) -> Self {
        Self::PageCache(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a store closed error
    pub fn closed(msg: impl Into<String>) -> Self {
        Self::StoreClosed(msg.into())
    }
}
