//! Page cache port - the interface record stores consume
//!
//! A [`PageCache`] maps a file into fixed-size pages. Each [`PagedFile`] hands
//! out [`PageCursor`]s that pin one page at a time and expose raw byte access
//! at in-page offsets.
//!
//! # Optimistic reads
//!
//! Read cursors never block writers. After reading a page a caller asks
//! [`PageCursor::should_retry`]; `true` means a writer touched the page while
//! the bytes were being read and the read must be repeated from the start.
//! Write cursors hold their page exclusively until they move on or close.
//!
//! [`StandardPageCache`] is the file-backed implementation used by the stores.

mod page;
mod standard;
mod tracer;

pub use standard::{StandardPageCache, StandardPageCursor, StandardPagedFile};
pub use tracer::{
    NullPageCacheTracer, PageCacheTracer, PageEvent, PageEventKind, RecordingPageCacheTracer,
};

use crate::{Error, Result};
use std::path::Path;
use std::sync::Arc;

/// Page id reported by a cursor that has no page pinned
pub const UNBOUND_PAGE_ID: u64 = u64::MAX;

/// What a page cursor intends to do with the pages it pins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageIntent {
    /// Optimistic shared read, validated with `should_retry`
    SharedRead,
    /// Exclusive write, held for as long as the page is pinned
    ExclusiveWrite,
}

/// Maps files into pages
pub trait PageCache: Send + Sync {
    /// Map `path` into pages of `page_size` bytes
    ///
    /// With `create == false` a missing file fails with
    /// [`Error::StoreNotFound`]. Invalid paths and unsupported page sizes fail
    /// with [`Error::FileMapping`].
    fn map(&self, path: &Path, page_size: usize, create: bool) -> Result<Arc<dyn PagedFile>>;
}

/// A file mapped into pages
pub trait PagedFile: Send + Sync {
    /// Path of the mapped file
    fn path(&self) -> &Path;

    /// Size of every page in bytes
    fn page_size(&self) -> usize;

    /// Open a cursor starting at `page_id`
    ///
    /// Nothing is pinned until the cursor's `next` or `next_page` is called.
    fn io(&self, page_id: u64, intent: PageIntent) -> Result<Box<dyn PageCursor>>;

    /// Highest page id holding data, `None` for an empty file
    fn last_page_id(&self) -> Result<Option<u64>>;

    /// Write dirty pages back and force them to disk
    fn flush(&self) -> Result<()>;

    /// Flush and unmap; later cursor use fails
    fn close(&self) -> Result<()>;
}

/// Cursor over the pages of one [`PagedFile`]
///
/// Integers are stored little-endian.
pub trait PageCursor: Send {
    /// Pin the page after the current one, or the start page if none is pinned
    fn next(&mut self) -> Result<bool>;

    /// Pin `page_id`, releasing the current page first
    ///
    /// Returns `false` when a read cursor is moved past the end of the file.
    fn next_page(&mut self, page_id: u64) -> Result<bool>;

    /// Page currently pinned, if any
    fn current_page_id(&self) -> Option<u64>;

    /// Page size of the underlying file
    fn page_size(&self) -> usize;

    /// Copy `dst.len()` bytes from `offset` in the pinned page
    fn get_bytes(&mut self, offset: usize, dst: &mut [u8]) -> Result<()>;

    /// Copy `src` into the pinned page at `offset`
    fn put_bytes(&mut self, offset: usize, src: &[u8]) -> Result<()>;

    /// Whether the reads since the page was pinned (or since the last
    /// `true` answer) may have observed a concurrent write
    fn should_retry(&mut self) -> Result<bool>;

    /// Release the pinned page
    fn close(&mut self);

    /// Read one byte
    fn get_u8(&mut self, offset: usize) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.get_bytes(offset, &mut buf)?;
        Ok(buf[0])
    }

    /// Read a little-endian u16
    fn get_u16(&mut self, offset: usize) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.get_bytes(offset, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Read a little-endian u32
    fn get_u32(&mut self, offset: usize) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.get_bytes(offset, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Read a little-endian u64
    fn get_u64(&mut self, offset: usize) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.get_bytes(offset, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Write one byte
    fn put_u8(&mut self, offset: usize, value: u8) -> Result<()> {
        self.put_bytes(offset, &[value])
    }

    /// Write a little-endian u16
    fn put_u16(&mut self, offset: usize, value: u16) -> Result<()> {
        self.put_bytes(offset, &value.to_le_bytes())
    }

    /// Write a little-endian u32
    fn put_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        self.put_bytes(offset, &value.to_le_bytes())
    }

    /// Write a little-endian u64
    fn put_u64(&mut self, offset: usize, value: u64) -> Result<()> {
        self.put_bytes(offset, &value.to_le_bytes())
    }
}

/// Bounds check shared by cursor implementations
pub(crate) fn check_bounds(
    page_id: u64,
    offset: usize,
    len: usize,
    page_size: usize,
) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= page_size => Ok(()),
        _ => Err(Error::PageOutOfBounds {
            page_id,
            offset,
            len,
            page_size,
        }),
    }
}
