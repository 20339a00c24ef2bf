//! File-backed page cache
//!
//! Each mapped file owns a frame table of at most `max_pages` pages. Pages are
//! faulted in from the file on first pin and evicted with the Clock
//! (second-chance) algorithm; dirty pages are written back before eviction.
//!
//! Write cursors take their page exclusively through the page's sequence
//! counter, so a thread must not hold two write cursors on the same page.

use super::page::Page;
use super::{
    NullPageCacheTracer, PageCache, PageCacheTracer, PageCursor, PageEvent, PageIntent, PagedFile,
    check_bounds,
};
use crate::config::PageCacheConfig;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Page cache over regular files
pub struct StandardPageCache {
    config: PageCacheConfig,
    tracer: Arc<dyn PageCacheTracer>,
    /// Files currently mapped, to refuse double mappings
    mapped: Arc<Mutex<HashSet<PathBuf>>>,
}

impl StandardPageCache {
    /// Create a page cache without tracing
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use nexus_store::config::PageCacheConfig;
    /// use nexus_store::page_cache::StandardPageCache;
    ///
    /// let cache = StandardPageCache::new(PageCacheConfig::default()).unwrap();
    /// ```
    pub fn new(config: PageCacheConfig) -> Result<Self> {
        Self::with_tracer(config, Arc::new(NullPageCacheTracer))
    }

    /// Create a page cache reporting to `tracer`
    pub fn with_tracer(config: PageCacheConfig, tracer: Arc<dyn PageCacheTracer>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            tracer,
            mapped: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Map a file, returning the concrete paged file
    pub fn map_file(
        &self,
        path: &Path,
        page_size: usize,
        create: bool,
    ) -> Result<Arc<StandardPagedFile>> {
        if page_size == 0 || page_size > self.config.max_page_size {
            return Err(Error::mapping(format!(
                "Unsupported page size {} for {} (max {})",
                page_size,
                path.display(),
                self.config.max_page_size
            )));
        }

        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .truncate(false)
            .open(path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound && !create => {
                return Err(Error::StoreNotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => {
                return Err(Error::mapping(format!(
                    "Cannot map {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let registry_key = std::path::absolute(path)?;
        if !self.mapped.lock().insert(registry_key.clone()) {
            return Err(Error::mapping(format!(
                "{} is already mapped",
                path.display()
            )));
        }

        let file_len = match file.metadata() {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                self.mapped.lock().remove(&registry_key);
                return Err(e.into());
            }
        };
        let page_count = file_len.div_ceil(page_size as u64);

        tracing::debug!(
            "Mapped {:?} with page size {} ({} pages on disk)",
            path,
            page_size,
            page_count
        );

        let inner = Arc::new(MappedFile {
            path: path.to_path_buf(),
            page_size,
            file: Mutex::new(file),
            frames: Mutex::new(FrameTable::new(self.config.max_pages)),
            page_count: AtomicU64::new(page_count),
            closed: AtomicBool::new(false),
            tracer: Arc::clone(&self.tracer),
            registry: Arc::clone(&self.mapped),
            registry_key,
        });

        Ok(Arc::new(StandardPagedFile { inner }))
    }
}

impl PageCache for StandardPageCache {
    fn map(&self, path: &Path, page_size: usize, create: bool) -> Result<Arc<dyn PagedFile>> {
        let file: Arc<dyn PagedFile> = self.map_file(path, page_size, create)?;
        Ok(file)
    }
}

/// Frame table with Clock eviction
struct FrameTable {
    /// Cache storage (page_id → Page)
    pages: HashMap<u64, Arc<Page>>,
    /// Maximum number of pages in the table
    capacity: usize,
    /// Clock hand position (for eviction)
    clock_hand: usize,
    /// Page IDs by clock slot
    page_list: Vec<Option<u64>>,
}

impl FrameTable {
    fn new(capacity: usize) -> Self {
        Self {
            pages: HashMap::with_capacity(capacity),
            capacity,
            clock_hand: 0,
            page_list: vec![None; capacity],
        }
    }

    fn insert_page(&mut self, page_id: u64, page: Arc<Page>) {
        self.pages.insert(page_id, page);

        if let Some(slot) = self.page_list.iter().position(|p| p.is_none()) {
            self.page_list[slot] = Some(page_id);
        } else if self.clock_hand < self.page_list.len() {
            self.page_list[self.clock_hand] = Some(page_id);
        }
    }

    fn clear(&mut self) {
        self.pages.clear();
        for slot in &mut self.page_list {
            *slot = None;
        }
        self.clock_hand = 0;
    }
}

struct MappedFile {
    path: PathBuf,
    page_size: usize,
    file: Mutex<File>,
    frames: Mutex<FrameTable>,
    /// Number of pages holding data, on disk or dirty in memory
    page_count: AtomicU64,
    closed: AtomicBool,
    tracer: Arc<dyn PageCacheTracer>,
    registry: Arc<Mutex<HashSet<PathBuf>>>,
    registry_key: PathBuf,
}

impl MappedFile {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::page_cache(format!(
                "{} has been unmapped",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn page_count(&self) -> u64 {
        self.page_count.load(Ordering::Acquire)
    }

    fn file_offset(&self, page_id: u64) -> Result<u64> {
        page_id
            .checked_mul(self.page_size as u64)
            .ok_or_else(|| Error::page_cache(format!("Page id {} overflows file offset", page_id)))
    }

    fn pin(&self, page_id: u64, intent: PageIntent) -> Result<Arc<Page>> {
        self.ensure_open()?;

        let page = {
            let mut frames = self.frames.lock();
            match frames.pages.get(&page_id).cloned() {
                Some(page) => {
                    page.set_reference_bit();
                    page.pin();
                    page
                }
                None => {
                    if frames.pages.len() >= frames.capacity {
                        self.evict_page(&mut frames)?;
                    }
                    let data = self.read_page(page_id)?;
                    let page = Arc::new(Page::new(page_id, data));
                    page.pin();
                    frames.insert_page(page_id, Arc::clone(&page));
                    self.tracer.on_event(PageEvent::Fault { page_id });
                    page
                }
            }
        };

        self.tracer.on_event(PageEvent::Pin { page_id, intent });

        if intent == PageIntent::ExclusiveWrite {
            page.begin_write();
            self.page_count.fetch_max(page_id + 1, Ordering::AcqRel);
        }

        Ok(page)
    }

    fn unpin(&self, page: &Page, intent: PageIntent) {
        if intent == PageIntent::ExclusiveWrite {
            page.end_write();
        }
        page.unpin();
        self.tracer.on_event(PageEvent::Unpin { page_id: page.id });
    }

    /// Evict one unpinned page using the Clock algorithm
    fn evict_page(&self, frames: &mut FrameTable) -> Result<()> {
        let mut iterations = 0;
        let max_iterations = frames.capacity * 2; // Prevent infinite loop

        loop {
            if iterations >= max_iterations {
                return Err(Error::page_cache("All pages are pinned, cannot evict"));
            }

            let hand = frames.clock_hand;
            frames.clock_hand = (hand + 1) % frames.capacity;
            iterations += 1;

            let Some(page_id) = frames.page_list[hand] else {
                continue;
            };
            let Some(page) = frames.pages.get(&page_id).cloned() else {
                frames.page_list[hand] = None;
                continue;
            };

            // Skip pinned pages, give referenced pages a second chance
            if page.is_pinned() || page.clear_reference_bit() {
                continue;
            }

            if page.take_dirty() {
                if let Err(e) = self.write_back(&page) {
                    page.mark_dirty();
                    return Err(e);
                }
            }

            frames.pages.remove(&page_id);
            frames.page_list[hand] = None;
            self.tracer.on_event(PageEvent::Evict { page_id });
            return Ok(());
        }
    }

    fn read_page(&self, page_id: u64) -> Result<Box<[u8]>> {
        let mut data = vec![0u8; self.page_size].into_boxed_slice();
        let offset = self.file_offset(page_id)?;

        let mut file = self.file.lock();
        if offset < file.metadata()?.len() {
            file.seek(SeekFrom::Start(offset))?;
            let mut filled = 0;
            while filled < data.len() {
                let n = file.read(&mut data[filled..])?;
                if n == 0 {
                    break; // short last page, rest stays zeroed
                }
                filled += n;
            }
        }

        Ok(data)
    }

    fn write_back(&self, page: &Page) -> Result<()> {
        let bytes = page.stable_copy();
        let offset = self.file_offset(page.id)?;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&bytes)?;
        drop(file);

        self.tracer.on_event(PageEvent::Flush { page_id: page.id });
        Ok(())
    }

    fn flush_pages(&self) -> Result<()> {
        let dirty: Vec<Arc<Page>> = self
            .frames
            .lock()
            .pages
            .values()
            .filter(|page| page.is_dirty())
            .cloned()
            .collect();

        for page in dirty {
            if page.take_dirty() {
                if let Err(e) = self.write_back(&page) {
                    page.mark_dirty();
                    return Err(e);
                }
            }
        }

        self.file.lock().sync_all()?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let result = self.flush_pages();

        {
            let mut frames = self.frames.lock();
            let pinned = frames.pages.values().filter(|p| p.is_pinned()).count();
            if pinned > 0 {
                tracing::warn!(
                    "Unmapping {:?} with {} page(s) still pinned",
                    self.path,
                    pinned
                );
            }
            frames.clear();
        }

        self.registry.lock().remove(&self.registry_key);
        tracing::debug!("Unmapped {:?}", self.path);
        result
    }
}

/// A file mapped by [`StandardPageCache`]
pub struct StandardPagedFile {
    inner: Arc<MappedFile>,
}

impl StandardPagedFile {
    /// Open a concrete cursor, see [`PagedFile::io`]
    pub fn cursor(&self, page_id: u64, intent: PageIntent) -> Result<StandardPageCursor> {
        self.inner.ensure_open()?;
        Ok(StandardPageCursor {
            file: Arc::clone(&self.inner),
            intent,
            start_page_id: page_id,
            current: None,
            read_sequence: 0,
            closed: false,
        })
    }

    /// Number of pages currently resident
    pub fn resident_pages(&self) -> usize {
        self.inner.frames.lock().pages.len()
    }
}

impl PagedFile for StandardPagedFile {
    fn path(&self) -> &Path {
        &self.inner.path
    }

    fn page_size(&self) -> usize {
        self.inner.page_size
    }

    fn io(&self, page_id: u64, intent: PageIntent) -> Result<Box<dyn PageCursor>> {
        Ok(Box::new(self.cursor(page_id, intent)?))
    }

    fn last_page_id(&self) -> Result<Option<u64>> {
        self.inner.ensure_open()?;
        Ok(self.inner.page_count().checked_sub(1))
    }

    fn flush(&self) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.flush_pages()
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

impl Drop for StandardPagedFile {
    fn drop(&mut self) {
        if let Err(e) = self.inner.close() {
            tracing::warn!("Failed to unmap {:?}: {}", self.inner.path, e);
        }
    }
}

/// Cursor over a [`StandardPagedFile`]
pub struct StandardPageCursor {
    file: Arc<MappedFile>,
    intent: PageIntent,
    start_page_id: u64,
    current: Option<Arc<Page>>,
    /// Page sequence observed when the current read started
    read_sequence: u64,
    closed: bool,
}

impl StandardPageCursor {
    fn release(&mut self) {
        if let Some(page) = self.current.take() {
            self.file.unpin(&page, self.intent);
        }
    }

    fn pinned(&self) -> Result<&Arc<Page>> {
        self.current
            .as_ref()
            .ok_or_else(|| Error::page_cache("Cursor has no pinned page"))
    }
}

impl PageCursor for StandardPageCursor {
    fn next(&mut self) -> Result<bool> {
        let target = match &self.current {
            Some(page) => page.id + 1,
            None => self.start_page_id,
        };
        self.next_page(target)
    }

    fn next_page(&mut self, page_id: u64) -> Result<bool> {
        if self.closed {
            return Err(Error::page_cache("Page cursor is closed"));
        }

        self.release();

        if self.intent == PageIntent::SharedRead && page_id >= self.file.page_count() {
            return Ok(false);
        }

        let page = self.file.pin(page_id, self.intent)?;
        if self.intent == PageIntent::SharedRead {
            self.read_sequence = page.sequence();
        }
        self.current = Some(page);
        Ok(true)
    }

    fn current_page_id(&self) -> Option<u64> {
        self.current.as_ref().map(|page| page.id)
    }

    fn page_size(&self) -> usize {
        self.file.page_size
    }

    fn get_bytes(&mut self, offset: usize, dst: &mut [u8]) -> Result<()> {
        let page = self.pinned()?;
        check_bounds(page.id, offset, dst.len(), self.file.page_size)?;
        page.read(offset, dst);
        Ok(())
    }

    fn put_bytes(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        if self.intent != PageIntent::ExclusiveWrite {
            return Err(Error::page_cache("Cursor was opened for reading"));
        }
        let page = self.pinned()?;
        check_bounds(page.id, offset, src.len(), self.file.page_size)?;
        page.write(offset, src);
        Ok(())
    }

    fn should_retry(&mut self) -> Result<bool> {
        if self.intent == PageIntent::ExclusiveWrite {
            return Ok(false);
        }
        let Some(page) = &self.current else {
            return Ok(false);
        };

        let now = page.sequence();
        if now == self.read_sequence && now & 1 == 0 {
            return Ok(false);
        }

        self.read_sequence = page.stable_sequence();
        Ok(true)
    }

    fn close(&mut self) {
        self.release();
        self.closed = true;
    }
}

impl Drop for StandardPageCursor {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_cache::{PageEventKind, RecordingPageCacheTracer};
    use tempfile::TempDir;

    const PAGE_SIZE: usize = 64;

    fn cache(max_pages: usize) -> StandardPageCache {
        StandardPageCache::new(PageCacheConfig::default().with_max_pages(max_pages)).unwrap()
    }

    fn write_u64(file: &dyn PagedFile, page_id: u64, offset: usize, value: u64) {
        let mut cursor = file.io(page_id, PageIntent::ExclusiveWrite).unwrap();
        assert!(cursor.next().unwrap());
        cursor.put_u64(offset, value).unwrap();
        cursor.close();
    }

    fn read_u64(file: &dyn PagedFile, page_id: u64, offset: usize) -> u64 {
        let mut cursor = file.io(page_id, PageIntent::SharedRead).unwrap();
        assert!(cursor.next().unwrap());
        loop {
            let value = cursor.get_u64(offset).unwrap();
            if !cursor.should_retry().unwrap() {
                return value;
            }
        }
    }

    #[test]
    fn test_map_missing_without_create() {
        let dir = TempDir::new().unwrap();
        let result = cache(8).map(&dir.path().join("missing"), PAGE_SIZE, false);
        assert!(matches!(result, Err(Error::StoreNotFound { .. })));
    }

    #[test]
    fn test_map_rejects_bad_page_size() {
        let dir = TempDir::new().unwrap();
        let result = cache(8).map(&dir.path().join("f"), 0, true);
        assert!(matches!(result, Err(Error::FileMapping(_))));
    }

    #[test]
    fn test_map_twice_is_refused_until_closed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        let cache = cache(8);

        let file = cache.map(&path, PAGE_SIZE, true).unwrap();
        assert!(matches!(
            cache.map(&path, PAGE_SIZE, true),
            Err(Error::FileMapping(_))
        ));

        file.close().unwrap();
        cache.map(&path, PAGE_SIZE, false).unwrap();
    }

    #[test]
    fn test_write_read_and_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        let cache = cache(8);

        {
            let file = cache.map(&path, PAGE_SIZE, true).unwrap();
            assert_eq!(file.last_page_id().unwrap(), None);

            write_u64(file.as_ref(), 2, 8, 0xDEAD_BEEF);
            assert_eq!(file.last_page_id().unwrap(), Some(2));
            assert_eq!(read_u64(file.as_ref(), 2, 8), 0xDEAD_BEEF);
            file.close().unwrap();
        }

        let file = cache.map(&path, PAGE_SIZE, false).unwrap();
        assert_eq!(file.last_page_id().unwrap(), Some(2));
        assert_eq!(read_u64(file.as_ref(), 2, 8), 0xDEAD_BEEF);
        assert_eq!(read_u64(file.as_ref(), 1, 8), 0);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 3 * PAGE_SIZE as u64);
    }

    #[test]
    fn test_read_past_end_does_not_pin() {
        let dir = TempDir::new().unwrap();
        let file = cache(8).map(&dir.path().join("f"), PAGE_SIZE, true).unwrap();

        let mut cursor = file.io(0, PageIntent::SharedRead).unwrap();
        assert!(!cursor.next().unwrap());
        assert_eq!(cursor.current_page_id(), None);
        assert!(matches!(
            cursor.get_u8(0),
            Err(Error::PageCache(_))
        ));
    }

    #[test]
    fn test_read_cursor_cannot_write() {
        let dir = TempDir::new().unwrap();
        let file = cache(8).map(&dir.path().join("f"), PAGE_SIZE, true).unwrap();
        write_u64(file.as_ref(), 0, 0, 1);

        let mut cursor = file.io(0, PageIntent::SharedRead).unwrap();
        assert!(cursor.next().unwrap());
        assert!(cursor.put_u8(0, 1).is_err());
    }

    #[test]
    fn test_bounds_are_checked() {
        let dir = TempDir::new().unwrap();
        let file = cache(8).map(&dir.path().join("f"), PAGE_SIZE, true).unwrap();

        let mut cursor = file.io(0, PageIntent::ExclusiveWrite).unwrap();
        assert!(cursor.next().unwrap());
        assert!(matches!(
            cursor.put_u64(PAGE_SIZE - 4, 1),
            Err(Error::PageOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_eviction_writes_back_dirty_pages() {
        let dir = TempDir::new().unwrap();
        let tracer = Arc::new(RecordingPageCacheTracer::new(&[PageEventKind::Evict]));
        let cache =
            StandardPageCache::with_tracer(PageCacheConfig::default().with_max_pages(2), tracer.clone())
                .unwrap();
        let file = cache.map_file(&dir.path().join("f"), PAGE_SIZE, true).unwrap();

        for page_id in 0..6u64 {
            write_u64(file.as_ref(), page_id, 0, page_id * 10);
        }
        assert!(file.resident_pages() <= 2);
        assert!(tracer.count(PageEventKind::Evict) >= 4);

        for page_id in 0..6u64 {
            assert_eq!(read_u64(file.as_ref(), page_id, 0), page_id * 10);
        }
    }

    #[test]
    fn test_eviction_fails_when_everything_is_pinned() {
        let dir = TempDir::new().unwrap();
        let file = cache(1).map(&dir.path().join("f"), PAGE_SIZE, true).unwrap();
        write_u64(file.as_ref(), 0, 0, 1);
        write_u64(file.as_ref(), 1, 0, 1);

        let mut first = file.io(0, PageIntent::SharedRead).unwrap();
        assert!(first.next().unwrap());

        let mut second = file.io(1, PageIntent::SharedRead).unwrap();
        let result = second.next();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("pinned"));
    }

    #[test]
    fn test_should_retry_after_concurrent_write() {
        let dir = TempDir::new().unwrap();
        let file = cache(8).map(&dir.path().join("f"), PAGE_SIZE, true).unwrap();
        write_u64(file.as_ref(), 0, 0, 1);

        let mut reader = file.io(0, PageIntent::SharedRead).unwrap();
        assert!(reader.next().unwrap());
        assert_eq!(reader.get_u64(0).unwrap(), 1);
        assert!(!reader.should_retry().unwrap());

        write_u64(file.as_ref(), 0, 0, 2);

        assert!(reader.should_retry().unwrap());
        assert_eq!(reader.get_u64(0).unwrap(), 2);
        assert!(!reader.should_retry().unwrap());
    }

    #[test]
    fn test_pin_events_are_traced() {
        let dir = TempDir::new().unwrap();
        let tracer = Arc::new(RecordingPageCacheTracer::new(&[
            PageEventKind::Pin,
            PageEventKind::Fault,
        ]));
        let cache = StandardPageCache::with_tracer(PageCacheConfig::default(), tracer.clone()).unwrap();
        let file = cache.map(&dir.path().join("f"), PAGE_SIZE, true).unwrap();

        write_u64(file.as_ref(), 0, 0, 1);
        assert_eq!(tracer.try_observe(), Some(PageEvent::Fault { page_id: 0 }));
        assert_eq!(
            tracer.try_observe(),
            Some(PageEvent::Pin {
                page_id: 0,
                intent: PageIntent::ExclusiveWrite
            })
        );
        assert!(tracer.try_observe().is_none());
    }

    #[test]
    fn test_closed_file_rejects_cursors() {
        let dir = TempDir::new().unwrap();
        let file = cache(8).map(&dir.path().join("f"), PAGE_SIZE, true).unwrap();
        file.close().unwrap();
        file.close().unwrap(); // idempotent

        assert!(file.io(0, PageIntent::SharedRead).is_err());
        assert!(file.last_page_id().is_err());
    }
}
