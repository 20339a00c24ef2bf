//! In-memory page cache double

use super::CallLog;
use crate::page_cache::{PageCache, PageCursor, PageIntent, PagedFile, check_bounds};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Page cache keeping every mapped file in memory
///
/// Files survive `close` so a store can be reopened on the same cache.
pub struct MockPageCache {
    log: CallLog,
    files: Mutex<HashMap<PathBuf, Arc<MockFile>>>,
    retries: Arc<Mutex<VecDeque<bool>>>,
    fail_close: Arc<AtomicBool>,
}

impl MockPageCache {
    /// Cache logging into `log`
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            files: Mutex::new(HashMap::new()),
            retries: Arc::new(Mutex::new(VecDeque::new())),
            fail_close: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queue answers for the next `should_retry` calls of any cursor
    ///
    /// Once the queue is empty `should_retry` answers `false`.
    pub fn script_retries(&self, answers: &[bool]) {
        self.retries.lock().extend(answers.iter().copied());
    }

    /// Make `PagedFile::close` fail
    pub fn fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Whether `path` was ever mapped with create
    pub fn contains(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }
}

impl PageCache for MockPageCache {
    fn map(&self, path: &Path, page_size: usize, create: bool) -> Result<Arc<dyn PagedFile>> {
        self.log.record(format!("page_cache.map(create={})", create));

        let mut files = self.files.lock();
        let file = match files.get(path) {
            Some(file) => Arc::clone(file),
            None if !create => {
                return Err(Error::StoreNotFound {
                    path: path.to_path_buf(),
                });
            }
            None => {
                let file = Arc::new(MockFile {
                    path: path.to_path_buf(),
                    page_size,
                    pages: Mutex::new(BTreeMap::new()),
                    log: self.log.clone(),
                    retries: Arc::clone(&self.retries),
                });
                files.insert(path.to_path_buf(), Arc::clone(&file));
                file
            }
        };

        if file.page_size != page_size {
            return Err(Error::mapping(format!(
                "{} is mapped with page size {}",
                path.display(),
                file.page_size
            )));
        }

        Ok(Arc::new(MockPagedFile {
            file,
            fail_close: Arc::clone(&self.fail_close),
        }))
    }
}

struct MockFile {
    path: PathBuf,
    page_size: usize,
    pages: Mutex<BTreeMap<u64, Vec<u8>>>,
    log: CallLog,
    retries: Arc<Mutex<VecDeque<bool>>>,
}

/// One mapping of an in-memory file
pub struct MockPagedFile {
    file: Arc<MockFile>,
    fail_close: Arc<AtomicBool>,
}

impl PagedFile for MockPagedFile {
    fn path(&self) -> &Path {
        &self.file.path
    }

    fn page_size(&self) -> usize {
        self.file.page_size
    }

    fn io(&self, page_id: u64, intent: PageIntent) -> Result<Box<dyn PageCursor>> {
        self.file.log.record(format!("paged_file.io({})", page_id));
        Ok(Box::new(MockPageCursor {
            file: Arc::clone(&self.file),
            intent,
            start_page_id: page_id,
            current: None,
        }))
    }

    fn last_page_id(&self) -> Result<Option<u64>> {
        Ok(self.file.pages.lock().keys().next_back().copied())
    }

    fn flush(&self) -> Result<()> {
        self.file.log.record("paged_file.flush");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.file.log.record("paged_file.close");
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("scripted close failure")));
        }
        Ok(())
    }
}

/// Cursor over a [`MockPagedFile`]
pub struct MockPageCursor {
    file: Arc<MockFile>,
    intent: PageIntent,
    start_page_id: u64,
    current: Option<u64>,
}

impl MockPageCursor {
    fn pinned(&self) -> Result<u64> {
        self.current
            .ok_or_else(|| Error::page_cache("Cursor has no pinned page"))
    }
}

impl PageCursor for MockPageCursor {
    fn next(&mut self) -> Result<bool> {
        let target = self.current.map_or(self.start_page_id, |id| id + 1);
        self.next_page(target)
    }

    fn next_page(&mut self, page_id: u64) -> Result<bool> {
        self.file.log.record(format!("page_cursor.next({})", page_id));
        let mut pages = self.file.pages.lock();
        if !pages.contains_key(&page_id) {
            if self.intent == PageIntent::SharedRead {
                let last = pages.keys().next_back().copied();
                if last.is_none_or(|last| page_id > last) {
                    self.current = None;
                    return Ok(false);
                }
            }
            pages.insert(page_id, vec![0u8; self.file.page_size]);
        }
        self.current = Some(page_id);
        Ok(true)
    }

    fn current_page_id(&self) -> Option<u64> {
        self.current
    }

    fn page_size(&self) -> usize {
        self.file.page_size
    }

    fn get_bytes(&mut self, offset: usize, dst: &mut [u8]) -> Result<()> {
        let page_id = self.pinned()?;
        check_bounds(page_id, offset, dst.len(), self.file.page_size)?;
        let pages = self.file.pages.lock();
        match pages.get(&page_id) {
            Some(page) => dst.copy_from_slice(&page[offset..offset + dst.len()]),
            None => dst.fill(0),
        }
        Ok(())
    }

    fn put_bytes(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        if self.intent != PageIntent::ExclusiveWrite {
            return Err(Error::page_cache("Cursor was opened for reading"));
        }
        let page_id = self.pinned()?;
        check_bounds(page_id, offset, src.len(), self.file.page_size)?;
        let mut pages = self.file.pages.lock();
        let page = pages
            .entry(page_id)
            .or_insert_with(|| vec![0u8; self.file.page_size]);
        page[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn should_retry(&mut self) -> Result<bool> {
        self.file.log.record("page_cursor.should_retry");
        Ok(self.file.retries.lock().pop_front().unwrap_or(false))
    }

    fn close(&mut self) {
        self.file.log.record("page_cursor.close");
        self.current = None;
    }
}
