//! Record stores
//!
//! A [`RecordStore`] keeps fixed-size records of one type in a page-mapped
//! file. It owns the mapped file and the store's id generator, translates
//! record ids to page coordinates and drives store creation, opening and
//! recovery.
//!
//! # File layout
//!
//! ```text
//! <store>          [header][record 0][record 1] ... [record N-1]
//! <store>.version  [u8 marker length]["<type descriptor> <version>"]
//! <store>.id       id generator state
//! ```
//!
//! The header exists only for header-carrying formats; it occupies the
//! first record slots of page 0 (see [`StoreLayout`]). Records never straddle
//! pages. The version file is written once creation has finished and is
//! checked on every open.
//!
//! # Lifecycle
//!
//! `new` only wires collaborators. `initialise` maps the file (creating it
//! when allowed), validates the version marker and opens the id generator.
//! A store file without a version file is an interrupted creation and is
//! created again if it holds no pages.
//! `close` closes the mapped file and then the id generator, and is a no-op
//! the second time. Dropping an open store closes it.

mod cursor;
mod layout;
mod version;

pub use cursor::RecordCursor;
pub use layout::StoreLayout;
pub use version::version_file_path;

use crate::config::StoreConfig;
use crate::format::{
    DynamicRecordFormat, IntStoreHeaderFormat, NoStoreHeaderFormat, NodeRecordFormat,
    RecordFormat, RelationshipRecordFormat, StoreHeaderFormat,
};
use crate::id::{INTEGER_MINUS_ONE, IdGenerator, IdGeneratorFactory, IdType, id_file_path};
use crate::page_cache::{PageCache, PageCursor, PageIntent, PagedFile};
use crate::record::{Record, RecordLoad};
use crate::{Error, Result};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Format version written into every store created by this crate
pub const STORE_VERSION: &str = "v1.0";

/// Type descriptor of node stores
pub const NODE_STORE_TYPE_DESCRIPTOR: &str = "NodeStore";

/// Type descriptor of relationship stores
pub const RELATIONSHIP_STORE_TYPE_DESCRIPTOR: &str = "RelationshipStore";

/// Type descriptor of string block stores
pub const STRING_STORE_TYPE_DESCRIPTOR: &str = "StringStore";

/// Type descriptor of array block stores
pub const ARRAY_STORE_TYPE_DESCRIPTOR: &str = "ArrayStore";

/// Resources held while the store is open
struct OpenStore<Hd> {
    paged_file: Arc<dyn PagedFile>,
    id_generator: Arc<dyn IdGenerator>,
    layout: StoreLayout,
    header: Hd,
}

/// Store of fixed-size records of one type
pub struct RecordStore<F, H = NoStoreHeaderFormat>
where
    F: RecordFormat<H>,
    H: StoreHeaderFormat,
{
    path: PathBuf,
    config: StoreConfig,
    id_type: IdType,
    type_descriptor: String,
    marker: String,
    format: F,
    header_format: H,
    id_generator_factory: Arc<dyn IdGeneratorFactory>,
    page_cache: Arc<dyn PageCache>,
    open: Option<OpenStore<H::Header>>,
    closed: bool,
}

impl<F, H> RecordStore<F, H>
where
    F: RecordFormat<H>,
    H: StoreHeaderFormat,
{
    /// Wire a store; nothing is touched until [`initialise`](Self::initialise)
    pub fn new(
        path: impl Into<PathBuf>,
        config: StoreConfig,
        id_type: IdType,
        id_generator_factory: Arc<dyn IdGeneratorFactory>,
        page_cache: Arc<dyn PageCache>,
        type_descriptor: impl Into<String>,
        format: F,
        header_format: H,
        version: &str,
    ) -> Result<Self> {
        config.validate()?;
        let type_descriptor = type_descriptor.into();
        let marker = version::marker(&type_descriptor, version)?;

        Ok(Self {
            path: path.into(),
            config,
            id_type,
            type_descriptor,
            marker,
            format,
            header_format,
            id_generator_factory,
            page_cache,
            open: None,
            closed: false,
        })
    }

    /// Map the store file and open its id generator
    ///
    /// A missing file fails with [`Error::StoreNotFound`] unless
    /// `create_if_absent` is set, in which case the header and format
    /// specific content are written first and the version file last. An
    /// existing store whose version file names another type descriptor or
    /// version fails with [`Error::StoreVersionMismatch`]. Calling this on an
    /// open store does nothing.
    pub fn initialise(&mut self, create_if_absent: bool) -> Result<()> {
        if self.closed {
            return Err(Error::closed(format!(
                "{} at {} has been closed",
                self.type_descriptor,
                self.path.display()
            )));
        }
        if self.open.is_some() {
            tracing::debug!("{} at {:?} is already open", self.type_descriptor, self.path);
            return Ok(());
        }

        let page_size = self.config.page_size;
        let (paged_file, created) = match self.page_cache.map(&self.path, page_size, false) {
            Ok(file) => (file, false),
            Err(Error::StoreNotFound { .. }) if create_if_absent => {
                (self.page_cache.map(&self.path, page_size, true)?, true)
            }
            Err(e) => return Err(e),
        };

        match self.open_mapped(&paged_file, created) {
            Ok(open) => {
                self.open = Some(open);
                Ok(())
            }
            Err(e) => {
                if let Err(close_err) = paged_file.close() {
                    tracing::warn!("Failed to unmap {:?}: {}", self.path, close_err);
                }
                if created {
                    for path in [self.path.clone(), version_file_path(&self.path)] {
                        if let Err(remove_err) = std::fs::remove_file(&path) {
                            tracing::debug!(
                                "Could not remove partially created {:?}: {}",
                                path,
                                remove_err
                            );
                        }
                    }
                }
                Err(e)
            }
        }
    }

    fn open_mapped(
        &self,
        paged_file: &Arc<dyn PagedFile>,
        created: bool,
    ) -> Result<OpenStore<H::Header>> {
        let page_size = self.config.page_size;
        let header_size = self.header_format.header_size();
        if header_size > page_size {
            return Err(Error::layout(format!(
                "{} header of {} bytes does not fit a {} byte page",
                self.type_descriptor, header_size, page_size
            )));
        }

        let version_path = version_file_path(&self.path);
        let found = if created {
            None
        } else {
            version::read_marker_file(self.page_cache.as_ref(), &version_path)?
        };
        match found {
            Some(found) if found != self.marker => return Err(self.version_mismatch(found)),
            Some(_) => {}
            None if created || paged_file.last_page_id()?.is_none() => {
                let record_size = self
                    .format
                    .record_size(&self.header_format.empty_header())?;
                StoreLayout::new(page_size, record_size, header_size)?;
                self.create_store_file(paged_file.as_ref())?;
                version::write_marker_file(self.page_cache.as_ref(), &version_path, &self.marker)?;
                tracing::info!("Created {} at {:?}", self.type_descriptor, self.path);
            }
            None => return Err(self.version_mismatch(String::new())),
        }

        let header = self.read_header(paged_file.as_ref())?;
        let record_size = self.format.record_size(&header)?;
        let layout = StoreLayout::new(page_size, record_size, header_size)?;

        let scan = || self.scan_pages(paged_file.as_ref(), &layout);
        let id_generator = self.id_generator_factory.open(
            &id_file_path(&self.path),
            self.config.grab_size,
            self.id_type,
            &scan,
            self.format.max_id(),
        )?;

        let open = OpenStore {
            paged_file: Arc::clone(paged_file),
            id_generator,
            layout,
            header,
        };

        if !self.config.rebuild_id_generators_fast && open.id_generator.needs_rebuild() {
            if let Err(e) = self.rebuild(&open) {
                if let Err(close_err) = open.id_generator.close() {
                    tracing::warn!("Failed to close id generator of {:?}: {}", self.path, close_err);
                }
                return Err(e);
            }
        }

        tracing::info!(
            "Opened {} at {:?}: record size {}, {} records per page, high id {}",
            self.type_descriptor,
            self.path,
            layout.record_size(),
            layout.records_per_page(),
            open.id_generator.high_id()?
        );
        Ok(open)
    }

    fn create_store_file(&self, file: &dyn PagedFile) -> Result<()> {
        let header_size = self.header_format.header_size();
        if header_size > 0 {
            let mut cursor = file.io(0, PageIntent::ExclusiveWrite)?;
            if !cursor.next()? {
                return Err(Error::page_cache("Cannot pin the header page"));
            }
            self.header_format.write_header(&mut *cursor, 0)?;
            cursor.close();
        }

        self.format.initialise_new_store_file(file)?;
        file.flush()
    }

    fn read_header(&self, file: &dyn PagedFile) -> Result<H::Header> {
        let header_size = self.header_format.header_size();
        if header_size == 0 {
            return Ok(self.header_format.empty_header());
        }

        let mut cursor = file.io(0, PageIntent::SharedRead)?;
        if !cursor.next()? {
            return Err(Error::layout(format!(
                "{} at {:?} has no header page",
                self.type_descriptor, self.path
            )));
        }

        let header = loop {
            let header = self.header_format.read_header(&mut *cursor, 0);
            if !cursor.should_retry()? {
                break header?;
            }
        };
        cursor.close();
        Ok(header)
    }

    fn version_mismatch(&self, found: String) -> Error {
        Error::StoreVersionMismatch {
            path: self.path.clone(),
            expected: self.marker.clone(),
            found,
        }
    }

    fn open_store(&self) -> Result<&OpenStore<H::Header>> {
        self.open.as_ref().ok_or_else(|| {
            Error::closed(format!(
                "{} at {} is not initialised",
                self.type_descriptor,
                self.path.display()
            ))
        })
    }

    /// Store file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Id type of the store's generator
    pub fn id_type(&self) -> IdType {
        self.id_type
    }

    /// Store type descriptor, e.g. `NodeStore`
    pub fn type_descriptor(&self) -> &str {
        &self.type_descriptor
    }

    /// `"<type descriptor> <version>"` as validated on open
    pub fn version_marker(&self) -> &str {
        &self.marker
    }

    /// Record format of the store
    pub fn format(&self) -> &F {
        &self.format
    }

    /// Whether `initialise` succeeded and `close` has not run
    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Decoded store header
    pub fn header(&self) -> Result<&H::Header> {
        Ok(&self.open_store()?.header)
    }

    /// Page geometry of the open store
    pub fn layout(&self) -> Result<StoreLayout> {
        Ok(self.open_store()?.layout)
    }

    /// Record size in bytes
    pub fn record_size(&self) -> Result<usize> {
        Ok(self.open_store()?.layout.record_size())
    }

    /// Whole records per page
    pub fn records_per_page(&self) -> Result<u64> {
        Ok(self.open_store()?.layout.records_per_page())
    }

    /// Page holding record `id`
    pub fn page_id_for_record(&self, id: u64) -> Result<u64> {
        Ok(self.open_store()?.layout.page_id_for_record(id))
    }

    /// Byte offset of record `id` inside its page
    pub fn offset_for_id(&self, id: u64) -> Result<usize> {
        Ok(self.open_store()?.layout.offset_for_id(id))
    }

    /// The store's id generator
    pub fn id_generator(&self) -> Result<Arc<dyn IdGenerator>> {
        Ok(Arc::clone(&self.open_store()?.id_generator))
    }

    /// Empty record with no page state
    pub fn new_record(&self) -> F::Record {
        self.format.new_record()
    }

    /// Cursor reading into `record`
    pub fn new_record_cursor<'a>(
        &'a self,
        record: &'a mut F::Record,
    ) -> Result<RecordCursor<'a, F, H>> {
        let open = self.open_store()?;
        Ok(RecordCursor::new(self, open, record))
    }

    /// Allocate an id; concurrent callers never get the same id
    pub fn next_id(&self) -> Result<u64> {
        self.open_store()?.id_generator.next_id()
    }

    /// Return `id` to the id generator
    pub fn free_id(&self, id: u64) -> Result<()> {
        self.open_store()?.id_generator.free_id(id)
    }

    /// One past the greatest id ever allocated
    pub fn high_id(&self) -> Result<u64> {
        self.open_store()?.id_generator.high_id()
    }

    /// Set the high id of the id generator
    pub fn set_high_id(&self, high_id: u64) -> Result<()> {
        self.open_store()?.id_generator.set_high_id(high_id)
    }

    /// Ids below the high id that are not free
    pub fn number_of_ids_in_use(&self) -> Result<u64> {
        self.open_store()?.id_generator.number_of_ids_in_use()
    }

    /// Let the format finalize derived fields of `record`
    pub fn prepare_for_commit(&self, record: &mut F::Record) -> Result<()> {
        let open = self.open_store()?;
        self.format.prepare(record, open.layout.record_size())
    }

    /// Write `record` to its slot
    ///
    /// A record that is not in use is a deletion and its id is freed. Writing
    /// an in-use record at or above the high id raises the high id. A
    /// deletion the id generator would refuse, such as a second delete or an
    /// id at or above the high id, fails before the slot is touched.
    pub fn update_record(&self, record: &F::Record) -> Result<()> {
        let open = self.open_store()?;
        let id = record.id();
        self.check_id(id)?;
        if !record.in_use() {
            open.id_generator.check_free(id)?;
        }

        let layout = open.layout;
        let page_id = layout.page_id_for_record(id);
        let mut cursor = open.paged_file.io(page_id, PageIntent::ExclusiveWrite)?;
        if !cursor.next()? {
            return Err(Error::page_cache(format!(
                "Cannot pin page {} of {:?} for writing",
                page_id, self.path
            )));
        }
        self.format.write(
            record,
            &mut *cursor,
            layout.offset_for_id(id),
            layout.record_size(),
        )?;
        cursor.close();

        if record.in_use() {
            open.id_generator.raise_high_id(id + 1)
        } else {
            open.id_generator.free_id(id)
        }
    }

    fn check_id(&self, id: u64) -> Result<()> {
        if id == INTEGER_MINUS_ONE {
            return Err(Error::invalid_id(format!(
                "{} id {} is reserved",
                self.type_descriptor, id
            )));
        }
        if id > self.format.max_id() {
            return Err(Error::invalid_id(format!(
                "{} id {} exceeds max id {}",
                self.type_descriptor,
                id,
                self.format.max_id()
            )));
        }
        Ok(())
    }

    /// Read record `id` into `record`
    ///
    /// Returns whether a usable record was placed, see [`RecordLoad`].
    pub fn get_record(&self, id: u64, record: &mut F::Record, mode: RecordLoad) -> Result<bool> {
        let mut cursor = self.new_record_cursor(record)?;
        cursor.acquire(id, mode)?;
        cursor.next_at(id)
    }

    /// Whether record `id` is in use, reading only its in-use flag
    pub fn is_in_use(&self, id: u64) -> Result<bool> {
        let open = self.open_store()?;
        let layout = open.layout;
        let mut cursor = open
            .paged_file
            .io(layout.page_id_for_record(id), PageIntent::SharedRead)?;
        if !cursor.next()? {
            return Ok(false);
        }

        let offset = layout.offset_for_id(id);
        loop {
            let in_use = self.format.is_in_use(&mut *cursor, offset);
            if !cursor.should_retry()? {
                return in_use;
            }
        }
    }

    /// Visit every record below the high id
    ///
    /// `mode` decides which slots reach `processor`: in-use records only for
    /// [`RecordLoad::Normal`], every slot for [`RecordLoad::Force`], and an
    /// unused slot aborts a [`RecordLoad::Check`] scan. The first error,
    /// from the store or from `processor`, stops the scan and is returned.
    pub fn scan<E, P>(
        &self,
        mode: RecordLoad,
        record: &mut F::Record,
        mut processor: P,
    ) -> std::result::Result<(), E>
    where
        E: From<Error>,
        P: FnMut(&F::Record) -> std::result::Result<(), E>,
    {
        let high_id = self.high_id()?;
        let mut cursor = self.new_record_cursor(record)?;
        cursor.acquire(0, mode)?;

        for id in 0..high_id {
            if cursor.next_at(id)? {
                processor(cursor.get())?;
            }
        }
        Ok(())
    }

    /// Visit every in-use record below the high id
    pub fn accept<E, P>(&self, record: &mut F::Record, processor: P) -> std::result::Result<(), E>
    where
        E: From<Error>,
        P: FnMut(&F::Record) -> std::result::Result<(), E>,
    {
        self.scan(RecordLoad::Normal, record, processor)
    }

    /// One past the highest in-use record found by scanning backward from
    /// the end of the file
    pub fn scan_for_high_id(&self) -> Result<u64> {
        let open = self.open_store()?;
        self.scan_pages(open.paged_file.as_ref(), &open.layout)
    }

    fn scan_pages(&self, file: &dyn PagedFile, layout: &StoreLayout) -> Result<u64> {
        let Some(last_page) = file.last_page_id()? else {
            return Ok(0);
        };

        let mut cursor = file.io(last_page, PageIntent::SharedRead)?;
        for page_id in (0..=last_page).rev() {
            if !cursor.next_page(page_id)? {
                continue;
            }
            let ids = layout.ids_on_page(page_id);
            let highest = loop {
                let found = self.highest_in_use(&mut *cursor, layout, ids.clone());
                if !cursor.should_retry()? {
                    break found?;
                }
            };
            if let Some(id) = highest {
                tracing::debug!(
                    "Scanned {:?} for high id: last in-use record {} on page {}",
                    self.path,
                    id,
                    page_id
                );
                return Ok(id + 1);
            }
        }
        Ok(0)
    }

    fn highest_in_use(
        &self,
        cursor: &mut dyn PageCursor,
        layout: &StoreLayout,
        ids: Range<u64>,
    ) -> Result<Option<u64>> {
        for id in ids.rev() {
            if self.format.is_in_use(cursor, layout.offset_for_id(id))? {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Rebuild the id generator's free set from the records on disk
    ///
    /// Ids handed out but not yet written stay allocated.
    pub fn rebuild_id_generator(&self) -> Result<()> {
        let open = self.open_store()?;
        self.rebuild(open)
    }

    fn rebuild(&self, open: &OpenStore<H::Header>) -> Result<()> {
        let layout = open.layout;
        let scanned = self.scan_pages(open.paged_file.as_ref(), &layout)?;
        let high_id = scanned.max(open.id_generator.high_id()?);

        let mut free_ids = Vec::new();
        if scanned > 0 {
            let last_page = layout.page_id_for_record(scanned - 1);
            let mut cursor = open.paged_file.io(0, PageIntent::SharedRead)?;
            for page_id in 0..=last_page {
                if !cursor.next_page(page_id)? {
                    break;
                }
                let on_page = layout.ids_on_page(page_id);
                let ids = on_page.start..on_page.end.min(scanned);
                let unused = loop {
                    let found = self.unused_ids(&mut *cursor, &layout, ids.clone());
                    if !cursor.should_retry()? {
                        break found?;
                    }
                };
                free_ids.extend(unused);
            }
        }

        tracing::info!(
            "Rebuilding id generator of {:?}: high id {}, {} free ids",
            self.path,
            high_id,
            free_ids.len()
        );
        open.id_generator.rebuild(high_id, &free_ids)
    }

    fn unused_ids(
        &self,
        cursor: &mut dyn PageCursor,
        layout: &StoreLayout,
        ids: Range<u64>,
    ) -> Result<Vec<u64>> {
        let mut unused = Vec::new();
        for id in ids {
            if id != INTEGER_MINUS_ONE && !self.format.is_in_use(cursor, layout.offset_for_id(id))? {
                unused.push(id);
            }
        }
        Ok(unused)
    }

    /// Write dirty pages of the store file to disk
    pub fn flush(&self) -> Result<()> {
        self.open_store()?.paged_file.flush()
    }

    /// Close the mapped file, then the id generator
    ///
    /// The id generator is closed even when closing the file fails; both
    /// failures are reported together. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let Some(open) = self.open.take() else {
            if self.closed {
                tracing::warn!("{} at {:?} is already closed", self.type_descriptor, self.path);
            }
            self.closed = true;
            return Ok(());
        };
        self.closed = true;

        let page_file = open.paged_file.close();
        let id_generator = open.id_generator.close();

        match (page_file, id_generator) {
            (Ok(()), Ok(())) => {
                tracing::debug!("Closed {} at {:?}", self.type_descriptor, self.path);
                Ok(())
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Err(page_file), Err(id_generator)) => Err(Error::Close {
                page_file: Box::new(page_file),
                id_generator: Box::new(id_generator),
            }),
        }
    }
}

impl<F, H> Drop for RecordStore<F, H>
where
    F: RecordFormat<H>,
    H: StoreHeaderFormat,
{
    fn drop(&mut self) {
        if self.open.is_some() {
            if let Err(e) = self.close() {
                tracing::error!("Failed to close {} at {:?}: {}", self.type_descriptor, self.path, e);
            }
        }
    }
}

impl RecordStore<NodeRecordFormat> {
    /// Node store at `path`
    pub fn node_store(
        path: impl Into<PathBuf>,
        config: StoreConfig,
        id_generator_factory: Arc<dyn IdGeneratorFactory>,
        page_cache: Arc<dyn PageCache>,
    ) -> Result<Self> {
        Self::new(
            path,
            config,
            IdType::Node,
            id_generator_factory,
            page_cache,
            NODE_STORE_TYPE_DESCRIPTOR,
            NodeRecordFormat,
            NoStoreHeaderFormat,
            STORE_VERSION,
        )
    }
}

impl RecordStore<RelationshipRecordFormat> {
    /// Relationship store at `path`
    pub fn relationship_store(
        path: impl Into<PathBuf>,
        config: StoreConfig,
        id_generator_factory: Arc<dyn IdGeneratorFactory>,
        page_cache: Arc<dyn PageCache>,
    ) -> Result<Self> {
        Self::new(
            path,
            config,
            IdType::Relationship,
            id_generator_factory,
            page_cache,
            RELATIONSHIP_STORE_TYPE_DESCRIPTOR,
            RelationshipRecordFormat,
            NoStoreHeaderFormat,
            STORE_VERSION,
        )
    }
}

impl RecordStore<DynamicRecordFormat, IntStoreHeaderFormat> {
    /// String block store at `path` with `payload_size` bytes per new block
    pub fn string_store(
        path: impl Into<PathBuf>,
        config: StoreConfig,
        id_generator_factory: Arc<dyn IdGeneratorFactory>,
        page_cache: Arc<dyn PageCache>,
        payload_size: u32,
    ) -> Result<Self> {
        Self::new(
            path,
            config,
            IdType::StringBlock,
            id_generator_factory,
            page_cache,
            STRING_STORE_TYPE_DESCRIPTOR,
            DynamicRecordFormat,
            DynamicRecordFormat::header_format(payload_size),
            STORE_VERSION,
        )
    }

    /// Array block store at `path` with `payload_size` bytes per new block
    pub fn array_store(
        path: impl Into<PathBuf>,
        config: StoreConfig,
        id_generator_factory: Arc<dyn IdGeneratorFactory>,
        page_cache: Arc<dyn PageCache>,
        payload_size: u32,
    ) -> Result<Self> {
        Self::new(
            path,
            config,
            IdType::ArrayBlock,
            id_generator_factory,
            page_cache,
            ARRAY_STORE_TYPE_DESCRIPTOR,
            DynamicRecordFormat,
            DynamicRecordFormat::header_format(payload_size),
            STORE_VERSION,
        )
    }
}
