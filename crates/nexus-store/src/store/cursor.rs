//! Record cursor
//!
//! A [`RecordCursor`] reads records through one read page cursor and decodes
//! them into a record owned by the caller. Records on the page that is
//! already pinned are read without pinning again.

use super::{OpenStore, RecordStore};
use crate::format::{RecordFormat, StoreHeaderFormat};
use crate::page_cache::{PageCursor, PageIntent};
use crate::record::{Record, RecordLoad};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    Unbound,
    Acquired,
    Closed,
}

/// Positionable, retrying reader over the records of one store
///
/// The cursor borrows the caller's record as scratch storage; every
/// successful read overwrites its fields.
pub struct RecordCursor<'a, F, H>
where
    F: RecordFormat<H>,
    H: StoreHeaderFormat,
{
    store: &'a RecordStore<F, H>,
    open: &'a OpenStore<H::Header>,
    record: &'a mut F::Record,
    page_cursor: Option<Box<dyn PageCursor>>,
    state: CursorState,
    mode: RecordLoad,
    next_id: u64,
}

impl<'a, F, H> RecordCursor<'a, F, H>
where
    F: RecordFormat<H>,
    H: StoreHeaderFormat,
{
    pub(super) fn new(
        store: &'a RecordStore<F, H>,
        open: &'a OpenStore<H::Header>,
        record: &'a mut F::Record,
    ) -> Self {
        Self {
            store,
            open,
            record,
            page_cursor: None,
            state: CursorState::Unbound,
            mode: RecordLoad::Normal,
            next_id: 0,
        }
    }

    /// Bind the cursor to the page of `start_id` without reading anything
    ///
    /// Acquiring again repositions the cursor and replaces the load mode.
    pub fn acquire(&mut self, start_id: u64, mode: RecordLoad) -> Result<()> {
        if self.state == CursorState::Closed {
            return Err(Error::CursorClosed);
        }

        if self.page_cursor.is_none() {
            let page_id = self.open.layout.page_id_for_record(start_id);
            self.page_cursor = Some(self.open.paged_file.io(page_id, PageIntent::SharedRead)?);
        }

        self.mode = mode;
        self.next_id = start_id;
        self.state = CursorState::Acquired;
        Ok(())
    }

    /// Read record `id` into the scratch record
    ///
    /// Returns whether a usable record was placed, according to the load
    /// mode given at acquire time. An unbound cursor is acquired at `id`
    /// with [`RecordLoad::Normal`] first.
    pub fn next_at(&mut self, id: u64) -> Result<bool> {
        match self.state {
            CursorState::Closed => return Err(Error::CursorClosed),
            CursorState::Unbound => self.acquire(id, RecordLoad::Normal)?,
            CursorState::Acquired => {}
        }

        let layout = self.open.layout;
        let page_id = layout.page_id_for_record(id);
        let offset = layout.offset_for_id(id);
        let record_size = layout.record_size();

        let Some(cursor) = self.page_cursor.as_mut() else {
            return Err(Error::CursorClosed);
        };

        if cursor.current_page_id() != Some(page_id) && !cursor.next_page(page_id)? {
            // Past the end of the file: nothing was ever written here
            self.record.initialize_unused(id);
            return self.apply_mode(id);
        }

        loop {
            let decoded = self
                .store
                .format
                .read(self.record, &mut **cursor, offset, record_size);
            if !cursor.should_retry()? {
                decoded?;
                break;
            }
        }

        self.record.set_id(id);
        self.apply_mode(id)
    }

    /// Advance to the next usable record below the high id
    pub fn next(&mut self) -> Result<bool> {
        match self.state {
            CursorState::Closed => return Err(Error::CursorClosed),
            CursorState::Unbound => self.acquire(0, RecordLoad::Normal)?,
            CursorState::Acquired => {}
        }

        let high_id = self.open.id_generator.high_id()?;
        while self.next_id < high_id {
            let id = self.next_id;
            self.next_id += 1;
            if self.next_at(id)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The record placed by the last read
    pub fn get(&self) -> &F::Record {
        &*self.record
    }

    /// Load mode of the current acquisition
    pub fn mode(&self) -> RecordLoad {
        self.mode
    }

    /// Release the page cursor; later reads fail
    pub fn close(&mut self) {
        if let Some(mut cursor) = self.page_cursor.take() {
            cursor.close();
        }
        self.state = CursorState::Closed;
    }

    fn apply_mode(&mut self, id: u64) -> Result<bool> {
        if self.record.in_use() {
            return Ok(true);
        }
        match self.mode {
            RecordLoad::Normal => {
                self.record.initialize_unused(id);
                Ok(false)
            }
            RecordLoad::Force => Ok(true),
            RecordLoad::Check => Err(Error::RecordNotInUse {
                id,
                store: self.store.type_descriptor.clone(),
            }),
        }
    }
}

impl<F, H> Drop for RecordCursor<'_, F, H>
where
    F: RecordFormat<H>,
    H: StoreHeaderFormat,
{
    fn drop(&mut self) {
        if let Some(mut cursor) = self.page_cursor.take() {
            cursor.close();
        }
    }
}
