//! Page frame held by the standard page cache

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Page in the frame table
///
/// `sequence` is even while the page is stable and odd while a write cursor
/// holds it. Readers compare the value before and after reading to detect
/// concurrent writes.
#[derive(Debug)]
pub(crate) struct Page {
    /// Page ID
    pub(crate) id: u64,
    /// Page bytes (page size bytes)
    data: RwLock<Box<[u8]>>,
    /// Write sequence counter
    sequence: AtomicU64,
    /// Modified since the last write-back
    dirty: AtomicBool,
    /// Number of cursors holding the page
    pin_count: AtomicU32,
    /// Reference bit for Clock algorithm
    reference_bit: AtomicBool,
}

impl Page {
    /// Create a page over `data`
    pub(crate) fn new(id: u64, data: Box<[u8]>) -> Self {
        Self {
            id,
            data: RwLock::new(data),
            sequence: AtomicU64::new(0),
            dirty: AtomicBool::new(false),
            pin_count: AtomicU32::new(0),
            reference_bit: AtomicBool::new(true), // Newly loaded pages are "referenced"
        }
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Clear the dirty flag, returning whether it was set
    pub(crate) fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn is_pinned(&self) -> bool {
        self.pin_count.load(Ordering::Acquire) > 0
    }

    pub(crate) fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns true if this was the last pin
    pub(crate) fn unpin(&self) -> bool {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        prev == 1
    }

    pub(crate) fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    pub(crate) fn set_reference_bit(&self) {
        self.reference_bit.store(true, Ordering::Release);
    }

    /// Clear and get reference bit (for Clock algorithm)
    pub(crate) fn clear_reference_bit(&self) -> bool {
        self.reference_bit.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Spin until no writer holds the page and return the stable sequence
    pub(crate) fn stable_sequence(&self) -> u64 {
        let mut spins = 0u32;
        loop {
            let seq = self.sequence();
            if seq & 1 == 0 {
                return seq;
            }
            backoff(&mut spins);
        }
    }

    /// Take the page exclusively for writing
    pub(crate) fn begin_write(&self) {
        let mut spins = 0u32;
        loop {
            let seq = self.sequence();
            if seq & 1 == 0
                && self
                    .sequence
                    .compare_exchange_weak(seq, seq + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                return;
            }
            backoff(&mut spins);
        }
    }

    /// Release the exclusive write and publish the new contents
    pub(crate) fn end_write(&self) {
        self.mark_dirty();
        self.sequence.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn read(&self, offset: usize, dst: &mut [u8]) {
        let data = self.data.read();
        dst.copy_from_slice(&data[offset..offset + dst.len()]);
    }

    pub(crate) fn write(&self, offset: usize, src: &[u8]) {
        let mut data = self.data.write();
        data[offset..offset + src.len()].copy_from_slice(src);
    }

    /// Copy of the page contents taken while no writer held the page
    pub(crate) fn stable_copy(&self) -> Vec<u8> {
        loop {
            let seq = self.stable_sequence();
            let copy = self.data.read().to_vec();
            if self.sequence() == seq {
                return copy;
            }
        }
    }
}

fn backoff(spins: &mut u32) {
    if *spins < 64 {
        std::hint::spin_loop();
    } else {
        std::thread::yield_now();
    }
    *spins = spins.saturating_add(1);
}
