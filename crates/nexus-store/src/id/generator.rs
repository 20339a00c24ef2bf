//! File-persisted id generator

use super::file::{self, IdFileState, IdFileStatus};
use super::{INTEGER_MINUS_ONE, IdGenerator, IdType};
use crate::{Error, Result};
use parking_lot::Mutex;
use roaring::RoaringTreemap;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Id generator backed by an id file
///
/// Freed ids live in a compressed bitmap. Reuse is batched: up to
/// `grab_size` of the lowest free ids move into a reservation queue and are
/// handed out from there, so the bitmap is touched once per batch. Reserved
/// ids that are still unused at close go back into the persisted free set.
pub struct DefaultIdGenerator {
    path: PathBuf,
    id_type: IdType,
    grab_size: usize,
    max_id: u64,
    state: Mutex<GeneratorState>,
}

struct GeneratorState {
    high_id: u64,
    free: RoaringTreemap,
    reserved: VecDeque<u64>,
    needs_rebuild: bool,
    closed: bool,
}

impl GeneratorState {
    fn snapshot(&self, sticky: bool) -> IdFileState {
        let mut free_ids: Vec<u64> = self.free.iter().collect();
        free_ids.extend(self.reserved.iter().copied());
        free_ids.sort_unstable();
        IdFileState {
            sticky,
            high_id: self.high_id,
            free_ids,
        }
    }

    fn refill(&mut self, grab_size: usize) {
        let batch: Vec<u64> = self.free.iter().take(grab_size).collect();
        for id in &batch {
            self.free.remove(*id);
        }
        self.reserved.extend(batch);
    }

    fn is_free(&self, id: u64) -> bool {
        self.free.contains(id) || self.reserved.contains(&id)
    }
}

impl DefaultIdGenerator {
    /// Open the generator persisted at `path`, creating it if absent
    ///
    /// A missing, corrupt or sticky id file starts a degraded generator whose
    /// high id comes from `high_id` and whose free set is empty.
    pub fn open(
        path: &Path,
        grab_size: usize,
        id_type: IdType,
        high_id: &dyn Fn() -> Result<u64>,
        max_id: u64,
    ) -> Result<Self> {
        if grab_size == 0 {
            return Err(Error::config("grab_size must be > 0"));
        }

        let state = match file::read(path)? {
            IdFileStatus::Clean(persisted) => {
                let mut free = RoaringTreemap::new();
                for id in persisted.free_ids {
                    if id < persisted.high_id {
                        free.insert(id);
                    }
                }
                tracing::debug!(
                    "Opened {} id generator {:?}: high id {}, {} free",
                    id_type.name(),
                    path,
                    persisted.high_id,
                    free.len()
                );
                GeneratorState {
                    high_id: persisted.high_id,
                    free,
                    reserved: VecDeque::new(),
                    needs_rebuild: false,
                    closed: false,
                }
            }
            status => {
                let recovered = high_id()?;
                match status {
                    IdFileStatus::Missing => tracing::info!(
                        "No id file at {:?}, starting {} ids at {}",
                        path,
                        id_type.name(),
                        recovered
                    ),
                    IdFileStatus::Sticky => tracing::warn!(
                        "Id file {:?} was not closed cleanly, recovered {} high id {}",
                        path,
                        id_type.name(),
                        recovered
                    ),
                    IdFileStatus::Corrupt(reason) => tracing::warn!(
                        "Id file {:?} is corrupt ({}), recovered {} high id {}",
                        path,
                        reason,
                        id_type.name(),
                        recovered
                    ),
                    IdFileStatus::Clean(_) => {}
                }
                GeneratorState {
                    high_id: recovered,
                    free: RoaringTreemap::new(),
                    reserved: VecDeque::new(),
                    needs_rebuild: true,
                    closed: false,
                }
            }
        };

        // Mark the file as in use until a clean close
        file::write(path, &state.snapshot(true))?;

        Ok(Self {
            path: path.to_path_buf(),
            id_type,
            grab_size,
            max_id,
            state: Mutex::new(state),
        })
    }

    /// Path of the id file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn validate_free(&self, state: &GeneratorState, id: u64) -> Result<()> {
        if id >= state.high_id {
            return Err(Error::invalid_id(format!(
                "Cannot free {} id {}: high id is {}",
                self.id_type.name(),
                id,
                state.high_id
            )));
        }
        if id == INTEGER_MINUS_ONE {
            return Err(Error::invalid_id(format!("Id {} is reserved", id)));
        }
        if state.is_free(id) {
            return Err(Error::invalid_id(format!(
                "{} id {} is already free",
                self.id_type.name(),
                id
            )));
        }
        Ok(())
    }

    fn closed_error(&self) -> Error {
        Error::GeneratorClosed(self.id_type)
    }
}

impl IdGenerator for DefaultIdGenerator {
    fn id_type(&self) -> IdType {
        self.id_type
    }

    fn next_id(&self) -> Result<u64> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(self.closed_error());
        }

        if state.reserved.is_empty() && !state.free.is_empty() {
            state.refill(self.grab_size);
        }
        if let Some(id) = state.reserved.pop_front() {
            return Ok(id);
        }

        loop {
            let id = state.high_id;
            if id > self.max_id {
                return Err(Error::IdCapacityExceeded {
                    id_type: self.id_type,
                    max_id: self.max_id,
                });
            }
            state.high_id += 1;
            if id != INTEGER_MINUS_ONE {
                return Ok(id);
            }
        }
    }

    fn check_free(&self, id: u64) -> Result<()> {
        let state = self.state.lock();
        if state.closed {
            return Err(self.closed_error());
        }
        self.validate_free(&state, id)
    }

    fn free_id(&self, id: u64) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(self.closed_error());
        }
        self.validate_free(&state, id)?;

        state.free.insert(id);
        Ok(())
    }

    fn high_id(&self) -> Result<u64> {
        let state = self.state.lock();
        if state.closed {
            return Err(self.closed_error());
        }
        Ok(state.high_id)
    }

    fn set_high_id(&self, high_id: u64) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(self.closed_error());
        }
        state.high_id = high_id;
        state.free.remove_range(high_id..);
        state.reserved.retain(|id| *id < high_id);
        Ok(())
    }

    fn raise_high_id(&self, high_id: u64) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(self.closed_error());
        }
        if high_id > state.high_id {
            state.high_id = high_id;
        }
        Ok(())
    }

    fn number_of_ids_in_use(&self) -> Result<u64> {
        let state = self.state.lock();
        if state.closed {
            return Err(self.closed_error());
        }
        let reserved_id = u64::from(state.high_id > INTEGER_MINUS_ONE);
        let free = state.free.len() + state.reserved.len() as u64;
        Ok(state.high_id - reserved_id - free)
    }

    fn defrag_count(&self) -> Result<u64> {
        let state = self.state.lock();
        if state.closed {
            return Err(self.closed_error());
        }
        Ok(state.free.len() + state.reserved.len() as u64)
    }

    fn rebuild(&self, high_id: u64, free_ids: &[u64]) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(self.closed_error());
        }

        state.high_id = high_id;
        state.reserved.clear();
        state.free.clear();
        for &id in free_ids {
            if id < high_id && id != INTEGER_MINUS_ONE {
                state.free.insert(id);
            }
        }
        state.needs_rebuild = false;

        tracing::info!(
            "Rebuilt {} id generator: high id {}, {} free",
            self.id_type.name(),
            high_id,
            state.free.len()
        );
        Ok(())
    }

    fn needs_rebuild(&self) -> bool {
        self.state.lock().needs_rebuild
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(self.closed_error());
        }
        state.closed = true;

        let reserved: Vec<u64> = state.reserved.drain(..).collect();
        for id in reserved {
            state.free.insert(id);
        }

        file::write(&self.path, &state.snapshot(false))?;
        tracing::debug!(
            "Closed {} id generator {:?} at high id {}",
            self.id_type.name(),
            self.path,
            state.high_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::TempDir;

    const MAX_ID: u64 = (1 << 35) - 1;

    fn open(path: &Path, high_id: u64) -> DefaultIdGenerator {
        DefaultIdGenerator::open(path, 4, IdType::Node, &|| Ok(high_id), MAX_ID).unwrap()
    }

    #[test]
    fn test_ids_are_dense_from_zero() {
        let dir = TempDir::new().unwrap();
        let generator = open(&dir.path().join("n.id"), 0);

        assert_eq!(generator.next_id().unwrap(), 0);
        assert_eq!(generator.next_id().unwrap(), 1);
        assert_eq!(generator.next_id().unwrap(), 2);
        assert_eq!(generator.high_id().unwrap(), 3);
        assert_eq!(generator.number_of_ids_in_use().unwrap(), 3);
    }

    #[test]
    fn test_freed_ids_are_reused_first() {
        let dir = TempDir::new().unwrap();
        let generator = open(&dir.path().join("n.id"), 0);
        for _ in 0..5 {
            generator.next_id().unwrap();
        }

        generator.free_id(3).unwrap();
        generator.free_id(1).unwrap();
        assert_eq!(generator.defrag_count().unwrap(), 2);

        assert_eq!(generator.next_id().unwrap(), 1);
        assert_eq!(generator.next_id().unwrap(), 3);
        assert_eq!(generator.next_id().unwrap(), 5);
        assert_eq!(generator.high_id().unwrap(), 6);
    }

    #[test]
    fn test_double_free_is_rejected() {
        let dir = TempDir::new().unwrap();
        let generator = open(&dir.path().join("n.id"), 0);
        generator.next_id().unwrap();
        generator.next_id().unwrap();

        generator.free_id(0).unwrap();
        assert!(matches!(
            generator.free_id(0),
            Err(Error::InvalidIdOperation(_))
        ));
    }

    #[test]
    fn test_check_free_leaves_free_set_untouched() {
        let dir = TempDir::new().unwrap();
        let generator = open(&dir.path().join("n.id"), 0);
        generator.next_id().unwrap();
        generator.next_id().unwrap();

        generator.check_free(1).unwrap();
        assert_eq!(generator.defrag_count().unwrap(), 0);
        assert!(matches!(
            generator.check_free(2),
            Err(Error::InvalidIdOperation(_))
        ));

        generator.free_id(1).unwrap();
        assert!(matches!(
            generator.check_free(1),
            Err(Error::InvalidIdOperation(_))
        ));
    }

    #[test]
    fn test_double_free_of_reserved_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let generator = open(&dir.path().join("n.id"), 0);
        for _ in 0..4 {
            generator.next_id().unwrap();
        }
        generator.free_id(0).unwrap();
        generator.free_id(2).unwrap();

        // Moves both into the reservation queue and hands out 0
        assert_eq!(generator.next_id().unwrap(), 0);
        assert!(matches!(
            generator.free_id(2),
            Err(Error::InvalidIdOperation(_))
        ));
    }

    #[test]
    fn test_free_beyond_high_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let generator = open(&dir.path().join("n.id"), 0);
        generator.next_id().unwrap();

        assert!(matches!(
            generator.free_id(1),
            Err(Error::InvalidIdOperation(_))
        ));
    }

    #[test]
    fn test_reserved_id_is_skipped() {
        let dir = TempDir::new().unwrap();
        let generator = open(&dir.path().join("n.id"), INTEGER_MINUS_ONE - 1);

        assert_eq!(generator.next_id().unwrap(), INTEGER_MINUS_ONE - 1);
        assert_eq!(generator.next_id().unwrap(), INTEGER_MINUS_ONE + 1);
        assert_eq!(generator.high_id().unwrap(), INTEGER_MINUS_ONE + 2);
        assert_eq!(
            generator.number_of_ids_in_use().unwrap(),
            INTEGER_MINUS_ONE + 1
        );
    }

    #[test]
    fn test_capacity_exceeded() {
        let dir = TempDir::new().unwrap();
        let generator =
            DefaultIdGenerator::open(&dir.path().join("n.id"), 4, IdType::Label, &|| Ok(0), 1)
                .unwrap();

        assert_eq!(generator.next_id().unwrap(), 0);
        assert_eq!(generator.next_id().unwrap(), 1);
        assert!(matches!(
            generator.next_id(),
            Err(Error::IdCapacityExceeded {
                id_type: IdType::Label,
                max_id: 1
            })
        ));
    }

    #[test]
    fn test_clean_close_persists_state_and_reserved_ids() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("n.id");

        {
            let generator = open(&path, 0);
            for _ in 0..10 {
                generator.next_id().unwrap();
            }
            for id in [2, 4, 6] {
                generator.free_id(id).unwrap();
            }
            // Pulls 2, 4, 6 into the reservation queue
            assert_eq!(generator.next_id().unwrap(), 2);
            generator.close().unwrap();
        }

        let generator = DefaultIdGenerator::open(
            &path,
            4,
            IdType::Node,
            &|| panic!("clean id file must not trigger a scan"),
            MAX_ID,
        )
        .unwrap();
        assert!(!generator.needs_rebuild());
        assert_eq!(generator.high_id().unwrap(), 10);
        assert_eq!(generator.defrag_count().unwrap(), 2);
        assert_eq!(generator.next_id().unwrap(), 4);
        assert_eq!(generator.next_id().unwrap(), 6);
        assert_eq!(generator.next_id().unwrap(), 10);
    }

    #[test]
    fn test_unclean_shutdown_uses_supplied_high_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("n.id");

        {
            let generator = open(&path, 0);
            for _ in 0..5 {
                generator.next_id().unwrap();
            }
            generator.free_id(1).unwrap();
            // dropped without close
        }

        let generator = open(&path, 17);
        assert!(generator.needs_rebuild());
        assert_eq!(generator.high_id().unwrap(), 17);
        assert_eq!(generator.defrag_count().unwrap(), 0);
        assert_eq!(generator.next_id().unwrap(), 17);
    }

    #[test]
    fn test_rebuild_replaces_free_set() {
        let dir = TempDir::new().unwrap();
        let generator = open(&dir.path().join("n.id"), 8);
        assert!(generator.needs_rebuild());

        generator.rebuild(8, &[1, 5, 9]).unwrap();
        assert!(!generator.needs_rebuild());
        assert_eq!(generator.defrag_count().unwrap(), 2);
        assert_eq!(generator.next_id().unwrap(), 1);
        assert_eq!(generator.next_id().unwrap(), 5);
        assert_eq!(generator.next_id().unwrap(), 8);
    }

    #[test]
    fn test_set_and_raise_high_id() {
        let dir = TempDir::new().unwrap();
        let generator = open(&dir.path().join("n.id"), 10);
        generator.rebuild(10, &[2, 8]).unwrap();

        generator.set_high_id(5).unwrap();
        assert_eq!(generator.high_id().unwrap(), 5);
        assert_eq!(generator.defrag_count().unwrap(), 1);

        generator.raise_high_id(3).unwrap();
        assert_eq!(generator.high_id().unwrap(), 5);
        generator.raise_high_id(9).unwrap();
        assert_eq!(generator.high_id().unwrap(), 9);
    }

    #[test]
    fn test_operations_after_close_fail() {
        let dir = TempDir::new().unwrap();
        let generator = open(&dir.path().join("n.id"), 0);
        generator.close().unwrap();

        assert!(matches!(
            generator.next_id(),
            Err(Error::GeneratorClosed(IdType::Node))
        ));
        assert!(matches!(generator.free_id(0), Err(Error::GeneratorClosed(_))));
        assert!(matches!(generator.high_id(), Err(Error::GeneratorClosed(_))));
        assert!(matches!(generator.close(), Err(Error::GeneratorClosed(_))));
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        use std::thread;

        let dir = TempDir::new().unwrap();
        let generator = Arc::new(open(&dir.path().join("n.id"), 0));
        let mut handles = vec![];

        for _ in 0..8 {
            let g = generator.clone();
            handles.push(thread::spawn(move || {
                let mut ids = Vec::new();
                for i in 0..500 {
                    let id = g.next_id().unwrap();
                    if i % 3 == 0 {
                        g.free_id(id).unwrap();
                    } else {
                        ids.push(id);
                    }
                }
                ids
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "id {} handed out twice", id);
            }
        }
    }
}
