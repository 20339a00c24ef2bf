//! In-memory id generator double

use super::CallLog;
use crate::id::{IdGenerator, IdGeneratorFactory, IdType};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Factory for [`MockIdGenerator`]s
pub struct MockIdGeneratorFactory {
    log: CallLog,
    generators: Mutex<HashMap<IdType, Arc<MockIdGenerator>>>,
    degraded: AtomicBool,
    fail_close: Arc<AtomicBool>,
}

impl MockIdGeneratorFactory {
    /// Factory logging into `log`
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            generators: Mutex::new(HashMap::new()),
            degraded: AtomicBool::new(false),
            fail_close: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open generators as if their persisted state was lost, taking the
    /// high id from the store's scan
    pub fn open_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::SeqCst);
    }

    /// Make `IdGenerator::close` fail
    pub fn fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    /// The concrete generator opened for `id_type`
    pub fn generator(&self, id_type: IdType) -> Option<Arc<MockIdGenerator>> {
        self.generators.lock().get(&id_type).cloned()
    }
}

impl IdGeneratorFactory for MockIdGeneratorFactory {
    fn open(
        &self,
        _path: &Path,
        _grab_size: usize,
        id_type: IdType,
        high_id: &dyn Fn() -> Result<u64>,
        _max_id: u64,
    ) -> Result<Arc<dyn IdGenerator>> {
        self.log.record("id_generator.open");

        let degraded = self.degraded.load(Ordering::SeqCst);
        let initial = if degraded { high_id()? } else { 0 };
        let generator = Arc::new(MockIdGenerator {
            id_type,
            log: self.log.clone(),
            state: Mutex::new(MockState {
                high_id: initial,
                free: BTreeSet::new(),
                needs_rebuild: degraded,
                closed: false,
            }),
            fail_close: Arc::clone(&self.fail_close),
        });
        self.generators.lock().insert(id_type, Arc::clone(&generator));
        Ok(generator)
    }

    fn get(&self, id_type: IdType) -> Option<Arc<dyn IdGenerator>> {
        let generator = self.generators.lock().get(&id_type).cloned()?;
        Some(generator)
    }
}

struct MockState {
    high_id: u64,
    free: BTreeSet<u64>,
    needs_rebuild: bool,
    closed: bool,
}

/// Id generator handing out the lowest free id, then the high id
pub struct MockIdGenerator {
    id_type: IdType,
    log: CallLog,
    state: Mutex<MockState>,
    fail_close: Arc<AtomicBool>,
}

impl MockIdGenerator {
    /// Free ids in ascending order
    pub fn free_ids(&self) -> Vec<u64> {
        self.state.lock().free.iter().copied().collect()
    }

    fn check_open(&self, state: &MockState) -> Result<()> {
        if state.closed {
            return Err(Error::GeneratorClosed(self.id_type));
        }
        Ok(())
    }
}

impl IdGenerator for MockIdGenerator {
    fn id_type(&self) -> IdType {
        self.id_type
    }

    fn next_id(&self) -> Result<u64> {
        self.log.record("id_generator.next_id");
        let mut state = self.state.lock();
        self.check_open(&state)?;
        if let Some(id) = state.free.pop_first() {
            return Ok(id);
        }
        let id = state.high_id;
        state.high_id += 1;
        Ok(id)
    }

    fn check_free(&self, id: u64) -> Result<()> {
        let state = self.state.lock();
        self.check_open(&state)?;
        if id >= state.high_id || state.free.contains(&id) {
            return Err(Error::invalid_id(format!("Cannot free {}", id)));
        }
        Ok(())
    }

    fn free_id(&self, id: u64) -> Result<()> {
        self.log.record(format!("id_generator.free_id({})", id));
        let mut state = self.state.lock();
        self.check_open(&state)?;
        if id >= state.high_id || !state.free.insert(id) {
            return Err(Error::invalid_id(format!("Cannot free {}", id)));
        }
        Ok(())
    }

    fn high_id(&self) -> Result<u64> {
        let state = self.state.lock();
        self.check_open(&state)?;
        Ok(state.high_id)
    }

    fn set_high_id(&self, high_id: u64) -> Result<()> {
        self.log.record(format!("id_generator.set_high_id({})", high_id));
        let mut state = self.state.lock();
        self.check_open(&state)?;
        state.high_id = high_id;
        state.free.retain(|id| *id < high_id);
        Ok(())
    }

    fn raise_high_id(&self, high_id: u64) -> Result<()> {
        let mut state = self.state.lock();
        self.check_open(&state)?;
        state.high_id = state.high_id.max(high_id);
        Ok(())
    }

    fn number_of_ids_in_use(&self) -> Result<u64> {
        let state = self.state.lock();
        self.check_open(&state)?;
        Ok(state.high_id - state.free.len() as u64)
    }

    fn defrag_count(&self) -> Result<u64> {
        let state = self.state.lock();
        self.check_open(&state)?;
        Ok(state.free.len() as u64)
    }

    fn rebuild(&self, high_id: u64, free_ids: &[u64]) -> Result<()> {
        self.log.record(format!("id_generator.rebuild({})", high_id));
        let mut state = self.state.lock();
        self.check_open(&state)?;
        state.high_id = high_id;
        state.free = free_ids.iter().copied().filter(|id| *id < high_id).collect();
        state.needs_rebuild = false;
        Ok(())
    }

    fn needs_rebuild(&self) -> bool {
        self.state.lock().needs_rebuild
    }

    fn close(&self) -> Result<()> {
        self.log.record("id_generator.close");
        let mut state = self.state.lock();
        self.check_open(&state)?;
        state.closed = true;
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("scripted id close failure")));
        }
        Ok(())
    }
}
