//! Factory for file-persisted id generators

use super::{DefaultIdGenerator, IdGenerator, IdGeneratorFactory, IdType};
use crate::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Opens [`DefaultIdGenerator`]s and remembers them by id type
#[derive(Default)]
pub struct DefaultIdGeneratorFactory {
    generators: Mutex<HashMap<IdType, Arc<DefaultIdGenerator>>>,
}

impl DefaultIdGeneratorFactory {
    /// Create an empty factory
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGeneratorFactory for DefaultIdGeneratorFactory {
    fn open(
        &self,
        path: &Path,
        grab_size: usize,
        id_type: IdType,
        high_id: &dyn Fn() -> Result<u64>,
        max_id: u64,
    ) -> Result<Arc<dyn IdGenerator>> {
        let generator = Arc::new(DefaultIdGenerator::open(
            path, grab_size, id_type, high_id, max_id,
        )?);
        self.generators.lock().insert(id_type, Arc::clone(&generator));
        Ok(generator)
    }

    fn get(&self, id_type: IdType) -> Option<Arc<dyn IdGenerator>> {
        let generator = self.generators.lock().get(&id_type).cloned()?;
        Some(generator)
    }
}
