//! Test doubles for record stores
//!
//! - [`MockPageCache`] keeps pages in memory, logs every port call into a
//!   shared [`CallLog`] and lets tests script `should_retry` answers
//! - [`MockIdGeneratorFactory`] hands out [`MockIdGenerator`]s logging into
//!   the same [`CallLog`], so ordering across collaborators is observable
//! - [`TestRecordFormat`] is a 10 byte record format counting its decodes
//!
//! # Usage
//!
//! ```rust
//! use nexus_store::testing::{CallLog, MockIdGeneratorFactory, MockPageCache};
//!
//! let log = CallLog::new();
//! let page_cache = MockPageCache::new(log.clone());
//! let id_factory = MockIdGeneratorFactory::new(log.clone());
//! assert!(log.calls().is_empty());
//! ```

mod id;
mod page_cache;
mod record;

pub use id::{MockIdGenerator, MockIdGeneratorFactory};
pub use page_cache::{MockPageCache, MockPageCursor, MockPagedFile};
pub use record::{TEST_RECORD_SIZE, TestRecord, TestRecordFormat};

use parking_lot::Mutex;
use std::sync::Arc;

/// Ordered log of collaborator calls shared between mocks
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a call
    pub fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    /// Snapshot of all calls in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of times `call` was logged
    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == call).count()
    }

    /// Index of the first `call`
    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls.lock().iter().position(|c| c == call)
    }

    /// Calls starting with `prefix`, in order
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Forget everything logged so far
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}
