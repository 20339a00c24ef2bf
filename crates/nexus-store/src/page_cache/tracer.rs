//! Page cache tracing
//!
//! Every pin, unpin, page fault, eviction and page flush is reported to a
//! [`PageCacheTracer`]. [`RecordingPageCacheTracer`] keeps the events so tests
//! can assert on pinning behaviour.

use super::PageIntent;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Kind of a [`PageEvent`], used to filter what gets recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageEventKind {
    /// A cursor pinned a page
    Pin,
    /// A cursor released a page
    Unpin,
    /// A page was loaded from the file
    Fault,
    /// A page was dropped from the frame table
    Evict,
    /// A dirty page was written back
    Flush,
}

/// One traced page cache event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
    /// A cursor pinned `page_id`
    Pin {
        /// Pinned page
        page_id: u64,
        /// Intent of the pinning cursor
        intent: PageIntent,
    },
    /// A cursor released `page_id`
    Unpin {
        /// Released page
        page_id: u64,
    },
    /// `page_id` was read from the file
    Fault {
        /// Faulted page
        page_id: u64,
    },
    /// `page_id` left the frame table
    Evict {
        /// Evicted page
        page_id: u64,
    },
    /// `page_id` was written back
    Flush {
        /// Flushed page
        page_id: u64,
    },
}

impl PageEvent {
    /// Kind of this event
    pub fn kind(&self) -> PageEventKind {
        match self {
            PageEvent::Pin { .. } => PageEventKind::Pin,
            PageEvent::Unpin { .. } => PageEventKind::Unpin,
            PageEvent::Fault { .. } => PageEventKind::Fault,
            PageEvent::Evict { .. } => PageEventKind::Evict,
            PageEvent::Flush { .. } => PageEventKind::Flush,
        }
    }

    /// Page the event refers to
    pub fn page_id(&self) -> u64 {
        match *self {
            PageEvent::Pin { page_id, .. }
            | PageEvent::Unpin { page_id }
            | PageEvent::Fault { page_id }
            | PageEvent::Evict { page_id }
            | PageEvent::Flush { page_id } => page_id,
        }
    }
}

/// Receives page cache events
pub trait PageCacheTracer: Send + Sync {
    /// Called for every event, on the thread that caused it
    fn on_event(&self, event: PageEvent);
}

/// Tracer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPageCacheTracer;

impl PageCacheTracer for NullPageCacheTracer {
    fn on_event(&self, _event: PageEvent) {}
}

/// Tracer that queues events of selected kinds
#[derive(Debug, Default)]
pub struct RecordingPageCacheTracer {
    kinds: Vec<PageEventKind>,
    events: Mutex<VecDeque<PageEvent>>,
}

impl RecordingPageCacheTracer {
    /// Record only the given kinds; an empty slice records everything
    pub fn new(kinds: &[PageEventKind]) -> Self {
        Self {
            kinds: kinds.to_vec(),
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Pop the oldest recorded event
    pub fn try_observe(&self) -> Option<PageEvent> {
        self.events.lock().pop_front()
    }

    /// Take all recorded events
    pub fn drain(&self) -> Vec<PageEvent> {
        self.events.lock().drain(..).collect()
    }

    /// Number of queued events of `kind`
    pub fn count(&self, kind: PageEventKind) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.kind() == kind)
            .count()
    }

    fn records(&self, kind: PageEventKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }
}

impl PageCacheTracer for RecordingPageCacheTracer {
    fn on_event(&self, event: PageEvent) {
        if self.records(event.kind()) {
            self.events.lock().push_back(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_filters_kinds() {
        let tracer = RecordingPageCacheTracer::new(&[PageEventKind::Pin]);
        tracer.on_event(PageEvent::Fault { page_id: 1 });
        tracer.on_event(PageEvent::Pin {
            page_id: 1,
            intent: PageIntent::SharedRead,
        });
        tracer.on_event(PageEvent::Unpin { page_id: 1 });

        assert_eq!(tracer.count(PageEventKind::Pin), 1);
        let event = tracer.try_observe().unwrap();
        assert_eq!(event.kind(), PageEventKind::Pin);
        assert_eq!(event.page_id(), 1);
        assert!(tracer.try_observe().is_none());
    }

    #[test]
    fn test_recording_everything() {
        let tracer = RecordingPageCacheTracer::new(&[]);
        tracer.on_event(PageEvent::Evict { page_id: 7 });
        tracer.on_event(PageEvent::Flush { page_id: 7 });

        let events = tracer.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], PageEvent::Evict { page_id: 7 });
        assert!(tracer.try_observe().is_none());
    }
}
