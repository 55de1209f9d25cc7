//! Captured build output (v0.1)
//!
//! Thread-safe, append-only store of event records for one build/restore
//! execution:
//! - insertion order = emission order, never reordered or deduplicated
//! - derived message/warning/error indices maintained incrementally
//! - renderable as text via the replay engine

use std::sync::Arc;

use parking_lot::RwLock; // 2-3x faster than std::sync::RwLock

use crate::error::KilnError;
use crate::event::{Event, Importance};
use crate::render::{RenderOptions, TextLogger};
use crate::replay::replay;

/// Cheaply cloneable handle over one submission's captured event stream.
///
/// Clones share the same underlying store (Arc). Appends come from the
/// submission router for the duration of one execution; afterwards the
/// capture is read-only by convention and may be read from any thread.
#[derive(Clone, Default)]
pub struct BuildCapture {
    inner: Arc<CaptureInner>,
}

#[derive(Default)]
struct CaptureInner {
    /// Source of truth: full ordered sequence
    events: RwLock<Vec<Arc<Event>>>,
    /// Derived caches, each a subsequence of `events`
    messages: RwLock<Vec<Arc<Event>>>,
    warnings: RwLock<Vec<Arc<Event>>>,
    errors: RwLock<Vec<Arc<Event>>>,
}

impl BuildCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record (thread-safe, never fails).
    ///
    /// The record lands in the ordered sequence and, by tag, in at most one
    /// derived index. The sequence is updated first so the indices are always
    /// a subset of it from any reader's point of view.
    pub fn append(&self, event: Event) {
        let event = Arc::new(event);

        // The sequence lock is held across the index push so a racing append
        // cannot land in an index out of its sequence-relative order.
        let mut events = self.inner.events.write();
        events.push(Arc::clone(&event));
        if event.is_message() {
            self.inner.messages.write().push(event);
        } else if event.is_warning() {
            self.inner.warnings.write().push(event);
        } else if event.is_error() {
            self.inner.errors.write().push(event);
        }
    }

    /// Full ordered sequence (snapshot)
    pub fn events(&self) -> Vec<Arc<Event>> {
        self.inner.events.read().clone()
    }

    /// All message records, in emission order
    pub fn messages(&self) -> Vec<Arc<Event>> {
        self.inner.messages.read().clone()
    }

    /// All warning records, in emission order
    pub fn warnings(&self) -> Vec<Arc<Event>> {
        self.inner.warnings.read().clone()
    }

    /// All error records, in emission order
    pub fn errors(&self) -> Vec<Arc<Event>> {
        self.inner.errors.read().clone()
    }

    /// Message records of one importance, computed from the message index
    /// (non-message records are never scanned)
    pub fn messages_with_importance(&self, importance: Importance) -> Vec<Arc<Event>> {
        self.inner
            .messages
            .read()
            .iter()
            .filter(|e| e.importance() == Some(importance))
            .cloned()
            .collect()
    }

    pub fn warning_count(&self) -> usize {
        self.inner.warnings.read().len()
    }

    pub fn error_count(&self) -> usize {
        self.inner.errors.read().len()
    }

    pub fn len(&self) -> usize {
        self.inner.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all captured records. Owner-only, once the capture is no longer
    /// registered with a router.
    pub fn clear(&self) {
        self.inner.events.write().clear();
        self.inner.messages.write().clear();
        self.inner.warnings.write().clear();
        self.inner.errors.write().clear();
    }

    /// Reconstruct the textual log a live console logger would have produced.
    ///
    /// Pure function of the captured sequence: the same capture and options
    /// yield byte-identical output on every call.
    pub fn render(&self, options: &RenderOptions) -> Result<String, KilnError> {
        let logger = TextLogger::new(options.clone())?;
        replay(&self.events(), &logger);
        Ok(logger.output())
    }
}

impl std::fmt::Debug for BuildCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildCapture")
            .field("len", &self.len())
            .field("warnings", &self.warning_count())
            .field("errors", &self.error_count())
            .finish()
    }
}
