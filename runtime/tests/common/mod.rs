//! Shared wiring for runtime integration tests.

#![allow(dead_code)] // Not every test binary uses every helper

use rollcall_runtime::{Collaborators, RecordStore};
use rollcall_testing::{
    InMemoryBackend, RecordingAuditSink, RecordingReactions, RecordingRenderer, RecordingStats,
};
use std::sync::Arc;

/// Recording collaborators plus handles to inspect them.
#[derive(Clone, Default)]
pub struct Recorders {
    pub renderer: RecordingRenderer,
    pub audit: RecordingAuditSink,
    pub reactions: RecordingReactions,
    pub stats: RecordingStats,
}

impl Recorders {
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            renderer: Arc::new(self.renderer.clone()),
            audit: Arc::new(self.audit.clone()),
            reactions: Arc::new(self.reactions.clone()),
            stats: Arc::new(self.stats.clone()),
        }
    }
}

/// An empty store over a fresh in-memory backend.
pub fn store(threshold: usize) -> (InMemoryBackend, Arc<RecordStore>) {
    let backend = InMemoryBackend::new();
    let store = Arc::new(RecordStore::new(Arc::new(backend.clone()), threshold));
    (backend, store)
}
