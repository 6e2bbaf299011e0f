//! Current stream title, shared by every client pipeline.

use std::sync::Arc;

use tokio::sync::watch;

/// Process-wide title slot. Cloning yields another handle to the same slot.
///
/// Reads take a snapshot of the whole value, so a reader never observes a
/// half-written title even while the owner is replacing it.
#[derive(Clone)]
pub struct MetadataRegister {
    tx: Arc<watch::Sender<Option<Arc<str>>>>,
}

impl MetadataRegister {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Replaces the title. An empty string clears it.
    pub fn set(&self, title: impl Into<String>) {
        let title = title.into();
        let value = if title.is_empty() {
            None
        } else {
            Some(Arc::from(title))
        };
        self.tx.send_replace(value);
    }

    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    pub fn snapshot(&self) -> Option<Arc<str>> {
        self.tx.borrow().clone()
    }

    /// Current title, or `fallback` when none is set.
    pub fn title_or(&self, fallback: &Arc<str>) -> Arc<str> {
        self.snapshot().unwrap_or_else(|| Arc::clone(fallback))
    }
}

impl Default for MetadataRegister {
    fn default() -> Self {
        Self::new()
    }
}
