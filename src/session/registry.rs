use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::transport::SessionTransport;

/// Task-safe map from session identifier to its transport.
///
/// Cloning the registry clones a handle to the same underlying map, so one
/// registry constructed at startup can be shared by every request-handling
/// task. All operations take the lock for an O(1) map access and never
/// suspend; `get` runs under the shared read lock.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<SessionTransport>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, id: String, transport: Arc<SessionTransport>) {
        self.inner
            .write()
            .expect("session registry lock poisoned")
            .insert(id, transport);
    }

    pub fn get(&self, id: &str) -> Option<Arc<SessionTransport>> {
        self.inner
            .read()
            .expect("session registry lock poisoned")
            .get(id)
            .cloned()
    }

    /// Removing an absent id is a no-op: an explicit DELETE may race with
    /// transport-driven closure, and both paths end up here.
    pub fn remove(&self, id: &str) {
        self.inner
            .write()
            .expect("session registry lock poisoned")
            .remove(id);
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .expect("session registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
