use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Session id -> resource handle map shared between call paths
///
/// Every operation takes the lock once, so a `remove` hands the value to
/// exactly one caller even when two stops race on the same session.
pub struct HandleMap<V> {
    inner: Arc<RwLock<HashMap<String, V>>>,
}

impl<V> Clone for HandleMap<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Default for HandleMap<V> {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<V: Clone> HandleMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle, returning the one it replaced
    pub async fn insert(&self, session_id: impl Into<String>, value: V) -> Option<V> {
        self.inner.write().await.insert(session_id.into(), value)
    }

    pub async fn get(&self, session_id: &str) -> Option<V> {
        self.inner.read().await.get(session_id).cloned()
    }

    /// Remove and return the handle of a session
    pub async fn remove(&self, session_id: &str) -> Option<V> {
        self.inner.write().await.remove(session_id)
    }

    /// Remove the handle of a session only if it is the expected one
    pub async fn remove_if(
        &self,
        session_id: &str,
        expected: impl FnOnce(&V) -> bool,
    ) -> Option<V> {
        let mut map = self.inner.write().await;
        if map.get(session_id).is_some_and(expected) {
            map.remove(session_id)
        } else {
            None
        }
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.inner.read().await.contains_key(session_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
