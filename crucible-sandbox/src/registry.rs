//! The process-wide session→container map.
//!
//! Modelled as an explicitly constructed service with a single lifecycle
//! owner per process: build one [`ContainerRegistry`] at startup and hand
//! clones to every subsystem that needs it. Mutations happen only inside
//! the [`SandboxController`](crate::SandboxController) and are synchronous.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Maps session ids to live container ids.
///
/// Cloning is cheap; all clones share the same underlying table.
#[derive(Debug, Clone, Default)]
pub struct ContainerRegistry {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Container id currently mapped to a session, if any.
    pub fn get(&self, session_id: &str) -> Option<String> {
        self.inner.lock().get(session_id).cloned()
    }

    /// Map a session to a container, replacing any previous mapping.
    pub fn insert(&self, session_id: &str, container_id: &str) {
        self.inner
            .lock()
            .insert(session_id.to_string(), container_id.to_string());
    }

    /// Remove the mapping for a session, returning the container id.
    pub fn remove(&self, session_id: &str) -> Option<String> {
        self.inner.lock().remove(session_id)
    }

    /// Remove a mapping by container id (used when destroying by handle).
    pub fn remove_by_container(&self, container_id: &str) -> Option<String> {
        let mut table = self.inner.lock();
        let session = table
            .iter()
            .find(|(_, cid)| cid.as_str() == container_id)
            .map(|(sid, _)| sid.clone())?;
        table.remove(&session);
        Some(session)
    }

    /// Snapshot of all current mappings.
    pub fn entries(&self) -> Vec<(String, String)> {
        self.inner
            .lock()
            .iter()
            .map(|(s, c)| (s.clone(), c.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let registry = ContainerRegistry::new();
        registry.insert("s1", "c1");
        assert_eq!(registry.get("s1").as_deref(), Some("c1"));

        registry.insert("s1", "c2");
        assert_eq!(registry.get("s1").as_deref(), Some("c2"));
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.remove("s1").as_deref(), Some("c2"));
        assert!(registry.get("s1").is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let registry = ContainerRegistry::new();
        let clone = registry.clone();
        registry.insert("s1", "c1");
        assert_eq!(clone.get("s1").as_deref(), Some("c1"));
    }

    #[test]
    fn test_remove_by_container() {
        let registry = ContainerRegistry::new();
        registry.insert("s1", "c1");
        assert_eq!(registry.remove_by_container("c1").as_deref(), Some("s1"));
        assert!(registry.is_empty());
    }
}
