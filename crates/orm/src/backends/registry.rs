//! Store registry
//!
//! An explicit map from backend locations to live store connections. The
//! registry is an ordinary value passed by reference to whatever needs it;
//! there is no process-wide singleton, and `clear` drops every cached
//! connection.

use std::sync::Arc;

use dashmap::DashMap;

use crate::backends::RowStore;
use crate::error::OrmResult;

/// Maps backend locations to open row stores
#[derive(Debug, Default)]
pub struct StoreRegistry {
    stores: DashMap<String, Arc<dyn RowStore>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store registered for a location, if any
    pub fn get(&self, location: &str) -> Option<Arc<dyn RowStore>> {
        self.stores.get(location).map(|entry| entry.clone())
    }

    /// The store for a location, opening it with `open` on first use
    pub fn get_or_create(
        &self,
        location: &str,
        open: impl FnOnce() -> OrmResult<Arc<dyn RowStore>>,
    ) -> OrmResult<Arc<dyn RowStore>> {
        if let Some(store) = self.get(location) {
            return Ok(store);
        }
        let store = open()?;
        self.stores.insert(location.to_string(), store.clone());
        Ok(store)
    }

    /// Register a store under a location, replacing any previous one
    pub fn insert(&self, location: impl Into<String>, store: Arc<dyn RowStore>) {
        self.stores.insert(location.into(), store);
    }

    /// Drop all cached stores
    pub fn clear(&self) {
        self.stores.clear();
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryStore;

    #[test]
    fn creates_once_per_location() {
        let registry = StoreRegistry::new();
        let first = registry
            .get_or_create("a.gdb", || Ok(Arc::new(MemoryStore::new())))
            .unwrap();
        let second = registry
            .get_or_create("a.gdb", || panic!("should reuse the cached store"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn clear_drops_cached_stores() {
        let registry = StoreRegistry::new();
        registry.insert("a.gdb", Arc::new(MemoryStore::new()));
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.get("a.gdb").is_none());
    }
}
