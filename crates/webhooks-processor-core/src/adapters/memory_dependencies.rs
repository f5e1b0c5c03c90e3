//! In-memory ConfigMap/Secret store for testing and development.

use crate::store::{DependencyKind, DependencyStore, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

type ObjectKey = (DependencyKind, String, String);

/// Thread-safe in-memory dependency store
#[derive(Clone, Default)]
pub struct InMemoryDependencyStore {
    objects: Arc<RwLock<HashMap<ObjectKey, HashMap<String, String>>>>,
}

impl InMemoryDependencyStore {
    /// Create new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace an object
    pub fn insert<I, K, V>(&self, kind: DependencyKind, namespace: &str, name: &str, data: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let data = data
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((kind, namespace.to_string(), name.to_string()), data);
    }

    /// Remove an object
    pub fn remove(&self, kind: DependencyKind, namespace: &str, name: &str) -> bool {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(kind, namespace.to_string(), name.to_string()))
            .is_some()
    }
}

#[async_trait]
impl DependencyStore for InMemoryDependencyStore {
    async fn get(
        &self,
        kind: DependencyKind,
        namespace: &str,
        name: &str,
    ) -> Result<HashMap<String, String>, StoreError> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::not_found(kind, name))
    }
}
