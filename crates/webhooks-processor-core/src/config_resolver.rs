//! Resolution of webhook config vars into a flat key/value map.
//!
//! Literal values pass through unchanged. `valueFrom` entries are read from
//! the referenced ConfigMap or Secret, and every referenced object is
//! recorded so that a change to it can restart the worker.

use crate::store::{DependencyEvent, DependencyKind, DependencyStore, StoreError};
use crate::webhook::{ConfigVar, KeySelector};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Namespaced reference to a ConfigMap or Secret
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
}

/// External objects a worker's configuration was resolved from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies {
    pub config_maps: HashSet<ObjectRef>,
    pub secrets: HashSet<ObjectRef>,
}

impl Dependencies {
    fn insert(&mut self, kind: DependencyKind, reference: ObjectRef) {
        match kind {
            DependencyKind::ConfigMap => self.config_maps.insert(reference),
            DependencyKind::Secret => self.secrets.insert(reference),
        };
    }

    /// Whether the changed object is one of these dependencies
    pub fn is_affected_by(&self, event: &DependencyEvent) -> bool {
        let reference = ObjectRef {
            namespace: event.namespace.clone(),
            name: event.name.clone(),
        };
        match event.kind {
            DependencyKind::ConfigMap => self.config_maps.contains(&reference),
            DependencyKind::Secret => self.secrets.contains(&reference),
        }
    }

    /// Every ConfigMap/Secret the config vars point at, whether or not the
    /// object or key exists
    pub fn referenced_by(vars: &[ConfigVar], default_namespace: &str) -> Self {
        let mut dependencies = Self::default();
        for (kind, selector) in vars.iter().filter_map(key_ref) {
            dependencies.insert(kind, object_ref(selector, default_namespace));
        }
        dependencies
    }

    pub fn is_empty(&self) -> bool {
        self.config_maps.is_empty() && self.secrets.is_empty()
    }
}

/// Flat configuration handed to providers
#[derive(Debug, Clone, Default)]
pub struct ResolvedConfig {
    pub values: HashMap<String, String>,
    pub dependencies: Dependencies,
}

/// Reasons a config var could not be resolved
#[derive(Debug, Clone, Error)]
pub enum ConfigResolutionError {
    #[error("neither ConfigMap nor Secret reference present")]
    MissingReference { name: String },

    #[error("key '{key}' not found in the {kind} '{object}'")]
    MissingKey {
        kind: DependencyKind,
        object: String,
        key: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Resolve config vars in declaration order; later entries override earlier
/// ones with the same name
pub async fn resolve(
    vars: &[ConfigVar],
    store: &dyn DependencyStore,
    default_namespace: &str,
) -> Result<ResolvedConfig, ConfigResolutionError> {
    let mut resolved = ResolvedConfig::default();
    let mut fetched: HashMap<(DependencyKind, ObjectRef), HashMap<String, String>> =
        HashMap::new();

    for var in vars {
        if var.value_from.is_none() {
            resolved.values.insert(var.name.clone(), var.value.clone());
            continue;
        }

        let Some((kind, selector)) = key_ref(var) else {
            return Err(ConfigResolutionError::MissingReference {
                name: var.name.clone(),
            });
        };

        let reference = object_ref(selector, default_namespace);
        resolved.dependencies.insert(kind, reference.clone());

        let cache_key = (kind, reference);
        if !fetched.contains_key(&cache_key) {
            let data = store
                .get(kind, &cache_key.1.namespace, &cache_key.1.name)
                .await?;
            fetched.insert(cache_key.clone(), data);
        }

        let value = fetched
            .get(&cache_key)
            .and_then(|data| data.get(&selector.key))
            .ok_or_else(|| ConfigResolutionError::MissingKey {
                kind,
                object: selector.name.clone(),
                key: selector.key.clone(),
            })?;

        resolved.values.insert(var.name.clone(), value.clone());
    }

    Ok(resolved)
}

/// The ConfigMap or Secret key a `valueFrom` entry selects; ConfigMaps win
/// when both are set
fn key_ref(var: &ConfigVar) -> Option<(DependencyKind, &KeySelector)> {
    let source = var.value_from.as_ref()?;
    match (&source.config_map_key_ref, &source.secret_key_ref) {
        (Some(selector), _) => Some((DependencyKind::ConfigMap, selector)),
        (None, Some(selector)) => Some((DependencyKind::Secret, selector)),
        (None, None) => None,
    }
}

fn object_ref(selector: &KeySelector, default_namespace: &str) -> ObjectRef {
    ObjectRef {
        namespace: selector
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| default_namespace.to_string()),
        name: selector.name.clone(),
    }
}

#[cfg(test)]
#[path = "config_resolver_tests.rs"]
mod tests;
