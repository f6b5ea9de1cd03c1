//! Dependency registry - fixed at startup, shared without locking

use super::Dependency;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("dependency name must not be empty")]
    EmptyName,

    #[error("dependency '{0}' registered twice")]
    Duplicate(String),
}

/// Ordered set of dependencies; iteration follows registration order
#[derive(Debug, Default)]
pub struct DependencyRegistry {
    deps: Vec<Arc<Dependency>>,
    index: HashMap<String, usize>,
}

impl DependencyRegistry {
    pub fn new(deps: impl IntoIterator<Item = Dependency>) -> Result<Self, RegistryError> {
        let mut registry = Self::default();
        for dep in deps {
            if dep.name.trim().is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if registry.index.contains_key(&dep.name) {
                return Err(RegistryError::Duplicate(dep.name));
            }
            registry.index.insert(dep.name.clone(), registry.deps.len());
            registry.deps.push(Arc::new(dep));
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Dependency>> {
        self.index.get(name).map(|&i| &self.deps[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Dependency>> {
        self.deps.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.deps.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }
}
