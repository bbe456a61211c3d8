//! Entity containers, navigation sources and operation imports

use crate::types::SchemaTypeId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NavigationSourceKind {
    EntitySet,
    Singleton,
}

/// An entity set or singleton
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationSource {
    pub name: String,
    pub kind: NavigationSourceKind,
    pub entity_type: SchemaTypeId,
    /// Navigation property path -> target navigation source name
    pub navigation_bindings: IndexMap<String, String>,
}

impl NavigationSource {
    pub fn is_entity_set(&self) -> bool {
        self.kind == NavigationSourceKind::EntitySet
    }
}

/// Unbound function or action exposed at the service root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationImport {
    pub name: String,
    /// Qualified name of the imported operation
    pub operation: String,
    pub entity_set: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityContainer {
    pub namespace: String,
    pub name: String,
    pub sources: IndexMap<String, NavigationSource>,
    pub operation_imports: IndexMap<String, OperationImport>,
}

impl EntityContainer {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            sources: IndexMap::new(),
            operation_imports: IndexMap::new(),
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    pub fn find_navigation_source(&self, name: &str) -> Option<&NavigationSource> {
        self.sources.get(name)
    }

    pub fn find_entity_set(&self, name: &str) -> Option<&NavigationSource> {
        self.sources.get(name).filter(|s| s.is_entity_set())
    }

    pub fn find_singleton(&self, name: &str) -> Option<&NavigationSource> {
        self.sources.get(name).filter(|s| !s.is_entity_set())
    }

    pub fn find_operation_import(&self, name: &str) -> Option<&OperationImport> {
        self.operation_imports.get(name)
    }

    /// Navigation source reached by following `path` from `source`, if bound
    pub fn binding_target(&self, source: &str, path: &str) -> Option<&NavigationSource> {
        let target = self.sources.get(source)?.navigation_bindings.get(path)?;
        self.sources.get(target)
    }
}
