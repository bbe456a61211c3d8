//! The read-only model contract and its arena-backed implementation
//!
//! The query front end never mutates a model. [`EdmModel`] is built once by
//! [`ModelBuilder`], then shared (typically behind an `Arc`) by every request
//! bound against it. Derived lookups are memoised in `OnceCell`s so that
//! concurrent first access computes the same value at most once.

use crate::container::{EntityContainer, NavigationSource, NavigationSourceKind, OperationImport};
use crate::operation::Operation;
use crate::primitive::PrimitiveKind;
use crate::schema::{
    EnumType, NavigationProperty, Property, SchemaType, StructuralProperty, StructuredKind,
    StructuredType,
};
use crate::types::{EdmType, ModelId, SchemaTypeId, TypeRef};
use crate::validation::{validate_model, EdmError};
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use smallvec::SmallVec;
use std::collections::HashMap;
use thiserror::Error;

/// Read-only access to a schema
///
/// Everything the lexer, parser and binder know about types comes through
/// this trait. The provided methods derive inheritance-aware lookups from the
/// required accessors.
pub trait TypeModel: Send + Sync {
    fn model_id(&self) -> ModelId;

    /// Arena lookup; `None` for handles issued by another model
    fn schema_type(&self, id: SchemaTypeId) -> Option<&SchemaType>;

    /// Resolve a namespace-qualified schema type name
    fn find_type(&self, qualified_name: &str) -> Option<SchemaTypeId>;

    /// Every schema type handle, in declaration order
    fn type_ids(&self) -> Vec<SchemaTypeId>;

    fn find_entity_container(&self, name: &str) -> Option<&EntityContainer>;

    /// The container requests are addressed to
    fn entity_container(&self) -> Option<&EntityContainer>;

    /// All overloads sharing a namespace-qualified name
    fn resolve_operations(&self, qualified_name: &str) -> Vec<&Operation>;

    fn operations(&self) -> &[Operation];

    /// Types whose base-type chain passes through `id` (not including `id`)
    fn derived_types(&self, id: SchemaTypeId) -> Vec<SchemaTypeId>;

    fn structured_type(&self, id: SchemaTypeId) -> Option<&StructuredType> {
        self.schema_type(id).and_then(SchemaType::as_structured)
    }

    fn enum_type(&self, id: SchemaTypeId) -> Option<&EnumType> {
        self.schema_type(id).and_then(SchemaType::as_enum)
    }

    fn type_kind(&self, id: SchemaTypeId) -> Option<EdmType> {
        match self.schema_type(id)? {
            SchemaType::Structured(t) if t.kind == StructuredKind::Entity => Some(EdmType::Entity(id)),
            SchemaType::Structured(_) => Some(EdmType::Complex(id)),
            SchemaType::Enum(_) => Some(EdmType::Enum(id)),
        }
    }

    /// Resolve either an `Edm.*` primitive or a schema type name
    fn resolve_type_name(&self, qualified_name: &str) -> Option<EdmType> {
        if let Some(kind) = PrimitiveKind::from_qualified_name(qualified_name) {
            return Some(EdmType::Primitive(kind));
        }
        self.find_type(qualified_name)
            .and_then(|id| self.type_kind(id))
    }

    /// Look a property up on `id`, then on each base type in turn
    fn find_property(&self, id: SchemaTypeId, name: &str) -> Option<&Property> {
        let mut current = Some(id);
        while let Some(type_id) = current {
            let structured = self.structured_type(type_id)?;
            if let Some(property) = structured.declared_property(name) {
                return Some(property);
            }
            current = structured.base_type;
        }
        None
    }

    /// Declared and inherited properties, base-most first
    fn all_properties(&self, id: SchemaTypeId) -> Vec<&Property> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(type_id) = current {
            match self.structured_type(type_id) {
                Some(structured) => {
                    chain.push(structured);
                    current = structured.base_type;
                }
                None => break,
            }
        }
        chain
            .into_iter()
            .rev()
            .flat_map(|t| t.properties.values())
            .collect()
    }

    /// Key property names, inherited from the base-most type that declares a key
    fn key_properties(&self, id: SchemaTypeId) -> Vec<&StructuralProperty> {
        let mut current = Some(id);
        while let Some(type_id) = current {
            let Some(structured) = self.structured_type(type_id) else {
                return Vec::new();
            };
            if !structured.key.is_empty() {
                return structured
                    .key
                    .iter()
                    .filter_map(|name| match self.find_property(id, name) {
                        Some(Property::Structural(p)) => Some(p),
                        _ => None,
                    })
                    .collect();
            }
            current = structured.base_type;
        }
        Vec::new()
    }

    /// Number of inheritance steps from `derived` up to `base`; `Some(0)` when equal
    fn derivation_distance(&self, derived: SchemaTypeId, base: SchemaTypeId) -> Option<usize> {
        let mut current = Some(derived);
        let mut distance = 0;
        while let Some(type_id) = current {
            if type_id == base {
                return Some(distance);
            }
            current = self.structured_type(type_id).and_then(|t| t.base_type);
            distance += 1;
        }
        None
    }

    fn is_or_derives_from(&self, derived: SchemaTypeId, base: SchemaTypeId) -> bool {
        self.derivation_distance(derived, base).is_some()
    }

    fn is_open(&self, id: SchemaTypeId) -> bool {
        let mut current = Some(id);
        while let Some(type_id) = current {
            match self.structured_type(type_id) {
                Some(t) if t.is_open => return true,
                Some(t) => current = t.base_type,
                None => return false,
            }
        }
        false
    }

    fn type_name(&self, id: SchemaTypeId) -> String {
        self.schema_type(id)
            .map(SchemaType::qualified_name)
            .unwrap_or_else(|| id.to_string())
    }

    /// Human-readable rendering used in error messages
    fn display_type(&self, type_ref: &TypeRef) -> String {
        match &type_ref.ty {
            EdmType::None => "null".to_string(),
            EdmType::Primitive(kind) => kind.qualified_name(),
            EdmType::Entity(id) | EdmType::Complex(id) | EdmType::Enum(id) => self.type_name(*id),
            EdmType::EntityReference(id) => format!("Ref({})", self.type_name(*id)),
            EdmType::Collection(element) => format!("Collection({})", self.display_type(element)),
            EdmType::Row(properties) => {
                let parts: Vec<String> = properties
                    .iter()
                    .map(|p| format!("{}: {}", p.name, self.display_type(&p.type_ref)))
                    .collect();
                format!("Row({})", parts.join(", "))
            }
        }
    }
}

/// Errors raised while assembling a model
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Type '{0}' is already declared")]
    DuplicateType(String),

    #[error("Property '{property}' is already declared on '{owner}'")]
    DuplicateProperty { owner: String, property: String },

    #[error("Type handle {0} does not belong to this model")]
    ForeignHandle(String),

    #[error("'{0}' is not a {1} type")]
    WrongKind(String, &'static str),

    #[error("Setting base type of '{0}' would create an inheritance cycle")]
    InheritanceCycle(String),

    #[error("Navigation source '{0}' is already declared")]
    DuplicateNavigationSource(String),

    #[error("Navigation source '{0}' is not declared")]
    UnknownNavigationSource(String),

    #[error("Enum member '{member}' is already declared on '{owner}'")]
    DuplicateEnumMember { owner: String, member: String },
}

/// Arena-backed model
#[derive(Debug)]
pub struct EdmModel {
    id: ModelId,
    types: Vec<SchemaType>,
    type_index: IndexMap<String, usize>,
    container: Option<EntityContainer>,
    operations: Vec<Operation>,
    operation_index: IndexMap<String, SmallVec<[usize; 2]>>,
    derived: OnceCell<HashMap<SchemaTypeId, Vec<SchemaTypeId>>>,
    validation: OnceCell<Vec<EdmError>>,
}

impl EdmModel {
    pub fn id(&self) -> ModelId {
        self.id
    }

    fn handle(&self, index: usize) -> SchemaTypeId {
        SchemaTypeId::new(self.id, index)
    }

    /// Model validation results, computed once and cached alongside the model
    pub fn validation_errors(&self) -> &[EdmError] {
        self.validation.get_or_init(|| validate_model(self))
    }

    pub fn is_valid(&self) -> bool {
        self.validation_errors().is_empty()
    }

    fn derived_map(&self) -> &HashMap<SchemaTypeId, Vec<SchemaTypeId>> {
        self.derived.get_or_init(|| {
            let mut map: HashMap<SchemaTypeId, Vec<SchemaTypeId>> = HashMap::new();
            for (index, schema_type) in self.types.iter().enumerate() {
                let id = self.handle(index);
                let mut base = schema_type.as_structured().and_then(|t| t.base_type);
                while let Some(base_id) = base {
                    map.entry(base_id).or_default().push(id);
                    base = self.structured_type(base_id).and_then(|t| t.base_type);
                }
            }
            map
        })
    }
}

impl TypeModel for EdmModel {
    fn model_id(&self) -> ModelId {
        self.id
    }

    fn schema_type(&self, id: SchemaTypeId) -> Option<&SchemaType> {
        if id.belongs_to(self.id) {
            self.types.get(id.index())
        } else {
            None
        }
    }

    fn find_type(&self, qualified_name: &str) -> Option<SchemaTypeId> {
        self.type_index
            .get(qualified_name)
            .map(|index| self.handle(*index))
    }

    fn type_ids(&self) -> Vec<SchemaTypeId> {
        (0..self.types.len()).map(|i| self.handle(i)).collect()
    }

    fn find_entity_container(&self, name: &str) -> Option<&EntityContainer> {
        self.container
            .as_ref()
            .filter(|c| c.name == name || c.qualified_name() == name)
    }

    fn entity_container(&self) -> Option<&EntityContainer> {
        self.container.as_ref()
    }

    fn resolve_operations(&self, qualified_name: &str) -> Vec<&Operation> {
        self.operation_index
            .get(qualified_name)
            .map(|indices| indices.iter().map(|i| &self.operations[*i]).collect())
            .unwrap_or_default()
    }

    fn operations(&self) -> &[Operation] {
        &self.operations
    }

    fn derived_types(&self, id: SchemaTypeId) -> Vec<SchemaTypeId> {
        self.derived_map().get(&id).cloned().unwrap_or_default()
    }
}

/// Incremental model construction
///
/// Types are declared first and receive handles, so properties can refer to
/// types declared later (mutually recursive navigations).
#[derive(Debug)]
pub struct ModelBuilder {
    id: ModelId,
    types: Vec<SchemaType>,
    type_index: IndexMap<String, usize>,
    container: EntityContainer,
    operations: Vec<Operation>,
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new("Default", "Container")
    }
}

impl ModelBuilder {
    pub fn new(container_namespace: impl Into<String>, container_name: impl Into<String>) -> Self {
        Self {
            id: ModelId::fresh(),
            types: Vec::new(),
            type_index: IndexMap::new(),
            container: EntityContainer::new(container_namespace, container_name),
            operations: Vec::new(),
        }
    }

    fn declare(&mut self, schema_type: SchemaType) -> Result<SchemaTypeId, ModelError> {
        let qualified = schema_type.qualified_name();
        if self.type_index.contains_key(&qualified) {
            return Err(ModelError::DuplicateType(qualified));
        }
        let index = self.types.len();
        self.types.push(schema_type);
        self.type_index.insert(qualified, index);
        Ok(SchemaTypeId::new(self.id, index))
    }

    fn structured(
        &mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        kind: StructuredKind,
    ) -> Result<SchemaTypeId, ModelError> {
        self.declare(SchemaType::Structured(StructuredType {
            namespace: namespace.into(),
            name: name.into(),
            kind,
            base_type: None,
            is_abstract: false,
            is_open: false,
            properties: IndexMap::new(),
            key: Vec::new(),
        }))
    }

    pub fn add_entity_type(
        &mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<SchemaTypeId, ModelError> {
        self.structured(namespace, name, StructuredKind::Entity)
    }

    pub fn add_complex_type(
        &mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<SchemaTypeId, ModelError> {
        self.structured(namespace, name, StructuredKind::Complex)
    }

    pub fn add_enum_type(
        &mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        underlying: PrimitiveKind,
        is_flags: bool,
    ) -> Result<SchemaTypeId, ModelError> {
        self.declare(SchemaType::Enum(EnumType {
            namespace: namespace.into(),
            name: name.into(),
            underlying,
            is_flags,
            members: IndexMap::new(),
        }))
    }

    fn schema_mut(&mut self, id: SchemaTypeId) -> Result<&mut SchemaType, ModelError> {
        if !id.belongs_to(self.id) {
            return Err(ModelError::ForeignHandle(id.to_string()));
        }
        self.types
            .get_mut(id.index())
            .ok_or_else(|| ModelError::ForeignHandle(id.to_string()))
    }

    fn structured_mut(&mut self, id: SchemaTypeId) -> Result<&mut StructuredType, ModelError> {
        match self.schema_mut(id)? {
            SchemaType::Structured(t) => Ok(t),
            SchemaType::Enum(t) => Err(ModelError::WrongKind(t.qualified_name(), "structured")),
        }
    }

    pub fn add_enum_member(
        &mut self,
        id: SchemaTypeId,
        name: impl Into<String>,
        value: i64,
    ) -> Result<(), ModelError> {
        let name = name.into();
        match self.schema_mut(id)? {
            SchemaType::Enum(t) => {
                if t.members.contains_key(&name) {
                    return Err(ModelError::DuplicateEnumMember {
                        owner: t.qualified_name(),
                        member: name,
                    });
                }
                t.members.insert(name, value);
                Ok(())
            }
            SchemaType::Structured(t) => Err(ModelError::WrongKind(t.qualified_name(), "enum")),
        }
    }

    pub fn set_base_type(&mut self, id: SchemaTypeId, base: SchemaTypeId) -> Result<(), ModelError> {
        let base_kind = match self.schema_mut(base)? {
            SchemaType::Structured(t) => t.kind,
            SchemaType::Enum(t) => return Err(ModelError::WrongKind(t.qualified_name(), "structured")),
        };
        // Walk the prospective base chain; reaching `id` means a cycle
        let mut cursor = Some(base);
        while let Some(current) = cursor {
            if current == id {
                let name = self.structured_mut(id)?.qualified_name();
                return Err(ModelError::InheritanceCycle(name));
            }
            cursor = self.structured_mut(current)?.base_type;
        }
        let derived = self.structured_mut(id)?;
        if derived.kind != base_kind {
            return Err(ModelError::WrongKind(
                derived.qualified_name(),
                match base_kind {
                    StructuredKind::Entity => "entity",
                    StructuredKind::Complex => "complex",
                },
            ));
        }
        derived.base_type = Some(base);
        Ok(())
    }

    pub fn set_open(&mut self, id: SchemaTypeId, is_open: bool) -> Result<(), ModelError> {
        self.structured_mut(id)?.is_open = is_open;
        Ok(())
    }

    pub fn set_abstract(&mut self, id: SchemaTypeId, is_abstract: bool) -> Result<(), ModelError> {
        self.structured_mut(id)?.is_abstract = is_abstract;
        Ok(())
    }

    fn insert_property(&mut self, id: SchemaTypeId, property: Property) -> Result<(), ModelError> {
        let owner = self.structured_mut(id)?;
        if owner.properties.contains_key(property.name()) {
            return Err(ModelError::DuplicateProperty {
                owner: owner.qualified_name(),
                property: property.name().to_string(),
            });
        }
        owner.properties.insert(property.name().to_string(), property);
        Ok(())
    }

    pub fn add_structural_property(
        &mut self,
        id: SchemaTypeId,
        name: impl Into<String>,
        type_ref: TypeRef,
    ) -> Result<(), ModelError> {
        self.insert_property(
            id,
            Property::Structural(StructuralProperty {
                name: name.into(),
                type_ref,
            }),
        )
    }

    pub fn add_navigation_property(
        &mut self,
        id: SchemaTypeId,
        navigation: NavigationProperty,
    ) -> Result<(), ModelError> {
        self.schema_mut(navigation.target)?;
        self.insert_property(id, Property::Navigation(navigation))
    }

    /// Declare a non-nullable primitive key property and add it to the key
    pub fn add_key_property(
        &mut self,
        id: SchemaTypeId,
        name: impl Into<String>,
        kind: PrimitiveKind,
    ) -> Result<(), ModelError> {
        let name = name.into();
        self.add_structural_property(id, name.clone(), TypeRef::primitive(kind, false))?;
        self.structured_mut(id)?.key.push(name);
        Ok(())
    }

    /// Mark already-declared properties as the key
    pub fn set_key(&mut self, id: SchemaTypeId, names: &[&str]) -> Result<(), ModelError> {
        self.structured_mut(id)?.key = names.iter().map(|n| n.to_string()).collect();
        Ok(())
    }

    fn add_source(
        &mut self,
        name: impl Into<String>,
        entity_type: SchemaTypeId,
        kind: NavigationSourceKind,
    ) -> Result<(), ModelError> {
        let name = name.into();
        self.schema_mut(entity_type)?;
        if self.container.sources.contains_key(&name) {
            return Err(ModelError::DuplicateNavigationSource(name));
        }
        self.container.sources.insert(
            name.clone(),
            NavigationSource {
                name,
                kind,
                entity_type,
                navigation_bindings: IndexMap::new(),
            },
        );
        Ok(())
    }

    pub fn add_entity_set(
        &mut self,
        name: impl Into<String>,
        entity_type: SchemaTypeId,
    ) -> Result<(), ModelError> {
        self.add_source(name, entity_type, NavigationSourceKind::EntitySet)
    }

    pub fn add_singleton(
        &mut self,
        name: impl Into<String>,
        entity_type: SchemaTypeId,
    ) -> Result<(), ModelError> {
        self.add_source(name, entity_type, NavigationSourceKind::Singleton)
    }

    /// Bind navigation `path` of `source` to `target`; the target may be declared later
    pub fn add_navigation_binding(
        &mut self,
        source: &str,
        path: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<(), ModelError> {
        let source = self
            .container
            .sources
            .get_mut(source)
            .ok_or_else(|| ModelError::UnknownNavigationSource(source.to_string()))?;
        source.navigation_bindings.insert(path.into(), target.into());
        Ok(())
    }

    pub fn add_operation(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    /// Expose an unbound operation at the service root
    pub fn add_operation_import(
        &mut self,
        name: impl Into<String>,
        operation: impl Into<String>,
        entity_set: Option<String>,
    ) {
        let name = name.into();
        self.container.operation_imports.insert(
            name.clone(),
            OperationImport {
                name,
                operation: operation.into(),
                entity_set,
            },
        );
    }

    pub fn build(self) -> EdmModel {
        let mut operation_index: IndexMap<String, SmallVec<[usize; 2]>> = IndexMap::new();
        for (index, operation) in self.operations.iter().enumerate() {
            operation_index
                .entry(operation.qualified_name())
                .or_default()
                .push(index);
        }
        log::debug!(
            "built model with {} types, {} navigation sources and {} operations",
            self.types.len(),
            self.container.sources.len(),
            self.operations.len()
        );
        EdmModel {
            id: self.id,
            types: self.types,
            type_index: self.type_index,
            container: Some(self.container),
            operations: self.operations,
            operation_index,
            derived: OnceCell::new(),
            validation: OnceCell::new(),
        }
    }
}
