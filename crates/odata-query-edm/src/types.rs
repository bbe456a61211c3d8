//! Type and type-reference representation
//!
//! Schema types (entity, complex, enum) live in the model's arena and are
//! referred to by [`SchemaTypeId`] handles. A handle carries the id of the
//! model that issued it, so handles from two independently built models never
//! compare equal even when the types they name look identical.

use crate::primitive::PrimitiveKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_MODEL_ID: AtomicU32 = AtomicU32::new(1);

/// Identity of one built model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelId(u32);

impl ModelId {
    pub(crate) fn fresh() -> Self {
        Self(NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Handle of a schema type inside a model's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaTypeId {
    model: u32,
    index: u32,
}

impl SchemaTypeId {
    pub(crate) fn new(model: ModelId, index: usize) -> Self {
        Self {
            model: model.0,
            index: index as u32,
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index as usize
    }

    /// Whether this handle was issued by the given model
    pub fn belongs_to(&self, model: ModelId) -> bool {
        self.model == model.0
    }
}

impl fmt::Display for SchemaTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.model, self.index)
    }
}

/// Discriminant of [`EdmType`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdmTypeKind {
    None,
    Primitive,
    Entity,
    Complex,
    Enum,
    Collection,
    EntityReference,
    Row,
}

impl fmt::Display for EdmTypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::Primitive => "Primitive",
            Self::Entity => "Entity",
            Self::Complex => "Complex",
            Self::Enum => "Enum",
            Self::Collection => "Collection",
            Self::EntityReference => "EntityReference",
            Self::Row => "Row",
        };
        f.write_str(name)
    }
}

/// A type definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EdmType {
    /// Absence of a type, e.g. an untyped `null`
    None,
    Primitive(PrimitiveKind),
    Entity(SchemaTypeId),
    Complex(SchemaTypeId),
    Enum(SchemaTypeId),
    Collection(Box<TypeRef>),
    EntityReference(SchemaTypeId),
    /// Anonymous structural type; property order is significant
    Row(Vec<RowProperty>),
}

impl EdmType {
    pub fn kind(&self) -> EdmTypeKind {
        match self {
            Self::None => EdmTypeKind::None,
            Self::Primitive(_) => EdmTypeKind::Primitive,
            Self::Entity(_) => EdmTypeKind::Entity,
            Self::Complex(_) => EdmTypeKind::Complex,
            Self::Enum(_) => EdmTypeKind::Enum,
            Self::Collection(_) => EdmTypeKind::Collection,
            Self::EntityReference(_) => EdmTypeKind::EntityReference,
            Self::Row(_) => EdmTypeKind::Row,
        }
    }

    /// Arena handle for entity, complex, enum and entity-reference types
    pub fn schema_id(&self) -> Option<SchemaTypeId> {
        match self {
            Self::Entity(id) | Self::Complex(id) | Self::Enum(id) | Self::EntityReference(id) => {
                Some(*id)
            }
            _ => None,
        }
    }

    pub fn as_primitive(&self) -> Option<PrimitiveKind> {
        match self {
            Self::Primitive(kind) => Some(*kind),
            _ => None,
        }
    }
}

/// One declared property of a [`EdmType::Row`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowProperty {
    pub name: String,
    pub type_ref: TypeRef,
}

impl RowProperty {
    pub fn new(name: impl Into<String>, type_ref: TypeRef) -> Self {
        Self {
            name: name.into(),
            type_ref,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaxLength {
    Max,
    Bounded(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scale {
    Variable,
    Fixed(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Srid {
    Variable,
    Value(u32),
}

/// Kind-specific facets of a primitive type reference
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Facets {
    pub max_length: Option<MaxLength>,
    pub is_unicode: Option<bool>,
    pub is_fixed_length: Option<bool>,
    pub collation: Option<String>,
    pub precision: Option<u32>,
    pub scale: Option<Scale>,
    pub srid: Option<Srid>,
}

impl Facets {
    /// Compare only the facets that apply to `kind`
    pub fn relevant_eq(&self, other: &Facets, kind: PrimitiveKind) -> bool {
        use PrimitiveKind::*;
        match kind {
            String => {
                self.max_length == other.max_length
                    && self.is_unicode == other.is_unicode
                    && self.is_fixed_length == other.is_fixed_length
                    && self.collation == other.collation
            }
            Binary => {
                self.max_length == other.max_length
                    && self.is_fixed_length == other.is_fixed_length
            }
            Decimal => self.precision == other.precision && self.scale == other.scale,
            DateTimeOffset | TimeOfDay | Duration => self.precision == other.precision,
            k if k.is_spatial() => self.srid == other.srid,
            _ => true,
        }
    }
}

/// A type plus nullability plus facets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeRef {
    pub ty: EdmType,
    pub nullable: bool,
    pub facets: Facets,
}

impl TypeRef {
    pub fn new(ty: EdmType, nullable: bool) -> Self {
        Self {
            ty,
            nullable,
            facets: Facets::default(),
        }
    }

    pub fn primitive(kind: PrimitiveKind, nullable: bool) -> Self {
        Self::new(EdmType::Primitive(kind), nullable)
    }

    pub fn string() -> Self {
        Self::primitive(PrimitiveKind::String, true)
    }

    pub fn boolean() -> Self {
        Self::primitive(PrimitiveKind::Boolean, true)
    }

    pub fn int32() -> Self {
        Self::primitive(PrimitiveKind::Int32, true)
    }

    pub fn int64() -> Self {
        Self::primitive(PrimitiveKind::Int64, true)
    }

    pub fn entity(id: SchemaTypeId, nullable: bool) -> Self {
        Self::new(EdmType::Entity(id), nullable)
    }

    pub fn complex(id: SchemaTypeId, nullable: bool) -> Self {
        Self::new(EdmType::Complex(id), nullable)
    }

    pub fn enumeration(id: SchemaTypeId, nullable: bool) -> Self {
        Self::new(EdmType::Enum(id), nullable)
    }

    pub fn entity_reference(id: SchemaTypeId, nullable: bool) -> Self {
        Self::new(EdmType::EntityReference(id), nullable)
    }

    /// Collections themselves are never null; nullability lives on the element
    pub fn collection(element: TypeRef) -> Self {
        Self::new(EdmType::Collection(Box::new(element)), false)
    }

    pub fn row(properties: Vec<RowProperty>) -> Self {
        Self::new(EdmType::Row(properties), true)
    }

    pub fn none() -> Self {
        Self::new(EdmType::None, true)
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn with_max_length(mut self, max_length: MaxLength) -> Self {
        self.facets.max_length = Some(max_length);
        self
    }

    pub fn with_unicode(mut self, unicode: bool) -> Self {
        self.facets.is_unicode = Some(unicode);
        self
    }

    pub fn with_fixed_length(mut self, fixed: bool) -> Self {
        self.facets.is_fixed_length = Some(fixed);
        self
    }

    pub fn with_collation(mut self, collation: impl Into<String>) -> Self {
        self.facets.collation = Some(collation.into());
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.facets.precision = Some(precision);
        self
    }

    pub fn with_scale(mut self, scale: Scale) -> Self {
        self.facets.scale = Some(scale);
        self
    }

    pub fn with_srid(mut self, srid: Srid) -> Self {
        self.facets.srid = Some(srid);
        self
    }

    pub fn kind(&self) -> EdmTypeKind {
        self.ty.kind()
    }

    pub fn as_primitive(&self) -> Option<PrimitiveKind> {
        self.ty.as_primitive()
    }

    pub fn schema_id(&self) -> Option<SchemaTypeId> {
        self.ty.schema_id()
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.ty, EdmType::Collection(_))
    }

    pub fn element_type(&self) -> Option<&TypeRef> {
        match &self.ty {
            EdmType::Collection(element) => Some(element),
            _ => None,
        }
    }

    pub fn is_entity(&self) -> bool {
        matches!(self.ty, EdmType::Entity(_))
    }

    /// Entity or complex
    pub fn is_structured(&self) -> bool {
        matches!(self.ty, EdmType::Entity(_) | EdmType::Complex(_))
    }

    pub fn is_enum(&self) -> bool {
        matches!(self.ty, EdmType::Enum(_))
    }

    pub fn is_boolean(&self) -> bool {
        self.as_primitive() == Some(PrimitiveKind::Boolean)
    }
}

impl From<PrimitiveKind> for TypeRef {
    fn from(kind: PrimitiveKind) -> Self {
        TypeRef::primitive(kind, true)
    }
}
