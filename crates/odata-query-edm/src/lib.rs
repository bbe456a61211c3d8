//! Entity data model consumed by the query front end
//!
//! This crate provides:
//! - Primitive kinds and implicit promotion rules
//! - Type references with facets and the kind-dispatched equivalence relation
//! - The read-only [`TypeModel`] contract and an arena-backed [`EdmModel`]
//! - Model validation, including the duplicate-operation rules
//!
//! ```
//! use odata_query_edm::{ModelBuilder, PrimitiveKind, TypeModel, TypeRef};
//!
//! let mut builder = ModelBuilder::default();
//! let person = builder.add_entity_type("NS", "Person").unwrap();
//! builder.add_key_property(person, "Id", PrimitiveKind::Int32).unwrap();
//! builder.add_structural_property(person, "Name", TypeRef::string()).unwrap();
//! builder.add_entity_set("People", person).unwrap();
//!
//! let model = builder.build();
//! assert!(model.is_valid());
//! assert_eq!(model.find_type("NS.Person"), Some(person));
//! ```

pub mod container;
pub mod equivalence;
pub mod model;
pub mod operation;
pub mod primitive;
pub mod schema;
pub mod types;
pub mod validation;

pub use container::{EntityContainer, NavigationSource, NavigationSourceKind, OperationImport};
pub use equivalence::{is_equivalent_to, signatures_equivalent, type_ref_equivalent};
pub use model::{EdmModel, ModelBuilder, ModelError, TypeModel};
pub use operation::{Operation, OperationKind, OperationParameter};
pub use primitive::{arithmetic_operand_type, can_promote, common_promotion, PrimitiveKind};
pub use schema::{
    EnumType, NavigationProperty, Property, SchemaType, StructuralProperty, StructuredKind,
    StructuredType,
};
pub use types::{
    EdmType, EdmTypeKind, Facets, MaxLength, ModelId, RowProperty, Scale, SchemaTypeId, Srid,
    TypeRef,
};
pub use validation::{validate_model, DuplicateOperationValidator, EdmError, ValidationContext};
