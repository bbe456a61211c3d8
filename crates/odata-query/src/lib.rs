//! OData query-option front end for Rust
//!
//! This crate ties the workspace together:
//! - Splitting a request's query string into options ([`QueryOptions`])
//! - Parsing each option into untyped tokens ([`parser`])
//! - Binding the tokens against an in-memory model ([`semantic`], [`edm`])
//! - Duplicate-operation and structural model validation ([`edm::validation`])
//!
//! # Example
//!
//! ```
//! use odata_query::{ModelBuilder, PrimitiveKind, TypeRef, UriQueryParser};
//!
//! let mut builder = ModelBuilder::new("Shop", "Container");
//! let order = builder.add_entity_type("Shop", "Order").unwrap();
//! builder.add_key_property(order, "Id", PrimitiveKind::Int32).unwrap();
//! builder.add_structural_property(order, "Region", TypeRef::string()).unwrap();
//! builder
//!     .add_structural_property(order, "Total", TypeRef::primitive(PrimitiveKind::Decimal, false))
//!     .unwrap();
//! builder.add_entity_set("Orders", order).unwrap();
//! let model = builder.build();
//!
//! let uri = UriQueryParser::new(&model)
//!     .parse("Orders?$apply=groupby((Region),aggregate(Total with sum as Sum))&$filter=Sum gt 10")
//!     .unwrap();
//! assert_eq!(uri.apply.unwrap().context_projection(), Some("(Region,Sum)"));
//! ```

pub mod options;
pub mod uri;

// Re-export all public APIs from internal crates
pub use odata_query_ast as ast;
pub use odata_query_diagnostics as diagnostics;
pub use odata_query_edm as edm;
pub use odata_query_parser as parser;
pub use odata_query_semantic as semantic;

// Convenience re-exports
pub use odata_query_diagnostics::{ErrorCode, QueryError, Result};
pub use odata_query_edm::{validate_model, EdmError, EdmModel, ModelBuilder, PrimitiveKind, TypeModel, TypeRef};
pub use odata_query_parser::{ParserSettings, QueryParser};
pub use odata_query_semantic::{BinderSettings, BindingContext, QueryNode};
pub use options::{QueryOptions, SystemQueryOption};
pub use uri::{ODataUri, UriQueryParser};
