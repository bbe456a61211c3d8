//! Semantic binding of OData query options
//!
//! Turns the untyped tokens produced by `odata-query-parser` into a typed
//! [`QueryNode`] tree by resolving every name against a [`TypeModel`]
//! (`odata_query_edm::TypeModel`). All entry points take a
//! [`BindingContext`] that fixes the model, the resource `$it` stands for
//! and any parameter-alias values.
//!
//! ```
//! use odata_query_edm::{ModelBuilder, PrimitiveKind, TypeRef};
//! use odata_query_parser::parse_filter;
//! use odata_query_semantic::{bind_filter, BindingContext};
//!
//! let mut builder = ModelBuilder::default();
//! let person = builder.add_entity_type("NS", "Person").unwrap();
//! builder.add_key_property(person, "Id", PrimitiveKind::Int32).unwrap();
//! builder.add_structural_property(person, "Name", TypeRef::string()).unwrap();
//! builder.add_entity_set("People", person).unwrap();
//! let model = builder.build();
//!
//! let context = BindingContext::for_navigation_source(&model, "People").unwrap();
//! let filter = bind_filter(&parse_filter("Name eq 'Bob'").unwrap(), &context).unwrap();
//! assert_eq!(filter.expression.to_string(), "($it/Name eq 'Bob')");
//! ```
//!
//! [`TypeModel`]: odata_query_edm::TypeModel

pub mod apply;
pub mod binder;
pub mod clauses;
pub mod context;
pub mod functions;
pub mod nodes;
mod operations;
pub mod path;
mod promotion;
mod scope;
pub mod select_expand;
pub mod settings;

pub use apply::{
    bind_apply, AggregateStatement, ApplyClause, ApplyShape, GroupByPropertyNode, GroupByTransformationNode,
    ShapeEntryKind, ShapeProperty, TransformationNode,
};
pub use binder::{bind, MetadataBinder};
pub use clauses::{
    bind_compute, bind_filter, bind_orderby, bind_search, ComputeClause, ComputeExpression, FilterClause,
    OrderByClause, OrderByItem, SearchClause, SearchExpression,
};
pub use context::BindingContext;
pub use nodes::{QueryNode, QueryNodeVisitor, RangeVariable};
pub use path::{bind_path, ODataPath, PathBinder, PathSegment, PathSegmentKind};
pub use select_expand::{bind_select_expand, NestedQueryOptions, SelectExpandClause, SelectItem};
pub use settings::BinderSettings;
