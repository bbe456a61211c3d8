//! Untyped syntax tree for OData query options
//!
//! Tokens mirror the query grammar. Nothing here knows about the model: a
//! token for `Name eq 'Bob'` says that `Name` is a path, not that it is a
//! string property.

mod apply;
mod literal;
mod operator;
mod options;
mod token;

pub use apply::*;
pub use literal::*;
pub use operator::*;
pub use options::*;
pub use token::*;
