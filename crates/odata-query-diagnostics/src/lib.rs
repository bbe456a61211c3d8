//! Diagnostics for the OData query front end
//!
//! Error codes, byte-offset spans and the error types shared by the lexer,
//! the syntactic parser, the semantic binder and model validation.

mod error;
mod error_code;
mod span;

pub use error::*;
pub use error_code::*;
pub use span::*;

/// Result type for query parsing and binding
pub type Result<T> = std::result::Result<T, QueryError>;
