//! Expression tokens
//!
//! Paths grow to the right: `Orders/Items/Price` is an `EndPath("Price")`
//! whose parent is an `InnerPath("Items")` whose parent is an
//! `InnerPath("Orders")`. A path without a parent is resolved against the
//! implicit range variable (`$it`) or, inside a lambda, the nearest
//! lambda parameter of that name.

use crate::{BinaryOperatorKind, LiteralToken, UnaryOperatorKind};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type BoxToken = Box<QueryToken>;

/// `name=value` pair in a key predicate or function argument list; positional when `name` is `None`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: Option<String>,
    pub value: QueryToken,
}

impl NamedValue {
    pub fn named(name: impl Into<String>, value: QueryToken) -> Self {
        Self {
            name: Some(name.into()),
            value,
        }
    }

    pub fn positional(value: QueryToken) -> Self {
        Self { name: None, value }
    }
}

/// Body of `any`/`all`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LambdaToken {
    /// The collection the lambda ranges over
    pub parent: BoxToken,
    /// Lambda variable; `None` for the argument-less `any()`
    pub parameter: Option<String>,
    pub expression: Option<BoxToken>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryToken {
    Literal(LiteralToken),
    BinaryOperator {
        op: BinaryOperatorKind,
        left: BoxToken,
        right: BoxToken,
    },
    UnaryOperator {
        op: UnaryOperatorKind,
        operand: BoxToken,
    },
    /// Last segment of a path
    EndPath {
        name: String,
        parent: Option<BoxToken>,
    },
    /// Non-terminal segment, optionally followed by a key predicate
    InnerPath {
        name: String,
        parent: Option<BoxToken>,
        /// `Some(vec![])` for a present-but-empty `()` predicate
        named_values: Option<Vec<NamedValue>>,
    },
    /// Namespace-qualified segment: a type cast or an enum/type name argument
    DottedIdentifier {
        name: String,
        parent: Option<BoxToken>,
    },
    FunctionCall {
        name: String,
        args: Vec<NamedValue>,
        parent: Option<BoxToken>,
    },
    Any(LambdaToken),
    All(LambdaToken),
    /// `$it`, or a lambda variable used on its own
    RangeVariable(String),
    /// `@p1`
    ParameterAlias(String),
    In {
        left: BoxToken,
        right: BoxToken,
    },
    /// Parenthesised list, the right side of `in`
    List(Vec<QueryToken>),
    /// `$count` segment; `parent` is `None` for the virtual `$count` of `$apply`
    Count {
        parent: Option<BoxToken>,
    },
    Star,
}

impl QueryToken {
    pub fn literal(token: LiteralToken) -> Self {
        Self::Literal(token)
    }

    pub fn binary(op: BinaryOperatorKind, left: QueryToken, right: QueryToken) -> Self {
        Self::BinaryOperator {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOperatorKind, operand: QueryToken) -> Self {
        Self::UnaryOperator {
            op,
            operand: Box::new(operand),
        }
    }

    /// Unparented path segment
    pub fn end_path(name: impl Into<String>) -> Self {
        Self::EndPath {
            name: name.into(),
            parent: None,
        }
    }

    /// Build a path from `/`-separated segment names; an empty slice yields `*`
    pub fn path(segments: &[&str]) -> Self {
        let Some((last, inner)) = segments.split_last() else {
            return Self::Star;
        };
        let parent = inner.iter().fold(None, |parent, name| {
            Some(Box::new(Self::InnerPath {
                name: name.to_string(),
                parent,
                named_values: None,
            }))
        });
        Self::EndPath {
            name: last.to_string(),
            parent,
        }
    }

    /// Parent of a path-like token
    pub fn parent(&self) -> Option<&QueryToken> {
        match self {
            Self::EndPath { parent, .. }
            | Self::InnerPath { parent, .. }
            | Self::DottedIdentifier { parent, .. }
            | Self::FunctionCall { parent, .. }
            | Self::Count { parent } => parent.as_deref(),
            Self::Any(lambda) | Self::All(lambda) => Some(&lambda.parent),
            _ => None,
        }
    }

    /// Segment names from the root of the path to this token
    pub fn path_segments(&self) -> Option<Vec<&str>> {
        let mut names = Vec::new();
        let mut current = Some(self);
        while let Some(token) = current {
            match token {
                Self::EndPath { name, .. }
                | Self::InnerPath { name, .. }
                | Self::DottedIdentifier { name, .. } => names.push(name.as_str()),
                Self::RangeVariable(name) => names.push(name.as_str()),
                _ => return None,
            }
            current = token.parent();
        }
        names.reverse();
        Some(names)
    }
}

fn write_parent(f: &mut fmt::Formatter<'_>, parent: &Option<BoxToken>) -> fmt::Result {
    if let Some(parent) = parent {
        write!(f, "{parent}/")?;
    }
    Ok(())
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[NamedValue]) -> fmt::Result {
    for (index, arg) in args.iter().enumerate() {
        if index > 0 {
            f.write_str(",")?;
        }
        match &arg.name {
            Some(name) => write!(f, "{name}={}", arg.value)?,
            None => write!(f, "{}", arg.value)?,
        }
    }
    Ok(())
}

/// Canonical text with every operator application parenthesised
impl fmt::Display for QueryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(literal) => write!(f, "{literal}"),
            Self::BinaryOperator { op, left, right } => write!(f, "({left} {op} {right})"),
            Self::UnaryOperator { op: UnaryOperatorKind::Not, operand } => write!(f, "(not {operand})"),
            Self::UnaryOperator { op, operand } => write!(f, "({op}{operand})"),
            Self::EndPath { name, parent } | Self::DottedIdentifier { name, parent } => {
                write_parent(f, parent)?;
                f.write_str(name)
            }
            Self::InnerPath {
                name,
                parent,
                named_values,
            } => {
                write_parent(f, parent)?;
                f.write_str(name)?;
                if let Some(values) = named_values {
                    f.write_str("(")?;
                    write_args(f, values)?;
                    f.write_str(")")?;
                }
                Ok(())
            }
            Self::FunctionCall { name, args, parent } => {
                write_parent(f, parent)?;
                write!(f, "{name}(")?;
                write_args(f, args)?;
                f.write_str(")")
            }
            Self::Any(lambda) | Self::All(lambda) => {
                let keyword = if matches!(self, Self::Any(_)) { "any" } else { "all" };
                write!(f, "{}/{keyword}(", lambda.parent)?;
                if let (Some(parameter), Some(expression)) = (&lambda.parameter, &lambda.expression) {
                    write!(f, "{parameter}:{expression}")?;
                }
                f.write_str(")")
            }
            Self::RangeVariable(name) => f.write_str(name),
            Self::ParameterAlias(name) => write!(f, "@{name}"),
            Self::In { left, right } => write!(f, "({left} in {right})"),
            Self::List(items) => {
                f.write_str("(")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Self::Count { parent } => {
                write_parent(f, parent)?;
                f.write_str("$count")
            }
            Self::Star => f.write_str("*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_path_builder_grows_right() {
        let path = QueryToken::path(&["Orders", "Items", "Price"]);
        assert_eq!(path.path_segments(), Some(vec!["Orders", "Items", "Price"]));
        assert_eq!(path.to_string(), "Orders/Items/Price");
        match &path {
            QueryToken::EndPath { name, parent: Some(parent) } => {
                assert_eq!(name, "Price");
                assert!(matches!(**parent, QueryToken::InnerPath { .. }));
            }
            other => panic!("expected EndPath, got {other:?}"),
        }
    }

    #[test]
    fn test_display_parenthesises_operators() {
        let token = QueryToken::binary(
            BinaryOperatorKind::Or,
            QueryToken::unary(UnaryOperatorKind::Not, QueryToken::end_path("A")),
            QueryToken::binary(
                BinaryOperatorKind::Equal,
                QueryToken::end_path("Name"),
                QueryToken::literal(LiteralToken::string("Bob")),
            ),
        );
        assert_eq!(token.to_string(), "((not A) or (Name eq 'Bob'))");
    }
}
