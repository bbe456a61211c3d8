//! Tokens for the structural query options

use crate::{NamedValue, QueryToken};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Built-in path segments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemSegment {
    Ref,
    Count,
    Value,
}

impl SystemSegment {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "$ref" => Some(Self::Ref),
            "$count" => Some(Self::Count),
            "$value" => Some(Self::Value),
            _ => None,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ref => "$ref",
            Self::Count => "$count",
            Self::Value => "$value",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentKind {
    /// Property, navigation property, type cast or operation name
    Named(String),
    System(SystemSegment),
    /// `*`, or `NS.*` for every operation in a namespace
    Wildcard { namespace: Option<String> },
}

/// One segment of a `$select`/`$expand` path
///
/// The parser links segments leaf-first (`next` points toward the start of
/// the path); [`PathSegmentToken::normalized`] rebuilds the chain root-first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSegmentToken {
    pub kind: SegmentKind,
    pub next: Option<Box<PathSegmentToken>>,
}

impl PathSegmentToken {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Named(name.into()),
            next: None,
        }
    }

    pub fn wildcard(namespace: Option<String>) -> Self {
        Self {
            kind: SegmentKind::Wildcard { namespace },
            next: None,
        }
    }

    pub fn system(segment: SystemSegment) -> Self {
        Self {
            kind: SegmentKind::System(segment),
            next: None,
        }
    }

    pub fn with_next(mut self, next: PathSegmentToken) -> Self {
        self.next = Some(Box::new(next));
        self
    }

    /// Root-first chain from root-first segment kinds
    pub fn from_segments(segments: impl IntoIterator<Item = SegmentKind>) -> Option<Self> {
        let kinds: Vec<SegmentKind> = segments.into_iter().collect();
        kinds.into_iter().rev().fold(None, |next, kind| {
            Some(Self {
                kind,
                next: next.map(Box::new),
            })
        })
    }

    pub fn segments(&self) -> Vec<&SegmentKind> {
        let mut out = vec![&self.kind];
        let mut current = self.next.as_deref();
        while let Some(segment) = current {
            out.push(&segment.kind);
            current = segment.next.as_deref();
        }
        out
    }

    /// A new chain with the link direction reversed
    pub fn normalized(&self) -> Self {
        let mut reversed: Option<PathSegmentToken> = None;
        for kind in self.segments() {
            reversed = Some(Self {
                kind: kind.clone(),
                next: reversed.map(Box::new),
            });
        }
        reversed.unwrap_or_else(|| self.clone())
    }

    pub fn last(&self) -> &SegmentKind {
        let mut current = self;
        while let Some(next) = current.next.as_deref() {
            current = next;
        }
        &current.kind
    }

    pub fn is_wildcard(&self) -> bool {
        self.next.is_none() && matches!(self.kind, SegmentKind::Wildcard { .. })
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.write_str(name),
            Self::System(segment) => f.write_str(segment.name()),
            Self::Wildcard { namespace: Some(ns) } => write!(f, "{ns}.*"),
            Self::Wildcard { namespace: None } => f.write_str("*"),
        }
    }
}

impl fmt::Display for PathSegmentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.segments().iter().map(|s| s.to_string()).collect();
        f.write_str(&parts.join("/"))
    }
}

/// One `/`-separated segment of a resource path, e.g. `People(1)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSegmentToken {
    pub name: String,
    /// Key values or operation arguments; `None` when no parentheses follow
    pub arguments: Option<Vec<NamedValue>>,
}

impl fmt::Display for ResourceSegmentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(arguments) = &self.arguments {
            let rendered: Vec<String> = arguments
                .iter()
                .map(|arg| match &arg.name {
                    Some(name) => format!("{name}={}", arg.value),
                    None => arg.value.to_string(),
                })
                .collect();
            write!(f, "({})", rendered.join(","))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderByDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByToken {
    pub expression: QueryToken,
    pub direction: OrderByDirection,
}

/// `expr as Alias`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeExpressionToken {
    pub expression: QueryToken,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SearchToken {
    /// Bare word or quoted phrase
    Term(String),
    And(Box<SearchToken>, Box<SearchToken>),
    Or(Box<SearchToken>, Box<SearchToken>),
    Not(Box<SearchToken>),
}

impl SearchToken {
    pub fn and(left: SearchToken, right: SearchToken) -> Self {
        Self::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: SearchToken, right: SearchToken) -> Self {
        Self::Or(Box::new(left), Box::new(right))
    }

    pub fn not(operand: SearchToken) -> Self {
        Self::Not(Box::new(operand))
    }
}

impl fmt::Display for SearchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Term(term) if term.contains(char::is_whitespace) => write!(f, "\"{term}\""),
            Self::Term(term) => f.write_str(term),
            Self::And(l, r) => write!(f, "({l} AND {r})"),
            Self::Or(l, r) => write!(f, "({l} OR {r})"),
            Self::Not(operand) => write!(f, "(NOT {operand})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LevelsToken {
    Max,
    Value(i64),
}

/// Options shared by select and expand terms
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NestedOptions {
    pub filter: Option<QueryToken>,
    pub orderby: Option<Vec<OrderByToken>>,
    pub top: Option<i64>,
    pub skip: Option<i64>,
    pub count: Option<bool>,
    pub search: Option<SearchToken>,
    pub select: Option<SelectToken>,
    pub compute: Option<Vec<ComputeExpressionToken>>,
}

impl NestedOptions {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectTermToken {
    pub path: PathSegmentToken,
    pub options: NestedOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectToken {
    pub terms: Vec<SelectTermToken>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandTermToken {
    pub path: PathSegmentToken,
    pub options: NestedOptions,
    pub expand: Option<ExpandToken>,
    pub levels: Option<LevelsToken>,
}

impl ExpandTermToken {
    pub fn new(path: PathSegmentToken) -> Self {
        Self {
            path,
            options: NestedOptions::default(),
            expand: None,
            levels: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpandToken {
    pub terms: Vec<ExpandTermToken>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalization_reverses_links_without_touching_the_input() {
        // Parsed leaf-first: Items -> Orders
        let parsed = PathSegmentToken::named("Items").with_next(PathSegmentToken::named("Orders"));
        let normalized = parsed.normalized();
        assert_eq!(normalized.to_string(), "Orders/Items");
        assert_eq!(parsed.to_string(), "Items/Orders");
        assert_eq!(normalized.last(), &SegmentKind::Named("Items".into()));
    }

    #[test]
    fn test_from_segments_is_root_first() {
        let path = PathSegmentToken::from_segments([
            SegmentKind::Named("Orders".into()),
            SegmentKind::System(SystemSegment::Count),
        ]);
        assert_eq!(path.map(|p| p.to_string()).as_deref(), Some("Orders/$count"));
    }
}
