//! Operators with precedence information

use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary operators of the common expression grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOperatorKind {
    // Precedence 1 (lowest)
    Or,

    // Precedence 2
    And,

    // Precedence 3
    Equal,
    NotEqual,

    // Precedence 4
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,

    // Precedence 5
    Add,
    Subtract,

    // Precedence 6
    Multiply,
    Divide,
    /// `divby`, decimal division
    DivideBy,
    Modulo,

    // Precedence 7, parsed next to primaries
    Has,
}

impl BinaryOperatorKind {
    /// Precedence level (1-7, higher binds tighter)
    pub const fn precedence(&self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Equal | Self::NotEqual => 3,
            Self::GreaterThan
            | Self::GreaterThanOrEqual
            | Self::LessThan
            | Self::LessThanOrEqual => 4,
            Self::Add | Self::Subtract => 5,
            Self::Multiply | Self::Divide | Self::DivideBy | Self::Modulo => 6,
            Self::Has => 7,
        }
    }

    pub const fn keyword(&self) -> &'static str {
        match self {
            Self::Or => "or",
            Self::And => "and",
            Self::Equal => "eq",
            Self::NotEqual => "ne",
            Self::GreaterThan => "gt",
            Self::GreaterThanOrEqual => "ge",
            Self::LessThan => "lt",
            Self::LessThanOrEqual => "le",
            Self::Add => "add",
            Self::Subtract => "sub",
            Self::Multiply => "mul",
            Self::Divide => "div",
            Self::DivideBy => "divby",
            Self::Modulo => "mod",
            Self::Has => "has",
        }
    }

    /// Infix keyword lookup; keywords are case-sensitive
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Some(match keyword {
            "or" => Self::Or,
            "and" => Self::And,
            "eq" => Self::Equal,
            "ne" => Self::NotEqual,
            "gt" => Self::GreaterThan,
            "ge" => Self::GreaterThanOrEqual,
            "lt" => Self::LessThan,
            "le" => Self::LessThanOrEqual,
            "add" => Self::Add,
            "sub" => Self::Subtract,
            "mul" => Self::Multiply,
            "div" => Self::Divide,
            "divby" => Self::DivideBy,
            "mod" => Self::Modulo,
            "has" => Self::Has,
            _ => return None,
        })
    }

    pub const fn is_logical(&self) -> bool {
        matches!(self, Self::Or | Self::And)
    }

    pub const fn is_equality(&self) -> bool {
        matches!(self, Self::Equal | Self::NotEqual)
    }

    /// Ordering comparisons (`gt`, `ge`, `lt`, `le`)
    pub const fn is_relational(&self) -> bool {
        matches!(
            self,
            Self::GreaterThan | Self::GreaterThanOrEqual | Self::LessThan | Self::LessThanOrEqual
        )
    }

    pub const fn is_comparison(&self) -> bool {
        self.is_equality() || self.is_relational()
    }

    pub const fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            Self::Add | Self::Subtract | Self::Multiply | Self::Divide | Self::DivideBy | Self::Modulo
        )
    }
}

impl fmt::Display for BinaryOperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Prefix operators; both are right-associative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOperatorKind {
    Negate,
    Not,
}

impl fmt::Display for UnaryOperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Negate => "-",
            Self::Not => "not",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_round_trip() {
        for op in [
            BinaryOperatorKind::Or,
            BinaryOperatorKind::GreaterThanOrEqual,
            BinaryOperatorKind::DivideBy,
            BinaryOperatorKind::Has,
        ] {
            assert_eq!(BinaryOperatorKind::from_keyword(op.keyword()), Some(op));
        }
        assert_eq!(BinaryOperatorKind::from_keyword("EQ"), None);
    }

    #[test]
    fn test_precedence_ordering() {
        assert!(BinaryOperatorKind::And.precedence() > BinaryOperatorKind::Or.precedence());
        assert!(BinaryOperatorKind::LessThan.precedence() > BinaryOperatorKind::Equal.precedence());
        assert!(BinaryOperatorKind::Modulo.precedence() > BinaryOperatorKind::Add.precedence());
    }
}
