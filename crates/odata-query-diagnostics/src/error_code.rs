//! Structured error codes
//!
//! Code ranges:
//! - ODQ0001-ODQ0099: lexical errors
//! - ODQ0100-ODQ0199: syntax errors
//! - ODQ0200-ODQ0299: binding errors (valid syntax, unresolvable against the model)
//! - ODQ0300-ODQ0399: model validation errors

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// Error code identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ErrorCode(u16);

/// Failure class an [`ErrorCode`] belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Lexical,
    Syntax,
    Binding,
    Model,
    Unknown,
}

impl ErrorCode {
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    pub const fn code(&self) -> u16 {
        self.0
    }

    pub const fn category(&self) -> ErrorCategory {
        match self.0 {
            1..=99 => ErrorCategory::Lexical,
            100..=199 => ErrorCategory::Syntax,
            200..=299 => ErrorCategory::Binding,
            300..=399 => ErrorCategory::Model,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Description and help text registered for this code
    pub fn info(&self) -> &'static ErrorInfo {
        ERROR_INFO.get(&self.0).unwrap_or(&UNKNOWN_ERROR)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ODQ{:04}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ErrorInfo {
    pub description: &'static str,
    pub help: Option<&'static str>,
}

impl ErrorInfo {
    const fn new(description: &'static str) -> Self {
        Self {
            description,
            help: None,
        }
    }

    const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }
}

static UNKNOWN_ERROR: ErrorInfo = ErrorInfo::new("Unknown error");

static ERROR_INFO: LazyLock<HashMap<u16, ErrorInfo>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    map.insert(1, ErrorInfo::new("Unexpected character"));
    map.insert(2, ErrorInfo::new("Unterminated string literal")
        .with_help("Quoted literals end with a single quote; embed a quote by doubling it"));
    map.insert(3, ErrorInfo::new("Invalid numeric literal"));
    map.insert(4, ErrorInfo::new("Invalid date or time literal"));
    map.insert(5, ErrorInfo::new("Invalid guid literal"));
    map.insert(6, ErrorInfo::new("Invalid binary literal"));
    map.insert(7, ErrorInfo::new("Invalid duration literal"));
    map.insert(8, ErrorInfo::new("Invalid spatial literal"));
    map.insert(9, ErrorInfo::new("Unterminated search phrase"));
    map.insert(10, ErrorInfo::new("Invalid parameter alias"));

    map.insert(100, ErrorInfo::new("Unexpected token"));
    map.insert(101, ErrorInfo::new("Unexpected end of input"));
    map.insert(102, ErrorInfo::new("Expected expression"));
    map.insert(103, ErrorInfo::new("Expected identifier"));
    map.insert(104, ErrorInfo::new("Missing closing parenthesis"));
    map.insert(105, ErrorInfo::new("Empty query option value")
        .with_help("Omit the query option entirely instead of sending an empty value"));
    map.insert(106, ErrorInfo::new("Recursion limit exceeded"));
    map.insert(107, ErrorInfo::new("Invalid query option value"));
    map.insert(108, ErrorInfo::new("Invalid nested option"));
    map.insert(109, ErrorInfo::new("Expand depth limit exceeded"));
    map.insert(110, ErrorInfo::new("Expand count limit exceeded"));
    map.insert(111, ErrorInfo::new("Invalid aggregate expression"));
    map.insert(112, ErrorInfo::new("Duplicate query option"));
    map.insert(113, ErrorInfo::new("Conflicting expand options"));
    map.insert(114, ErrorInfo::new("Unknown transformation"));
    map.insert(115, ErrorInfo::new("Invalid lambda expression"));

    map.insert(200, ErrorInfo::new("Unknown property")
        .with_help("Check the property is declared on the type or one of its base types"));
    map.insert(201, ErrorInfo::new("Unknown type"));
    map.insert(202, ErrorInfo::new("Unknown function"));
    map.insert(203, ErrorInfo::new("Unknown navigation source"));
    map.insert(204, ErrorInfo::new("Incompatible operand types"));
    map.insert(205, ErrorInfo::new("Invalid type cast"));
    map.insert(206, ErrorInfo::new("Key mismatch"));
    map.insert(207, ErrorInfo::new("Ambiguous operation overload"));
    map.insert(208, ErrorInfo::new("No matching overload"));
    map.insert(209, ErrorInfo::new("Unknown range variable"));
    map.insert(210, ErrorInfo::new("Invalid has operand"));
    map.insert(211, ErrorInfo::new("Invalid aggregation"));
    map.insert(212, ErrorInfo::new("Property not available after $apply"));
    map.insert(213, ErrorInfo::new("Parameter alias cycle"));
    map.insert(214, ErrorInfo::new("Invalid path segment"));
    map.insert(215, ErrorInfo::new("Expected boolean expression"));
    map.insert(216, ErrorInfo::new("Invalid lambda source"));
    map.insert(217, ErrorInfo::new("Binding depth limit exceeded"));
    map.insert(218, ErrorInfo::new("Ambiguous name"));
    map.insert(219, ErrorInfo::new("Invalid in operand"));

    map.insert(300, ErrorInfo::new("Duplicate bound function parameter names"));
    map.insert(301, ErrorInfo::new("Duplicate bound function parameter types"));
    map.insert(302, ErrorInfo::new("Duplicate unbound function parameter names"));
    map.insert(303, ErrorInfo::new("Duplicate unbound function parameter types"));
    map.insert(304, ErrorInfo::new("Duplicate bound action"));
    map.insert(305, ErrorInfo::new("Duplicate unbound action"));
    map.insert(306, ErrorInfo::new("Bound operation without binding parameter"));
    map.insert(307, ErrorInfo::new("Entity type without key"));
    map.insert(308, ErrorInfo::new("Invalid key property"));
    map.insert(309, ErrorInfo::new("Dangling navigation property binding"));

    map
});

// Lexical errors
pub const ODQ0001: ErrorCode = ErrorCode::new(1);
pub const ODQ0002: ErrorCode = ErrorCode::new(2);
pub const ODQ0003: ErrorCode = ErrorCode::new(3);
pub const ODQ0004: ErrorCode = ErrorCode::new(4);
pub const ODQ0005: ErrorCode = ErrorCode::new(5);
pub const ODQ0006: ErrorCode = ErrorCode::new(6);
pub const ODQ0007: ErrorCode = ErrorCode::new(7);
pub const ODQ0008: ErrorCode = ErrorCode::new(8);
pub const ODQ0009: ErrorCode = ErrorCode::new(9);
pub const ODQ0010: ErrorCode = ErrorCode::new(10);

// Syntax errors
pub const ODQ0100: ErrorCode = ErrorCode::new(100);
pub const ODQ0101: ErrorCode = ErrorCode::new(101);
pub const ODQ0102: ErrorCode = ErrorCode::new(102);
pub const ODQ0103: ErrorCode = ErrorCode::new(103);
pub const ODQ0104: ErrorCode = ErrorCode::new(104);
pub const ODQ0105: ErrorCode = ErrorCode::new(105);
pub const ODQ0106: ErrorCode = ErrorCode::new(106);
pub const ODQ0107: ErrorCode = ErrorCode::new(107);
pub const ODQ0108: ErrorCode = ErrorCode::new(108);
pub const ODQ0109: ErrorCode = ErrorCode::new(109);
pub const ODQ0110: ErrorCode = ErrorCode::new(110);
pub const ODQ0111: ErrorCode = ErrorCode::new(111);
pub const ODQ0112: ErrorCode = ErrorCode::new(112);
pub const ODQ0113: ErrorCode = ErrorCode::new(113);
pub const ODQ0114: ErrorCode = ErrorCode::new(114);
pub const ODQ0115: ErrorCode = ErrorCode::new(115);

// Binding errors
pub const ODQ0200: ErrorCode = ErrorCode::new(200);
pub const ODQ0201: ErrorCode = ErrorCode::new(201);
pub const ODQ0202: ErrorCode = ErrorCode::new(202);
pub const ODQ0203: ErrorCode = ErrorCode::new(203);
pub const ODQ0204: ErrorCode = ErrorCode::new(204);
pub const ODQ0205: ErrorCode = ErrorCode::new(205);
pub const ODQ0206: ErrorCode = ErrorCode::new(206);
pub const ODQ0207: ErrorCode = ErrorCode::new(207);
pub const ODQ0208: ErrorCode = ErrorCode::new(208);
pub const ODQ0209: ErrorCode = ErrorCode::new(209);
pub const ODQ0210: ErrorCode = ErrorCode::new(210);
pub const ODQ0211: ErrorCode = ErrorCode::new(211);
pub const ODQ0212: ErrorCode = ErrorCode::new(212);
pub const ODQ0213: ErrorCode = ErrorCode::new(213);
pub const ODQ0214: ErrorCode = ErrorCode::new(214);
pub const ODQ0215: ErrorCode = ErrorCode::new(215);
pub const ODQ0216: ErrorCode = ErrorCode::new(216);
pub const ODQ0217: ErrorCode = ErrorCode::new(217);
pub const ODQ0218: ErrorCode = ErrorCode::new(218);
pub const ODQ0219: ErrorCode = ErrorCode::new(219);

// Model validation errors
pub const ODQ0300: ErrorCode = ErrorCode::new(300);
pub const ODQ0301: ErrorCode = ErrorCode::new(301);
pub const ODQ0302: ErrorCode = ErrorCode::new(302);
pub const ODQ0303: ErrorCode = ErrorCode::new(303);
pub const ODQ0304: ErrorCode = ErrorCode::new(304);
pub const ODQ0305: ErrorCode = ErrorCode::new(305);
pub const ODQ0306: ErrorCode = ErrorCode::new(306);
pub const ODQ0307: ErrorCode = ErrorCode::new(307);
pub const ODQ0308: ErrorCode = ErrorCode::new(308);
pub const ODQ0309: ErrorCode = ErrorCode::new(309);
