//! Query error types

use crate::{offset_to_line_col, ErrorCategory, ErrorCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// A reportable message with an optional position in the query text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: ErrorCode,
    pub message: String,
    /// Byte offset into the query-option string
    pub offset: Option<usize>,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message: message.into(),
            offset: None,
            help: None,
        }
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Render the diagnostic with the offending line and a caret under the offset
    pub fn render(&self, source: &str) -> String {
        let mut out = self.headline();
        if let Some(offset) = self.offset {
            let (line_no, col) = offset_to_line_col(source, offset);
            let line = source.lines().nth(line_no - 1).unwrap_or("");
            out.push_str(&format!("\n  | {line}\n  | {}^", " ".repeat(col - 1)));
        }
        if let Some(help) = self.help.as_deref().or(self.code.info().help) {
            out.push_str(&format!("\n  = help: {help}"));
        }
        out
    }

    #[cfg(feature = "colored")]
    fn headline(&self) -> String {
        use colored::Colorize;
        let label = match self.severity {
            Severity::Error => self.severity.to_string().red().bold(),
            Severity::Warning => self.severity.to_string().yellow().bold(),
        };
        format!("{label}[{}]: {}", self.code, self.message)
    }

    #[cfg(not(feature = "colored"))]
    fn headline(&self) -> String {
        format!("{}[{}]: {}", self.severity, self.code, self.message)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} - {}", self.severity, self.code, self.message)?;
        if let Some(offset) = self.offset {
            write!(f, " at offset {offset}")?;
        }
        Ok(())
    }
}

/// Error raised while lexing, parsing or binding a query option
///
/// `Lex` and `Syntax` mean the text does not conform to the grammar;
/// `Binding` means the text is well formed but cannot be resolved against
/// the model it was bound to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("{code}: {message} (at offset {offset})")]
    Lex {
        code: ErrorCode,
        message: String,
        offset: usize,
    },

    #[error("{code}: {message} (at offset {offset})")]
    Syntax {
        code: ErrorCode,
        message: String,
        offset: usize,
        /// Text of the offending token, `None` at end of input
        found: Option<String>,
    },

    #[error("{code}: {message}")]
    Binding {
        code: ErrorCode,
        message: String,
        context: Option<String>,
    },

    #[error("Multiple errors: {}", .0.len())]
    Multiple(Vec<QueryError>),
}

impl QueryError {
    pub fn lex(code: ErrorCode, message: impl Into<String>, offset: usize) -> Self {
        Self::Lex {
            code,
            message: message.into(),
            offset,
        }
    }

    pub fn syntax(code: ErrorCode, message: impl Into<String>, offset: usize) -> Self {
        Self::Syntax {
            code,
            message: message.into(),
            offset,
            found: None,
        }
    }

    /// Syntax error naming the expected construct and the token actually seen
    pub fn expected(
        code: ErrorCode,
        expected: impl fmt::Display,
        found: Option<&str>,
        offset: usize,
    ) -> Self {
        let message = match found {
            Some(text) => format!("Expected {expected}, found '{text}'"),
            None => format!("Expected {expected}, found end of input"),
        };
        Self::Syntax {
            code,
            message,
            offset,
            found: found.map(str::to_string),
        }
    }

    pub fn binding(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Binding {
            code,
            message: message.into(),
            context: None,
        }
    }

    /// Attach the construct being bound when the error was raised
    pub fn with_context(self, ctx: impl Into<String>) -> Self {
        match self {
            Self::Binding { code, message, .. } => Self::Binding {
                code,
                message,
                context: Some(ctx.into()),
            },
            other => other,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Lex { code, .. } | Self::Syntax { code, .. } | Self::Binding { code, .. } => {
                *code
            }
            Self::Multiple(errors) => errors
                .first()
                .map(QueryError::code)
                .unwrap_or(ErrorCode::new(0)),
        }
    }

    /// Byte offset of the failure, for lexical and syntax errors
    pub fn offset(&self) -> Option<usize> {
        match self {
            Self::Lex { offset, .. } | Self::Syntax { offset, .. } => Some(*offset),
            Self::Multiple(errors) => errors.first().and_then(QueryError::offset),
            Self::Binding { .. } => None,
        }
    }

    /// True for errors meaning "the query is malformed"
    pub fn is_syntactic(&self) -> bool {
        matches!(
            self.code().category(),
            ErrorCategory::Lexical | ErrorCategory::Syntax
        )
    }

    /// True for errors meaning "the query is malformed for this model"
    pub fn is_binding(&self) -> bool {
        self.code().category() == ErrorCategory::Binding
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            Self::Lex { code, message, offset } | Self::Syntax { code, message, offset, .. } => {
                Diagnostic::error(*code, message.clone()).with_offset(*offset)
            }
            Self::Binding { code, message, context } => {
                let diag = Diagnostic::error(*code, message.clone());
                match context {
                    Some(ctx) => diag.with_help(format!("while binding {ctx}")),
                    None => diag,
                }
            }
            Self::Multiple(errors) => errors
                .first()
                .map(QueryError::to_diagnostic)
                .unwrap_or_else(|| Diagnostic::error(ErrorCode::new(0), "Unknown error")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ODQ0002, ODQ0100, ODQ0200};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_expected_message_names_both_sides() {
        let err = QueryError::expected(ODQ0100, "')'", Some("eq"), 12);
        assert_eq!(err.code(), ODQ0100);
        assert_eq!(err.offset(), Some(12));
        assert!(err.to_string().contains("Expected ')', found 'eq'"));

        let err = QueryError::expected(ODQ0100, "expression", None, 3);
        assert!(err.to_string().contains("found end of input"));
    }

    #[test]
    fn test_classification() {
        assert!(QueryError::lex(ODQ0002, "Unterminated", 4).is_syntactic());
        let bind = QueryError::binding(ODQ0200, "Unknown property 'Foo'").with_context("$filter");
        assert!(bind.is_binding());
        assert!(!bind.is_syntactic());
        assert_eq!(bind.offset(), None);
        assert_eq!(
            bind.to_diagnostic().help.as_deref(),
            Some("while binding $filter")
        );
    }

    #[test]
    fn test_render_points_at_offset() {
        let diag = QueryError::lex(ODQ0002, "Unterminated string literal", 8).to_diagnostic();
        let rendered = diag.render("Name eq 'Bob");
        assert!(rendered.contains("ODQ0002"));
        assert!(rendered.contains("\n  | Name eq 'Bob\n  |         ^"));
    }
}
