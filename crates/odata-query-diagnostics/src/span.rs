//! Byte-offset spans inside a query-option string

use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-open byte range `[start, end)` in the query-option text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Text under the span, or `""` past the end of `source`
    pub fn slice<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.start..self.end).unwrap_or("")
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// 1-based line and character column of a byte offset
///
/// Alias values pasted from test files may contain newlines.
pub fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let before = source.get(..offset).unwrap_or(source);
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    (line, before[line_start..].chars().count() + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_slice_stays_in_bounds() {
        assert_eq!(Span::new(5, 7).slice("Name eq 'Bob'"), "eq");
        assert_eq!(Span::new(40, 50).slice("short"), "");
        assert_eq!(Span::new(3, 9).to_string(), "3..9");
    }

    #[test]
    fn test_offset_to_line_col() {
        assert_eq!(offset_to_line_col("Name eq 1", 5), (1, 6));
        assert_eq!(offset_to_line_col("a\nbc", 3), (2, 2));
        assert_eq!(offset_to_line_col("é x", 3), (1, 3));
    }
}
