//! Raw scanning helpers for options whose items are separated at the top
//! level (`$select`, `$expand` and resource paths), ignoring separators
//! inside parentheses and literals.
//!
//! Literal extents come from the lexers: `'...'` ends where the expression
//! lexer ends a string literal and `"..."` where the `$search` lexer ends a
//! phrase, so a nested `$filter` or `$search` value is never cut inside one.

use crate::lexer::string_literal_end;
use crate::search::phrase_end;

/// Characters of `text` from `pos` on, skipping every quoted literal
///
/// An unterminated literal swallows the rest of the text; the lexer
/// reports it once the enclosing option value is parsed.
struct Unquoted<'a> {
    text: &'a str,
    pos: usize,
}

impl Iterator for Unquoted<'_> {
    type Item = (usize, char);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let at = self.pos;
            let c = self.text.get(at..)?.chars().next()?;
            self.pos = match c {
                '\'' => string_literal_end(self.text, at),
                '"' => phrase_end(self.text, at),
                _ => {
                    self.pos += c.len_utf8();
                    return Some((at, c));
                }
            }
            .unwrap_or(self.text.len());
        }
    }
}

fn unquoted(text: &str, from: usize) -> Unquoted<'_> {
    Unquoted { text, pos: from }
}

/// Split on `separator` at the top level; each part keeps its byte offset
pub(crate) fn split_top_level(text: &str, separator: char) -> Vec<(usize, &str)> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    for (offset, c) in unquoted(text, 0) {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c == separator && depth == 0 => {
                parts.push((start, &text[start..offset]));
                start = offset + separator.len_utf8();
            }
            _ => {}
        }
    }
    parts.push((start, &text[start..]));
    parts
}

/// Offset of the `)` matching the `(` at `open`
pub(crate) fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, c) in unquoted(text, open) {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Trimmed slice together with its offset in the enclosing text
pub(crate) fn trimmed(offset: usize, text: &str) -> (usize, &str) {
    let leading = text.len() - text.trim_start().len();
    (offset + leading, text.trim())
}
