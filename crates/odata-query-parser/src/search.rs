//! `$search` lexer and parser
//!
//! Search text has its own token set: bare words, double-quoted phrases and
//! the upper-case connectives `AND`, `OR`, `NOT`. `NOT` binds tightest,
//! then `AND` (also implied between adjacent terms), then `OR`.

use odata_query_ast::SearchToken;
use odata_query_diagnostics::{
    QueryError, Result, Span, ODQ0009, ODQ0100, ODQ0101, ODQ0102, ODQ0104, ODQ0105, ODQ0106,
};
use std::iter::Peekable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchTokenKind {
    Word(String),
    Phrase(String),
    And,
    Or,
    Not,
    OpenParen,
    CloseParen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchLexToken {
    pub kind: SearchTokenKind,
    pub span: Span,
}

/// Offset just past the `"` closing the phrase opened at `quote`; a
/// backslash escapes the character after it
pub(crate) fn phrase_end(source: &str, quote: usize) -> Option<usize> {
    let mut chars = source.get(quote + 1..)?.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next()?;
            }
            '"' => return Some(quote + 1 + i + 1),
            _ => {}
        }
    }
    None
}

pub struct SearchLexer<'a> {
    source: &'a str,
    pos: usize,
    finished: bool,
}

impl<'a> SearchLexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            finished: false,
        }
    }

    fn phrase(&mut self) -> Result<SearchLexToken> {
        let start = self.pos;
        let end = phrase_end(self.source, start)
            .ok_or_else(|| QueryError::lex(ODQ0009, "Unterminated search phrase", start))?;
        let mut body = String::new();
        let mut chars = self.source[start + 1..end - 1].chars();
        while let Some(c) = chars.next() {
            body.push(if c == '\\' { chars.next().unwrap_or(c) } else { c });
        }
        self.pos = end;
        Ok(SearchLexToken {
            kind: SearchTokenKind::Phrase(body),
            span: Span::new(start, end),
        })
    }

    fn word(&mut self) -> SearchLexToken {
        let start = self.pos;
        let len = self.source[start..]
            .find(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | '"'))
            .unwrap_or(self.source.len() - start);
        self.pos = start + len;
        let text = &self.source[start..self.pos];
        let kind = match text {
            "AND" => SearchTokenKind::And,
            "OR" => SearchTokenKind::Or,
            "NOT" => SearchTokenKind::Not,
            word => SearchTokenKind::Word(word.to_string()),
        };
        SearchLexToken {
            kind,
            span: Span::new(start, self.pos),
        }
    }
}

impl Iterator for SearchLexer<'_> {
    type Item = Result<SearchLexToken>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let rest = &self.source[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
        let Some(c) = self.source[self.pos..].chars().next() else {
            self.finished = true;
            return None;
        };
        let token = match c {
            '(' | ')' => {
                let kind = if c == '(' {
                    SearchTokenKind::OpenParen
                } else {
                    SearchTokenKind::CloseParen
                };
                self.pos += 1;
                Ok(SearchLexToken {
                    kind,
                    span: Span::new(self.pos - 1, self.pos),
                })
            }
            '"' => self.phrase(),
            _ => Ok(self.word()),
        };
        if token.is_err() {
            self.finished = true;
        }
        Some(token)
    }
}

struct SearchParser<'a> {
    source: &'a str,
    tokens: Peekable<std::vec::IntoIter<SearchLexToken>>,
    max_depth: usize,
    depth: usize,
}

impl SearchParser<'_> {
    fn offset(&mut self) -> usize {
        self.tokens
            .peek()
            .map_or(self.source.len(), |token| token.span.start)
    }

    fn unexpected(&mut self, expected: &str) -> QueryError {
        let source = self.source;
        match self.tokens.peek() {
            Some(token) => QueryError::expected(
                ODQ0102,
                expected,
                Some(token.span.slice(source)),
                token.span.start,
            ),
            None => QueryError::expected(ODQ0101, expected, None, source.len()),
        }
    }

    fn eat(&mut self, kind: &SearchTokenKind) -> bool {
        self.tokens.next_if(|token| token.kind == *kind).is_some()
    }

    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(QueryError::syntax(
                ODQ0106,
                format!("Search nesting exceeds the limit of {}", self.max_depth),
                self.offset(),
            ));
        }
        Ok(())
    }

    /// Binary forms fold to the left, so each operator in a chain holds one
    /// level until the chain ends
    fn parse_or(&mut self) -> Result<SearchToken> {
        self.descend()?;
        let mut left = self.parse_and()?;
        let mut folded = 1;
        while self.eat(&SearchTokenKind::Or) {
            self.descend()?;
            folded += 1;
            let right = self.parse_and()?;
            left = SearchToken::or(left, right);
        }
        self.depth -= folded;
        Ok(left)
    }

    fn starts_operand(&mut self) -> bool {
        matches!(
            self.tokens.peek().map(|token| &token.kind),
            Some(
                SearchTokenKind::Word(_)
                    | SearchTokenKind::Phrase(_)
                    | SearchTokenKind::Not
                    | SearchTokenKind::OpenParen
            )
        )
    }

    fn parse_and(&mut self) -> Result<SearchToken> {
        let mut left = self.parse_not()?;
        let mut folded = 0;
        loop {
            let explicit = self.eat(&SearchTokenKind::And);
            if !explicit && !self.starts_operand() {
                self.depth -= folded;
                return Ok(left);
            }
            self.descend()?;
            folded += 1;
            let right = self.parse_not()?;
            left = SearchToken::and(left, right);
        }
    }

    fn parse_not(&mut self) -> Result<SearchToken> {
        if self.eat(&SearchTokenKind::Not) {
            self.descend()?;
            let operand = self.parse_not()?;
            self.depth -= 1;
            return Ok(SearchToken::not(operand));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<SearchToken> {
        let kind = self.tokens.peek().map(|token| token.kind.clone());
        match kind {
            Some(SearchTokenKind::Word(term) | SearchTokenKind::Phrase(term)) => {
                self.tokens.next();
                Ok(SearchToken::Term(term))
            }
            Some(SearchTokenKind::OpenParen) => {
                self.tokens.next();
                let inner = self.parse_or()?;
                if !self.eat(&SearchTokenKind::CloseParen) {
                    let mut err = self.unexpected("')'");
                    if let QueryError::Syntax { code, .. } = &mut err {
                        *code = ODQ0104;
                    }
                    return Err(err);
                }
                Ok(inner)
            }
            _ => Err(self.unexpected("search term")),
        }
    }
}

/// Parse `$search` text into a boolean tree
pub(crate) fn parse_search_text(text: &str, max_depth: usize) -> Result<SearchToken> {
    if text.trim().is_empty() {
        return Err(QueryError::syntax(ODQ0105, "$search must not be empty", 0));
    }
    let tokens = SearchLexer::new(text).collect::<Result<Vec<_>>>()?;
    let mut parser = SearchParser {
        source: text,
        tokens: tokens.into_iter().peekable(),
        max_depth,
        depth: 0,
    };
    let tree = parser.parse_or()?;
    if parser.tokens.peek().is_some() {
        let offset = parser.offset();
        return Err(QueryError::expected(
            ODQ0100,
            "end of search expression",
            Some(&text[offset..]),
            offset,
        ));
    }
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use odata_query_diagnostics::ErrorCode;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("A AND B OR C", "((A AND B) OR C)")]
    #[case("A OR B AND C", "(A OR (B AND C))")]
    #[case("NOT A", "(NOT A)")]
    #[case("NOT A B", "((NOT A) AND B)")]
    #[case("A B C", "((A AND B) AND C)")]
    #[case("(A OR B) C", "((A OR B) AND C)")]
    #[case("\"blue sky\" OR cloud", "(\"blue sky\" OR cloud)")]
    #[case("and", "and")]
    fn test_search_precedence(#[case] input: &str, #[case] expected: &str) {
        let tree = parse_search_text(input, 100).expect("search parses");
        assert_eq!(tree.to_string(), expected);
    }

    #[test]
    fn test_phrase_escapes() {
        let tree = parse_search_text(r#""say \"hi\"""#, 100).expect("search parses");
        assert_eq!(tree, SearchToken::Term("say \"hi\"".into()));
    }

    #[rstest]
    #[case("\"open", ODQ0009, 0)]
    #[case("A AND", ODQ0101, 5)]
    #[case("(A", ODQ0104, 2)]
    #[case("A )", ODQ0100, 2)]
    #[case("  ", ODQ0105, 0)]
    fn test_search_errors(#[case] input: &str, #[case] code: ErrorCode, #[case] offset: usize) {
        let err = parse_search_text(input, 100).expect_err("should fail");
        assert_eq!((err.code(), err.offset()), (code, Some(offset)));
    }

    #[test]
    fn test_search_depth_limit() {
        let deep = format!("{}A{}", "(".repeat(10), ")".repeat(10));
        assert_eq!(
            parse_search_text(&deep, 5).map_err(|e| e.code()),
            Err(ODQ0106)
        );
    }
}
