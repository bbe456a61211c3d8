//! Query-option lexer
//!
//! A single forward pass over the option text. Structural literals (guids,
//! dates, durations, binary and spatial values) are recognised here rather
//! than in the parser, so `2024-01-15` reaches the parser as one `Date`
//! literal instead of three numbers.

use crate::literals::{self, Recognizer};
use odata_query_ast::{BinaryOperatorKind, LiteralToken, LiteralValue};
use odata_query_diagnostics::{
    ErrorCode, QueryError, Result, Span, ODQ0001, ODQ0002, ODQ0003, ODQ0004, ODQ0005, ODQ0006, ODQ0007,
    ODQ0008, ODQ0010,
};
use std::fmt;

/// Word operators; only operators when surrounded by whitespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKeyword {
    Binary(BinaryOperatorKind),
    In,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Simple or namespace-qualified name, including `$it`/`$count`
    Identifier(String),
    Operator(OperatorKeyword),
    Literal(LiteralToken),
    /// `@name`, without the `@`
    ParameterAlias(String),
    OpenParen,
    CloseParen,
    Comma,
    Slash,
    Star,
    /// `NS.*`
    QualifiedStar(String),
    Colon,
    Equals,
    Semicolon,
    /// Prefix negation not attached to a numeric literal
    Minus,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier(name) => f.write_str(name),
            Self::Operator(OperatorKeyword::Binary(op)) => write!(f, "{op}"),
            Self::Operator(OperatorKeyword::In) => f.write_str("in"),
            Self::Operator(OperatorKeyword::Not) => f.write_str("not"),
            Self::Literal(literal) => write!(f, "{literal}"),
            Self::ParameterAlias(name) => write!(f, "@{name}"),
            Self::OpenParen => f.write_str("("),
            Self::CloseParen => f.write_str(")"),
            Self::Comma => f.write_str(","),
            Self::Slash => f.write_str("/"),
            Self::Star => f.write_str("*"),
            Self::QualifiedStar(ns) => write!(f, "{ns}.*"),
            Self::Colon => f.write_str(":"),
            Self::Equals => f.write_str("="),
            Self::Semicolon => f.write_str(";"),
            Self::Minus => f.write_str("-"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexToken {
    pub kind: TokenKind,
    pub span: Span,
}

impl LexToken {
    fn new(kind: TokenKind, start: usize, end: usize) -> Self {
        Self {
            kind,
            span: Span::new(start, end),
        }
    }
}

/// Lexes `source` lazily; the first error ends the sequence
pub fn tokenize(source: &str) -> Lexer<'_> {
    Lexer::new(source)
}

pub struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    finished: bool,
}

/// Offset just past the quote closing the string literal opened at `quote`
///
/// `''` inside the literal is an escaped quote. Prefixed literals such as
/// `duration'P1D'` use the same rule from their first quote.
pub(crate) fn string_literal_end(source: &str, quote: usize) -> Option<usize> {
    let mut chars = source.get(quote + 1..)?.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\'' && chars.next_if(|&(_, next)| next == '\'').is_none() {
            return Some(quote + 1 + i + 1);
        }
    }
    None
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            finished: false,
        }
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn char_at(&self, offset: usize) -> Option<char> {
        self.source.get(offset..).and_then(|s| s.chars().next())
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn ends_word(&self, offset: usize) -> bool {
        !self.char_at(offset).is_some_and(is_ident_char)
    }

    fn single(&mut self, kind: TokenKind) -> LexToken {
        let start = self.pos;
        self.pos += 1;
        LexToken::new(kind, start, self.pos)
    }

    /// Match `recognizer` at the current offset, only if it ends on a word boundary
    fn structural(&self, recognizer: Recognizer) -> Option<usize> {
        literals::recognize(recognizer, self.rest())
            .filter(|len| self.ends_word(self.pos + len))
    }

    fn literal(&mut self, value: LiteralValue, start: usize, end: usize) -> LexToken {
        self.pos = end;
        let text = &self.source[start..end];
        LexToken::new(TokenKind::Literal(LiteralToken::new(value, text)), start, end)
    }

    /// Quoted body starting at the quote at `quote`; returns the unescaped
    /// body and the offset after the closing quote
    fn quoted(&self, quote: usize) -> Result<(String, usize)> {
        let end = string_literal_end(self.source, quote)
            .ok_or_else(|| QueryError::lex(ODQ0002, "Unterminated string literal", quote))?;
        Ok((self.source[quote + 1..end - 1].replace("''", "'"), end))
    }

    fn lex_string(&mut self) -> Result<LexToken> {
        let start = self.pos;
        let (body, end) = self.quoted(start)?;
        Ok(self.literal(LiteralValue::String(body), start, end))
    }

    fn lex_alias(&mut self) -> Result<LexToken> {
        let start = self.pos;
        let name_len = self.source[start + 1..]
            .find(|c: char| !is_ident_char(c))
            .unwrap_or(self.source.len() - start - 1);
        if name_len == 0 {
            return Err(QueryError::lex(ODQ0010, "Parameter alias has no name", start));
        }
        let end = start + 1 + name_len;
        self.pos = end;
        let name = self.source[start + 1..end].to_string();
        Ok(LexToken::new(TokenKind::ParameterAlias(name), start, end))
    }

    fn lex_number(&mut self) -> Result<LexToken> {
        let start = self.pos;
        let Some(len) = literals::recognize(literals::number, self.rest()) else {
            return Err(QueryError::lex(ODQ0003, "Invalid numeric literal", start));
        };
        let digits_end = start + len;
        let (suffix, end) = match self.char_at(digits_end) {
            Some(c) if "LlMmDdFf".contains(c) && self.ends_word(digits_end + 1) => {
                (Some(c), digits_end + 1)
            }
            Some(c) if is_ident_char(c) => {
                return Err(QueryError::lex(ODQ0003, "Invalid numeric literal", start));
            }
            _ => (None, digits_end),
        };
        let digits = &self.source[start..digits_end];
        match literals::to_number(digits, suffix) {
            Some(value) => Ok(self.literal(value, start, end)),
            None => Err(QueryError::lex(
                ODQ0003,
                format!("Numeric literal '{}' is out of range", &self.source[start..end]),
                start,
            )),
        }
    }

    /// Digit-led input: guid, date/time shapes, then plain numbers
    fn lex_digit_led(&mut self) -> Result<LexToken> {
        let start = self.pos;
        if let Some(len) = self.structural(literals::guid) {
            return self.convert(start, len, literals::to_guid, ODQ0005, "guid");
        }
        if let Some(len) = self.structural(literals::date_time_offset) {
            return self.convert(
                start,
                len,
                literals::to_date_time_offset,
                ODQ0004,
                "date-time-offset",
            );
        }
        if let Some(len) = self.structural(literals::date) {
            return self.convert(start, len, literals::to_date, ODQ0004, "date");
        }
        if let Some(len) = self.structural(literals::time_of_day) {
            return self.convert(start, len, literals::to_time_of_day, ODQ0004, "time-of-day");
        }
        self.lex_number()
    }

    fn convert(
        &mut self,
        start: usize,
        len: usize,
        convert: fn(&str) -> Option<LiteralValue>,
        code: ErrorCode,
        what: &str,
    ) -> Result<LexToken> {
        let text = &self.source[start..start + len];
        match convert(text) {
            Some(value) => Ok(self.literal(value, start, start + len)),
            None => Err(QueryError::lex(
                code,
                format!("Invalid {what} literal '{text}'"),
                start,
            )),
        }
    }

    /// `prefix'body'` where `prefix` ends at the quote at `quote`
    fn lex_prefixed(&mut self, prefix: &str, start: usize, quote: usize) -> Result<LexToken> {
        let (body, end) = self.quoted(quote)?;
        let value = match prefix.to_ascii_lowercase().as_str() {
            "duration" => literals::to_duration(&body).ok_or_else(|| {
                QueryError::lex(ODQ0007, format!("Invalid duration '{body}'"), start)
            })?,
            "binary" => literals::to_binary_base64(&body).ok_or_else(|| {
                QueryError::lex(ODQ0006, "Binary literal is not valid base64url", start)
            })?,
            "x" => literals::to_binary_hex(&body).ok_or_else(|| {
                QueryError::lex(ODQ0006, "Binary literal is not valid hex", start)
            })?,
            kind @ ("geography" | "geometry") => literals::to_spatial(&body, kind == "geography")
                .ok_or_else(|| {
                    QueryError::lex(ODQ0008, format!("Invalid {kind} literal"), start)
                })?,
            _ if prefix.contains('.') => LiteralValue::Enum {
                type_name: prefix.to_string(),
                value: body,
            },
            _ => {
                return Err(QueryError::lex(
                    ODQ0001,
                    format!("Unexpected quote after '{prefix}'"),
                    quote,
                ));
            }
        };
        Ok(self.literal(value, start, end))
    }

    fn lex_word(&mut self) -> Result<LexToken> {
        let start = self.pos;
        if self.char_at(start).is_some_and(|c| c.is_ascii_hexdigit()) {
            if let Some(len) = self.structural(literals::guid) {
                return self.convert(start, len, literals::to_guid, ODQ0005, "guid");
            }
        }

        let mut end = start + self.char_at(start).map_or(0, char::len_utf8);
        loop {
            match self.char_at(end) {
                Some(c) if is_ident_char(c) => end += c.len_utf8(),
                Some('.') => match self.char_at(end + 1) {
                    Some(c) if is_ident_start(c) && c != '$' => end += 1,
                    Some('*') => {
                        let namespace = self.source[start..end].to_string();
                        self.pos = end + 2;
                        return Ok(LexToken::new(TokenKind::QualifiedStar(namespace), start, end + 2));
                    }
                    _ => break,
                },
                _ => break,
            }
        }
        let word = &self.source[start..end];

        if self.char_at(end) == Some('\'') {
            return self.lex_prefixed(word, start, end);
        }

        let value = match word {
            "true" => Some(LiteralValue::Boolean(true)),
            "false" => Some(LiteralValue::Boolean(false)),
            "null" => Some(LiteralValue::Null),
            "INF" => Some(LiteralValue::Double(f64::INFINITY)),
            "NaN" => Some(LiteralValue::Double(f64::NAN)),
            _ => None,
        };
        if let Some(value) = value {
            return Ok(self.literal(value, start, end));
        }

        if let Some(keyword) = self.operator_keyword(word, start, end) {
            self.pos = end;
            return Ok(LexToken::new(TokenKind::Operator(keyword), start, end));
        }

        self.pos = end;
        Ok(LexToken::new(TokenKind::Identifier(word.to_string()), start, end))
    }

    fn operator_keyword(&self, word: &str, start: usize, end: usize) -> Option<OperatorKeyword> {
        let followed_by_space = self.char_at(end).is_some_and(char::is_whitespace);
        let preceded_by_space = self.source[..start]
            .chars()
            .next_back()
            .is_some_and(char::is_whitespace);
        match word {
            "not" if followed_by_space || self.char_at(end) == Some('(') => {
                Some(OperatorKeyword::Not)
            }
            "in" if preceded_by_space && followed_by_space => Some(OperatorKeyword::In),
            _ if preceded_by_space && followed_by_space => {
                BinaryOperatorKind::from_keyword(word).map(OperatorKeyword::Binary)
            }
            _ => None,
        }
    }

    fn lex_minus(&mut self) -> Result<LexToken> {
        let start = self.pos;
        match self.char_at(start + 1) {
            Some(c) if c.is_ascii_digit() => self.lex_number(),
            Some('I') if self.rest().starts_with("-INF") && self.ends_word(start + 4) => {
                Ok(self.literal(LiteralValue::Double(f64::NEG_INFINITY), start, start + 4))
            }
            _ => Ok(self.single(TokenKind::Minus)),
        }
    }

    fn lex_next(&mut self) -> Result<LexToken> {
        let Some(c) = self.rest().chars().next() else {
            return Err(QueryError::lex(ODQ0001, "Unexpected end of input", self.pos));
        };
        match c {
            '(' => Ok(self.single(TokenKind::OpenParen)),
            ')' => Ok(self.single(TokenKind::CloseParen)),
            ',' => Ok(self.single(TokenKind::Comma)),
            '/' => Ok(self.single(TokenKind::Slash)),
            '*' => Ok(self.single(TokenKind::Star)),
            ':' => Ok(self.single(TokenKind::Colon)),
            '=' => Ok(self.single(TokenKind::Equals)),
            ';' => Ok(self.single(TokenKind::Semicolon)),
            '\'' => self.lex_string(),
            '@' => self.lex_alias(),
            '-' => self.lex_minus(),
            c if c.is_ascii_digit() => self.lex_digit_led(),
            c if is_ident_start(c) => self.lex_word(),
            other => Err(QueryError::lex(
                ODQ0001,
                format!("Unexpected character '{other}'"),
                self.pos,
            )),
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<LexToken>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        self.skip_whitespace();
        if self.pos >= self.source.len() {
            self.finished = true;
            return None;
        }
        let token = self.lex_next();
        if token.is_err() {
            self.finished = true;
        }
        Some(token)
    }
}

impl std::iter::FusedIterator for Lexer<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .map(|t| t.map(|t| t.kind))
            .collect::<Result<_>>()
            .unwrap_or_else(|e| panic!("lexing {source:?} failed: {e}"))
    }

    fn value(source: &str) -> LiteralValue {
        match kinds(source).as_slice() {
            [TokenKind::Literal(literal)] => literal.value.clone(),
            other => panic!("expected one literal, got {other:?}"),
        }
    }

    #[test]
    fn test_simple_comparison() {
        assert_eq!(
            kinds("Name eq 'Bob'"),
            vec![
                TokenKind::Identifier("Name".into()),
                TokenKind::Operator(OperatorKeyword::Binary(BinaryOperatorKind::Equal)),
                TokenKind::Literal(LiteralToken::string("Bob")),
            ]
        );
    }

    #[test]
    fn test_spans_are_byte_offsets() {
        let spans: Vec<Span> = tokenize("a  eq 1")
            .map(|t| t.map(|t| t.span))
            .collect::<Result<_>>()
            .expect("input lexes");
        assert_eq!(spans, vec![Span::new(0, 1), Span::new(3, 5), Span::new(6, 7)]);
    }

    #[test]
    fn test_keywords_need_surrounding_whitespace() {
        // A property called `eq` is an identifier when it is not an operator
        assert_eq!(kinds("eq")[0], TokenKind::Identifier("eq".into()));
        assert_eq!(
            kinds("not(A)")[0],
            TokenKind::Operator(OperatorKeyword::Not)
        );
        assert_eq!(kinds("x/and")[2], TokenKind::Identifier("and".into()));
    }

    #[rstest]
    #[case("'O''Neil'", LiteralValue::String("O'Neil".into()))]
    #[case("42", LiteralValue::Int32(42))]
    #[case("-7", LiteralValue::Int32(-7))]
    #[case("7L", LiteralValue::Int64(7))]
    #[case("1.0E10", LiteralValue::Double(1.0e10))]
    #[case("-INF", LiteralValue::Double(f64::NEG_INFINITY))]
    #[case("true", LiteralValue::Boolean(true))]
    #[case("null", LiteralValue::Null)]
    #[case(
        "2024-01-15",
        LiteralValue::Date(chrono::NaiveDate::from_ymd_opt(2024, 1, 15).expect("valid date"))
    )]
    #[case("binary'AQID'", LiteralValue::Binary(vec![1, 2, 3]))]
    #[case(
        "NS.Color'Red,Blue'",
        LiteralValue::Enum { type_name: "NS.Color".into(), value: "Red,Blue".into() }
    )]
    fn test_literal_classes(#[case] source: &str, #[case] expected: LiteralValue) {
        assert_eq!(value(source), expected);
    }

    #[test]
    fn test_guid_starting_with_letters() {
        assert!(matches!(
            value("deadbeef-0000-1111-2222-333344445555"),
            LiteralValue::Guid(_)
        ));
    }

    #[test]
    fn test_qualified_names_and_stars() {
        assert_eq!(
            kinds("NS.Manager/NS.*"),
            vec![
                TokenKind::Identifier("NS.Manager".into()),
                TokenKind::Slash,
                TokenKind::QualifiedStar("NS".into()),
            ]
        );
    }

    #[rstest]
    #[case("Name eq 'Bob", ODQ0002, 8)]
    #[case("Age gt 12abc", ODQ0003, 7)]
    #[case("d eq 2024-13-01", ODQ0004, 5)]
    #[case("x eq duration'P'", ODQ0007, 5)]
    #[case("x eq @", ODQ0010, 5)]
    #[case("a # b", ODQ0001, 2)]
    fn test_lex_errors_carry_offsets(
        #[case] source: &str,
        #[case] code: ErrorCode,
        #[case] offset: usize,
    ) {
        let err = tokenize(source)
            .collect::<Result<Vec<_>>>()
            .expect_err("input should not lex");
        assert_eq!(err.code(), code);
        assert_eq!(err.offset(), Some(offset));
    }

    #[test]
    fn test_lexer_stops_after_error() {
        let mut lexer = tokenize("'open a");
        assert!(matches!(lexer.next(), Some(Err(_))));
        assert!(lexer.next().is_none());
    }
}
