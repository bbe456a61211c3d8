//! `$filter`-style common expressions
//!
//! The OData operator table, loosest first: `or`, `and`, `eq`/`ne`,
//! `lt`/`le`/`gt`/`ge`, `add`/`sub`, `mul`/`div`/`divby`/`mod`, then prefix
//! `not` and `-`. `has` and `in` sit below the prefix operators as postfix
//! suffixes of a primary, so `not Color has NS.Color'Red'` negates the
//! `has` test. Paths grow to the right, each segment holding its parent,
//! so `Orders/Items/Price` ends in `EndPath("Price")`.
//!
//! The depth limit bounds both the recursion and the height of the token
//! tree: subexpressions, parentheses, prefix operators and `name(...)`
//! calls take a step while they are parsed, and every folded binary,
//! `has` or `in` operator takes one until its operator chain ends.

use crate::lexer::{tokenize, LexToken, Lexer, OperatorKeyword, TokenKind};
use odata_query_ast::{
    BinaryOperatorKind, ComputeExpressionToken, LambdaToken, NamedValue, OrderByDirection,
    OrderByToken, QueryToken, UnaryOperatorKind,
};
use odata_query_diagnostics::{
    ErrorCode, QueryError, Result, Span, ODQ0100, ODQ0101, ODQ0102, ODQ0103, ODQ0104, ODQ0106,
    ODQ0115,
};
use std::collections::VecDeque;

/// Functions called without a namespace; any other unqualified name
/// followed by `(` is a key predicate
const BUILTIN_FUNCTIONS: &[&str] = &[
    "contains",
    "startswith",
    "endswith",
    "length",
    "indexof",
    "substring",
    "tolower",
    "toupper",
    "trim",
    "concat",
    "matchesPattern",
    "year",
    "month",
    "day",
    "hour",
    "minute",
    "second",
    "fractionalseconds",
    "date",
    "time",
    "totaloffsetminutes",
    "totalseconds",
    "now",
    "mindatetime",
    "maxdatetime",
    "round",
    "floor",
    "ceiling",
    "isof",
    "cast",
];

pub(crate) fn is_builtin_function(name: &str) -> bool {
    BUILTIN_FUNCTIONS.contains(&name) || name.starts_with("geo.")
}

/// Shift the offset of a lexical or syntax error raised while parsing a
/// slice that starts at `base` within the full option text
pub(crate) fn rebase(error: QueryError, base: usize) -> QueryError {
    match error {
        QueryError::Lex {
            code,
            message,
            offset,
        } => QueryError::Lex {
            code,
            message,
            offset: offset + base,
        },
        QueryError::Syntax {
            code,
            message,
            offset,
            found,
        } => QueryError::Syntax {
            code,
            message,
            offset: offset + base,
            found,
        },
        other => other,
    }
}

/// Lexer output with arbitrary lookahead
pub(crate) struct TokenStream<'a> {
    source: &'a str,
    lexer: Lexer<'a>,
    buffer: VecDeque<LexToken>,
}

impl<'a> TokenStream<'a> {
    pub(crate) fn new(source: &'a str) -> Self {
        Self {
            source,
            lexer: tokenize(source),
            buffer: VecDeque::new(),
        }
    }

    fn fill(&mut self, count: usize) -> Result<()> {
        while self.buffer.len() < count {
            match self.lexer.next() {
                Some(token) => self.buffer.push_back(token?),
                None => break,
            }
        }
        Ok(())
    }

    pub(crate) fn peek_nth(&mut self, n: usize) -> Result<Option<&LexToken>> {
        self.fill(n + 1)?;
        Ok(self.buffer.get(n))
    }

    pub(crate) fn advance(&mut self) -> Result<Option<LexToken>> {
        self.fill(1)?;
        Ok(self.buffer.pop_front())
    }

    pub(crate) fn source(&self) -> &'a str {
        self.source
    }
}

pub(crate) struct ExpressionParser<'a> {
    tokens: TokenStream<'a>,
    max_depth: usize,
    depth: usize,
    lambda_parameters: Vec<String>,
}

impl<'a> ExpressionParser<'a> {
    pub(crate) fn new(source: &'a str, max_depth: usize) -> Self {
        Self {
            tokens: TokenStream::new(source),
            max_depth,
            depth: 0,
            lambda_parameters: Vec::new(),
        }
    }

    // Token helpers

    pub(crate) fn peek_kind(&mut self, n: usize) -> Result<Option<TokenKind>> {
        Ok(self.tokens.peek_nth(n)?.map(|token| token.kind.clone()))
    }

    fn peek_span(&mut self) -> Result<Option<Span>> {
        Ok(self.tokens.peek_nth(0)?.map(|token| token.span))
    }

    /// Offset of the next token, or of the end of input
    pub(crate) fn offset(&mut self) -> Result<usize> {
        Ok(self
            .peek_span()?
            .map_or(self.tokens.source().len(), |span| span.start))
    }

    pub(crate) fn at_end(&mut self) -> Result<bool> {
        Ok(self.tokens.peek_nth(0)?.is_none())
    }

    pub(crate) fn advance(&mut self) -> Result<Option<LexToken>> {
        self.tokens.advance()
    }

    /// Syntax error at the next token
    pub(crate) fn unexpected(&mut self, code: ErrorCode, expected: &str) -> QueryError {
        let source = self.tokens.source();
        match self.peek_span() {
            Ok(Some(span)) => {
                QueryError::expected(code, expected, Some(span.slice(source)), span.start)
            }
            Ok(None) => QueryError::expected(code, expected, None, source.len()),
            Err(err) => err,
        }
    }

    pub(crate) fn eat(&mut self, kind: &TokenKind) -> Result<bool> {
        if self.peek_kind(0)?.as_ref() == Some(kind) {
            self.advance()?;
            return Ok(true);
        }
        Ok(false)
    }

    pub(crate) fn expect(&mut self, kind: &TokenKind, code: ErrorCode) -> Result<Span> {
        if self.peek_kind(0)?.as_ref() == Some(kind) {
            if let Some(token) = self.advance()? {
                return Ok(token.span);
            }
        }
        Err(self.unexpected(code, &format!("'{kind}'")))
    }

    /// Consume an identifier equal to `word`
    pub(crate) fn eat_word(&mut self, word: &str) -> Result<bool> {
        if matches!(self.peek_kind(0)?, Some(TokenKind::Identifier(name)) if name == word) {
            self.advance()?;
            return Ok(true);
        }
        Ok(false)
    }

    pub(crate) fn expect_word(&mut self, word: &str, code: ErrorCode) -> Result<()> {
        if self.eat_word(word)? {
            Ok(())
        } else {
            Err(self.unexpected(code, &format!("'{word}'")))
        }
    }

    pub(crate) fn expect_identifier(&mut self, what: &str) -> Result<(String, Span)> {
        if let Some(TokenKind::Identifier(_)) = self.peek_kind(0)? {
            if let Some(LexToken {
                kind: TokenKind::Identifier(name),
                span,
            }) = self.advance()?
            {
                return Ok((name, span));
            }
        }
        Err(self.unexpected(ODQ0103, what))
    }

    pub(crate) fn expect_end(&mut self) -> Result<()> {
        if self.at_end()? {
            Ok(())
        } else {
            Err(self.unexpected(ODQ0100, "end of input"))
        }
    }

    pub(crate) fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            let offset = self.offset()?;
            return Err(QueryError::syntax(
                ODQ0106,
                format!("Expression nesting exceeds the limit of {}", self.max_depth),
                offset,
            ));
        }
        Ok(())
    }

    pub(crate) fn ascend(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // Expressions

    pub(crate) fn parse_expression(&mut self) -> Result<QueryToken> {
        self.descend()?;
        let expression = self.parse_binary(1)?;
        self.ascend();
        Ok(expression)
    }

    fn peek_binary_operator(&mut self) -> Result<Option<BinaryOperatorKind>> {
        Ok(match self.peek_kind(0)? {
            Some(TokenKind::Operator(OperatorKeyword::Binary(op))) => Some(op),
            _ => None,
        })
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<QueryToken> {
        let mut left = self.parse_unary()?;
        let mut folded = 0;
        while let Some(op) = self.peek_binary_operator()? {
            let precedence = op.precedence();
            if op == BinaryOperatorKind::Has || precedence < min_precedence {
                break;
            }
            self.advance()?;
            // Each fold deepens the left spine, so the step is held until the loop ends
            self.descend()?;
            folded += 1;
            let right = self.parse_binary(precedence + 1)?;
            left = QueryToken::binary(op, left, right);
        }
        self.depth = self.depth.saturating_sub(folded);
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<QueryToken> {
        let op = match self.peek_kind(0)? {
            Some(TokenKind::Minus) => UnaryOperatorKind::Negate,
            Some(TokenKind::Operator(OperatorKeyword::Not)) => UnaryOperatorKind::Not,
            _ => return self.parse_postfix(),
        };
        self.advance()?;
        self.descend()?;
        let operand = self.parse_unary()?;
        self.ascend();
        Ok(QueryToken::unary(op, operand))
    }

    /// `has` and `in`, left-associative above primaries
    fn parse_postfix(&mut self) -> Result<QueryToken> {
        let mut left = self.parse_primary()?;
        let mut folded = 0;
        loop {
            match self.peek_kind(0)? {
                Some(TokenKind::Operator(OperatorKeyword::Binary(BinaryOperatorKind::Has))) => {
                    self.advance()?;
                    self.descend()?;
                    folded += 1;
                    let right = self.parse_primary()?;
                    left = QueryToken::binary(BinaryOperatorKind::Has, left, right);
                }
                Some(TokenKind::Operator(OperatorKeyword::In)) => {
                    self.advance()?;
                    self.descend()?;
                    folded += 1;
                    let right = match self.parse_primary()? {
                        list @ (QueryToken::List(_) | QueryToken::ParameterAlias(_)) => list,
                        single => QueryToken::List(vec![single]),
                    };
                    left = QueryToken::In {
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                }
                _ => {
                    self.depth = self.depth.saturating_sub(folded);
                    return Ok(left);
                }
            }
        }
    }

    fn parse_primary(&mut self) -> Result<QueryToken> {
        match self.peek_kind(0)? {
            Some(TokenKind::OpenParen) => {
                self.descend()?;
                let inner = self.parse_parenthesized()?;
                self.ascend();
                Ok(inner)
            }
            Some(TokenKind::Literal(literal)) => {
                self.advance()?;
                Ok(QueryToken::Literal(literal))
            }
            Some(TokenKind::ParameterAlias(name)) => {
                self.advance()?;
                Ok(QueryToken::ParameterAlias(name))
            }
            Some(TokenKind::Identifier(_)) => self.parse_path(None),
            Some(_) => Err(self.unexpected(ODQ0102, "expression")),
            None => Err(self.unexpected(ODQ0101, "expression")),
        }
    }

    /// `(expr)` or a list `(a, b, ...)`
    fn parse_parenthesized(&mut self) -> Result<QueryToken> {
        self.expect(&TokenKind::OpenParen, ODQ0100)?;
        let first = self.parse_expression()?;
        if !self.eat(&TokenKind::Comma)? {
            self.expect(&TokenKind::CloseParen, ODQ0104)?;
            return Ok(first);
        }
        let mut items = vec![first];
        loop {
            items.push(self.parse_expression()?);
            if self.eat(&TokenKind::CloseParen)? {
                return Ok(QueryToken::List(items));
            }
            if !self.eat(&TokenKind::Comma)? {
                return Err(self.unexpected(ODQ0104, "',' or ')'"));
            }
        }
    }

    /// Path starting at the identifier under the cursor
    fn parse_path(&mut self, mut parent: Option<QueryToken>) -> Result<QueryToken> {
        let mut segments = 0usize;
        loop {
            let (name, _) = self.expect_identifier("path segment")?;
            segments += 1;
            if segments > self.max_depth {
                let offset = self.offset()?;
                return Err(QueryError::syntax(
                    ODQ0106,
                    format!("Path exceeds the limit of {} segments", self.max_depth),
                    offset,
                ));
            }
            let segment = self.parse_segment(name, parent)?;
            let continues = matches!(self.peek_kind(0)?, Some(TokenKind::Slash))
                && matches!(self.peek_kind(1)?, Some(TokenKind::Identifier(_)));
            if !continues {
                return Ok(segment);
            }
            self.advance()?;
            parent = Some(segment);
        }
    }

    fn parse_segment(&mut self, name: String, parent: Option<QueryToken>) -> Result<QueryToken> {
        let boxed = |parent: Option<QueryToken>| parent.map(Box::new);

        if parent.is_none()
            && (name == "$it" || name == "$this" || self.lambda_parameters.contains(&name))
        {
            return Ok(QueryToken::RangeVariable(name));
        }
        if name == "$count" {
            return Ok(QueryToken::Count {
                parent: boxed(parent),
            });
        }

        if matches!(self.peek_kind(0)?, Some(TokenKind::OpenParen)) {
            self.descend()?;
            let call = self.parse_call(name, parent)?;
            self.ascend();
            return Ok(call);
        }

        if name.contains('.') {
            return Ok(QueryToken::DottedIdentifier {
                name,
                parent: boxed(parent),
            });
        }
        if matches!(self.peek_kind(0)?, Some(TokenKind::Slash)) {
            return Ok(QueryToken::InnerPath {
                name,
                parent: boxed(parent),
                named_values: None,
            });
        }
        Ok(QueryToken::EndPath {
            name,
            parent: boxed(parent),
        })
    }

    /// `name(...)`: a lambda, a function call or a key predicate
    fn parse_call(&mut self, name: String, parent: Option<QueryToken>) -> Result<QueryToken> {
        if let (Some(collection), "any" | "all") = (&parent, name.as_str()) {
            let collection = collection.clone();
            return self.parse_lambda(name == "any", collection);
        }
        let args = self.parse_arguments()?;
        let parent = parent.map(Box::new);
        if is_builtin_function(&name) || name.contains('.') {
            return Ok(QueryToken::FunctionCall { name, args, parent });
        }
        Ok(QueryToken::InnerPath {
            name,
            parent,
            named_values: Some(args),
        })
    }

    /// `(a, name=b, ...)`, possibly empty
    pub(crate) fn parse_arguments(&mut self) -> Result<Vec<NamedValue>> {
        self.expect(&TokenKind::OpenParen, ODQ0100)?;
        let mut args = Vec::new();
        if self.eat(&TokenKind::CloseParen)? {
            return Ok(args);
        }
        loop {
            let named = matches!(self.peek_kind(0)?, Some(TokenKind::Identifier(_)))
                && matches!(self.peek_kind(1)?, Some(TokenKind::Equals));
            if named {
                let (name, _) = self.expect_identifier("argument name")?;
                self.advance()?;
                args.push(NamedValue::named(name, self.parse_expression()?));
            } else {
                args.push(NamedValue::positional(self.parse_expression()?));
            }
            if self.eat(&TokenKind::CloseParen)? {
                return Ok(args);
            }
            if !self.eat(&TokenKind::Comma)? {
                return Err(self.unexpected(ODQ0104, "',' or ')'"));
            }
        }
    }

    fn parse_lambda(&mut self, any: bool, collection: QueryToken) -> Result<QueryToken> {
        self.expect(&TokenKind::OpenParen, ODQ0100)?;
        let wrap = |lambda: LambdaToken| {
            if any {
                QueryToken::Any(lambda)
            } else {
                QueryToken::All(lambda)
            }
        };

        if self.eat(&TokenKind::CloseParen)? {
            if !any {
                return Err(self.unexpected(ODQ0115, "lambda variable"));
            }
            return Ok(wrap(LambdaToken {
                parent: Box::new(collection),
                parameter: None,
                expression: None,
            }));
        }

        let parameter = match self.peek_kind(0)? {
            Some(TokenKind::Identifier(name)) if !name.contains('.') && !name.starts_with('$') => {
                self.advance()?;
                name
            }
            _ => return Err(self.unexpected(ODQ0115, "lambda variable")),
        };
        self.expect(&TokenKind::Colon, ODQ0115)?;

        self.lambda_parameters.push(parameter.clone());
        let body = self.parse_expression();
        self.lambda_parameters.pop();
        let body = body?;

        self.expect(&TokenKind::CloseParen, ODQ0104)?;
        Ok(wrap(LambdaToken {
            parent: Box::new(collection),
            parameter: Some(parameter),
            expression: Some(Box::new(body)),
        }))
    }

    // Option-level lists

    /// `expr [asc|desc], ...`
    pub(crate) fn parse_orderby_list(&mut self) -> Result<Vec<OrderByToken>> {
        let mut items = Vec::new();
        loop {
            let expression = self.parse_expression()?;
            let direction = if self.eat_word("desc")? {
                OrderByDirection::Descending
            } else {
                self.eat_word("asc")?;
                OrderByDirection::Ascending
            };
            items.push(OrderByToken {
                expression,
                direction,
            });
            if !self.eat(&TokenKind::Comma)? {
                self.expect_end()?;
                return Ok(items);
            }
        }
    }

    /// `expr as Alias`
    pub(crate) fn parse_compute_item(&mut self) -> Result<ComputeExpressionToken> {
        let expression = self.parse_expression()?;
        self.expect_word("as", ODQ0100)?;
        let (alias, _) = self.expect_identifier("alias")?;
        Ok(ComputeExpressionToken { expression, alias })
    }

    /// Comma-separated compute items up to `terminator` (or the end when `None`)
    pub(crate) fn parse_compute_list(
        &mut self,
        terminator: Option<&TokenKind>,
    ) -> Result<Vec<ComputeExpressionToken>> {
        let mut items = vec![self.parse_compute_item()?];
        while self.eat(&TokenKind::Comma)? {
            items.push(self.parse_compute_item()?);
        }
        match terminator {
            Some(kind) => {
                self.expect(kind, ODQ0104)?;
            }
            None => self.expect_end()?,
        }
        Ok(items)
    }

    /// `name[(arguments)]` resource path segment
    pub(crate) fn parse_resource_segment(&mut self) -> Result<(String, Option<Vec<NamedValue>>)> {
        let name = match self.peek_kind(0)? {
            Some(TokenKind::Identifier(name)) => {
                self.advance()?;
                name
            }
            Some(TokenKind::Star) => {
                self.advance()?;
                "*".to_string()
            }
            _ => return Err(self.unexpected(ODQ0103, "path segment")),
        };
        let arguments = if matches!(self.peek_kind(0)?, Some(TokenKind::OpenParen)) {
            Some(self.parse_arguments()?)
        } else {
            None
        };
        self.expect_end()?;
        Ok((name, arguments))
    }
}

/// Parse a complete expression
pub(crate) fn parse_complete_expression(text: &str, max_depth: usize) -> Result<QueryToken> {
    let mut parser = ExpressionParser::new(text, max_depth);
    let expression = parser.parse_expression()?;
    parser.expect_end()?;
    Ok(expression)
}
