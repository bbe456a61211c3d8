//! OData query-option parser
//!
//! Turns the text of a single query option (`$filter`, `$orderby`,
//! `$select`, `$expand`, `$search`, `$apply`, `$compute`, ...) into the
//! untyped tokens of `odata-query-ast`. Nothing here consults a model;
//! binding happens in `odata-query-semantic`.
//!
//! ```
//! use odata_query_parser::parse_filter;
//!
//! let token = parse_filter("Name eq 'Bob' and Age gt 30").unwrap();
//! assert_eq!(token.to_string(), "((Name eq 'Bob') and (Age gt 30))");
//! ```

mod apply;
mod expression;
mod lexer;
mod literals;
mod scan;
mod search;
mod select_expand;
mod settings;

pub use lexer::{tokenize, LexToken, Lexer, OperatorKeyword, TokenKind};
pub use search::{SearchLexToken, SearchLexer, SearchTokenKind};
pub use settings::ParserSettings;

use expression::{parse_complete_expression, rebase, ExpressionParser};
use log::debug;
use odata_query_ast::{
    ApplyTransformationToken, ComputeExpressionToken, ExpandToken, LevelsToken, OrderByToken,
    QueryToken, ResourceSegmentToken, SearchToken, SelectToken,
};
use odata_query_diagnostics::{QueryError, Result, ODQ0103, ODQ0105, ODQ0106, ODQ0107};

/// Parser for individual query options, carrying its limits
#[derive(Debug, Clone, Default)]
pub struct QueryParser {
    settings: ParserSettings,
}

fn require_value(option: &str, text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(QueryError::syntax(
            ODQ0105,
            format!("{option} must not be empty"),
            0,
        ));
    }
    Ok(())
}

impl QueryParser {
    pub fn new(settings: ParserSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ParserSettings {
        &self.settings
    }

    pub fn parse_filter(&self, text: &str) -> Result<QueryToken> {
        debug!("parsing $filter: {text}");
        require_value("$filter", text)?;
        parse_complete_expression(text, self.settings.max_depth)
    }

    pub fn parse_orderby(&self, text: &str) -> Result<Vec<OrderByToken>> {
        debug!("parsing $orderby: {text}");
        require_value("$orderby", text)?;
        ExpressionParser::new(text, self.settings.max_depth).parse_orderby_list()
    }

    pub fn parse_select(&self, text: &str) -> Result<SelectToken> {
        debug!("parsing $select: {text}");
        select_expand::parse_select_text(text, &self.settings)
    }

    pub fn parse_expand(&self, text: &str) -> Result<ExpandToken> {
        debug!("parsing $expand: {text}");
        select_expand::parse_expand_text(text, &self.settings)
    }

    pub fn parse_search(&self, text: &str) -> Result<SearchToken> {
        debug!("parsing $search: {text}");
        search::parse_search_text(text, self.settings.max_search_depth)
    }

    pub fn parse_apply(&self, text: &str) -> Result<Vec<ApplyTransformationToken>> {
        debug!("parsing $apply: {text}");
        require_value("$apply", text)?;
        ExpressionParser::new(text, self.settings.max_depth).parse_apply_pipeline()
    }

    pub fn parse_compute(&self, text: &str) -> Result<Vec<ComputeExpressionToken>> {
        debug!("parsing $compute: {text}");
        require_value("$compute", text)?;
        ExpressionParser::new(text, self.settings.max_depth).parse_compute_list(None)
    }

    /// Resource path such as `People(1)/Orders/NS.VipOrder`; a leading `/` is optional
    pub fn parse_path(&self, text: &str) -> Result<Vec<ResourceSegmentToken>> {
        debug!("parsing resource path: {text}");
        let (base, path) = match text.strip_prefix('/') {
            Some(rest) => (1, rest),
            None => (0, text),
        };
        if path.trim().is_empty() {
            return Ok(Vec::new());
        }
        let parts = scan::split_top_level(path, '/');
        if parts.len() > self.settings.max_path_depth {
            return Err(QueryError::syntax(
                ODQ0106,
                format!(
                    "Path exceeds the limit of {} segments",
                    self.settings.max_path_depth
                ),
                base,
            ));
        }
        parts
            .into_iter()
            .map(|(offset, segment)| {
                let offset = base + offset;
                if segment.trim().is_empty() {
                    return Err(QueryError::expected(ODQ0103, "path segment", None, offset));
                }
                let (name, arguments) = ExpressionParser::new(segment, self.settings.max_depth)
                    .parse_resource_segment()
                    .map_err(|e| rebase(e, offset))?;
                Ok(ResourceSegmentToken { name, arguments })
            })
            .collect()
    }

    pub fn parse_top(&self, text: &str) -> Result<i64> {
        parse_non_negative("$top", text)
    }

    pub fn parse_skip(&self, text: &str) -> Result<i64> {
        parse_non_negative("$skip", text)
    }

    pub fn parse_count(&self, text: &str) -> Result<bool> {
        parse_count_value(text)
    }

    pub fn parse_levels(&self, text: &str) -> Result<LevelsToken> {
        parse_levels_value(text)
    }
}

pub(crate) fn parse_non_negative(option: &str, text: &str) -> Result<i64> {
    require_value(option, text)?;
    match text.trim().parse::<i64>() {
        Ok(value) if value >= 0 => Ok(value),
        _ => Err(QueryError::syntax(
            ODQ0107,
            format!("{option} must be a non-negative integer, found '{text}'"),
            0,
        )),
    }
}

pub(crate) fn parse_count_value(text: &str) -> Result<bool> {
    match text.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        "" => Err(QueryError::syntax(ODQ0105, "$count must not be empty", 0)),
        other => Err(QueryError::syntax(
            ODQ0107,
            format!("$count must be 'true' or 'false', found '{other}'"),
            0,
        )),
    }
}

pub(crate) fn parse_levels_value(text: &str) -> Result<LevelsToken> {
    match text.trim() {
        "max" => Ok(LevelsToken::Max),
        other => match other.parse::<i64>() {
            Ok(levels) if levels > 0 => Ok(LevelsToken::Value(levels)),
            _ => Err(QueryError::syntax(
                ODQ0107,
                format!("$levels must be a positive integer or 'max', found '{other}'"),
                0,
            )),
        },
    }
}

/// Parse `$filter` with default settings
pub fn parse_filter(text: &str) -> Result<QueryToken> {
    QueryParser::default().parse_filter(text)
}

pub fn parse_orderby(text: &str) -> Result<Vec<OrderByToken>> {
    QueryParser::default().parse_orderby(text)
}

pub fn parse_select(text: &str) -> Result<SelectToken> {
    QueryParser::default().parse_select(text)
}

/// Parse `$expand` with default settings; the result is normalised
pub fn parse_expand(text: &str) -> Result<ExpandToken> {
    QueryParser::default().parse_expand(text)
}

pub fn parse_search(text: &str) -> Result<SearchToken> {
    QueryParser::default().parse_search(text)
}

pub fn parse_apply(text: &str) -> Result<Vec<ApplyTransformationToken>> {
    QueryParser::default().parse_apply(text)
}

pub fn parse_compute(text: &str) -> Result<Vec<ComputeExpressionToken>> {
    QueryParser::default().parse_compute(text)
}

pub fn parse_path(text: &str) -> Result<Vec<ResourceSegmentToken>> {
    QueryParser::default().parse_path(text)
}

pub fn parse_top(text: &str) -> Result<i64> {
    parse_non_negative("$top", text)
}

pub fn parse_skip(text: &str) -> Result<i64> {
    parse_non_negative("$skip", text)
}

pub fn parse_count(text: &str) -> Result<bool> {
    parse_count_value(text)
}

pub fn parse_levels(text: &str) -> Result<LevelsToken> {
    parse_levels_value(text)
}
