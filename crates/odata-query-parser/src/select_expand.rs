//! `$select` and `$expand` parsing
//!
//! Items are split at top-level commas and nested options at top-level
//! semicolons. Paths are linked leaf-first while parsing and rebuilt
//! root-first by a normalisation pass, which also merges expand terms that
//! name the same path. Every nested `$select` or `$expand` list counts
//! against `max_depth`, whatever `max_expand_depth` says.

use crate::expression::{parse_complete_expression, rebase, ExpressionParser};
use crate::scan::{matching_paren, split_top_level, trimmed};
use crate::search::parse_search_text;
use crate::settings::ParserSettings;
use crate::{parse_count_value, parse_levels_value, parse_non_negative};
use odata_query_ast::{
    ExpandTermToken, ExpandToken, LevelsToken, NestedOptions, PathSegmentToken, SegmentKind,
    SelectTermToken, SelectToken, SystemSegment,
};
use odata_query_diagnostics::{
    QueryError, Result, ODQ0100, ODQ0103, ODQ0104, ODQ0105, ODQ0106, ODQ0108, ODQ0109, ODQ0110,
    ODQ0113,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TermKind {
    Select,
    Expand,
}

impl TermKind {
    fn option_name(self) -> &'static str {
        match self {
            Self::Select => "$select",
            Self::Expand => "$expand",
        }
    }

    fn allows(self, option: &str) -> bool {
        const SHARED: &[&str] = &[
            "filter", "orderby", "top", "skip", "count", "search", "select", "compute",
        ];
        SHARED.contains(&option) || (self == Self::Expand && matches!(option, "expand" | "levels"))
    }
}

/// Where a term list sits inside nested options: `levels` counts every
/// enclosing `$select` or `$expand` list, `expand` only the `$expand` ones
#[derive(Debug, Clone, Copy)]
struct Nesting {
    levels: usize,
    expand: usize,
}

impl Nesting {
    fn top(kind: TermKind) -> Self {
        Self {
            levels: 1,
            expand: usize::from(kind == TermKind::Expand),
        }
    }

    fn enter(self, kind: TermKind) -> Self {
        Self {
            levels: self.levels + 1,
            expand: self.expand + usize::from(kind == TermKind::Expand),
        }
    }
}

/// A term before normalisation; `path` is linked leaf-first
struct RawTerm {
    path: PathSegmentToken,
    options: NestedOptions,
    expand: Option<Vec<RawTerm>>,
    levels: Option<LevelsToken>,
}

struct TermParser<'s> {
    settings: &'s ParserSettings,
}

impl TermParser<'_> {
    fn parse_list(&self, text: &str, base: usize, kind: TermKind, nesting: Nesting) -> Result<Vec<RawTerm>> {
        if text.trim().is_empty() {
            return Err(QueryError::syntax(
                ODQ0105,
                format!("{} must not be empty", kind.option_name()),
                base,
            ));
        }
        if nesting.levels > self.settings.max_depth {
            return Err(QueryError::syntax(
                ODQ0106,
                format!(
                    "{} nesting exceeds the limit of {}",
                    kind.option_name(),
                    self.settings.max_depth
                ),
                base,
            ));
        }
        if let (TermKind::Expand, Some(limit)) = (kind, self.settings.max_expand_depth) {
            if nesting.expand > limit {
                return Err(QueryError::syntax(
                    ODQ0109,
                    format!("$expand nesting exceeds the limit of {limit}"),
                    base,
                ));
            }
        }
        split_top_level(text, ',')
            .into_iter()
            .map(|(offset, item)| {
                let (offset, item) = trimmed(base + offset, item);
                self.parse_term(item, offset, kind, nesting)
            })
            .collect()
    }

    fn parse_term(&self, item: &str, base: usize, kind: TermKind, nesting: Nesting) -> Result<RawTerm> {
        if item.is_empty() {
            return Err(QueryError::expected(ODQ0103, "select or expand item", None, base));
        }
        let (path_text, options_text) = match item.find('(') {
            Some(open) => {
                let close = matching_paren(item, open).ok_or_else(|| {
                    QueryError::expected(ODQ0104, "')'", None, base + item.len())
                })?;
                if close + 1 != item.len() {
                    return Err(QueryError::expected(
                        ODQ0100,
                        "',' or end of input",
                        Some(&item[close + 1..]),
                        base + close + 1,
                    ));
                }
                (&item[..open], Some((base + open + 1, &item[open + 1..close])))
            }
            None => (item, None),
        };

        let path = self.parse_segments(path_text, base)?;
        let mut term = RawTerm {
            path,
            options: NestedOptions::default(),
            expand: None,
            levels: None,
        };
        if let Some((offset, text)) = options_text {
            self.parse_options(&mut term, text, offset, kind, nesting)?;
        }
        Ok(term)
    }

    /// `a/b/NS.T/$ref`, linked leaf-first
    fn parse_segments(&self, text: &str, base: usize) -> Result<PathSegmentToken> {
        let mut path: Option<PathSegmentToken> = None;
        let mut count = 0usize;
        for (offset, segment) in split_top_level(text, '/') {
            let (offset, segment) = trimmed(base + offset, segment);
            count += 1;
            if count > self.settings.max_path_depth {
                return Err(QueryError::syntax(
                    ODQ0106,
                    format!("Path exceeds the limit of {} segments", self.settings.max_path_depth),
                    offset,
                ));
            }
            let kind = segment_kind(segment).ok_or_else(|| {
                let found = (!segment.is_empty()).then_some(segment);
                QueryError::expected(ODQ0103, "path segment", found, offset)
            })?;
            path = Some(PathSegmentToken {
                kind,
                next: path.map(Box::new),
            });
        }
        path.ok_or_else(|| QueryError::expected(ODQ0103, "path segment", None, base))
    }

    fn parse_options(
        &self,
        term: &mut RawTerm,
        text: &str,
        base: usize,
        kind: TermKind,
        nesting: Nesting,
    ) -> Result<()> {
        let mut seen: Vec<String> = Vec::new();
        for (offset, option) in split_top_level(text, ';') {
            let (offset, option) = trimmed(base + offset, option);
            let Some(eq) = option.find('=') else {
                return Err(QueryError::syntax(
                    ODQ0108,
                    format!("Nested option '{option}' has no value"),
                    offset,
                ));
            };
            let raw_name = option[..eq].trim();
            let name = match raw_name.strip_prefix('$') {
                Some(name) => name,
                None if self.settings.enable_no_dollar_query_options => raw_name,
                None => "",
            };
            if !kind.allows(name) {
                return Err(QueryError::syntax(
                    ODQ0108,
                    format!("'{raw_name}' is not allowed inside {}", kind.option_name()),
                    offset,
                ));
            }
            if seen.iter().any(|s| s == name) {
                return Err(QueryError::syntax(
                    ODQ0108,
                    format!("Nested option '{raw_name}' is repeated"),
                    offset,
                ));
            }
            seen.push(name.to_string());

            let (value_offset, value) = trimmed(offset + eq + 1, &option[eq + 1..]);
            if value.is_empty() {
                return Err(QueryError::syntax(
                    ODQ0105,
                    format!("Nested option '{raw_name}' has an empty value"),
                    value_offset,
                ));
            }
            self.apply_option(term, name, value, value_offset, nesting)?;
        }
        Ok(())
    }

    fn apply_option(
        &self,
        term: &mut RawTerm,
        name: &str,
        value: &str,
        base: usize,
        nesting: Nesting,
    ) -> Result<()> {
        let max_depth = self.settings.max_depth;
        let options = &mut term.options;
        match name {
            "filter" => {
                options.filter =
                    Some(parse_complete_expression(value, max_depth).map_err(|e| rebase(e, base))?)
            }
            "orderby" => {
                let mut parser = ExpressionParser::new(value, max_depth);
                options.orderby =
                    Some(parser.parse_orderby_list().map_err(|e| rebase(e, base))?)
            }
            "top" => options.top = Some(parse_non_negative("$top", value).map_err(|e| rebase(e, base))?),
            "skip" => {
                options.skip = Some(parse_non_negative("$skip", value).map_err(|e| rebase(e, base))?)
            }
            "count" => options.count = Some(parse_count_value(value).map_err(|e| rebase(e, base))?),
            "search" => {
                options.search = Some(
                    parse_search_text(value, self.settings.max_search_depth)
                        .map_err(|e| rebase(e, base))?,
                )
            }
            "compute" => {
                let mut parser = ExpressionParser::new(value, max_depth);
                options.compute =
                    Some(parser.parse_compute_list(None).map_err(|e| rebase(e, base))?)
            }
            "select" => {
                let nested = nesting.enter(TermKind::Select);
                let terms = self.parse_list(value, base, TermKind::Select, nested)?;
                options.select = Some(normalize_select(terms));
            }
            "expand" => {
                let nested = nesting.enter(TermKind::Expand);
                term.expand = Some(self.parse_list(value, base, TermKind::Expand, nested)?);
            }
            "levels" => {
                let levels = parse_levels_value(value).map_err(|e| rebase(e, base))?;
                if let (LevelsToken::Value(n), Some(limit)) = (levels, self.settings.max_expand_depth) {
                    let extra = usize::try_from(n).unwrap_or(usize::MAX).saturating_sub(1);
                    let deepest = nesting.expand.saturating_add(extra);
                    if deepest > limit {
                        return Err(QueryError::syntax(
                            ODQ0109,
                            format!("$levels={n} exceeds the $expand depth limit of {limit}"),
                            base,
                        ));
                    }
                }
                term.levels = Some(levels);
            }
            _ => {}
        }
        Ok(())
    }
}

fn segment_kind(segment: &str) -> Option<SegmentKind> {
    if segment == "*" {
        return Some(SegmentKind::Wildcard { namespace: None });
    }
    if let Some(namespace) = segment.strip_suffix(".*") {
        return is_qualified_name(namespace).then(|| SegmentKind::Wildcard {
            namespace: Some(namespace.to_string()),
        });
    }
    if let Some(system) = SystemSegment::from_name(segment) {
        return Some(SegmentKind::System(system));
    }
    is_qualified_name(segment).then(|| SegmentKind::Named(segment.to_string()))
}

fn is_qualified_name(text: &str) -> bool {
    !text.is_empty()
        && text.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_alphabetic() || c == '_')
                && chars.all(|c| c.is_alphanumeric() || c == '_')
        })
}

fn normalize_select(terms: Vec<RawTerm>) -> SelectToken {
    let mut normalized: Vec<SelectTermToken> = Vec::with_capacity(terms.len());
    for term in terms {
        let candidate = SelectTermToken {
            path: term.path.normalized(),
            options: term.options,
        };
        if !normalized.contains(&candidate) {
            normalized.push(candidate);
        }
    }
    SelectToken { terms: normalized }
}

/// Rebuild raw expand terms root-first, merging terms with the same path
fn normalize_expand(terms: Vec<RawTerm>, base: usize) -> Result<ExpandToken> {
    let mut merged: Vec<ExpandTermToken> = Vec::with_capacity(terms.len());
    for term in terms {
        let path = term.path.normalized();
        let expand = term
            .expand
            .map(|nested| normalize_expand(nested, base))
            .transpose()?;
        let candidate = ExpandTermToken {
            path,
            options: term.options,
            expand,
            levels: term.levels,
        };
        match merged.iter_mut().find(|existing| existing.path == candidate.path) {
            Some(existing) => merge_terms(existing, candidate, base)?,
            None => merged.push(candidate),
        }
    }
    Ok(ExpandToken { terms: merged })
}

fn merge_terms(existing: &mut ExpandTermToken, other: ExpandTermToken, base: usize) -> Result<()> {
    let conflict = || {
        QueryError::syntax(
            ODQ0113,
            format!("'{}' is expanded twice with different options", other.path),
            base,
        )
    };
    if existing.options != other.options {
        if !existing.options.is_empty() && !other.options.is_empty() {
            return Err(conflict());
        }
        if existing.options.is_empty() {
            existing.options = other.options.clone();
        }
    }
    match (existing.levels, other.levels) {
        (Some(a), Some(b)) if a != b => return Err(conflict()),
        (None, levels) => existing.levels = levels,
        _ => {}
    }
    if let Some(nested) = other.expand {
        let mut combined = existing.expand.take().unwrap_or_default();
        for term in nested.terms {
            match combined.terms.iter_mut().find(|t| t.path == term.path) {
                Some(found) => merge_terms(found, term, base)?,
                None => combined.terms.push(term),
            }
        }
        existing.expand = Some(combined);
    }
    Ok(())
}

fn count_expanded(token: &ExpandToken) -> usize {
    token
        .terms
        .iter()
        .map(|term| 1 + term.expand.as_ref().map_or(0, count_expanded))
        .sum()
}

pub(crate) fn parse_select_text(text: &str, settings: &ParserSettings) -> Result<SelectToken> {
    let parser = TermParser { settings };
    let terms = parser.parse_list(text, 0, TermKind::Select, Nesting::top(TermKind::Select))?;
    Ok(normalize_select(terms))
}

pub(crate) fn parse_expand_text(text: &str, settings: &ParserSettings) -> Result<ExpandToken> {
    let parser = TermParser { settings };
    let terms = parser.parse_list(text, 0, TermKind::Expand, Nesting::top(TermKind::Expand))?;
    let expand = normalize_expand(terms, 0)?;
    if let Some(limit) = settings.max_expand_count {
        let count = count_expanded(&expand);
        if count > limit {
            return Err(QueryError::syntax(
                ODQ0110,
                format!("$expand names {count} navigation properties; the limit is {limit}"),
                0,
            ));
        }
    }
    Ok(expand)
}
