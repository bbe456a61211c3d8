//! Splitting a raw query string into query options
//!
//! Values are kept exactly as they appear in the query string; nothing is
//! percent-decoded here.

use indexmap::IndexMap;
use log::{debug, trace};
use odata_query_diagnostics::{QueryError, Result, ODQ0107, ODQ0112};
use odata_query_parser::ParserSettings;
use std::fmt;

/// The `$`-prefixed options understood by [`crate::UriQueryParser`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemQueryOption {
    Filter,
    OrderBy,
    Select,
    Expand,
    Search,
    Apply,
    Compute,
    Top,
    Skip,
    Count,
    Format,
    SkipToken,
    DeltaToken,
}

impl SystemQueryOption {
    pub const ALL: [Self; 13] = [
        Self::Filter,
        Self::OrderBy,
        Self::Select,
        Self::Expand,
        Self::Search,
        Self::Apply,
        Self::Compute,
        Self::Top,
        Self::Skip,
        Self::Count,
        Self::Format,
        Self::SkipToken,
        Self::DeltaToken,
    ];

    /// Option name without the leading `$`
    pub fn name(self) -> &'static str {
        match self {
            Self::Filter => "filter",
            Self::OrderBy => "orderby",
            Self::Select => "select",
            Self::Expand => "expand",
            Self::Search => "search",
            Self::Apply => "apply",
            Self::Compute => "compute",
            Self::Top => "top",
            Self::Skip => "skip",
            Self::Count => "count",
            Self::Format => "format",
            Self::SkipToken => "skiptoken",
            Self::DeltaToken => "deltatoken",
        }
    }

    /// Matches ASCII case-insensitively, so `$OrderBy` and `$orderby` are the same option
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|option| option.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for SystemQueryOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.name())
    }
}

/// Query options of one request, in the order they were given
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    system: IndexMap<SystemQueryOption, String>,
    aliases: IndexMap<String, String>,
    custom: Vec<(String, String)>,
}

impl QueryOptions {
    /// Split `query` (with or without a leading `?`) into options
    ///
    /// A system option or parameter alias given twice is a syntax error
    /// (ODQ0112), as is an unknown `$` option. Custom options may repeat.
    /// With `enable_no_dollar_query_options`, `filter=` is read as `$filter=`
    /// and counts as the same option for duplicate detection.
    pub fn parse(query: &str, settings: &ParserSettings) -> Result<Self> {
        let query = query.strip_prefix('?').unwrap_or(query);
        debug!("splitting query string: {query}");
        let mut options = Self::default();
        let mut offset = 0;
        for pair in query.split('&') {
            let start = offset;
            offset += pair.len() + 1;
            if pair.is_empty() {
                continue;
            }
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            if let Some(alias) = name.strip_prefix('@') {
                if options.aliases.contains_key(alias) {
                    return Err(duplicate(name, start));
                }
                trace!("parameter alias @{alias} = {value}");
                options.aliases.insert(alias.to_string(), value.to_string());
                continue;
            }
            let system = match name.strip_prefix('$') {
                Some(bare) => Some(SystemQueryOption::from_name(bare).ok_or_else(|| {
                    QueryError::syntax(ODQ0107, format!("Unknown system query option '{name}'"), start)
                })?),
                None if settings.enable_no_dollar_query_options => SystemQueryOption::from_name(name),
                None => None,
            };
            match system {
                Some(option) => {
                    if options.system.contains_key(&option) {
                        return Err(duplicate(name, start));
                    }
                    trace!("{option} = {value}");
                    options.system.insert(option, value.to_string());
                }
                None => options.custom.push((name.to_string(), value.to_string())),
            }
        }
        Ok(options)
    }

    /// Raw value of a system option; `Some("")` when given without a value
    pub fn get(&self, option: SystemQueryOption) -> Option<&str> {
        self.system.get(&option).map(String::as_str)
    }

    pub fn contains(&self, option: SystemQueryOption) -> bool {
        self.system.contains_key(&option)
    }

    pub fn system_options(&self) -> impl Iterator<Item = (SystemQueryOption, &str)> {
        self.system.iter().map(|(option, value)| (*option, value.as_str()))
    }

    /// Alias values keyed by name without the `@`
    pub fn aliases(&self) -> &IndexMap<String, String> {
        &self.aliases
    }

    pub fn custom(&self) -> &[(String, String)] {
        &self.custom
    }

    pub fn is_empty(&self) -> bool {
        self.system.is_empty() && self.aliases.is_empty() && self.custom.is_empty()
    }
}

fn duplicate(name: &str, offset: usize) -> QueryError {
    QueryError::syntax(ODQ0112, format!("Query option '{name}' is given more than once"), offset)
}
