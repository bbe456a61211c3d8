//! Parser limits and switches

use serde::{Deserialize, Serialize};

/// Limits applied while parsing query options
///
/// Every field has a default, so a partial JSON document such as
/// `{"maxExpandDepth": 3}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParserSettings {
    /// Recursion limit for `$filter`, `$orderby`, `$apply` and `$compute`
    /// expressions, and nesting limit for `$select`/`$expand` options
    ///
    /// Expressions count every recursive step, so one parenthesised level
    /// uses two and the right operand of a binary operator one more.
    pub max_depth: usize,
    pub max_search_depth: usize,
    /// Segment limit for resource paths and select/expand paths
    pub max_path_depth: usize,
    /// Stricter nesting limit for `$expand`; only `max_depth` applies when `None`
    pub max_expand_depth: Option<usize>,
    /// Total number of expanded navigation properties; unlimited when `None`
    pub max_expand_count: Option<usize>,
    /// Accept `filter=` as well as `$filter=`
    pub enable_no_dollar_query_options: bool,
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            max_depth: 100,
            max_search_depth: 100,
            max_path_depth: 100,
            max_expand_depth: None,
            max_expand_count: None,
            enable_no_dollar_query_options: false,
        }
    }
}

impl ParserSettings {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_expand_limits(mut self, depth: Option<usize>, count: Option<usize>) -> Self {
        self.max_expand_depth = depth;
        self.max_expand_count = count;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings: ParserSettings =
            serde_json::from_str(r#"{"maxExpandDepth": 3, "enableNoDollarQueryOptions": true}"#)
                .expect("settings deserialize");
        assert_eq!(settings.max_expand_depth, Some(3));
        assert!(settings.enable_no_dollar_query_options);
        assert_eq!(settings.max_depth, 100);
        assert_eq!(settings.max_search_depth, 100);
    }
}
