//! Binder switches

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BinderSettings {
    /// Resolve properties, navigation sources, types and operations ignoring case
    pub case_insensitive: bool,
    /// Recursion limit while binding a single expression; each token of a
    /// nested chain (operator, path segment, argument) takes one level
    pub max_depth: usize,
}

impl Default for BinderSettings {
    fn default() -> Self {
        Self {
            case_insensitive: false,
            max_depth: 100,
        }
    }
}

impl BinderSettings {
    pub fn case_insensitive() -> Self {
        Self {
            case_insensitive: true,
            ..Self::default()
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}
