//! `$apply` transformation tokens

use crate::{ComputeExpressionToken, QueryToken};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregation verb after `with`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationMethod {
    Sum,
    Min,
    Max,
    Average,
    CountDistinct,
    /// `$count as Alias`
    VirtualCount,
    /// Namespace-qualified custom aggregate
    Custom(String),
}

impl AggregationMethod {
    pub fn from_name(name: &str) -> Self {
        match name {
            "sum" => Self::Sum,
            "min" => Self::Min,
            "max" => Self::Max,
            "average" => Self::Average,
            "countdistinct" => Self::CountDistinct,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Average => "average",
            Self::CountDistinct => "countdistinct",
            Self::VirtualCount => "$count",
            Self::Custom(name) => name,
        })
    }
}

/// `expression with method [from path] as alias`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateExpressionToken {
    pub expression: QueryToken,
    pub method: AggregationMethod,
    pub alias: String,
    /// Collection the expression is evaluated over, e.g. `Sales` in `Sales(Amount with sum as Total)`
    pub from: Option<QueryToken>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ApplyTransformationToken {
    Filter(QueryToken),
    Aggregate(Vec<AggregateExpressionToken>),
    GroupBy {
        /// Grouping paths in the order written
        properties: Vec<QueryToken>,
        child: Option<Box<ApplyTransformationToken>>,
    },
    Compute(Vec<ComputeExpressionToken>),
}

impl ApplyTransformationToken {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Filter(_) => "filter",
            Self::Aggregate(_) => "aggregate",
            Self::GroupBy { .. } => "groupby",
            Self::Compute(_) => "compute",
        }
    }
}
