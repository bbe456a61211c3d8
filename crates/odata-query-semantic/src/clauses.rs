//! Bound `$filter`, `$orderby`, `$search` and `$compute` clauses

use crate::apply::check_available;
use crate::binder::MetadataBinder;
use crate::context::BindingContext;
use crate::nodes::{QueryNode, RangeVariable};
use log::debug;
use odata_query_ast::{ComputeExpressionToken, OrderByDirection, OrderByToken, QueryToken, SearchToken};
use odata_query_diagnostics::{QueryError, Result, ODQ0214, ODQ0218};
use odata_query_edm::{EdmType, TypeRef};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    pub expression: QueryNode,
    /// `$it` the predicate is evaluated against
    pub range_variable: RangeVariable,
}

impl FilterClause {
    pub fn item_type(&self) -> &TypeRef {
        &self.range_variable.type_ref
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expression: QueryNode,
    pub direction: OrderByDirection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByClause {
    /// Sort keys, most significant first
    pub items: Vec<OrderByItem>,
    pub range_variable: RangeVariable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComputeExpression {
    pub expression: QueryNode,
    pub alias: String,
    pub type_ref: TypeRef,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComputeClause {
    pub items: Vec<ComputeExpression>,
}

impl ComputeClause {
    pub fn find(&self, alias: &str) -> Option<&ComputeExpression> {
        self.items.iter().find(|item| item.alias == alias)
    }

    /// `context` with every alias of this clause resolvable as a dynamic property
    pub fn extend_context<'m>(&self, context: BindingContext<'m>) -> BindingContext<'m> {
        self.items.iter().fold(context, |context, item| {
            context.with_computed(item.alias.clone(), item.type_ref.clone())
        })
    }
}

/// `$search` expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchExpression {
    Term(String),
    And(Box<SearchExpression>, Box<SearchExpression>),
    Or(Box<SearchExpression>, Box<SearchExpression>),
    Not(Box<SearchExpression>),
}

impl SearchExpression {
    fn from_token(token: &SearchToken) -> Self {
        match token {
            SearchToken::Term(term) => Self::Term(term.clone()),
            SearchToken::And(l, r) => Self::And(Box::new(Self::from_token(l)), Box::new(Self::from_token(r))),
            SearchToken::Or(l, r) => Self::Or(Box::new(Self::from_token(l)), Box::new(Self::from_token(r))),
            SearchToken::Not(operand) => Self::Not(Box::new(Self::from_token(operand))),
        }
    }

    fn matches_lowercase(&self, text: &str) -> bool {
        match self {
            Self::Term(term) => text.contains(&term.to_lowercase()),
            Self::And(l, r) => l.matches_lowercase(text) && r.matches_lowercase(text),
            Self::Or(l, r) => l.matches_lowercase(text) || r.matches_lowercase(text),
            Self::Not(operand) => !operand.matches_lowercase(text),
        }
    }

    /// Terms in the order written, `NOT`-ed terms included
    pub fn terms(&self) -> Vec<&str> {
        match self {
            Self::Term(term) => vec![term.as_str()],
            Self::And(l, r) | Self::Or(l, r) => {
                let mut terms = l.terms();
                terms.extend(r.terms());
                terms
            }
            Self::Not(operand) => operand.terms(),
        }
    }
}

impl fmt::Display for SearchExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Term(term) if term.contains(char::is_whitespace) => write!(f, "\"{term}\""),
            Self::Term(term) => f.write_str(term),
            Self::And(l, r) => write!(f, "({l} AND {r})"),
            Self::Or(l, r) => write!(f, "({l} OR {r})"),
            Self::Not(operand) => write!(f, "(NOT {operand})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchClause {
    pub expression: SearchExpression,
}

impl SearchClause {
    /// Whether `text` satisfies the search; terms match as case-insensitive substrings
    pub fn matches(&self, text: &str) -> bool {
        self.expression.matches_lowercase(&text.to_lowercase())
    }
}

pub fn bind_filter(token: &QueryToken, context: &BindingContext<'_>) -> Result<FilterClause> {
    debug!("binding $filter: {token}");
    let expression = MetadataBinder::new(context)
        .bind_boolean(token)
        .map_err(|e| e.with_context("$filter"))?;
    check_available(context, &expression)?;
    Ok(FilterClause {
        expression,
        range_variable: context.it(),
    })
}

fn orderable(type_ref: &TypeRef) -> bool {
    match &type_ref.ty {
        EdmType::Primitive(kind) => kind.is_orderable(),
        EdmType::Enum(_) | EdmType::None => true,
        _ => false,
    }
}

pub fn bind_orderby(tokens: &[OrderByToken], context: &BindingContext<'_>) -> Result<OrderByClause> {
    debug!("binding $orderby with {} key(s)", tokens.len());
    let mut items = Vec::with_capacity(tokens.len());
    for token in tokens {
        let expression = MetadataBinder::new(context)
            .bind(&token.expression)
            .map_err(|e| e.with_context("$orderby"))?;
        if !orderable(expression.type_ref()) {
            return Err(QueryError::binding(
                ODQ0214,
                format!(
                    "Cannot order by '{expression}' of type {}",
                    context.model().display_type(expression.type_ref())
                ),
            ));
        }
        check_available(context, &expression)?;
        items.push(OrderByItem {
            expression,
            direction: token.direction,
        });
    }
    Ok(OrderByClause {
        items,
        range_variable: context.it(),
    })
}

pub fn bind_search(token: &SearchToken) -> SearchClause {
    debug!("binding $search: {token}");
    SearchClause {
        expression: SearchExpression::from_token(token),
    }
}

/// Bind `expr as Alias` items; aliases must not clash with each other or with a property
pub fn bind_compute(tokens: &[ComputeExpressionToken], context: &BindingContext<'_>) -> Result<ComputeClause> {
    debug!("binding $compute with {} item(s)", tokens.len());
    let mut clause = ComputeClause::default();
    for token in tokens {
        if clause.find(&token.alias).is_some() {
            return Err(QueryError::binding(
                ODQ0218,
                format!("Computed alias '{}' is defined twice", token.alias),
            ));
        }
        let clashes = match context.it().type_ref.schema_id() {
            Some(id) => context.find_property(id, &token.alias)?.is_some(),
            None => false,
        };
        if clashes {
            return Err(QueryError::binding(
                ODQ0218,
                format!("Computed alias '{}' hides a declared property", token.alias),
            ));
        }
        let expression = MetadataBinder::new(context)
            .bind(&token.expression)
            .map_err(|e| e.with_context(format!("$compute alias {}", token.alias)))?;
        if expression.is_collection() {
            return Err(QueryError::binding(
                ODQ0214,
                format!("Computed value '{}' must be single-valued", token.alias),
            ));
        }
        check_available(context, &expression)?;
        clause.items.push(ComputeExpression {
            type_ref: expression.type_ref().clone(),
            expression,
            alias: token.alias.clone(),
        });
    }
    Ok(clause)
}
