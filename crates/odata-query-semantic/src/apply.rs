//! `$apply` pipeline binding
//!
//! Transformations are bound left to right. Each stage sees the
//! [`ApplyShape`] produced by the stages before it: `groupby` and
//! `aggregate` narrow the result to the grouping paths and aggregate
//! aliases, `compute` adds aliases and `filter` leaves the shape alone.
//! Once the shape is narrowed, later clauses may only reference what the
//! pipeline still produces.

use crate::binder::MetadataBinder;
use crate::context::BindingContext;
use crate::nodes::QueryNode;
use indexmap::IndexMap;
use log::{debug, trace};
use odata_query_ast::{
    AggregateExpressionToken, AggregationMethod, ApplyTransformationToken, ComputeExpressionToken, QueryToken,
};
use odata_query_diagnostics::{QueryError, Result, ODQ0211, ODQ0212, ODQ0214, ODQ0218};
use odata_query_edm::{EdmType, PrimitiveKind, TypeRef};
use once_cell::sync::OnceCell;

use crate::clauses::ComputeExpression;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeEntryKind {
    Grouping,
    Aggregate,
    Computed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeProperty {
    pub kind: ShapeEntryKind,
    pub type_ref: TypeRef,
}

/// Properties produced by the pipeline so far, keyed by `/`-joined path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyShape {
    properties: IndexMap<String, ShapeProperty>,
    narrowed: bool,
}

impl ApplyShape {
    fn narrowed() -> Self {
        Self {
            properties: IndexMap::new(),
            narrowed: true,
        }
    }

    fn insert(&mut self, path: impl Into<String>, kind: ShapeEntryKind, type_ref: TypeRef) {
        self.properties.insert(path.into(), ShapeProperty { kind, type_ref });
    }

    /// Whether a grouping or aggregation replaced the input properties
    pub fn is_narrowed(&self) -> bool {
        self.narrowed
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    pub fn get(&self, path: &str) -> Option<&ShapeProperty> {
        self.properties.get(path)
    }

    /// Type of an alias introduced by `aggregate` or `compute`
    pub fn dynamic_type(&self, name: &str) -> Option<TypeRef> {
        self.properties
            .get(name)
            .filter(|p| p.kind != ShapeEntryKind::Grouping)
            .map(|p| p.type_ref.clone())
    }

    /// Whether `path` can still be read
    ///
    /// A path is available when it is an entry, lies under a grouped
    /// navigation or complex entry, or is a prefix of a grouped path.
    pub fn is_available(&self, path: &str) -> bool {
        if !self.narrowed {
            return true;
        }
        self.properties.keys().any(|entry| {
            entry == path
                || path.strip_prefix(entry.as_str()).is_some_and(|rest| rest.starts_with('/'))
                || entry.strip_prefix(path).is_some_and(|rest| rest.starts_with('/'))
        })
    }

    /// Context URL projection such as `(Category(Name),Total)`
    fn projection(&self) -> Option<String> {
        if !self.narrowed {
            return None;
        }
        let paths: Vec<Vec<&str>> = self.names().map(|name| name.split('/').collect()).collect();
        Some(format!("({})", render_paths(&paths)))
    }
}

fn render_paths(paths: &[Vec<&str>]) -> String {
    let mut heads: IndexMap<&str, Vec<Vec<&str>>> = IndexMap::new();
    for path in paths {
        if let Some((head, rest)) = path.split_first() {
            let children = heads.entry(*head).or_default();
            if !rest.is_empty() {
                children.push(rest.to_vec());
            }
        }
    }
    heads
        .iter()
        .map(|(head, children)| {
            if children.is_empty() {
                head.to_string()
            } else {
                format!("{head}({})", render_paths(children))
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Fail when `node` reads a property the `$apply` output no longer has
pub(crate) fn check_available(context: &BindingContext<'_>, node: &QueryNode) -> Result<()> {
    let Some(shape) = context.shape() else {
        return Ok(());
    };
    for path in node.referenced_properties() {
        if context.computed(&path).is_some() || shape.is_available(&path) {
            continue;
        }
        let available: Vec<&str> = shape.names().collect();
        return Err(QueryError::binding(
            ODQ0212,
            format!(
                "'{path}' is not part of the $apply result; available properties are {}",
                available.join(", ")
            ),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateStatement {
    /// `None` for `$count as Alias`
    pub expression: Option<QueryNode>,
    pub method: AggregationMethod,
    pub alias: String,
    /// Collection or grouping property after `from`, or the entity set prefix
    pub from: Option<QueryNode>,
    pub type_ref: TypeRef,
}

/// One level of the grouping tree; leaves carry the bound path
#[derive(Debug, Clone, PartialEq)]
pub struct GroupByPropertyNode {
    pub name: String,
    pub expression: Option<QueryNode>,
    pub type_ref: Option<TypeRef>,
    pub children: Vec<GroupByPropertyNode>,
}

impl GroupByPropertyNode {
    fn branch(name: &str) -> Self {
        Self {
            name: name.to_string(),
            expression: None,
            type_ref: None,
            children: Vec::new(),
        }
    }

    fn insert(nodes: &mut Vec<Self>, path: &[&str], expression: QueryNode) {
        let Some((head, rest)) = path.split_first() else {
            return;
        };
        let index = match nodes.iter().position(|n| n.name == *head) {
            Some(index) => index,
            None => {
                nodes.push(Self::branch(head));
                nodes.len() - 1
            }
        };
        let node = &mut nodes[index];
        if rest.is_empty() {
            node.type_ref = Some(expression.type_ref().clone());
            node.expression = Some(expression);
        } else {
            Self::insert(&mut node.children, rest, expression);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupByTransformationNode {
    pub properties: Vec<GroupByPropertyNode>,
    pub child: Option<Box<TransformationNode>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransformationNode {
    Filter(QueryNode),
    GroupBy(GroupByTransformationNode),
    Aggregate(Vec<AggregateStatement>),
    Compute(Vec<ComputeExpression>),
}

impl TransformationNode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Filter(_) => "filter",
            Self::GroupBy(_) => "groupby",
            Self::Aggregate(_) => "aggregate",
            Self::Compute(_) => "compute",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApplyClause {
    pub transformations: Vec<TransformationNode>,
    /// Output of the last transformation
    pub shape: ApplyShape,
    projection: OnceCell<Option<String>>,
}

impl PartialEq for ApplyClause {
    fn eq(&self, other: &Self) -> bool {
        self.transformations == other.transformations && self.shape == other.shape
    }
}

impl ApplyClause {
    /// Select list for the context URL; `None` unless the pipeline groups or aggregates
    pub fn context_projection(&self) -> Option<&str> {
        self.projection
            .get_or_init(|| self.shape.projection())
            .as_deref()
    }

    /// Context for binding clauses that run after the pipeline
    pub fn apply_to<'m>(&self, context: BindingContext<'m>) -> BindingContext<'m> {
        context.with_shape(self.shape.clone())
    }
}

pub fn bind_apply(tokens: &[ApplyTransformationToken], context: &BindingContext<'_>) -> Result<ApplyClause> {
    debug!("binding $apply with {} transformation(s)", tokens.len());
    let mut shape = context.shape().cloned().unwrap_or_default();
    let mut transformations = Vec::with_capacity(tokens.len());
    for token in tokens {
        let stage_context = context.clone().with_shape(shape.clone());
        let (node, next) = bind_transformation(token, &stage_context, &shape)
            .map_err(|e| e.with_context(format!("$apply {}", token.name())))?;
        trace!("{} produces {:?}", node.name(), next.names().collect::<Vec<_>>());
        transformations.push(node);
        shape = next;
    }
    Ok(ApplyClause {
        transformations,
        shape,
        projection: OnceCell::new(),
    })
}

fn bind_transformation(
    token: &ApplyTransformationToken,
    context: &BindingContext<'_>,
    input: &ApplyShape,
) -> Result<(TransformationNode, ApplyShape)> {
    match token {
        ApplyTransformationToken::Filter(predicate) => {
            let node = MetadataBinder::new(context).bind_boolean(predicate)?;
            check_available(context, &node)?;
            Ok((TransformationNode::Filter(node), input.clone()))
        }
        ApplyTransformationToken::Aggregate(items) => {
            let statements = bind_aggregate(items, context)?;
            let mut shape = ApplyShape::narrowed();
            for statement in &statements {
                shape.insert(&statement.alias, ShapeEntryKind::Aggregate, statement.type_ref.clone());
            }
            Ok((TransformationNode::Aggregate(statements), shape))
        }
        ApplyTransformationToken::GroupBy { properties, child } => {
            bind_groupby(properties, child.as_deref(), context, input)
        }
        ApplyTransformationToken::Compute(items) => {
            let computed = bind_computed(items, context, input)?;
            let mut shape = input.clone();
            for item in &computed {
                shape.insert(&item.alias, ShapeEntryKind::Computed, item.type_ref.clone());
            }
            Ok((TransformationNode::Compute(computed), shape))
        }
    }
}

fn bind_groupby(
    properties: &[QueryToken],
    child: Option<&ApplyTransformationToken>,
    context: &BindingContext<'_>,
    input: &ApplyShape,
) -> Result<(TransformationNode, ApplyShape)> {
    let mut shape = ApplyShape::narrowed();
    let mut tree = Vec::new();
    for property in properties {
        let Some(path) = property.path_segments() else {
            return Err(QueryError::binding(
                ODQ0214,
                format!("groupby expects property paths, found '{property}'"),
            ));
        };
        let node = MetadataBinder::new(context).bind(property)?;
        if node.is_collection() {
            return Err(QueryError::binding(
                ODQ0214,
                format!("Cannot group by the collection '{property}'"),
            ));
        }
        check_available(context, &node)?;
        shape.insert(path.join("/"), ShapeEntryKind::Grouping, node.type_ref().clone());
        GroupByPropertyNode::insert(&mut tree, &path, node);
    }

    let child = match child {
        Some(token) => {
            let (node, child_shape) = bind_transformation(token, context, input)?;
            for (name, entry) in &child_shape.properties {
                if entry.kind != ShapeEntryKind::Grouping {
                    shape.insert(name.as_str(), entry.kind, entry.type_ref.clone());
                }
            }
            Some(Box::new(node))
        }
        None => None,
    };
    Ok((
        TransformationNode::GroupBy(GroupByTransformationNode {
            properties: tree,
            child,
        }),
        shape,
    ))
}

fn bind_computed(
    items: &[ComputeExpressionToken],
    context: &BindingContext<'_>,
    input: &ApplyShape,
) -> Result<Vec<ComputeExpression>> {
    let mut computed: Vec<ComputeExpression> = Vec::with_capacity(items.len());
    for item in items {
        if input.get(&item.alias).is_some() || computed.iter().any(|c| c.alias == item.alias) {
            return Err(QueryError::binding(
                ODQ0218,
                format!("'{}' is already defined by the pipeline", item.alias),
            ));
        }
        let expression = MetadataBinder::new(context).bind(&item.expression)?;
        if expression.is_collection() {
            return Err(QueryError::binding(
                ODQ0214,
                format!("Computed value '{}' must be single-valued", item.alias),
            ));
        }
        check_available(context, &expression)?;
        computed.push(ComputeExpression {
            type_ref: expression.type_ref().clone(),
            expression,
            alias: item.alias.clone(),
        });
    }
    Ok(computed)
}

fn bind_aggregate(items: &[AggregateExpressionToken], context: &BindingContext<'_>) -> Result<Vec<AggregateStatement>> {
    let mut statements: Vec<AggregateStatement> = Vec::with_capacity(items.len());
    for item in items {
        if statements.iter().any(|s| s.alias == item.alias) {
            return Err(QueryError::binding(
                ODQ0211,
                format!("Aggregate alias '{}' is used twice", item.alias),
            ));
        }
        statements.push(bind_aggregate_item(item, context)?);
    }
    Ok(statements)
}

fn bind_aggregate_item(item: &AggregateExpressionToken, context: &BindingContext<'_>) -> Result<AggregateStatement> {
    let from = match &item.from {
        Some(token) => Some(MetadataBinder::new(context).bind(token)?),
        None => None,
    };
    // aggregating over a related collection rebinds the expression against its elements
    let scoped = match &from {
        Some(node) if node.is_collection() => {
            check_available(context, node)?;
            Some(
                context
                    .clone()
                    .with_resource_type(node.type_ref().clone(), node.navigation_source().map(str::to_string)),
            )
        }
        _ => None,
    };
    let expression_context = scoped.as_ref().unwrap_or(context);

    if item.method == AggregationMethod::VirtualCount {
        return Ok(AggregateStatement {
            expression: None,
            method: item.method.clone(),
            alias: item.alias.clone(),
            from,
            type_ref: TypeRef::int64(),
        });
    }

    let expression = MetadataBinder::new(expression_context).bind(&item.expression)?;
    if expression.is_collection() {
        return Err(QueryError::binding(
            ODQ0211,
            format!("Cannot aggregate the collection '{}' directly", item.expression),
        ));
    }
    if scoped.is_none() {
        check_available(context, &expression)?;
    }
    let type_ref = aggregate_type(&item.method, &expression, context)?;
    Ok(AggregateStatement {
        expression: Some(expression),
        method: item.method.clone(),
        alias: item.alias.clone(),
        from,
        type_ref,
    })
}

fn aggregate_type(method: &AggregationMethod, expression: &QueryNode, context: &BindingContext<'_>) -> Result<TypeRef> {
    let operand = expression.type_ref();
    let untyped = operand.ty == EdmType::None;
    let kind = operand.as_primitive();
    let rejected = || {
        QueryError::binding(
            ODQ0211,
            format!(
                "'{method}' cannot aggregate '{expression}' of type {}",
                context.model().display_type(operand)
            ),
        )
    };
    match method {
        AggregationMethod::VirtualCount | AggregationMethod::CountDistinct => Ok(TypeRef::int64()),
        AggregationMethod::Sum => match kind {
            Some(k) if k.is_numeric() => Ok(operand.clone().with_nullable(true)),
            None if untyped => Ok(TypeRef::none()),
            _ => Err(rejected()),
        },
        AggregationMethod::Min | AggregationMethod::Max => match kind {
            Some(k) if k.is_orderable() => Ok(operand.clone().with_nullable(true)),
            None if untyped || operand.is_enum() => Ok(operand.clone()),
            _ => Err(rejected()),
        },
        AggregationMethod::Average => match kind {
            Some(PrimitiveKind::Decimal) => Ok(TypeRef::primitive(PrimitiveKind::Decimal, true)),
            Some(k) if k.is_numeric() => Ok(TypeRef::primitive(PrimitiveKind::Double, true)),
            None if untyped => Ok(TypeRef::primitive(PrimitiveKind::Double, true)),
            _ => Err(rejected()),
        },
        AggregationMethod::Custom(name) => Err(QueryError::binding(
            ODQ0211,
            format!("Unknown aggregation method '{name}'"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clauses::bind_filter;
    use odata_query_edm::{EdmModel, ModelBuilder, NavigationProperty};
    use odata_query_parser::{parse_apply, parse_filter};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn model() -> EdmModel {
        let mut b = ModelBuilder::default();
        let category = b.add_entity_type("NS", "Category").expect("type");
        b.add_key_property(category, "Id", PrimitiveKind::Int32).expect("key");
        b.add_structural_property(category, "Name", TypeRef::string()).expect("prop");
        let sale = b.add_entity_type("NS", "Sale").expect("type");
        b.add_key_property(sale, "Id", PrimitiveKind::Int32).expect("key");
        b.add_structural_property(sale, "Amount", TypeRef::primitive(PrimitiveKind::Decimal, false))
            .expect("prop");
        b.add_structural_property(sale, "Quantity", TypeRef::int32()).expect("prop");
        b.add_structural_property(sale, "Region", TypeRef::string()).expect("prop");
        b.add_navigation_property(sale, NavigationProperty::single("Category", category))
            .expect("nav");
        let product = b.add_entity_type("NS", "Product").expect("type");
        b.add_key_property(product, "Id", PrimitiveKind::Int32).expect("key");
        b.add_navigation_property(product, NavigationProperty::collection("Sales", sale))
            .expect("nav");
        b.add_entity_set("Sales", sale).expect("set");
        b.add_entity_set("Products", product).expect("set");
        b.add_entity_set("Categories", category).expect("set");
        b.add_navigation_binding("Sales", "Category", "Categories").expect("binding");
        b.add_navigation_binding("Products", "Sales", "Sales").expect("binding");
        b.build()
    }

    fn apply(model: &EdmModel, set: &str, text: &str) -> Result<ApplyClause> {
        let context = BindingContext::for_navigation_source(model, set)?;
        bind_apply(&parse_apply(text)?, &context)
    }

    #[rstest]
    #[case("groupby((Region),aggregate(Amount with sum as Total))", Some("(Region,Total)"))]
    #[case("groupby((Category/Name,Category/Id))", Some("(Category(Name,Id))"))]
    #[case("aggregate($count as N,Amount with average as Avg)", Some("(N,Avg)"))]
    #[case("filter(Amount gt 5)", None)]
    #[case("groupby((Region))/compute(length(Region) as Len)", Some("(Region,Len)"))]
    fn test_context_projection(#[case] text: &str, #[case] expected: Option<&str>) {
        let model = model();
        let clause = apply(&model, "Sales", text).expect("binds");
        assert_eq!(clause.context_projection(), expected);
        // cached
        assert_eq!(clause.context_projection(), expected);
    }

    #[rstest]
    #[case("Amount with sum as X", PrimitiveKind::Decimal)]
    #[case("Quantity with average as X", PrimitiveKind::Double)]
    #[case("Amount with average as X", PrimitiveKind::Decimal)]
    #[case("Region with max as X", PrimitiveKind::String)]
    #[case("Region with countdistinct as X", PrimitiveKind::Int64)]
    #[case("$count as X", PrimitiveKind::Int64)]
    fn test_aggregate_result_types(#[case] item: &str, #[case] expected: PrimitiveKind) {
        let model = model();
        let clause = apply(&model, "Sales", &format!("aggregate({item})")).expect("binds");
        let entry = clause.shape.get("X").expect("alias in shape");
        assert_eq!(entry.type_ref.as_primitive(), Some(expected));
        assert_eq!(entry.kind, ShapeEntryKind::Aggregate);
    }

    #[rstest]
    #[case("aggregate(Region with sum as X)", ODQ0211)]
    #[case("aggregate(Amount with sum as X,Quantity with sum as X)", ODQ0211)]
    #[case("aggregate(Amount with median as X)", ODQ0211)]
    #[case("groupby((Region))/filter(Amount gt 1)", ODQ0212)]
    #[case("aggregate(Amount with sum as T)/groupby((Region))", ODQ0212)]
    #[case("groupby((Colour))", odata_query_diagnostics::ODQ0200)]
    fn test_pipeline_errors(#[case] text: &str, #[case] code: odata_query_diagnostics::ErrorCode) {
        let model = model();
        let err = apply(&model, "Sales", text).expect_err("rejected");
        assert_eq!(err.code(), code, "{err}");
    }

    #[test]
    fn test_aggregate_from_collection_binds_against_elements() {
        let model = model();
        let clause = apply(&model, "Products", "aggregate(Sales(Amount with sum as Total))").expect("binds");
        let TransformationNode::Aggregate(statements) = &clause.transformations[0] else {
            panic!("expected aggregate");
        };
        let statement = &statements[0];
        assert_eq!(
            statement.from.as_ref().and_then(QueryNode::navigation_source),
            Some("Sales")
        );
        assert_eq!(
            statement.expression.as_ref().map(ToString::to_string).as_deref(),
            Some("$it/Amount")
        );
        assert_eq!(statement.type_ref.as_primitive(), Some(PrimitiveKind::Decimal));
    }

    #[test]
    fn test_filter_after_aggregate_sees_aliases() {
        let model = model();
        let clause = apply(&model, "Sales", "groupby((Region),aggregate(Amount with sum as Total))")
            .expect("binds");
        let context = clause.apply_to(BindingContext::for_navigation_source(&model, "Sales").expect("context"));
        let filter = bind_filter(&parse_filter("Total gt 100 and Region eq 'EU'").expect("parses"), &context)
            .expect("binds");
        assert_eq!(filter.expression.referenced_properties(), vec!["Total", "Region"]);

        let err = bind_filter(&parse_filter("Quantity gt 1").expect("parses"), &context).expect_err("gone");
        assert_eq!(err.code(), ODQ0212);
    }

    #[test]
    fn test_groupby_tree_nests_navigation_paths() {
        let model = model();
        let clause = apply(&model, "Sales", "groupby((Category/Name,Region))").expect("binds");
        let TransformationNode::GroupBy(groupby) = &clause.transformations[0] else {
            panic!("expected groupby");
        };
        let names: Vec<&str> = groupby.properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Category", "Region"]);
        assert_eq!(groupby.properties[0].children[0].name, "Name");
        assert!(groupby.properties[0].expression.is_none());
        assert!(clause.shape.is_available("Category/Name"));
        assert!(clause.shape.is_available("Category"));
        assert!(!clause.shape.is_available("Amount"));
    }
}
