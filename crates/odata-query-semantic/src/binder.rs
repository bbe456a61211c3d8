//! Token-to-node binding
//!
//! [`MetadataBinder`] walks a [`QueryToken`] tree bottom-up, resolving every
//! name against the model and typing every node. Lambda variables are kept
//! on a [`ScopeStack`]; parameter aliases are parsed on first use and bound
//! in place, with a stack of aliases in progress to reject cycles.
//!
//! A binder holds per-bind state only. Use [`bind`] (or a fresh binder) for
//! every expression; the [`BindingContext`] itself is never modified.

use crate::context::BindingContext;
use crate::functions::{resolve_builtin, signatures};
use crate::nodes::{
    BinaryOperatorNode, CastNode, CollectionConstantNode, ConstantNode, CountNode,
    DynamicPropertyNode, FunctionCallNode, InNode, KeyLookupNode, LambdaNode, NamedNode,
    NavigationNode, OpenPropertyAccessNode, PropertyAccessNode, QueryNode, RangeVariable,
    UnaryOperatorNode,
};
use crate::operations::select_overload;
use crate::promotion::{coerce, is_untyped, unify};
use crate::scope::ScopeStack;
use log::{trace, warn};
use odata_query_ast::{
    BinaryOperatorKind, LambdaToken, LiteralToken, LiteralValue, NamedValue, QueryToken,
    SpatialShape, UnaryOperatorKind,
};
use odata_query_diagnostics::{
    QueryError, Result, ODQ0200, ODQ0201, ODQ0202, ODQ0204, ODQ0205, ODQ0206, ODQ0208, ODQ0209,
    ODQ0210, ODQ0213, ODQ0214, ODQ0215, ODQ0216, ODQ0217, ODQ0219,
};
use odata_query_edm::{
    arithmetic_operand_type, can_promote, EdmType, Operation, PrimitiveKind, Property,
    SchemaTypeId, Srid, StructuralProperty, TypeModel, TypeRef,
};
use odata_query_parser::QueryParser;

/// Bind one expression against `context`
pub fn bind(token: &QueryToken, context: &BindingContext<'_>) -> Result<QueryNode> {
    MetadataBinder::new(context).bind(token)
}

pub struct MetadataBinder<'c, 'm> {
    context: &'c BindingContext<'m>,
    scopes: ScopeStack,
    depth: usize,
    /// Aliases currently being expanded, outermost first
    resolving: Vec<String>,
}

fn binary(op: BinaryOperatorKind, left: QueryNode, right: QueryNode, type_ref: TypeRef) -> QueryNode {
    QueryNode::BinaryOperator(BinaryOperatorNode {
        op,
        left: left.boxed(),
        right: right.boxed(),
        type_ref,
    })
}

fn open_property(source: QueryNode, name: &str) -> QueryNode {
    QueryNode::SingleValueOpenPropertyAccess(OpenPropertyAccessNode {
        source: source.boxed(),
        name: name.to_string(),
        type_ref: TypeRef::none(),
    })
}

fn spatial_kind(geography: bool, shape: SpatialShape) -> PrimitiveKind {
    use PrimitiveKind::*;
    match (geography, shape) {
        (true, SpatialShape::Point) => GeographyPoint,
        (true, SpatialShape::LineString) => GeographyLineString,
        (true, SpatialShape::Polygon) => GeographyPolygon,
        (true, SpatialShape::Other) => Geography,
        (false, SpatialShape::Point) => GeometryPoint,
        (false, SpatialShape::LineString) => GeometryLineString,
        (false, SpatialShape::Polygon) => GeometryPolygon,
        (false, SpatialShape::Other) => Geometry,
    }
}

/// Result kind of date/time arithmetic, when the operands form one
fn temporal_result(
    op: BinaryOperatorKind,
    left: Option<PrimitiveKind>,
    right: Option<PrimitiveKind>,
) -> Option<PrimitiveKind> {
    use BinaryOperatorKind::{Add, Subtract};
    use PrimitiveKind::{Date, DateTimeOffset, Duration};
    match (op, left?, right?) {
        (Add | Subtract, DateTimeOffset, Duration) => Some(DateTimeOffset),
        (Add | Subtract, Date, Duration) => Some(Date),
        (Add | Subtract, Duration, Duration) => Some(Duration),
        (Add, Duration, DateTimeOffset) => Some(DateTimeOffset),
        (Subtract, DateTimeOffset, DateTimeOffset) | (Subtract, Date, Date) => Some(Duration),
        _ => None,
    }
}

impl<'c, 'm> MetadataBinder<'c, 'm> {
    pub fn new(context: &'c BindingContext<'m>) -> Self {
        Self {
            context,
            scopes: ScopeStack::new(context.it()),
            depth: 0,
            resolving: Vec::new(),
        }
    }

    pub fn context(&self) -> &'c BindingContext<'m> {
        self.context
    }

    fn model(&self) -> &'m dyn TypeModel {
        self.context.model()
    }

    fn display(&self, type_ref: &TypeRef) -> String {
        self.model().display_type(type_ref)
    }

    fn it_node(&self) -> QueryNode {
        QueryNode::RangeVariableReference(self.scopes.it().clone())
    }

    fn require_resource(&self, name: &str) -> Result<()> {
        if self.context.has_resource() {
            Ok(())
        } else {
            Err(QueryError::binding(
                ODQ0200,
                format!("Cannot resolve '{name}': the expression has no resource to bind against"),
            ))
        }
    }

    pub fn bind(&mut self, token: &QueryToken) -> Result<QueryNode> {
        let limit = self.context.settings().max_depth;
        if self.depth >= limit {
            return Err(QueryError::binding(
                ODQ0217,
                format!("Expression nesting exceeds the binding limit of {limit}"),
            ));
        }
        self.depth += 1;
        let result = self.bind_token(token);
        self.depth -= 1;
        result
    }

    /// Bind a predicate; the result must be `Edm.Boolean`
    pub fn bind_boolean(&mut self, token: &QueryToken) -> Result<QueryNode> {
        let node = self.bind(token)?;
        self.expect_boolean(node, "A predicate")
    }

    fn expect_boolean(&self, node: QueryNode, what: &str) -> Result<QueryNode> {
        if node.is_null_constant() {
            return Ok(QueryNode::constant(LiteralValue::Null, "null", TypeRef::boolean()));
        }
        if node.type_ref().is_boolean() || is_untyped(&node) {
            return Ok(node);
        }
        Err(QueryError::binding(
            ODQ0215,
            format!(
                "{what} must be Edm.Boolean, found {} '{node}'",
                self.display(node.type_ref())
            ),
        ))
    }

    fn bind_token(&mut self, token: &QueryToken) -> Result<QueryNode> {
        match token {
            QueryToken::Literal(literal) => self.bind_literal(literal),
            QueryToken::BinaryOperator { op, left, right } => self.bind_binary(*op, left, right),
            QueryToken::UnaryOperator { op, operand } => self.bind_unary(*op, operand),
            QueryToken::EndPath { name, parent } => self.bind_segment(name, parent.as_deref()),
            QueryToken::InnerPath {
                name,
                parent,
                named_values,
            } => {
                let node = self.bind_segment(name, parent.as_deref())?;
                match named_values {
                    Some(values) => self.bind_key_lookup(node, values),
                    None => Ok(node),
                }
            }
            QueryToken::DottedIdentifier { name, parent } => self.bind_dotted(name, parent.as_deref()),
            QueryToken::FunctionCall { name, args, parent } => {
                self.bind_function_call(name, args, parent.as_deref())
            }
            QueryToken::Any(lambda) => self.bind_lambda(lambda, true),
            QueryToken::All(lambda) => self.bind_lambda(lambda, false),
            QueryToken::RangeVariable(name) => match self.scopes.lookup(name) {
                Some(variable) => Ok(QueryNode::RangeVariableReference(variable.clone())),
                None => Err(QueryError::binding(
                    ODQ0209,
                    format!("Unknown range variable '{name}'"),
                )),
            },
            QueryToken::ParameterAlias(name) => self.with_alias(name, |binder, token| match token {
                Some(token) => binder.bind(token),
                None => Ok(QueryNode::Constant(ConstantNode::null())),
            }),
            QueryToken::In { left, right } => self.bind_in(left, right),
            QueryToken::List(_) => Err(QueryError::binding(
                ODQ0219,
                "A parenthesised list is only valid on the right of 'in'",
            )),
            QueryToken::Count { parent: Some(parent) } => {
                let source = self.bind(parent)?;
                if !source.is_collection() {
                    return Err(QueryError::binding(
                        ODQ0214,
                        format!("$count requires a collection, found {}", self.display(source.type_ref())),
                    ));
                }
                Ok(QueryNode::Count(CountNode {
                    source: source.boxed(),
                    type_ref: TypeRef::primitive(PrimitiveKind::Int64, false),
                }))
            }
            QueryToken::Count { parent: None } => Err(QueryError::binding(
                ODQ0214,
                "The virtual $count is only valid inside an aggregate transformation",
            )),
            QueryToken::Star => Err(QueryError::binding(ODQ0214, "'*' is not valid in an expression")),
        }
    }

    fn bind_literal(&self, literal: &LiteralToken) -> Result<QueryNode> {
        use PrimitiveKind as K;
        let kind = match &literal.value {
            LiteralValue::Null => return Ok(QueryNode::Constant(ConstantNode::null())),
            LiteralValue::Enum { type_name, value } => {
                let type_ref = self.enum_literal_type(type_name, value)?;
                return Ok(QueryNode::constant(literal.value.clone(), literal.text.clone(), type_ref));
            }
            LiteralValue::Spatial {
                geography,
                shape,
                srid,
                ..
            } => {
                let mut type_ref = TypeRef::primitive(spatial_kind(*geography, *shape), false);
                if let Some(srid) = srid {
                    type_ref = type_ref.with_srid(Srid::Value(*srid));
                }
                return Ok(QueryNode::constant(literal.value.clone(), literal.text.clone(), type_ref));
            }
            LiteralValue::Boolean(_) => K::Boolean,
            LiteralValue::Int32(_) => K::Int32,
            LiteralValue::Int64(_) => K::Int64,
            LiteralValue::Decimal(_) => K::Decimal,
            LiteralValue::Double(_) => K::Double,
            LiteralValue::Single(_) => K::Single,
            LiteralValue::String(_) => K::String,
            LiteralValue::Date(_) => K::Date,
            LiteralValue::DateTimeOffset(_) => K::DateTimeOffset,
            LiteralValue::TimeOfDay(_) => K::TimeOfDay,
            LiteralValue::Duration(_) => K::Duration,
            LiteralValue::Guid(_) => K::Guid,
            LiteralValue::Binary(_) => K::Binary,
        };
        Ok(QueryNode::constant(
            literal.value.clone(),
            literal.text.clone(),
            TypeRef::primitive(kind, false),
        ))
    }

    fn enum_literal_type(&self, type_name: &str, value: &str) -> Result<TypeRef> {
        let Some(EdmType::Enum(id)) = self.context.find_type(type_name)? else {
            return Err(QueryError::binding(ODQ0201, format!("Unknown enum type '{type_name}'")));
        };
        let known = self
            .model()
            .enum_type(id)
            .is_some_and(|enum_type| enum_type.parse_value(value).is_some());
        if !known {
            return Err(QueryError::binding(
                ODQ0201,
                format!("'{value}' is not a member of {type_name}"),
            ));
        }
        Ok(TypeRef::enumeration(id, false))
    }

    fn bind_binary(&mut self, op: BinaryOperatorKind, left: &QueryToken, right: &QueryToken) -> Result<QueryNode> {
        let left = self.bind(left)?;
        let right = self.bind(right)?;
        if op == BinaryOperatorKind::Has {
            return self.bind_has(left, right);
        }
        if op.is_logical() {
            let left = self.expect_boolean(left, &format!("Left operand of '{op}'"))?;
            let right = self.expect_boolean(right, &format!("Right operand of '{op}'"))?;
            return Ok(binary(op, left, right, TypeRef::boolean()));
        }
        if op.is_arithmetic() {
            return self.bind_arithmetic(op, left, right);
        }
        self.bind_comparison(op, left, right)
    }

    fn incompatible(&self, op: BinaryOperatorKind, left: &QueryNode, right: &QueryNode) -> QueryError {
        QueryError::binding(
            ODQ0204,
            format!(
                "Operator '{op}' cannot be applied to {} and {}",
                self.display(left.type_ref()),
                self.display(right.type_ref())
            ),
        )
    }

    fn bind_comparison(&self, op: BinaryOperatorKind, left: QueryNode, right: QueryNode) -> Result<QueryNode> {
        let error = self.incompatible(op, &left, &right);
        let (left, right) = unify(self.model(), left, right).ok_or(error)?;

        let operand = if left.is_null_constant() {
            right.type_ref()
        } else {
            left.type_ref()
        };
        let against_null = left.is_null_constant() || right.is_null_constant();
        let allowed = match &operand.ty {
            EdmType::None => true,
            EdmType::Primitive(kind) if op.is_relational() => kind.is_orderable(),
            EdmType::Primitive(kind) => kind.is_equatable(),
            EdmType::Enum(_) => true,
            EdmType::Entity(_) | EdmType::Complex(_) => op.is_equality() && against_null,
            _ => false,
        };
        if !allowed {
            return Err(QueryError::binding(
                ODQ0204,
                format!("Operator '{op}' is not defined for {}", self.display(operand)),
            ));
        }
        Ok(binary(op, left, right, TypeRef::boolean()))
    }

    fn bind_arithmetic(&self, op: BinaryOperatorKind, left: QueryNode, right: QueryNode) -> Result<QueryNode> {
        if let Some(result) = temporal_result(op, left.primitive_kind(), right.primitive_kind()) {
            return Ok(binary(op, left, right, TypeRef::primitive(result, true)));
        }
        if is_untyped(&left) || is_untyped(&right) {
            let type_ref = if is_untyped(&left) {
                right.type_ref().clone()
            } else {
                left.type_ref().clone()
            };
            return Ok(binary(op, left, right, type_ref.with_nullable(true)));
        }

        let error = self.incompatible(op, &left, &right);
        let (left, right) = unify(self.model(), left, right).ok_or_else(|| error.clone())?;
        let operand = if left.is_null_constant() {
            right.primitive_kind()
        } else {
            left.primitive_kind()
        };
        let Some(kind) = operand.filter(PrimitiveKind::is_numeric) else {
            return Err(error);
        };

        let target = if op == BinaryOperatorKind::DivideBy && kind.is_integral() {
            PrimitiveKind::Decimal
        } else {
            arithmetic_operand_type(kind)
        };
        let type_ref = TypeRef::primitive(target, true);
        if target == kind {
            return Ok(binary(op, left, right, type_ref));
        }
        let model = self.model();
        let left = coerce(model, left, &type_ref).ok_or_else(|| error.clone())?;
        let right = coerce(model, right, &type_ref).ok_or(error)?;
        Ok(binary(op, left, right, type_ref))
    }

    fn bind_has(&self, left: QueryNode, right: QueryNode) -> Result<QueryNode> {
        let target = left.type_ref().clone();
        if !target.is_enum() {
            return Err(QueryError::binding(
                ODQ0210,
                format!(
                    "Left operand of 'has' must be an enumeration, found {}",
                    self.display(&target)
                ),
            ));
        }
        let shown = right.to_string();
        let right = match right {
            QueryNode::Constant(_) => coerce(self.model(), right, &target),
            _ => None,
        }
        .ok_or_else(|| {
            QueryError::binding(
                ODQ0210,
                format!(
                    "Right operand of 'has' must be a member of {}, found {shown}",
                    self.display(&target)
                ),
            )
        })?;
        Ok(binary(BinaryOperatorKind::Has, left, right, TypeRef::boolean()))
    }

    fn bind_unary(&mut self, op: UnaryOperatorKind, operand: &QueryToken) -> Result<QueryNode> {
        let operand = self.bind(operand)?;
        let type_ref = match op {
            UnaryOperatorKind::Not => {
                let operand = self.expect_boolean(operand, "Operand of 'not'")?;
                return Ok(QueryNode::UnaryOperator(UnaryOperatorNode {
                    op,
                    operand: operand.boxed(),
                    type_ref: TypeRef::boolean(),
                }));
            }
            UnaryOperatorKind::Negate => {
                let negatable = operand
                    .primitive_kind()
                    .is_some_and(|k| k.is_numeric() || k == PrimitiveKind::Duration);
                if !negatable && !is_untyped(&operand) {
                    return Err(QueryError::binding(
                        ODQ0204,
                        format!("Cannot negate a value of type {}", self.display(operand.type_ref())),
                    ));
                }
                operand.type_ref().clone()
            }
        };
        Ok(QueryNode::UnaryOperator(UnaryOperatorNode {
            op,
            operand: operand.boxed(),
            type_ref,
        }))
    }

    /// Property introduced by `$compute` or by the `$apply` pipeline
    fn bind_dynamic(&self, name: &str) -> Option<QueryNode> {
        let type_ref = self
            .context
            .computed(name)
            .cloned()
            .or_else(|| self.context.shape().and_then(|shape| shape.dynamic_type(name)))?;
        Some(QueryNode::DynamicProperty(DynamicPropertyNode {
            name: name.to_string(),
            type_ref,
        }))
    }

    fn bind_segment(&mut self, name: &str, parent: Option<&QueryToken>) -> Result<QueryNode> {
        let source = match parent {
            Some(parent) => self.bind(parent)?,
            None => {
                if let Some(node) = self.bind_dynamic(name) {
                    return Ok(node);
                }
                self.require_resource(name)?;
                self.it_node()
            }
        };
        self.bind_member(source, name)
    }

    /// `name` applied to an already bound value
    pub(crate) fn bind_member(&self, source: QueryNode, name: &str) -> Result<QueryNode> {
        let ty = source.type_ref().ty.clone();
        match ty {
            EdmType::Entity(id) | EdmType::Complex(id) => self.bind_property(source, id, name),
            EdmType::None => Ok(open_property(source, name)),
            EdmType::Collection(_) => Err(QueryError::binding(
                ODQ0214,
                format!("'{name}' cannot follow the collection '{source}'; use any/all or a key predicate"),
            )),
            _ => Err(QueryError::binding(
                ODQ0214,
                format!(
                    "'{name}' cannot follow '{source}' of type {}",
                    self.display(source.type_ref())
                ),
            )),
        }
    }

    fn bind_property(&self, source: QueryNode, type_id: SchemaTypeId, name: &str) -> Result<QueryNode> {
        let model = self.model();
        match self.context.find_property(type_id, name)? {
            Some(Property::Structural(property)) => {
                trace!("'{name}' resolved to a structural property of {}", model.type_name(type_id));
                let access = PropertyAccessNode {
                    source: source.boxed(),
                    property: property.name.clone(),
                    type_ref: property.type_ref.clone(),
                };
                Ok(if property.type_ref.is_collection() {
                    QueryNode::CollectionPropertyAccess(access)
                } else {
                    QueryNode::SingleValuePropertyAccess(access)
                })
            }
            Some(Property::Navigation(navigation)) => {
                let owner = source.navigation_source();
                let target = self.context.binding_target(owner, &navigation.name).or_else(|| {
                    let qualified = format!("{}/{}", model.type_name(type_id), navigation.name);
                    self.context.binding_target(owner, &qualified)
                });
                if target.is_none() && !navigation.contains_target {
                    warn!(
                        "navigation property '{}' of {} has no navigation binding; the result is not addressable",
                        navigation.name,
                        model.type_name(type_id)
                    );
                }
                let node = NavigationNode {
                    source: source.boxed(),
                    property: navigation.name.clone(),
                    navigation_source: target,
                    type_ref: navigation.type_ref(),
                };
                Ok(if navigation.is_collection {
                    QueryNode::CollectionNavigation(node)
                } else {
                    QueryNode::SingleNavigation(node)
                })
            }
            None if model.is_open(type_id) => Ok(open_property(source, name)),
            None => Err(QueryError::binding(
                ODQ0200,
                format!("Type '{}' has no property '{name}'", model.type_name(type_id)),
            )),
        }
    }

    fn bind_key_lookup(&mut self, source: QueryNode, values: &[NamedValue]) -> Result<QueryNode> {
        let element = source.type_ref().element_type().cloned();
        let Some((entity, element)) = element.and_then(|e| {
            let id = e.schema_id().filter(|_| e.is_entity())?;
            Some((id, e))
        }) else {
            return Err(QueryError::binding(
                ODQ0214,
                format!(
                    "A key predicate needs a collection of entities, found {}",
                    self.display(source.type_ref())
                ),
            ));
        };
        let keys = self.bind_key_values(entity, values)?;
        let navigation_source = source.navigation_source().map(str::to_string);
        Ok(QueryNode::KeyLookup(KeyLookupNode {
            source: source.boxed(),
            keys,
            navigation_source,
            type_ref: element.with_nullable(true),
        }))
    }

    fn names_match(&self, candidate: &str, name: &str) -> bool {
        if self.context.settings().case_insensitive {
            candidate.eq_ignore_ascii_case(name)
        } else {
            candidate == name
        }
    }

    /// Match key values to the key properties of `entity`
    ///
    /// Named values may come in any order; positional values follow the
    /// declared key order.
    pub(crate) fn bind_key_values(
        &mut self,
        entity: SchemaTypeId,
        values: &[NamedValue],
    ) -> Result<Vec<(String, ConstantNode)>> {
        let model = self.model();
        let keys = model.key_properties(entity);
        let type_name = model.type_name(entity);
        if values.len() != keys.len() {
            return Err(QueryError::binding(
                ODQ0206,
                format!(
                    "{type_name} has {} key properties but {} values were given",
                    keys.len(),
                    values.len()
                ),
            ));
        }

        let named = values.iter().filter(|v| v.name.is_some()).count();
        let pairs: Vec<(&StructuralProperty, &NamedValue)> = if named == 0 {
            keys.iter().copied().zip(values).collect()
        } else if named == values.len() {
            if let Some(stray) = values.iter().filter_map(|v| v.name.as_deref()).find(|name| {
                !keys.iter().any(|key| self.names_match(&key.name, name))
            }) {
                return Err(QueryError::binding(
                    ODQ0206,
                    format!("'{stray}' is not a key property of {type_name}"),
                ));
            }
            keys.iter()
                .map(|key| {
                    values
                        .iter()
                        .find(|v| v.name.as_deref().is_some_and(|n| self.names_match(&key.name, n)))
                        .map(|value| (*key, value))
                        .ok_or_else(|| {
                            QueryError::binding(
                                ODQ0206,
                                format!("Missing value for key property '{}' of {type_name}", key.name),
                            )
                        })
                })
                .collect::<Result<_>>()?
        } else {
            return Err(QueryError::binding(
                ODQ0206,
                "Key values must be either all named or all positional",
            ));
        };

        let mut bound = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let node = self.bind(&value.value)?;
            let shown = node.to_string();
            match coerce(model, node, &key.type_ref) {
                Some(QueryNode::Constant(constant)) if !constant.is_null() => {
                    bound.push((key.name.clone(), constant));
                }
                _ => {
                    return Err(QueryError::binding(
                        ODQ0206,
                        format!(
                            "Key '{}' of {type_name} expects {}, found {shown}",
                            key.name,
                            self.display(&key.type_ref)
                        ),
                    ));
                }
            }
        }
        Ok(bound)
    }

    fn bind_dotted(&mut self, name: &str, parent: Option<&QueryToken>) -> Result<QueryNode> {
        let target = match self.context.find_type(name)? {
            Some(EdmType::Entity(id) | EdmType::Complex(id)) => id,
            Some(_) => {
                return Err(QueryError::binding(
                    ODQ0205,
                    format!("'{name}' is not a structured type and cannot be used as a path segment"),
                ));
            }
            None => return Err(QueryError::binding(ODQ0201, format!("Unknown type '{name}'"))),
        };
        let source = match parent {
            Some(parent) => self.bind(parent)?,
            None => {
                self.require_resource(name)?;
                self.it_node()
            }
        };
        self.cast(source, target)
    }

    fn related(&self, a: SchemaTypeId, b: SchemaTypeId) -> bool {
        let model = self.model();
        model.is_or_derives_from(a, b) || model.is_or_derives_from(b, a)
    }

    /// Type-cast segment: the target must be the source type or related to it by inheritance
    pub(crate) fn cast(&self, source: QueryNode, target: SchemaTypeId) -> Result<QueryNode> {
        let model = self.model();
        let source_type = source.type_ref().clone();
        let (element, collection) = match source_type.element_type() {
            Some(element) => (element.clone(), true),
            None => (source_type.clone(), false),
        };
        let related = element.is_structured()
            && element.schema_id().is_some_and(|id| self.related(id, target));
        let target_ty = model.type_kind(target).filter(|_| related).ok_or_else(|| {
            QueryError::binding(
                ODQ0205,
                format!(
                    "Cannot cast {} to {}",
                    self.display(&source_type),
                    model.type_name(target)
                ),
            )
        })?;
        trace!("cast to {}", model.type_name(target));
        let element = TypeRef::new(target_ty, element.nullable);
        let navigation_source = source.navigation_source().map(str::to_string);
        let node = CastNode {
            source: source.boxed(),
            target,
            navigation_source,
            type_ref: if collection {
                TypeRef::collection(element)
            } else {
                element
            },
        };
        Ok(if collection {
            QueryNode::CollectionResourceCast(node)
        } else {
            QueryNode::SingleResourceCast(node)
        })
    }

    fn bind_function_call(
        &mut self,
        name: &str,
        args: &[NamedValue],
        parent: Option<&QueryToken>,
    ) -> Result<QueryNode> {
        if parent.is_none() {
            if matches!(name, "isof" | "cast") {
                return self.bind_type_function(name, args);
            }
            if signatures(name).is_some() {
                return self.bind_builtin(name, args);
            }
        }
        self.bind_operation_call(name, args, parent)
    }

    fn bind_builtin(&mut self, name: &str, args: &[NamedValue]) -> Result<QueryNode> {
        let mut arguments = Vec::with_capacity(args.len());
        for arg in args {
            if let Some(parameter) = &arg.name {
                return Err(QueryError::binding(
                    ODQ0208,
                    format!("Built-in function '{name}' takes no named argument '{parameter}'"),
                ));
            }
            arguments.push(self.bind(&arg.value)?);
        }
        let signature = resolve_builtin(name, &arguments)?;
        trace!("'{name}' resolved to overload {:?}", signature.parameters);

        let model = self.model();
        let arguments = arguments
            .into_iter()
            .zip(signature.parameters)
            .map(|(argument, kind)| {
                let shown = argument.to_string();
                coerce(model, argument, &TypeRef::primitive(*kind, true))
                    .map(|value| NamedNode { name: None, value })
                    .ok_or_else(|| {
                        QueryError::binding(
                            ODQ0208,
                            format!("Argument '{shown}' of '{name}' cannot be used as {kind}"),
                        )
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(QueryNode::SingleValueFunctionCall(FunctionCallNode {
            name: name.to_string(),
            source: None,
            arguments,
            navigation_source: None,
            type_ref: TypeRef::primitive(signature.returns, true),
        }))
    }

    /// `isof` and `cast`, whose last argument names a type
    fn bind_type_function(&mut self, name: &str, args: &[NamedValue]) -> Result<QueryNode> {
        let (source, type_arg) = match args {
            [type_arg] => (
                QueryNode::RangeVariableReference(self.scopes.this().clone()),
                type_arg,
            ),
            [source, type_arg] => (self.bind(&source.value)?, type_arg),
            _ => {
                return Err(QueryError::binding(
                    ODQ0208,
                    format!("'{name}' takes one or two arguments, found {}", args.len()),
                ));
            }
        };
        let type_name = match &type_arg.value {
            QueryToken::DottedIdentifier { name, parent: None } => name.clone(),
            QueryToken::Literal(LiteralToken {
                value: LiteralValue::String(text),
                ..
            }) => text.clone(),
            other => {
                return Err(QueryError::binding(
                    ODQ0201,
                    format!("'{name}' expects a type name, found '{other}'"),
                ));
            }
        };
        let target = self
            .context
            .find_type(&type_name)?
            .ok_or_else(|| QueryError::binding(ODQ0201, format!("Unknown type '{type_name}'")))?;

        let type_constant = ConstantNode::new(
            LiteralValue::String(type_name.clone()),
            format!("'{type_name}'"),
            TypeRef::string(),
        );
        let navigation_source = source.navigation_source().map(str::to_string);
        let source_type = source.type_ref().clone();
        let arguments = vec![
            NamedNode { name: None, value: source },
            NamedNode {
                name: None,
                value: QueryNode::Constant(type_constant),
            },
        ];
        let call = |type_ref, navigation_source| FunctionCallNode {
            name: name.to_string(),
            source: None,
            arguments,
            navigation_source,
            type_ref,
        };

        if name == "isof" {
            return Ok(QueryNode::SingleValueFunctionCall(call(TypeRef::boolean(), None)));
        }
        match target {
            EdmType::Entity(id) | EdmType::Complex(id) => {
                let related = source_type.schema_id().is_some_and(|s| self.related(s, id))
                    || is_untyped_type(&source_type);
                if !related {
                    return Err(QueryError::binding(
                        ODQ0205,
                        format!(
                            "Cannot cast {} to {}",
                            self.display(&source_type),
                            self.model().type_name(id)
                        ),
                    ));
                }
                let type_ref = TypeRef::new(target, true);
                Ok(QueryNode::SingleResourceFunctionCall(call(type_ref, navigation_source)))
            }
            _ if source_type.is_structured() => Err(QueryError::binding(
                ODQ0205,
                format!("Cannot cast {} to {type_name}", self.display(&source_type)),
            )),
            _ => Ok(QueryNode::SingleValueFunctionCall(call(TypeRef::new(target, true), None))),
        }
    }

    fn bind_operation_call(
        &mut self,
        name: &str,
        args: &[NamedValue],
        parent: Option<&QueryToken>,
    ) -> Result<QueryNode> {
        let candidates: Vec<&'m Operation> = self
            .context
            .resolve_operations(name)
            .into_iter()
            .filter(|op| op.is_function())
            .collect();
        if candidates.is_empty() {
            return Err(QueryError::binding(ODQ0202, format!("Unknown function '{name}'")));
        }

        let mut named: Vec<(&str, &QueryToken)> = Vec::with_capacity(args.len());
        for arg in args {
            let Some(parameter) = arg.name.as_deref() else {
                return Err(QueryError::binding(
                    ODQ0208,
                    format!("Arguments of '{name}' must be passed as name=value"),
                ));
            };
            named.push((parameter, &arg.value));
        }

        let binding = match parent {
            Some(parent) => Some(self.bind(parent)?),
            None if candidates.iter().any(|op| !op.is_bound) => None,
            None if self.context.has_resource() => Some(self.it_node()),
            None => None,
        };
        let argument_names: Vec<&str> = named.iter().map(|(n, _)| *n).collect();
        let operation = select_overload(
            self.model(),
            name,
            &candidates,
            binding.as_ref().map(QueryNode::type_ref),
            &argument_names,
        )?;
        trace!("'{name}' resolved to {}", operation.qualified_name());

        let mut arguments = Vec::with_capacity(named.len());
        for (parameter_name, token) in named {
            let parameter = operation
                .non_binding_parameters()
                .iter()
                .find(|p| p.name == parameter_name)
                .ok_or_else(|| {
                    QueryError::binding(
                        ODQ0208,
                        format!("'{name}' has no parameter '{parameter_name}'"),
                    )
                })?;
            let value = self.bind(token)?;
            let shown = format!("{} '{value}'", self.display(value.type_ref()));
            let value = coerce(self.model(), value, &parameter.type_ref).ok_or_else(|| {
                QueryError::binding(
                    ODQ0204,
                    format!(
                        "Parameter '{parameter_name}' of '{name}' expects {}, found {shown}",
                        self.display(&parameter.type_ref)
                    ),
                )
            })?;
            arguments.push(NamedNode {
                name: Some(parameter_name.to_string()),
                value,
            });
        }

        let type_ref = operation.return_type.clone().unwrap_or_else(TypeRef::none);
        let navigation_source = operation.entity_set_path.as_deref().and_then(|path| {
            let (_, rest) = path.split_once('/')?;
            self.context
                .binding_target(binding.as_ref()?.navigation_source(), rest)
        });
        let node = FunctionCallNode {
            name: operation.qualified_name(),
            source: binding.map(QueryNode::boxed),
            arguments,
            navigation_source,
            type_ref: type_ref.clone(),
        };
        Ok(if type_ref.is_collection() {
            QueryNode::CollectionFunctionCall(node)
        } else if type_ref.is_structured() {
            QueryNode::SingleResourceFunctionCall(node)
        } else {
            QueryNode::SingleValueFunctionCall(node)
        })
    }

    fn bind_lambda(&mut self, lambda: &LambdaToken, any: bool) -> Result<QueryNode> {
        let keyword = if any { "any" } else { "all" };
        let source = self.bind(&lambda.parent)?;
        let Some(element) = source.type_ref().element_type().cloned() else {
            return Err(QueryError::binding(
                ODQ0216,
                format!(
                    "'{keyword}' needs a collection, found {} '{source}'",
                    self.display(source.type_ref())
                ),
            ));
        };

        let (parameter, body) = match (&lambda.parameter, &lambda.expression) {
            (Some(name), Some(expression)) => {
                let variable = RangeVariable::new(
                    name.clone(),
                    element,
                    source.navigation_source().map(str::to_string),
                );
                self.scopes.enter(variable.clone());
                trace!("entered lambda scope '{name}' (depth {})", self.scopes.depth());
                let body = self.bind_boolean(expression);
                self.scopes.leave();
                (Some(variable), Some(body?.boxed()))
            }
            _ if !any => {
                return Err(QueryError::binding(
                    ODQ0216,
                    "'all' requires a lambda variable and predicate",
                ));
            }
            _ => (None, None),
        };

        let node = LambdaNode {
            source: source.boxed(),
            parameter,
            body,
            type_ref: TypeRef::boolean(),
        };
        Ok(if any { QueryNode::Any(node) } else { QueryNode::All(node) })
    }

    /// Expand `@name`, calling `bind` with its parsed value (`None` when undefined)
    fn with_alias<T>(
        &mut self,
        name: &str,
        bind: impl FnOnce(&mut Self, Option<&QueryToken>) -> Result<T>,
    ) -> Result<T> {
        if self.resolving.iter().any(|n| n == name) {
            let chain: Vec<String> = self
                .resolving
                .iter()
                .chain(std::iter::once(&name.to_string()))
                .map(|n| format!("@{n}"))
                .collect();
            return Err(QueryError::binding(
                ODQ0213,
                format!("Parameter alias cycle: {}", chain.join(" -> ")),
            ));
        }
        let token = match self.context.alias(name) {
            Some(text) => {
                trace!("expanding @{name} = {text}");
                Some(QueryParser::new(self.context.parser_settings().clone()).parse_filter(text)?)
            }
            None => None,
        };
        self.resolving.push(name.to_string());
        let result = bind(self, token.as_ref());
        self.resolving.pop();
        result.map_err(|e| e.with_context(format!("parameter alias @{name}")))
    }

    fn bind_in(&mut self, left: &QueryToken, right: &QueryToken) -> Result<QueryNode> {
        let left = self.bind(left)?;
        if left.is_collection() {
            return Err(QueryError::binding(
                ODQ0219,
                format!("Left operand of 'in' must be a single value, found '{left}'"),
            ));
        }
        let right = match right {
            QueryToken::ParameterAlias(name) => self.with_alias(name, |binder, token| match token {
                Some(token) => binder.bind_in_operand(&left, token),
                None => Err(QueryError::binding(
                    ODQ0219,
                    format!("Parameter alias @{name} on the right of 'in' has no value"),
                )),
            })?,
            other => self.bind_in_operand(&left, other)?,
        };
        Ok(QueryNode::In(InNode {
            left: left.boxed(),
            right: right.boxed(),
            type_ref: TypeRef::boolean(),
        }))
    }

    fn in_item(&self, target: &TypeRef, node: QueryNode) -> Result<ConstantNode> {
        let shown = node.to_string();
        if !matches!(node, QueryNode::Constant(_)) {
            return Err(QueryError::binding(
                ODQ0219,
                format!("Items of an 'in' list must be literals, found '{shown}'"),
            ));
        }
        match coerce(self.model(), node, target) {
            Some(QueryNode::Constant(constant)) => Ok(constant),
            _ => Err(QueryError::binding(
                ODQ0204,
                format!("'{shown}' cannot be compared with {}", self.display(target)),
            )),
        }
    }

    fn bind_in_operand(&mut self, left: &QueryNode, token: &QueryToken) -> Result<QueryNode> {
        let target = left.type_ref().clone();
        if let QueryToken::List(items) = token {
            let mut constants = Vec::with_capacity(items.len());
            for item in items {
                let node = self.bind(item)?;
                constants.push(self.in_item(&target, node)?);
            }
            return Ok(QueryNode::CollectionConstant(CollectionConstantNode {
                items: constants,
                type_ref: TypeRef::collection(target.with_nullable(true)),
            }));
        }

        let node = self.bind(token)?;
        if let Some(element) = node.type_ref().element_type() {
            let compatible = match (target.as_primitive(), element.as_primitive()) {
                (Some(a), Some(b)) => can_promote(a, b) || can_promote(b, a),
                _ => target.ty == element.ty || is_untyped(left),
            };
            if !compatible {
                return Err(QueryError::binding(
                    ODQ0204,
                    format!(
                        "Cannot look up {} in {}",
                        self.display(&target),
                        self.display(node.type_ref())
                    ),
                ));
            }
            return Ok(node);
        }
        if matches!(node, QueryNode::Constant(_)) {
            let item = self.in_item(&target, node)?;
            return Ok(QueryNode::CollectionConstant(CollectionConstantNode {
                items: vec![item],
                type_ref: TypeRef::collection(target.with_nullable(true)),
            }));
        }
        Err(QueryError::binding(
            ODQ0219,
            format!("Right operand of 'in' must be a collection, found '{node}'"),
        ))
    }
}

fn is_untyped_type(type_ref: &TypeRef) -> bool {
    matches!(type_ref.ty, EdmType::None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use odata_query_diagnostics::ErrorCode;
    use odata_query_edm::{EdmModel, ModelBuilder, NavigationProperty};
    use odata_query_parser::parse_filter;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn model() -> EdmModel {
        let mut b = ModelBuilder::new("Default", "Container");
        let color = b.add_enum_type("NS", "Color", PrimitiveKind::Int32, true).expect("enum");
        b.add_enum_member(color, "Red", 1).expect("member");
        b.add_enum_member(color, "Blue", 2).expect("member");
        let order = b.add_entity_type("NS", "Order").expect("type");
        b.add_key_property(order, "Id", PrimitiveKind::Int32).expect("key");
        b.add_structural_property(order, "Amount", TypeRef::primitive(PrimitiveKind::Decimal, true))
            .expect("prop");
        let person = b.add_entity_type("NS", "Person").expect("type");
        b.add_key_property(person, "Id", PrimitiveKind::Int32).expect("key");
        b.add_structural_property(person, "Name", TypeRef::string()).expect("prop");
        b.add_structural_property(person, "Age", TypeRef::primitive(PrimitiveKind::Byte, true))
            .expect("prop");
        b.add_structural_property(person, "Born", TypeRef::primitive(PrimitiveKind::Date, true))
            .expect("prop");
        b.add_structural_property(person, "Favorite", TypeRef::enumeration(color, true))
            .expect("prop");
        b.add_structural_property(person, "Tags", TypeRef::collection(TypeRef::string()))
            .expect("prop");
        b.add_navigation_property(person, NavigationProperty::collection("Orders", order))
            .expect("nav");
        b.add_entity_set("People", person).expect("set");
        b.add_entity_set("Orders", order).expect("set");
        b.add_navigation_binding("People", "Orders", "Orders").expect("binding");
        b.build()
    }

    fn bind_text(model: &EdmModel, text: &str) -> Result<QueryNode> {
        let context = BindingContext::for_navigation_source(model, "People")?;
        bind(&parse_filter(text)?, &context)
    }

    #[rstest]
    #[case("Name eq 'Bob'", "($it/Name eq 'Bob')")]
    #[case("Age add 1 gt 3", "((convert($it/Age, Edm.Int32) add 1) gt 3)")]
    #[case("Favorite has NS.Color'Red'", "($it/Favorite has NS.Color'Red')")]
    #[case("Orders/any(o: o/Amount gt 10)", "$it/Orders/any(o:(o/Amount gt 10))")]
    #[case("Tags/$count ge 2", "($it/Tags/$count ge 2)")]
    fn test_bound_shapes(#[case] text: &str, #[case] expected: &str) {
        let model = model();
        let node = bind_text(&model, text).expect("binds");
        assert_eq!(node.to_string(), expected);
        assert!(node.type_ref().is_boolean());
    }

    #[test]
    fn test_date_minus_date_is_duration() {
        let model = model();
        let node = bind_text(&model, "Born sub 2020-01-01").expect("binds");
        assert_eq!(node.primitive_kind(), Some(PrimitiveKind::Duration));
    }

    #[test]
    fn test_divby_on_integers_is_decimal() {
        let model = model();
        let node = bind_text(&model, "Age divby 2").expect("binds");
        assert_eq!(node.primitive_kind(), Some(PrimitiveKind::Decimal));
    }

    #[rstest]
    #[case("Nickname eq 'x'", 200)]
    #[case("Name eq 5", 204)]
    #[case("Name lt Tags", 204)]
    #[case("Name has NS.Color'Red'", 210)]
    #[case("Name and true", 215)]
    #[case("Name/any(x: true)", 216)]
    #[case("Age in (1, 'two')", 204)]
    #[case("Orders(Id=1,Extra=2)/Amount gt 1", 206)]
    #[case("NS.Color'Green' eq Favorite", 201)]
    fn test_binding_errors(#[case] text: &str, #[case] code: u16) {
        let model = model();
        let err = bind_text(&model, text).expect_err("should not bind");
        assert!(err.is_binding(), "{err}");
        assert_eq!(err.code(), ErrorCode::new(code), "{err}");
    }

    #[test]
    fn test_key_lookup_inside_expression() {
        let model = model();
        let node = bind_text(&model, "Orders(7)/Amount gt 1").expect("binds");
        let QueryNode::BinaryOperator(comparison) = node else {
            panic!("expected comparison");
        };
        let QueryNode::SingleValuePropertyAccess(access) = *comparison.left else {
            panic!("expected property access");
        };
        match *access.source {
            QueryNode::KeyLookup(lookup) => {
                assert_eq!(lookup.keys.len(), 1);
                assert_eq!(lookup.keys[0].0, "Id");
                assert_eq!(lookup.navigation_source.as_deref(), Some("Orders"));
            }
            other => panic!("expected key lookup, got {other:?}"),
        }
    }

    #[test]
    fn test_lambda_variable_does_not_leak() {
        let model = model();
        let err = bind_text(&model, "Orders/any(o: o/Amount gt 1) and o/Amount gt 1")
            .expect_err("o is out of scope");
        assert!(err.is_binding());
    }

    #[test]
    fn test_alias_values_and_cycles() {
        let model = model();
        let context = BindingContext::for_navigation_source(&model, "People")
            .expect("context")
            .with_alias("n", "'Bob'")
            .with_alias("a", "@b")
            .with_alias("b", "@a");

        let node = bind(&parse_filter("Name eq @n").expect("parses"), &context).expect("binds");
        assert_eq!(node.to_string(), "($it/Name eq 'Bob')");

        let node = bind(&parse_filter("Name eq @missing").expect("parses"), &context).expect("binds");
        assert_eq!(node.to_string(), "($it/Name eq null)");

        let err = bind(&parse_filter("Name eq @a").expect("parses"), &context).expect_err("cycle");
        assert_eq!(err.code(), ODQ0213);
    }

    #[test]
    fn test_depth_limit() {
        let model = model();
        let context = BindingContext::for_navigation_source(&model, "People")
            .expect("context")
            .with_settings(crate::settings::BinderSettings::default().with_max_depth(3));
        let err = bind(&parse_filter("not not not not true").expect("parses"), &context)
            .expect_err("too deep");
        assert_eq!(err.code(), ODQ0217);
    }

    #[test]
    fn test_default_depth_limit() {
        let model = model();
        let context = BindingContext::for_navigation_source(&model, "People").expect("context");
        let limit = context.settings().max_depth;
        let negations = |levels: usize| {
            (1..levels).fold(parse_filter("true").expect("parses"), |operand, _| {
                QueryToken::unary(UnaryOperatorKind::Not, operand)
            })
        };
        assert!(bind(&negations(limit), &context).is_ok());
        for levels in [limit + 1, 1000] {
            let err = bind(&negations(levels), &context).expect_err("too deep");
            assert_eq!(err.code(), ODQ0217);
        }
    }

    #[test]
    fn test_binding_twice_gives_equal_trees() {
        let model = model();
        let context = BindingContext::for_navigation_source(&model, "People").expect("context");
        let token = parse_filter("Orders/any(o: o/Amount gt 1) and Name in ('a','b')").expect("parses");
        assert_eq!(bind(&token, &context).expect("first"), bind(&token, &context).expect("second"));
    }
}
