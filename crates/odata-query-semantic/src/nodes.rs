//! Typed semantic tree
//!
//! Every node carries the [`TypeRef`] it evaluates to. Nodes reached by
//! walking from a navigation source also carry the name of the entity set
//! the value belongs to, or `None` when the model declares no navigation
//! binding for the path (the value is typed but not routable).

use odata_query_ast::{BinaryOperatorKind, LiteralValue, UnaryOperatorKind};
use odata_query_edm::{PrimitiveKind, SchemaTypeId, TypeRef};
use std::fmt;

pub type BoxNode = Box<QueryNode>;

/// A name bound in a lambda or the implicit `$it`
#[derive(Debug, Clone, PartialEq)]
pub struct RangeVariable {
    pub name: String,
    pub type_ref: TypeRef,
    pub navigation_source: Option<String>,
}

impl RangeVariable {
    pub const IT: &'static str = "$it";

    pub fn new(name: impl Into<String>, type_ref: TypeRef, navigation_source: Option<String>) -> Self {
        Self {
            name: name.into(),
            type_ref,
            navigation_source,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantNode {
    pub value: LiteralValue,
    /// Literal text as written, after any retyping
    pub text: String,
    pub type_ref: TypeRef,
}

impl ConstantNode {
    pub fn new(value: LiteralValue, text: impl Into<String>, type_ref: TypeRef) -> Self {
        Self {
            value,
            text: text.into(),
            type_ref,
        }
    }

    /// Untyped `null`
    pub fn null() -> Self {
        Self::new(LiteralValue::Null, "null", TypeRef::none())
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionConstantNode {
    pub items: Vec<ConstantNode>,
    pub type_ref: TypeRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryOperatorNode {
    pub op: BinaryOperatorKind,
    pub left: BoxNode,
    pub right: BoxNode,
    pub type_ref: TypeRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnaryOperatorNode {
    pub op: UnaryOperatorKind,
    pub operand: BoxNode,
    pub type_ref: TypeRef,
}

/// Implicit promotion of a non-constant operand
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertNode {
    pub source: BoxNode,
    pub type_ref: TypeRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyAccessNode {
    pub source: BoxNode,
    pub property: String,
    pub type_ref: TypeRef,
}

/// Undeclared property of an open type
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPropertyAccessNode {
    pub source: BoxNode,
    pub name: String,
    pub type_ref: TypeRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavigationNode {
    pub source: BoxNode,
    pub property: String,
    pub navigation_source: Option<String>,
    pub type_ref: TypeRef,
}

/// `Orders(1)` inside an expression
#[derive(Debug, Clone, PartialEq)]
pub struct KeyLookupNode {
    pub source: BoxNode,
    pub keys: Vec<(String, ConstantNode)>,
    pub navigation_source: Option<String>,
    pub type_ref: TypeRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CastNode {
    pub source: BoxNode,
    pub target: SchemaTypeId,
    pub navigation_source: Option<String>,
    pub type_ref: TypeRef,
}

/// Argument of a function call; `name` is set for operation parameters
#[derive(Debug, Clone, PartialEq)]
pub struct NamedNode {
    pub name: Option<String>,
    pub value: QueryNode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallNode {
    /// Built-in name or qualified operation name
    pub name: String,
    /// Binding value of a bound operation
    pub source: Option<BoxNode>,
    pub arguments: Vec<NamedNode>,
    pub navigation_source: Option<String>,
    pub type_ref: TypeRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LambdaNode {
    pub source: BoxNode,
    /// `None` for `any()`
    pub parameter: Option<RangeVariable>,
    pub body: Option<BoxNode>,
    pub type_ref: TypeRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InNode {
    pub left: BoxNode,
    pub right: BoxNode,
    pub type_ref: TypeRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CountNode {
    pub source: BoxNode,
    pub type_ref: TypeRef,
}

/// Property introduced by `$compute` or `$apply` rather than the model
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicPropertyNode {
    pub name: String,
    pub type_ref: TypeRef,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    Constant(ConstantNode),
    CollectionConstant(CollectionConstantNode),
    BinaryOperator(BinaryOperatorNode),
    UnaryOperator(UnaryOperatorNode),
    Convert(ConvertNode),
    SingleValuePropertyAccess(PropertyAccessNode),
    CollectionPropertyAccess(PropertyAccessNode),
    SingleValueOpenPropertyAccess(OpenPropertyAccessNode),
    SingleNavigation(NavigationNode),
    CollectionNavigation(NavigationNode),
    KeyLookup(KeyLookupNode),
    SingleResourceCast(CastNode),
    CollectionResourceCast(CastNode),
    RangeVariableReference(RangeVariable),
    SingleValueFunctionCall(FunctionCallNode),
    SingleResourceFunctionCall(FunctionCallNode),
    CollectionFunctionCall(FunctionCallNode),
    Any(LambdaNode),
    All(LambdaNode),
    In(InNode),
    Count(CountNode),
    DynamicProperty(DynamicPropertyNode),
}

impl QueryNode {
    pub fn constant(value: LiteralValue, text: impl Into<String>, type_ref: TypeRef) -> Self {
        Self::Constant(ConstantNode::new(value, text, type_ref))
    }

    pub fn boxed(self) -> BoxNode {
        Box::new(self)
    }

    pub fn type_ref(&self) -> &TypeRef {
        match self {
            Self::Constant(n) => &n.type_ref,
            Self::CollectionConstant(n) => &n.type_ref,
            Self::BinaryOperator(n) => &n.type_ref,
            Self::UnaryOperator(n) => &n.type_ref,
            Self::Convert(n) => &n.type_ref,
            Self::SingleValuePropertyAccess(n) | Self::CollectionPropertyAccess(n) => &n.type_ref,
            Self::SingleValueOpenPropertyAccess(n) => &n.type_ref,
            Self::SingleNavigation(n) | Self::CollectionNavigation(n) => &n.type_ref,
            Self::KeyLookup(n) => &n.type_ref,
            Self::SingleResourceCast(n) | Self::CollectionResourceCast(n) => &n.type_ref,
            Self::RangeVariableReference(v) => &v.type_ref,
            Self::SingleValueFunctionCall(n)
            | Self::SingleResourceFunctionCall(n)
            | Self::CollectionFunctionCall(n) => &n.type_ref,
            Self::Any(n) | Self::All(n) => &n.type_ref,
            Self::In(n) => &n.type_ref,
            Self::Count(n) => &n.type_ref,
            Self::DynamicProperty(n) => &n.type_ref,
        }
    }

    pub fn primitive_kind(&self) -> Option<PrimitiveKind> {
        self.type_ref().as_primitive()
    }

    pub fn is_collection(&self) -> bool {
        self.type_ref().is_collection()
    }

    pub fn is_null_constant(&self) -> bool {
        matches!(self, Self::Constant(c) if c.is_null())
    }

    /// Entity set the value belongs to, when known
    pub fn navigation_source(&self) -> Option<&str> {
        match self {
            Self::SingleNavigation(n) | Self::CollectionNavigation(n) => n.navigation_source.as_deref(),
            Self::KeyLookup(n) => n.navigation_source.as_deref(),
            Self::SingleResourceCast(n) | Self::CollectionResourceCast(n) => {
                n.navigation_source.as_deref()
            }
            Self::RangeVariableReference(v) => v.navigation_source.as_deref(),
            Self::SingleResourceFunctionCall(n) | Self::CollectionFunctionCall(n) => {
                n.navigation_source.as_deref()
            }
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Constant(_) => "Constant",
            Self::CollectionConstant(_) => "CollectionConstant",
            Self::BinaryOperator(_) => "BinaryOperator",
            Self::UnaryOperator(_) => "UnaryOperator",
            Self::Convert(_) => "Convert",
            Self::SingleValuePropertyAccess(_) => "SingleValuePropertyAccess",
            Self::CollectionPropertyAccess(_) => "CollectionPropertyAccess",
            Self::SingleValueOpenPropertyAccess(_) => "SingleValueOpenPropertyAccess",
            Self::SingleNavigation(_) => "SingleNavigation",
            Self::CollectionNavigation(_) => "CollectionNavigation",
            Self::KeyLookup(_) => "KeyLookup",
            Self::SingleResourceCast(_) => "SingleResourceCast",
            Self::CollectionResourceCast(_) => "CollectionResourceCast",
            Self::RangeVariableReference(_) => "RangeVariableReference",
            Self::SingleValueFunctionCall(_) => "SingleValueFunctionCall",
            Self::SingleResourceFunctionCall(_) => "SingleResourceFunctionCall",
            Self::CollectionFunctionCall(_) => "CollectionFunctionCall",
            Self::Any(_) => "Any",
            Self::All(_) => "All",
            Self::In(_) => "In",
            Self::Count(_) => "Count",
            Self::DynamicProperty(_) => "DynamicProperty",
        }
    }

    pub fn accept<V: QueryNodeVisitor + ?Sized>(&self, visitor: &mut V) {
        visitor.visit(self);
    }

    /// `/`-joined property paths read from `$it`, in first-use order
    pub fn referenced_properties(&self) -> Vec<String> {
        let mut collector = PropertyCollector::default();
        self.accept(&mut collector);
        collector.paths.into_iter().collect()
    }
}

/// Double-dispatch walk over a [`QueryNode`] tree
///
/// Every method has a default that recurses into the children, so an
/// implementation overrides only the node kinds it cares about.
pub trait QueryNodeVisitor {
    fn visit(&mut self, node: &QueryNode) {
        walk_node(self, node);
    }

    fn visit_constant(&mut self, _node: &ConstantNode) {}

    fn visit_range_variable(&mut self, _variable: &RangeVariable) {}

    fn visit_dynamic_property(&mut self, _node: &DynamicPropertyNode) {}

    fn visit_property_access(&mut self, node: &PropertyAccessNode) {
        self.visit(&node.source);
    }

    fn visit_open_property_access(&mut self, node: &OpenPropertyAccessNode) {
        self.visit(&node.source);
    }

    fn visit_navigation(&mut self, node: &NavigationNode) {
        self.visit(&node.source);
    }

    fn visit_function_call(&mut self, node: &FunctionCallNode) {
        if let Some(source) = &node.source {
            self.visit(source);
        }
        for argument in &node.arguments {
            self.visit(&argument.value);
        }
    }

    fn visit_lambda(&mut self, node: &LambdaNode) {
        self.visit(&node.source);
        if let Some(body) = &node.body {
            self.visit(body);
        }
    }
}

/// Dispatch `node` to the matching `visit_*` method of `visitor`
pub fn walk_node<V: QueryNodeVisitor + ?Sized>(visitor: &mut V, node: &QueryNode) {
    match node {
        QueryNode::Constant(n) => visitor.visit_constant(n),
        QueryNode::CollectionConstant(n) => {
            for item in &n.items {
                visitor.visit_constant(item);
            }
        }
        QueryNode::BinaryOperator(n) => {
            visitor.visit(&n.left);
            visitor.visit(&n.right);
        }
        QueryNode::UnaryOperator(n) => visitor.visit(&n.operand),
        QueryNode::Convert(n) => visitor.visit(&n.source),
        QueryNode::SingleValuePropertyAccess(n) | QueryNode::CollectionPropertyAccess(n) => {
            visitor.visit_property_access(n);
        }
        QueryNode::SingleValueOpenPropertyAccess(n) => visitor.visit_open_property_access(n),
        QueryNode::SingleNavigation(n) | QueryNode::CollectionNavigation(n) => {
            visitor.visit_navigation(n);
        }
        QueryNode::KeyLookup(n) => {
            visitor.visit(&n.source);
            for (_, value) in &n.keys {
                visitor.visit_constant(value);
            }
        }
        QueryNode::SingleResourceCast(n) | QueryNode::CollectionResourceCast(n) => {
            visitor.visit(&n.source);
        }
        QueryNode::RangeVariableReference(v) => visitor.visit_range_variable(v),
        QueryNode::SingleValueFunctionCall(n)
        | QueryNode::SingleResourceFunctionCall(n)
        | QueryNode::CollectionFunctionCall(n) => visitor.visit_function_call(n),
        QueryNode::Any(n) | QueryNode::All(n) => visitor.visit_lambda(n),
        QueryNode::In(n) => {
            visitor.visit(&n.left);
            visitor.visit(&n.right);
        }
        QueryNode::Count(n) => visitor.visit(&n.source),
        QueryNode::DynamicProperty(n) => visitor.visit_dynamic_property(n),
    }
}

#[derive(Default)]
struct PropertyCollector {
    paths: indexmap::IndexSet<String>,
}

impl PropertyCollector {
    /// Path from `$it` to `node`, or `None` if it starts anywhere else
    fn path_from_it(node: &QueryNode) -> Option<Vec<&str>> {
        let (name, source) = match node {
            QueryNode::RangeVariableReference(v) if v.name == RangeVariable::IT => {
                return Some(Vec::new());
            }
            QueryNode::SingleValuePropertyAccess(n) | QueryNode::CollectionPropertyAccess(n) => {
                (n.property.as_str(), &n.source)
            }
            QueryNode::SingleNavigation(n) | QueryNode::CollectionNavigation(n) => {
                (n.property.as_str(), &n.source)
            }
            QueryNode::SingleValueOpenPropertyAccess(n) => (n.name.as_str(), &n.source),
            QueryNode::SingleResourceCast(n) | QueryNode::CollectionResourceCast(n) => {
                return Self::path_from_it(&n.source);
            }
            _ => return None,
        };
        let mut path = Self::path_from_it(source)?;
        path.push(name);
        Some(path)
    }

    fn record(&mut self, node: &QueryNode) -> bool {
        match Self::path_from_it(node) {
            Some(path) if !path.is_empty() => {
                self.paths.insert(path.join("/"));
                true
            }
            _ => false,
        }
    }
}

impl QueryNodeVisitor for PropertyCollector {
    fn visit(&mut self, node: &QueryNode) {
        let is_path = matches!(
            node,
            QueryNode::SingleValuePropertyAccess(_)
                | QueryNode::CollectionPropertyAccess(_)
                | QueryNode::SingleNavigation(_)
                | QueryNode::CollectionNavigation(_)
                | QueryNode::SingleValueOpenPropertyAccess(_)
        );
        if !(is_path && self.record(node)) {
            walk_node(self, node);
        }
    }

    fn visit_dynamic_property(&mut self, node: &DynamicPropertyNode) {
        self.paths.insert(node.name.clone());
    }
}

fn write_source(f: &mut fmt::Formatter<'_>, source: &QueryNode) -> fmt::Result {
    write!(f, "{source}/")
}

/// Expression text with every operator application parenthesised and
/// implicit conversions spelled out
impl fmt::Display for QueryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(c) => f.write_str(&c.text),
            Self::CollectionConstant(c) => {
                let items: Vec<&str> = c.items.iter().map(|item| item.text.as_str()).collect();
                write!(f, "({})", items.join(","))
            }
            Self::BinaryOperator(n) => write!(f, "({} {} {})", n.left, n.op, n.right),
            Self::UnaryOperator(n) if n.op == UnaryOperatorKind::Not => {
                write!(f, "(not {})", n.operand)
            }
            Self::UnaryOperator(n) => write!(f, "({}{})", n.op, n.operand),
            Self::Convert(n) => match n.type_ref.as_primitive() {
                Some(kind) => write!(f, "convert({}, {kind})", n.source),
                None => write!(f, "convert({})", n.source),
            },
            Self::SingleValuePropertyAccess(n) | Self::CollectionPropertyAccess(n) => {
                write_source(f, &n.source)?;
                f.write_str(&n.property)
            }
            Self::SingleValueOpenPropertyAccess(n) => {
                write_source(f, &n.source)?;
                f.write_str(&n.name)
            }
            Self::SingleNavigation(n) | Self::CollectionNavigation(n) => {
                write_source(f, &n.source)?;
                f.write_str(&n.property)
            }
            Self::KeyLookup(n) => {
                let keys: Vec<String> = n
                    .keys
                    .iter()
                    .map(|(name, value)| format!("{name}={}", value.text))
                    .collect();
                write!(f, "{}({})", n.source, keys.join(","))
            }
            Self::SingleResourceCast(n) | Self::CollectionResourceCast(n) => {
                write!(f, "{}/cast({})", n.source, n.target)
            }
            Self::RangeVariableReference(v) => f.write_str(&v.name),
            Self::SingleValueFunctionCall(n)
            | Self::SingleResourceFunctionCall(n)
            | Self::CollectionFunctionCall(n) => {
                if let Some(source) = &n.source {
                    write_source(f, source)?;
                }
                let arguments: Vec<String> = n
                    .arguments
                    .iter()
                    .map(|a| match &a.name {
                        Some(name) => format!("{name}={}", a.value),
                        None => a.value.to_string(),
                    })
                    .collect();
                write!(f, "{}({})", n.name, arguments.join(","))
            }
            Self::Any(n) | Self::All(n) => {
                let keyword = if matches!(self, Self::Any(_)) { "any" } else { "all" };
                write!(f, "{}/{keyword}(", n.source)?;
                if let (Some(parameter), Some(body)) = (&n.parameter, &n.body) {
                    write!(f, "{}:{body}", parameter.name)?;
                }
                f.write_str(")")
            }
            Self::In(n) => write!(f, "({} in {})", n.left, n.right),
            Self::Count(n) => {
                write_source(f, &n.source)?;
                f.write_str("$count")
            }
            Self::DynamicProperty(n) => f.write_str(&n.name),
        }
    }
}
