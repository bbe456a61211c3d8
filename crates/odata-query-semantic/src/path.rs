//! Resource path binding
//!
//! `People(1)/Orders/NS.VipOrder/NS.Total()` is bound segment by segment,
//! threading the current type and entity set. Query options are then bound
//! against the resource the path addresses.

use crate::binder::MetadataBinder;
use crate::context::BindingContext;
use crate::nodes::{ConstantNode, NamedNode};
use crate::operations::select_overload;
use crate::promotion::coerce;
use log::{debug, trace, warn};
use odata_query_ast::{NamedValue, ResourceSegmentToken};
use odata_query_diagnostics::{
    QueryError, Result, ODQ0200, ODQ0201, ODQ0202, ODQ0203, ODQ0204, ODQ0205, ODQ0208, ODQ0214,
};
use odata_query_edm::{EdmType, NavigationSourceKind, Operation, PrimitiveKind, Property, SchemaTypeId, TypeRef};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum PathSegmentKind {
    EntitySet,
    Singleton,
    /// Function or action import with its target operation
    OperationImport { operation: String, arguments: Vec<NamedNode> },
    Key(Vec<(String, ConstantNode)>),
    Property,
    OpenProperty,
    Navigation,
    TypeCast(SchemaTypeId),
    /// Bound function or action
    Operation { operation: String, arguments: Vec<NamedNode> },
    Count,
    Value,
    Ref,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathSegment {
    pub kind: PathSegmentKind,
    /// Name as written, or the system segment itself
    pub identifier: String,
    pub type_ref: TypeRef,
    /// Entity set the segment's value belongs to, when known
    pub navigation_source: Option<String>,
}

impl PathSegment {
    fn is_system(&self) -> bool {
        matches!(
            self.kind,
            PathSegmentKind::Count | PathSegmentKind::Value | PathSegmentKind::Ref
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ODataPath {
    pub segments: Vec<PathSegment>,
}

impl ODataPath {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    /// Type of the value the full path addresses
    pub fn target_type(&self) -> Option<&TypeRef> {
        self.last().map(|s| &s.type_ref)
    }

    /// Entity set of the resource addressed, ignoring a trailing `$count`, `$value` or `$ref`
    pub fn navigation_source(&self) -> Option<&str> {
        self.resource_segment()?.navigation_source.as_deref()
    }

    fn resource_segment(&self) -> Option<&PathSegment> {
        self.segments.iter().rev().find(|s| !s.is_system())
    }

    /// Context for binding query options against the addressed resource
    pub fn query_context<'m>(&self, context: BindingContext<'m>) -> BindingContext<'m> {
        match self.resource_segment() {
            Some(segment) => {
                let element = segment.type_ref.element_type().unwrap_or(&segment.type_ref);
                if element.is_structured() {
                    context.with_resource_type(segment.type_ref.clone(), segment.navigation_source.clone())
                } else {
                    context
                }
            }
            None => context,
        }
    }
}

fn write_arguments(f: &mut fmt::Formatter<'_>, arguments: &[NamedNode]) -> fmt::Result {
    let rendered: Vec<String> = arguments
        .iter()
        .map(|a| match &a.name {
            Some(name) => format!("{name}={}", a.value),
            None => a.value.to_string(),
        })
        .collect();
    write!(f, "({})", rendered.join(","))
}

impl fmt::Display for ODataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, segment) in self.segments.iter().enumerate() {
            if let PathSegmentKind::Key(keys) = &segment.kind {
                match keys.as_slice() {
                    [(_, value)] => write!(f, "({})", value.text)?,
                    _ => {
                        let rendered: Vec<String> =
                            keys.iter().map(|(name, value)| format!("{name}={}", value.text)).collect();
                        write!(f, "({})", rendered.join(","))?;
                    }
                }
                continue;
            }
            if index > 0 {
                f.write_str("/")?;
            }
            f.write_str(&segment.identifier)?;
            if let PathSegmentKind::OperationImport { arguments, .. }
            | PathSegmentKind::Operation { arguments, .. } = &segment.kind
            {
                write_arguments(f, arguments)?;
            }
        }
        Ok(())
    }
}

/// Binds parsed resource segments against the model
pub struct PathBinder<'c, 'm> {
    context: &'c BindingContext<'m>,
}

impl<'c, 'm> PathBinder<'c, 'm> {
    pub fn new(context: &'c BindingContext<'m>) -> Self {
        Self { context }
    }

    pub fn bind(&self, tokens: &[ResourceSegmentToken]) -> Result<ODataPath> {
        let Some((root, rest)) = tokens.split_first() else {
            return Ok(ODataPath::default());
        };
        debug!("binding resource path with {} segment(s)", tokens.len());
        let mut segments = self.bind_root(root)?;
        for token in rest {
            let Some(previous) = segments.last() else {
                break;
            };
            if previous.is_system() {
                return Err(QueryError::binding(
                    ODQ0214,
                    format!("No segment may follow '{}'", previous.identifier),
                ));
            }
            let previous = previous.clone();
            self.bind_next(&previous, token, &mut segments)?;
        }
        Ok(ODataPath { segments })
    }

    fn bind_root(&self, token: &ResourceSegmentToken) -> Result<Vec<PathSegment>> {
        if let Some(source) = self.context.find_navigation_source(&token.name)? {
            let entity = TypeRef::entity(source.entity_type, false);
            let (kind, type_ref) = match source.kind {
                NavigationSourceKind::EntitySet => (PathSegmentKind::EntitySet, TypeRef::collection(entity)),
                NavigationSourceKind::Singleton => (PathSegmentKind::Singleton, entity),
            };
            let segment = PathSegment {
                kind,
                identifier: source.name.clone(),
                type_ref,
                navigation_source: Some(source.name.clone()),
            };
            let mut segments = vec![segment];
            if let Some(arguments) = &token.arguments {
                let key = self.bind_key(&segments[0], arguments)?;
                segments.push(key);
            }
            return Ok(segments);
        }

        let import = self
            .context
            .model()
            .entity_container()
            .and_then(|container| container.find_operation_import(&token.name));
        let Some(import) = import else {
            return Err(QueryError::binding(
                ODQ0203,
                format!("'{}' is not an entity set, singleton or operation import", token.name),
            ));
        };
        let candidates: Vec<&Operation> = self
            .context
            .resolve_operations(&import.operation)
            .into_iter()
            .filter(|op| !op.is_bound)
            .collect();
        let arguments = token.arguments.as_deref().unwrap_or_default();
        let names = argument_names(&import.name, arguments)?;
        let operation = select_overload(self.context.model(), &import.name, &candidates, None, &names)?;
        let arguments = self.bind_arguments(operation, arguments)?;
        let type_ref = operation.return_type.clone().unwrap_or_else(TypeRef::none);
        Ok(vec![PathSegment {
            kind: PathSegmentKind::OperationImport {
                operation: operation.qualified_name(),
                arguments,
            },
            identifier: import.name.clone(),
            type_ref,
            navigation_source: import.entity_set.clone(),
        }])
    }

    fn bind_next(
        &self,
        previous: &PathSegment,
        token: &ResourceSegmentToken,
        segments: &mut Vec<PathSegment>,
    ) -> Result<()> {
        let segment = match token.name.as_str() {
            "$count" => self.system(previous, PathSegmentKind::Count)?,
            "$value" => self.system(previous, PathSegmentKind::Value)?,
            "$ref" => self.system(previous, PathSegmentKind::Ref)?,
            name if name.contains('.') => return self.bind_qualified(previous, token, segments),
            name => self.bind_property(previous, name)?,
        };
        let keyed = token.arguments.as_ref().map(|arguments| self.bind_key(&segment, arguments));
        segments.push(segment);
        if let Some(key) = keyed {
            segments.push(key?);
        }
        Ok(())
    }

    fn system(&self, previous: &PathSegment, kind: PathSegmentKind) -> Result<PathSegment> {
        let current = &previous.type_ref;
        let (identifier, type_ref) = match kind {
            PathSegmentKind::Count if current.is_collection() => ("$count", TypeRef::int64()),
            PathSegmentKind::Value if !current.is_collection() => {
                let value = match &current.ty {
                    EdmType::Primitive(_) | EdmType::Enum(_) | EdmType::None => current.clone(),
                    // media resource
                    EdmType::Entity(_) => TypeRef::primitive(PrimitiveKind::Stream, false),
                    _ => return Err(self.misplaced("$value", current)),
                };
                ("$value", value)
            }
            PathSegmentKind::Ref if current.element_type().unwrap_or(current).is_entity() => {
                ("$ref", current.clone())
            }
            PathSegmentKind::Count => return Err(self.misplaced("$count", current)),
            PathSegmentKind::Value => return Err(self.misplaced("$value", current)),
            _ => return Err(self.misplaced("$ref", current)),
        };
        Ok(PathSegment {
            kind,
            identifier: identifier.to_string(),
            type_ref,
            navigation_source: previous.navigation_source.clone(),
        })
    }

    fn misplaced(&self, segment: &str, current: &TypeRef) -> QueryError {
        QueryError::binding(
            ODQ0214,
            format!(
                "'{segment}' cannot follow a value of type {}",
                self.context.model().display_type(current)
            ),
        )
    }

    fn bind_property(&self, previous: &PathSegment, name: &str) -> Result<PathSegment> {
        let model = self.context.model();
        let current = &previous.type_ref;
        let type_id = match &current.ty {
            EdmType::Entity(id) | EdmType::Complex(id) => *id,
            EdmType::Collection(_) => {
                return Err(QueryError::binding(
                    ODQ0214,
                    format!("'{name}' cannot follow a collection; address a single entity with a key"),
                ));
            }
            _ => {
                return Err(QueryError::binding(
                    ODQ0214,
                    format!("'{name}' cannot follow a value of type {}", model.display_type(current)),
                ));
            }
        };
        match self.context.find_property(type_id, name)? {
            Some(Property::Structural(property)) => Ok(PathSegment {
                kind: PathSegmentKind::Property,
                identifier: property.name.clone(),
                type_ref: property.type_ref.clone(),
                navigation_source: None,
            }),
            Some(Property::Navigation(navigation)) => {
                let owner = previous.navigation_source.as_deref();
                let target = self.context.binding_target(owner, &navigation.name).or_else(|| {
                    let qualified = format!("{}/{}", model.type_name(type_id), navigation.name);
                    self.context.binding_target(owner, &qualified)
                });
                if target.is_none() && !navigation.contains_target {
                    warn!("'{}' has no navigation binding; the path is not addressable", navigation.name);
                }
                Ok(PathSegment {
                    kind: PathSegmentKind::Navigation,
                    identifier: navigation.name.clone(),
                    type_ref: navigation.type_ref(),
                    navigation_source: target,
                })
            }
            None if model.is_open(type_id) => Ok(PathSegment {
                kind: PathSegmentKind::OpenProperty,
                identifier: name.to_string(),
                type_ref: TypeRef::none(),
                navigation_source: None,
            }),
            None => Err(QueryError::binding(
                ODQ0200,
                format!("Type '{}' has no property '{name}'", model.type_name(type_id)),
            )),
        }
    }

    fn bind_key(&self, previous: &PathSegment, arguments: &[NamedValue]) -> Result<PathSegment> {
        let element = previous.type_ref.element_type().filter(|e| e.is_entity());
        let Some((entity, element)) = element.and_then(|e| Some((e.schema_id()?, e))) else {
            return Err(QueryError::binding(
                ODQ0214,
                format!("A key predicate cannot follow '{}'", previous.identifier),
            ));
        };
        let keys = MetadataBinder::new(self.context).bind_key_values(entity, arguments)?;
        trace!("key predicate on {}", self.context.model().type_name(entity));
        Ok(PathSegment {
            kind: PathSegmentKind::Key(keys),
            identifier: String::new(),
            type_ref: element.clone(),
            navigation_source: previous.navigation_source.clone(),
        })
    }

    /// Type cast or bound operation
    fn bind_qualified(
        &self,
        previous: &PathSegment,
        token: &ResourceSegmentToken,
        segments: &mut Vec<PathSegment>,
    ) -> Result<()> {
        let name = token.name.as_str();
        if let Some(ty) = self.context.find_type(name)? {
            let segment = self.bind_cast(previous, name, &ty)?;
            let keyed = token.arguments.as_ref().map(|arguments| self.bind_key(&segment, arguments));
            segments.push(segment);
            if let Some(key) = keyed {
                segments.push(key?);
            }
            return Ok(());
        }

        let candidates = self.context.resolve_operations(name);
        if candidates.is_empty() {
            return Err(QueryError::binding(
                ODQ0202,
                format!("'{name}' is neither a type nor an operation"),
            ));
        }
        let arguments = token.arguments.as_deref().unwrap_or_default();
        let names = argument_names(name, arguments)?;
        let operation = select_overload(
            self.context.model(),
            name,
            &candidates,
            Some(&previous.type_ref),
            &names,
        )?;
        trace!("bound operation '{name}' resolved to {}", operation.qualified_name());
        let bound = self.bind_arguments(operation, arguments)?;
        let navigation_source = operation.entity_set_path.as_deref().and_then(|path| {
            let (_, rest) = path.split_once('/')?;
            self.context.binding_target(previous.navigation_source.as_deref(), rest)
        });
        segments.push(PathSegment {
            kind: PathSegmentKind::Operation {
                operation: operation.qualified_name(),
                arguments: bound,
            },
            identifier: name.to_string(),
            type_ref: operation.return_type.clone().unwrap_or_else(TypeRef::none),
            navigation_source,
        });
        Ok(())
    }

    fn bind_cast(&self, previous: &PathSegment, name: &str, ty: &EdmType) -> Result<PathSegment> {
        let model = self.context.model();
        let current = &previous.type_ref;
        let (element, collection) = match current.element_type() {
            Some(element) => (element, true),
            None => (current, false),
        };
        let target = match ty {
            EdmType::Entity(id) | EdmType::Complex(id) => *id,
            EdmType::None => return Err(QueryError::binding(ODQ0201, format!("Unknown type '{name}'"))),
            _ => {
                return Err(QueryError::binding(
                    ODQ0205,
                    format!("'{name}' is not a structured type"),
                ));
            }
        };
        let related = element.schema_id().is_some_and(|id| {
            element.is_structured() && (model.is_or_derives_from(id, target) || model.is_or_derives_from(target, id))
        });
        if !related {
            return Err(QueryError::binding(
                ODQ0205,
                format!("Cannot cast {} to {name}", model.display_type(current)),
            ));
        }
        let cast = TypeRef::new(ty.clone(), element.nullable);
        Ok(PathSegment {
            kind: PathSegmentKind::TypeCast(target),
            identifier: model.type_name(target),
            type_ref: if collection { TypeRef::collection(cast) } else { cast },
            navigation_source: previous.navigation_source.clone(),
        })
    }

    fn bind_arguments(&self, operation: &Operation, arguments: &[NamedValue]) -> Result<Vec<NamedNode>> {
        let model = self.context.model();
        let mut bound = Vec::with_capacity(arguments.len());
        for argument in arguments {
            let Some(name) = argument.name.as_deref() else {
                continue;
            };
            let Some(parameter) = operation.non_binding_parameters().iter().find(|p| p.name == name) else {
                return Err(QueryError::binding(
                    ODQ0208,
                    format!("'{}' has no parameter '{name}'", operation.qualified_name()),
                ));
            };
            let value = MetadataBinder::new(self.context).bind(&argument.value)?;
            let shown = value.to_string();
            let value = coerce(model, value, &parameter.type_ref).ok_or_else(|| {
                QueryError::binding(
                    ODQ0204,
                    format!(
                        "Parameter '{name}' expects {}, found {shown}",
                        model.display_type(&parameter.type_ref)
                    ),
                )
            })?;
            bound.push(NamedNode {
                name: Some(name.to_string()),
                value,
            });
        }
        Ok(bound)
    }
}

fn argument_names<'a>(operation: &str, arguments: &'a [NamedValue]) -> Result<Vec<&'a str>> {
    arguments
        .iter()
        .map(|argument| {
            argument.name.as_deref().ok_or_else(|| {
                QueryError::binding(
                    ODQ0208,
                    format!("Arguments of '{operation}' must be passed as name=value"),
                )
            })
        })
        .collect()
}

pub fn bind_path(tokens: &[ResourceSegmentToken], context: &BindingContext<'_>) -> Result<ODataPath> {
    PathBinder::new(context).bind(tokens)
}
