//! Model validation
//!
//! Validation runs once per model and accumulates every problem it finds.
//! Nothing here is fail-fast: a model with five duplicate overloads yields
//! five errors.

use crate::equivalence::is_equivalent_to;
use crate::model::TypeModel;
use crate::operation::Operation;
use crate::schema::{Property, SchemaType, StructuredKind};
use crate::types::TypeRef;
use indexmap::IndexMap;
use odata_query_diagnostics::{
    Diagnostic, ErrorCode, ODQ0300, ODQ0301, ODQ0302, ODQ0303, ODQ0304, ODQ0305, ODQ0306,
    ODQ0307, ODQ0308, ODQ0309,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// A problem found in the model itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdmError {
    /// Qualified name of the offending element
    pub location: String,
    pub code: ErrorCode,
    pub message: String,
}

impl EdmError {
    pub fn new(location: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            code,
            message: message.into(),
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::error(self.code, self.message.clone()).with_help(format!("at {}", self.location))
    }
}

impl fmt::Display for EdmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.location, self.message)
    }
}

impl std::error::Error for EdmError {}

/// Accumulates errors over one validation pass
#[derive(Debug, Default)]
pub struct ValidationContext {
    errors: Vec<EdmError>,
}

impl ValidationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, location: impl Into<String>, code: ErrorCode, message: impl Into<String>) {
        let error = EdmError::new(location, code, message);
        log::warn!("model validation: {error}");
        self.errors.push(error);
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// End the pass and hand the errors over
    pub fn finish(self) -> Vec<EdmError> {
        self.errors
    }
}

/// Uniqueness rules for function and action overloads
pub struct DuplicateOperationValidator;

impl DuplicateOperationValidator {
    pub fn validate(operations: &[Operation], ctx: &mut ValidationContext) {
        let mut by_name: IndexMap<String, Vec<&Operation>> = IndexMap::new();
        for operation in operations {
            by_name.entry(operation.qualified_name()).or_default().push(operation);
        }
        for (name, overloads) in &by_name {
            for (index, candidate) in overloads.iter().enumerate() {
                let earlier = &overloads[..index];
                for (code, message) in Self::collisions(candidate, earlier) {
                    ctx.report(name.clone(), code, message);
                }
            }
        }
    }

    /// Every rule `candidate` violates against the overloads declared before it
    fn collisions(candidate: &Operation, earlier: &[&Operation]) -> Vec<(ErrorCode, String)> {
        let name = candidate.qualified_name();
        let mut found = Vec::new();
        let mut trip = |rule: fn(&Operation, &Operation) -> bool, code: ErrorCode, message: String| {
            if earlier.iter().any(|other| rule(candidate, other)) {
                found.push((code, message));
            }
        };

        match (candidate.is_function(), candidate.is_bound) {
            (true, true) => {
                trip(
                    |a, b| b.is_function() && b.is_bound && same_binding(a, b) && same_names(a, b),
                    ODQ0300,
                    format!("Bound function '{name}' has an overload with the same binding type and parameter names"),
                );
                trip(
                    |a, b| b.is_function() && b.is_bound && same_binding(a, b) && same_types(a, b),
                    ODQ0301,
                    format!("Bound function '{name}' has an overload with the same binding type and parameter types"),
                );
            }
            (true, false) => {
                trip(
                    |a, b| b.is_function() && !b.is_bound && same_names(a, b),
                    ODQ0302,
                    format!("Unbound function '{name}' has an overload with the same parameter names"),
                );
                trip(
                    |a, b| b.is_function() && !b.is_bound && same_types(a, b),
                    ODQ0303,
                    format!("Unbound function '{name}' has an overload with the same parameter types"),
                );
            }
            (false, true) => trip(
                |a, b| b.is_action() && b.is_bound && same_binding(a, b),
                ODQ0304,
                format!("Bound action '{name}' is declared twice for the same binding type"),
            ),
            (false, false) => trip(
                |_, b| b.is_action() && !b.is_bound,
                ODQ0305,
                format!("Unbound action '{name}' is declared more than once"),
            ),
        }
        found
    }
}

/// Type-definition equivalence; nullability and facets do not distinguish overloads
fn same_definition(a: &TypeRef, b: &TypeRef) -> bool {
    is_equivalent_to(&a.ty, &b.ty)
}

fn same_binding(a: &Operation, b: &Operation) -> bool {
    match (a.binding_parameter(), b.binding_parameter()) {
        (Some(x), Some(y)) => same_definition(&x.type_ref, &y.type_ref),
        _ => false,
    }
}

/// Non-binding parameter names compared as a set
fn same_names(a: &Operation, b: &Operation) -> bool {
    let names = |op: &Operation| -> BTreeSet<String> {
        op.non_binding_parameters()
            .iter()
            .map(|p| p.name.clone())
            .collect()
    };
    a.non_binding_parameters().len() == b.non_binding_parameters().len() && names(a) == names(b)
}

/// Non-binding parameter types compared in order
fn same_types(a: &Operation, b: &Operation) -> bool {
    let (x, y) = (a.non_binding_parameters(), b.non_binding_parameters());
    x.len() == y.len()
        && x.iter()
            .zip(y)
            .all(|(p, q)| same_definition(&p.type_ref, &q.type_ref))
}

fn validate_operations(operations: &[Operation], ctx: &mut ValidationContext) {
    for operation in operations.iter().filter(|op| op.is_bound && op.parameters.is_empty()) {
        ctx.report(
            operation.qualified_name(),
            ODQ0306,
            format!(
                "Bound operation '{}' declares no binding parameter",
                operation.qualified_name()
            ),
        );
    }
    DuplicateOperationValidator::validate(operations, ctx);
}

fn validate_keys<M: TypeModel + ?Sized>(model: &M, ctx: &mut ValidationContext) {
    for id in model.type_ids() {
        let Some(SchemaType::Structured(entity)) = model.schema_type(id) else {
            continue;
        };
        if entity.kind != StructuredKind::Entity {
            continue;
        }
        let location = entity.qualified_name();
        if entity.base_type.is_none() && entity.key.is_empty() && !entity.is_abstract {
            ctx.report(
                location.clone(),
                ODQ0307,
                format!("Entity type '{location}' declares no key"),
            );
        }
        for key in &entity.key {
            match model.find_property(id, key) {
                Some(Property::Structural(p))
                    if p.type_ref.as_primitive().is_some() && !p.type_ref.nullable => {}
                Some(_) => ctx.report(
                    location.clone(),
                    ODQ0308,
                    format!("Key property '{key}' of '{location}' must be a non-nullable primitive"),
                ),
                None => ctx.report(
                    location.clone(),
                    ODQ0308,
                    format!("Key property '{key}' is not declared on '{location}'"),
                ),
            }
        }
    }
}

fn validate_navigation_bindings<M: TypeModel + ?Sized>(model: &M, ctx: &mut ValidationContext) {
    let Some(container) = model.entity_container() else {
        return;
    };
    for source in container.sources.values() {
        for (path, target) in &source.navigation_bindings {
            let location = format!("{}/{}", source.name, path);
            let navigation_name = path.rsplit('/').next().unwrap_or(path);
            let declared = model
                .find_property(source.entity_type, navigation_name)
                .and_then(Property::as_navigation)
                .is_some()
                || model
                    .derived_types(source.entity_type)
                    .into_iter()
                    .any(|d| {
                        model
                            .find_property(d, navigation_name)
                            .and_then(Property::as_navigation)
                            .is_some()
                    });
            if !declared {
                ctx.report(
                    location.clone(),
                    ODQ0309,
                    format!("'{path}' is not a navigation property of '{}'", source.name),
                );
            }
            if container.find_navigation_source(target).is_none() {
                ctx.report(
                    location,
                    ODQ0309,
                    format!("Navigation binding target '{target}' is not declared"),
                );
            }
        }
    }
}

/// Run every model rule and collect the results
pub fn validate_model<M: TypeModel + ?Sized>(model: &M) -> Vec<EdmError> {
    let mut ctx = ValidationContext::new();
    validate_operations(model.operations(), &mut ctx);
    validate_keys(model, &mut ctx);
    validate_navigation_bindings(model, &mut ctx);
    log::debug!("model validation finished with {} errors", ctx.error_count());
    ctx.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::PrimitiveKind;
    use crate::types::SchemaTypeId;
    use pretty_assertions::assert_eq;

    fn entity() -> SchemaTypeId {
        let mut builder = crate::model::ModelBuilder::default();
        match builder.add_entity_type("NS", "Person") {
            Ok(id) => id,
            Err(e) => panic!("{e}"),
        }
    }

    fn bound_function(binding: SchemaTypeId, params: &[(&str, PrimitiveKind)]) -> Operation {
        params.iter().fold(
            Operation::function("NS", "F", TypeRef::int32())
                .bound()
                .parameter("bindingParameter", TypeRef::entity(binding, true)),
            |op, (name, kind)| op.parameter(*name, TypeRef::primitive(*kind, true)),
        )
    }

    fn codes(operations: &[Operation]) -> Vec<ErrorCode> {
        let mut ctx = ValidationContext::new();
        DuplicateOperationValidator::validate(operations, &mut ctx);
        ctx.finish().into_iter().map(|e| e.code).collect()
    }

    #[test]
    fn test_reordered_parameter_names_collide() {
        let person = entity();
        let ops = [
            bound_function(person, &[("x", PrimitiveKind::Int32), ("y", PrimitiveKind::String)]),
            bound_function(person, &[("y", PrimitiveKind::Int32), ("x", PrimitiveKind::String)]),
        ];
        // Same name set and same ordered types
        assert_eq!(codes(&ops), vec![ODQ0300, ODQ0301]);
    }

    #[test]
    fn test_different_parameter_names_do_not_collide() {
        let person = entity();
        let ops = [
            bound_function(person, &[("x", PrimitiveKind::Int32), ("y", PrimitiveKind::String)]),
            bound_function(person, &[("x", PrimitiveKind::String), ("z", PrimitiveKind::Int32)]),
        ];
        assert_eq!(codes(&ops), Vec::<ErrorCode>::new());
    }

    #[test]
    fn test_nullability_does_not_distinguish_overloads() {
        let a = Operation::function("NS", "G", TypeRef::int32()).parameter("p", TypeRef::int32());
        let b = Operation::function("NS", "G", TypeRef::int32())
            .parameter("q", TypeRef::int32().with_nullable(false));
        assert_eq!(codes(&[a, b]), vec![ODQ0303]);
    }

    #[test]
    fn test_actions_cannot_overload_on_parameters() {
        let a = Operation::action("NS", "Reset").parameter("p", TypeRef::int32());
        let b = Operation::action("NS", "Reset").parameter("q", TypeRef::string());
        assert_eq!(codes(&[a, b]), vec![ODQ0305]);
    }

    #[test]
    fn test_every_duplicate_is_reported() {
        let ops: Vec<Operation> = (0..3).map(|_| Operation::action("NS", "Reset")).collect();
        assert_eq!(codes(&ops), vec![ODQ0305, ODQ0305]);
    }
}
