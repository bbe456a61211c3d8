//! Overload selection for model functions and actions

use log::trace;
use odata_query_diagnostics::{QueryError, Result, ODQ0202, ODQ0207, ODQ0208};
use odata_query_edm::{EdmType, Operation, TypeModel, TypeRef};
use std::collections::BTreeSet;

use crate::promotion::promotion_cost;

/// Distance from `value` to a binding parameter of type `parameter`
///
/// `Some(0)` for an exact match; larger values mean the parameter is
/// declared on a more distant base type. `None` when not assignable.
pub(crate) fn binding_distance(model: &dyn TypeModel, parameter: &TypeRef, value: &TypeRef) -> Option<usize> {
    match (&parameter.ty, &value.ty) {
        (EdmType::Collection(p), EdmType::Collection(v)) => binding_distance(model, p, v),
        (EdmType::Collection(_), _) | (_, EdmType::Collection(_)) => None,
        (EdmType::Entity(p), EdmType::Entity(v)) | (EdmType::Complex(p), EdmType::Complex(v)) => {
            model.derivation_distance(*v, *p)
        }
        (EdmType::Enum(p), EdmType::Enum(v)) => (p == v).then_some(0),
        (EdmType::Primitive(p), EdmType::Primitive(v)) => {
            promotion_cost(*v, *p).map(|cost| cost as usize)
        }
        _ => None,
    }
}

fn parameters_match(operation: &Operation, argument_names: &[&str]) -> bool {
    if operation.is_action() {
        return argument_names.is_empty();
    }
    let declared: BTreeSet<&str> = operation
        .non_binding_parameters()
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    let supplied: BTreeSet<&str> = argument_names.iter().copied().collect();
    declared == supplied && supplied.len() == argument_names.len()
}

/// Choose among overloads sharing `name`
///
/// With a binding value only bound operations are considered and the one
/// whose binding parameter is declared on the most derived type wins.
pub(crate) fn select_overload<'m>(
    model: &dyn TypeModel,
    name: &str,
    candidates: &[&'m Operation],
    binding: Option<&TypeRef>,
    argument_names: &[&str],
) -> Result<&'m Operation> {
    if candidates.is_empty() {
        return Err(QueryError::binding(ODQ0202, format!("Unknown operation '{name}'")));
    }

    let mut ranked: Vec<(&'m Operation, usize)> = candidates
        .iter()
        .copied()
        .filter(|op| parameters_match(op, argument_names))
        .filter_map(|op| match (binding, op.binding_parameter()) {
            (Some(value), Some(parameter)) => {
                binding_distance(model, &parameter.type_ref, value).map(|d| (op, d))
            }
            (None, None) if !op.is_bound => Some((op, 0)),
            _ => None,
        })
        .collect();
    ranked.sort_by_key(|(_, distance)| *distance);
    trace!("{} overload(s) of '{name}' accept the call", ranked.len());

    match ranked.as_slice() {
        [] => {
            let on = binding.map_or_else(String::new, |b| format!(" bound to {}", model.display_type(b)));
            Err(QueryError::binding(
                ODQ0208,
                format!(
                    "No overload of '{name}'{on} takes parameters ({})",
                    argument_names.join(", ")
                ),
            ))
        }
        [(_, first), (_, second), ..] if first == second => Err(QueryError::binding(
            ODQ0207,
            format!("Call to '{name}' matches more than one overload"),
        )),
        [(best, _), ..] => Ok(*best),
    }
}
