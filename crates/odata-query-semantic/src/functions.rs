//! Built-in function signatures and overload resolution
//!
//! Overloads are ranked by the total promotion cost of their arguments;
//! the cheapest match wins and a tie for cheapest is ambiguous.

use crate::nodes::QueryNode;
use crate::promotion::{is_untyped, promotion_cost};
use odata_query_diagnostics::{QueryError, Result, ODQ0202, ODQ0207, ODQ0208};
use odata_query_edm::PrimitiveKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub parameters: &'static [PrimitiveKind],
    pub returns: PrimitiveKind,
}

macro_rules! sig {
    ([$($param:ident),*] => $returns:ident) => {
        Signature {
            parameters: &[$(PrimitiveKind::$param),*],
            returns: PrimitiveKind::$returns,
        }
    };
}

/// Overloads of a built-in function; `isof` and `cast` take a type name and are bound separately
pub fn signatures(name: &str) -> Option<&'static [Signature]> {
    let overloads: &'static [Signature] = match name {
        "contains" | "startswith" | "endswith" | "matchesPattern" => {
            &[sig!([String, String] => Boolean)]
        }
        "length" => &[sig!([String] => Int32)],
        "indexof" => &[sig!([String, String] => Int32)],
        "substring" => &[
            sig!([String, Int32] => String),
            sig!([String, Int32, Int32] => String),
        ],
        "tolower" | "toupper" | "trim" => &[sig!([String] => String)],
        "concat" => &[sig!([String, String] => String)],
        "year" | "month" | "day" => &[
            sig!([DateTimeOffset] => Int32),
            sig!([Date] => Int32),
        ],
        "hour" | "minute" | "second" => &[
            sig!([DateTimeOffset] => Int32),
            sig!([TimeOfDay] => Int32),
        ],
        "fractionalseconds" => &[
            sig!([DateTimeOffset] => Decimal),
            sig!([TimeOfDay] => Decimal),
        ],
        "date" => &[sig!([DateTimeOffset] => Date)],
        "time" => &[sig!([DateTimeOffset] => TimeOfDay)],
        "totaloffsetminutes" => &[sig!([DateTimeOffset] => Int32)],
        "totalseconds" => &[sig!([Duration] => Decimal)],
        "now" | "mindatetime" | "maxdatetime" => &[sig!([] => DateTimeOffset)],
        "round" | "floor" | "ceiling" => &[
            sig!([Double] => Double),
            sig!([Decimal] => Decimal),
        ],
        "geo.distance" => &[
            sig!([GeographyPoint, GeographyPoint] => Double),
            sig!([GeometryPoint, GeometryPoint] => Double),
        ],
        "geo.length" => &[
            sig!([GeographyLineString] => Double),
            sig!([GeometryLineString] => Double),
        ],
        "geo.intersects" => &[
            sig!([GeographyPoint, GeographyPolygon] => Boolean),
            sig!([GeometryPoint, GeometryPolygon] => Boolean),
        ],
        _ => return None,
    };
    Some(overloads)
}

fn argument_cost(argument: &QueryNode, parameter: PrimitiveKind) -> Option<u32> {
    if argument.is_null_constant() || is_untyped(argument) {
        return Some(0);
    }
    promotion_cost(argument.primitive_kind()?, parameter)
}

fn overload_cost(signature: &Signature, arguments: &[QueryNode]) -> Option<u32> {
    if signature.parameters.len() != arguments.len() {
        return None;
    }
    signature
        .parameters
        .iter()
        .zip(arguments)
        .map(|(parameter, argument)| argument_cost(argument, *parameter))
        .sum()
}

/// Pick the overload of `name` matching the bound arguments
pub fn resolve_builtin(name: &str, arguments: &[QueryNode]) -> Result<&'static Signature> {
    let overloads = signatures(name)
        .ok_or_else(|| QueryError::binding(ODQ0202, format!("Unknown function '{name}'")))?;

    let mut candidates: Vec<(&'static Signature, u32)> = overloads
        .iter()
        .filter_map(|signature| overload_cost(signature, arguments).map(|cost| (signature, cost)))
        .collect();
    candidates.sort_by_key(|(_, cost)| *cost);

    match candidates.as_slice() {
        [] => {
            let types: Vec<String> = arguments
                .iter()
                .map(|a| match a.primitive_kind() {
                    Some(kind) => kind.to_string(),
                    None if a.is_null_constant() => "null".to_string(),
                    None => a.kind_name().to_string(),
                })
                .collect();
            Err(QueryError::binding(
                ODQ0208,
                format!("No overload of '{name}' accepts ({})", types.join(", ")),
            ))
        }
        [(_, first), (_, second), ..] if first == second => Err(QueryError::binding(
            ODQ0207,
            format!("Call to '{name}' matches more than one overload"),
        )),
        [(best, _), ..] => Ok(*best),
    }
}
