//! Operand coercion
//!
//! Numeric constants are retyped in place when the value fits the other
//! operand's kind, `null` adopts the other operand's type, and anything
//! else that needs widening is wrapped in a [`ConvertNode`].

use crate::nodes::{ConstantNode, ConvertNode, QueryNode};
use odata_query_ast::LiteralValue;
use odata_query_edm::{can_promote, common_promotion, EdmType, PrimitiveKind, TypeModel, TypeRef};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

const NUMERIC_LADDER: [PrimitiveKind; 7] = [
    PrimitiveKind::Byte,
    PrimitiveKind::Int16,
    PrimitiveKind::Int32,
    PrimitiveKind::Int64,
    PrimitiveKind::Single,
    PrimitiveKind::Double,
    PrimitiveKind::Decimal,
];

fn ladder_rank(kind: PrimitiveKind) -> Option<u32> {
    let kind = if kind == PrimitiveKind::SByte {
        PrimitiveKind::Byte
    } else {
        kind
    };
    NUMERIC_LADDER
        .iter()
        .position(|k| *k == kind)
        .map(|p| p as u32)
}

/// Cost of an implicit promotion, used to rank overloads; `None` when not allowed
pub(crate) fn promotion_cost(from: PrimitiveKind, to: PrimitiveKind) -> Option<u32> {
    if from == to {
        return Some(0);
    }
    if !can_promote(from, to) {
        return None;
    }
    match (ladder_rank(from), ladder_rank(to)) {
        (Some(f), Some(t)) => Some(t.saturating_sub(f)),
        _ => Some(1),
    }
}

fn integral_in_range(value: i64, kind: PrimitiveKind) -> bool {
    match kind {
        PrimitiveKind::Byte => u8::try_from(value).is_ok(),
        PrimitiveKind::SByte => i8::try_from(value).is_ok(),
        PrimitiveKind::Int16 => i16::try_from(value).is_ok(),
        PrimitiveKind::Int32 => i32::try_from(value).is_ok(),
        PrimitiveKind::Int64 => true,
        _ => false,
    }
}

fn as_f64(value: &LiteralValue) -> Option<f64> {
    match value {
        LiteralValue::Int32(v) => Some(f64::from(*v)),
        LiteralValue::Int64(v) => Some(*v as f64),
        LiteralValue::Decimal(v) => v.to_f64(),
        LiteralValue::Double(v) => Some(*v),
        LiteralValue::Single(v) => Some(f64::from(*v)),
        _ => None,
    }
}

/// Retype a numeric constant when its value is representable in `kind`
pub(crate) fn retype_constant(constant: &ConstantNode, kind: PrimitiveKind) -> Option<ConstantNode> {
    let value = &constant.value;
    if !value.is_numeric() {
        return None;
    }
    let retyped = match kind {
        PrimitiveKind::Byte | PrimitiveKind::SByte | PrimitiveKind::Int16 | PrimitiveKind::Int32 => {
            let v = value.as_i64().filter(|v| integral_in_range(*v, kind))?;
            LiteralValue::Int32(i32::try_from(v).ok()?)
        }
        PrimitiveKind::Int64 => LiteralValue::Int64(value.as_i64()?),
        PrimitiveKind::Decimal => LiteralValue::Decimal(match value {
            LiteralValue::Int32(v) => Decimal::from(*v),
            LiteralValue::Int64(v) => Decimal::from(*v),
            LiteralValue::Decimal(v) => *v,
            LiteralValue::Double(v) => Decimal::from_f64(*v)?,
            LiteralValue::Single(v) => Decimal::from_f32(*v)?,
            _ => return None,
        }),
        PrimitiveKind::Double => LiteralValue::Double(as_f64(value)?),
        PrimitiveKind::Single => {
            let wide = as_f64(value)?;
            let narrow = wide as f32;
            if f64::from(narrow) != wide && wide.is_finite() {
                return None;
            }
            LiteralValue::Single(narrow)
        }
        _ => return None,
    };
    let type_ref = TypeRef::primitive(kind, constant.type_ref.nullable);
    Some(ConstantNode::new(retyped, constant.text.clone(), type_ref))
}

fn convert(node: QueryNode, target: &TypeRef) -> QueryNode {
    QueryNode::Convert(ConvertNode {
        source: node.boxed(),
        type_ref: target.clone().with_nullable(true),
    })
}

/// Resolve a string constant naming members of `enum_type`
fn enum_constant(model: &dyn TypeModel, constant: &ConstantNode, target: &TypeRef) -> Option<ConstantNode> {
    let id = target.schema_id()?;
    let text = constant.value.as_str()?;
    let enum_type = model.enum_type(id)?;
    enum_type.parse_value(text)?;
    let value = LiteralValue::Enum {
        type_name: enum_type.qualified_name(),
        value: text.to_string(),
    };
    Some(ConstantNode::new(value, constant.text.clone(), target.clone()))
}

/// Open-property value whose type is only known at runtime
pub(crate) fn is_untyped(node: &QueryNode) -> bool {
    matches!(node.type_ref().ty, EdmType::None) && !node.is_null_constant()
}

/// Make `node` usable where `target` is expected
pub(crate) fn coerce(model: &dyn TypeModel, node: QueryNode, target: &TypeRef) -> Option<QueryNode> {
    if is_untyped(&node) || matches!(target.ty, EdmType::None) {
        return Some(node);
    }
    if node.is_null_constant() {
        return Some(QueryNode::constant(
            LiteralValue::Null,
            "null",
            target.clone().with_nullable(true),
        ));
    }
    let source = node.type_ref().ty.clone();
    match (&source, &target.ty) {
        (EdmType::Primitive(from), EdmType::Primitive(to)) => {
            if from == to {
                return Some(node);
            }
            if let QueryNode::Constant(constant) = &node {
                if let Some(retyped) = retype_constant(constant, *to) {
                    return Some(QueryNode::Constant(retyped));
                }
            }
            can_promote(*from, *to).then(|| convert(node, target))
        }
        (EdmType::Primitive(PrimitiveKind::String), EdmType::Enum(_)) => match &node {
            QueryNode::Constant(constant) => {
                enum_constant(model, constant, target).map(QueryNode::Constant)
            }
            _ => None,
        },
        (EdmType::Enum(a), EdmType::Enum(b)) => (a == b).then_some(node),
        (EdmType::Entity(a), EdmType::Entity(b)) | (EdmType::Complex(a), EdmType::Complex(b)) => {
            model.is_or_derives_from(*a, *b).then_some(node)
        }
        (EdmType::Collection(from), EdmType::Collection(to)) => match (&from.ty, &to.ty) {
            (EdmType::Entity(a), EdmType::Entity(b)) | (EdmType::Complex(a), EdmType::Complex(b)) => {
                model.is_or_derives_from(*a, *b).then_some(node)
            }
            (EdmType::Primitive(a), EdmType::Primitive(b)) if can_promote(*a, *b) => Some(node),
            _ => None,
        },
        _ => None,
    }
}

/// Bring two operands to a common type
///
/// Returns the coerced operands, or `None` when the types are unrelated.
pub(crate) fn unify(model: &dyn TypeModel, left: QueryNode, right: QueryNode) -> Option<(QueryNode, QueryNode)> {
    match (left.is_null_constant(), right.is_null_constant()) {
        (true, true) => return Some((left, right)),
        (true, false) => {
            let target = right.type_ref().clone();
            return Some((coerce(model, left, &target)?, right));
        }
        (false, true) => {
            let target = left.type_ref().clone();
            return Some((left, coerce(model, right, &target)?));
        }
        (false, false) => {}
    }
    if is_untyped(&left) || is_untyped(&right) {
        return Some((left, right));
    }

    let left_type = left.type_ref().clone();
    let right_type = right.type_ref().clone();
    match (left_type.as_primitive(), right_type.as_primitive()) {
        (Some(l), Some(r)) if l == r => Some((left, right)),
        (Some(l), Some(r)) => {
            // a literal takes the other side's kind when it fits
            if let QueryNode::Constant(c) = &right {
                if let Some(retyped) = retype_constant(c, l) {
                    return Some((left, QueryNode::Constant(retyped)));
                }
            }
            if let QueryNode::Constant(c) = &left {
                if let Some(retyped) = retype_constant(c, r) {
                    return Some((QueryNode::Constant(retyped), right));
                }
            }
            let common = TypeRef::primitive(common_promotion(l, r)?, true);
            Some((coerce(model, left, &common)?, coerce(model, right, &common)?))
        }
        (None, Some(PrimitiveKind::String)) if left_type.is_enum() => {
            let right = coerce(model, right, &left_type)?;
            Some((left, right))
        }
        (Some(PrimitiveKind::String), None) if right_type.is_enum() => {
            let left = coerce(model, left, &right_type)?;
            Some((left, right))
        }
        (None, None) => match (&left_type.ty, &right_type.ty) {
            (EdmType::Enum(a), EdmType::Enum(b)) if a == b => Some((left, right)),
            (EdmType::Entity(a), EdmType::Entity(b)) | (EdmType::Complex(a), EdmType::Complex(b))
                if model.is_or_derives_from(*a, *b) || model.is_or_derives_from(*b, *a) =>
            {
                Some((left, right))
            }
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odata_query_edm::EdmModel;
    use odata_query_edm::ModelBuilder;
    use rstest::rstest;

    fn model() -> EdmModel {
        ModelBuilder::default().build()
    }

    fn constant(value: LiteralValue, text: &str, kind: PrimitiveKind) -> QueryNode {
        QueryNode::constant(value, text, TypeRef::primitive(kind, false))
    }

    fn property(kind: PrimitiveKind) -> QueryNode {
        QueryNode::DynamicProperty(crate::nodes::DynamicPropertyNode {
            name: "P".into(),
            type_ref: TypeRef::primitive(kind, true),
        })
    }

    #[rstest]
    #[case(PrimitiveKind::Int32, PrimitiveKind::Int64, Some(1))]
    #[case(PrimitiveKind::Int32, PrimitiveKind::Double, Some(3))]
    #[case(PrimitiveKind::Int32, PrimitiveKind::Decimal, Some(4))]
    #[case(PrimitiveKind::Date, PrimitiveKind::DateTimeOffset, Some(1))]
    #[case(PrimitiveKind::Double, PrimitiveKind::Int32, None)]
    fn test_promotion_cost(
        #[case] from: PrimitiveKind,
        #[case] to: PrimitiveKind,
        #[case] expected: Option<u32>,
    ) {
        assert_eq!(promotion_cost(from, to), expected);
    }

    #[test]
    fn test_literal_adopts_property_kind_when_it_fits() {
        let model = model();
        let (left, right) = unify(
            &model,
            property(PrimitiveKind::Byte),
            constant(LiteralValue::Int32(200), "200", PrimitiveKind::Int32),
        )
        .expect("unifies");
        assert_eq!(left.primitive_kind(), Some(PrimitiveKind::Byte));
        assert_eq!(right.primitive_kind(), Some(PrimitiveKind::Byte));
        assert!(matches!(right, QueryNode::Constant(_)));
    }

    #[test]
    fn test_out_of_range_literal_widens_the_property() {
        let model = model();
        let (left, right) = unify(
            &model,
            property(PrimitiveKind::Byte),
            constant(LiteralValue::Int32(300), "300", PrimitiveKind::Int32),
        )
        .expect("unifies");
        assert!(matches!(left, QueryNode::Convert(_)));
        assert_eq!(left.primitive_kind(), Some(PrimitiveKind::Int32));
        assert_eq!(right.primitive_kind(), Some(PrimitiveKind::Int32));
    }

    #[test]
    fn test_null_adopts_other_side() {
        let model = model();
        let null = QueryNode::constant(LiteralValue::Null, "null", TypeRef::none());
        let (left, right) = unify(&model, property(PrimitiveKind::Guid), null).expect("unifies");
        assert_eq!(left.type_ref(), right.type_ref());
    }

    #[test]
    fn test_unrelated_kinds_do_not_unify() {
        let model = model();
        let text = constant(LiteralValue::String("x".into()), "'x'", PrimitiveKind::String);
        assert!(unify(&model, property(PrimitiveKind::Int32), text).is_none());
    }

    #[test]
    fn test_decimal_literal_against_double_property() {
        let model = model();
        let literal = constant(LiteralValue::Decimal(Decimal::new(15, 1)), "1.5", PrimitiveKind::Decimal);
        let (_, right) = unify(&model, property(PrimitiveKind::Double), literal).expect("unifies");
        match right {
            QueryNode::Constant(c) => assert_eq!(c.value, LiteralValue::Double(1.5)),
            other => panic!("expected constant, got {other:?}"),
        }
    }
}
