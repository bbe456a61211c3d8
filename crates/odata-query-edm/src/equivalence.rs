//! Type equivalence
//!
//! Equivalence is decided by kind first. Primitives compare by value because
//! primitive type values are freely duplicated; schema types (entity, complex,
//! enum) compare by arena handle, so two separately declared `NS.Foo` types are
//! never equivalent even when their declarations match property for property.

use crate::operation::Operation;
use crate::types::{EdmType, RowProperty, TypeRef};

/// Whether two type definitions denote the same type
pub fn is_equivalent_to(a: &EdmType, b: &EdmType) -> bool {
    if a.kind() != b.kind() {
        return false;
    }
    match (a, b) {
        (EdmType::None, EdmType::None) => true,
        // The kind determines the qualified name
        (EdmType::Primitive(x), EdmType::Primitive(y)) => x == y,
        (EdmType::Entity(x), EdmType::Entity(y))
        | (EdmType::Complex(x), EdmType::Complex(y))
        | (EdmType::Enum(x), EdmType::Enum(y))
        | (EdmType::EntityReference(x), EdmType::EntityReference(y)) => x == y,
        (EdmType::Collection(x), EdmType::Collection(y)) => type_ref_equivalent(x, y),
        (EdmType::Row(x), EdmType::Row(y)) => rows_equivalent(x, y),
        (a, b) => unreachable!(
            "type kinds {} and {} matched but their variants did not",
            a.kind(),
            b.kind()
        ),
    }
}

/// Whether two type references are interchangeable, nullability and facets included
pub fn type_ref_equivalent(a: &TypeRef, b: &TypeRef) -> bool {
    if a.nullable != b.nullable {
        return false;
    }
    match (a.as_primitive(), b.as_primitive()) {
        (Some(x), Some(y)) => x == y && a.facets.relevant_eq(&b.facets, x),
        _ => is_equivalent_to(&a.ty, &b.ty),
    }
}

fn rows_equivalent(a: &[RowProperty], b: &[RowProperty]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| x.name == y.name && type_ref_equivalent(&x.type_ref, &y.type_ref))
}

/// Same name, equivalent return type and equivalent parameter types in order
pub fn signatures_equivalent(a: &Operation, b: &Operation) -> bool {
    let returns = match (&a.return_type, &b.return_type) {
        (Some(x), Some(y)) => is_equivalent_to(&x.ty, &y.ty),
        (None, None) => true,
        _ => false,
    };
    returns
        && a.qualified_name() == b.qualified_name()
        && a.parameters.len() == b.parameters.len()
        && a.parameters
            .iter()
            .zip(&b.parameters)
            .all(|(x, y)| is_equivalent_to(&x.type_ref.ty, &y.type_ref.ty))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelBuilder;
    use crate::primitive::PrimitiveKind;
    use crate::types::{MaxLength, Scale};
    use proptest::prelude::*;

    fn primitive_kind() -> impl Strategy<Value = PrimitiveKind> {
        proptest::sample::select(PrimitiveKind::all().to_vec())
    }

    fn edm_type() -> impl Strategy<Value = EdmType> {
        let mut builder = ModelBuilder::default();
        let mut ids = Vec::new();
        for name in ["A", "B", "C"] {
            if let Ok(id) = builder.add_entity_type("NS", name) {
                ids.push(id);
            }
        }
        let leaf = prop_oneof![
            Just(EdmType::None),
            primitive_kind().prop_map(EdmType::Primitive),
            proptest::sample::select(ids.clone()).prop_map(EdmType::Entity),
            proptest::sample::select(ids).prop_map(EdmType::EntityReference),
        ];
        leaf.prop_recursive(3, 12, 3, |inner| {
            prop_oneof![
                (inner.clone(), any::<bool>())
                    .prop_map(|(t, n)| EdmType::Collection(Box::new(TypeRef::new(t, n)))),
                proptest::collection::vec(("[a-c]", inner), 0..3).prop_map(|props| {
                    EdmType::Row(
                        props
                            .into_iter()
                            .map(|(name, t)| RowProperty::new(name, TypeRef::new(t, true)))
                            .collect(),
                    )
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn equivalence_is_reflexive(t in edm_type()) {
            prop_assert!(is_equivalent_to(&t, &t));
        }

        #[test]
        fn equivalence_is_symmetric(a in edm_type(), b in edm_type()) {
            prop_assert_eq!(is_equivalent_to(&a, &b), is_equivalent_to(&b, &a));
        }

        #[test]
        fn mismatched_kinds_are_never_equivalent(a in edm_type(), b in edm_type()) {
            if a.kind() != b.kind() {
                prop_assert!(!is_equivalent_to(&a, &b));
            }
        }
    }

    #[test]
    fn test_schema_types_compare_by_identity() {
        let mut first = ModelBuilder::default();
        let mut second = ModelBuilder::default();
        let (Ok(a), Ok(b)) = (
            first.add_entity_type("NS", "Foo"),
            second.add_entity_type("NS", "Foo"),
        ) else {
            panic!("declaring Foo failed");
        };
        assert!(is_equivalent_to(&EdmType::Entity(a), &EdmType::Entity(a)));
        assert!(!is_equivalent_to(&EdmType::Entity(a), &EdmType::Entity(b)));
    }

    #[test]
    fn test_primitive_copies_are_equivalent() {
        let a = EdmType::Primitive(PrimitiveKind::Int32);
        let b = a.clone();
        assert!(is_equivalent_to(&a, &b));
        assert!(!is_equivalent_to(&a, &EdmType::Primitive(PrimitiveKind::Int64)));
    }

    #[test]
    fn test_type_refs_compare_nullability_and_relevant_facets() {
        let bounded = TypeRef::string().with_max_length(MaxLength::Bounded(10));
        assert!(type_ref_equivalent(&bounded, &bounded.clone()));
        assert!(!type_ref_equivalent(&bounded, &TypeRef::string()));
        assert!(!type_ref_equivalent(&bounded, &bounded.clone().with_nullable(false)));

        // Scale is irrelevant for Int32
        let int = TypeRef::int32();
        assert!(type_ref_equivalent(&int, &int.clone().with_scale(Scale::Fixed(2))));
    }

    #[test]
    fn test_row_order_matters() {
        let ab = EdmType::Row(vec![
            RowProperty::new("a", TypeRef::int32()),
            RowProperty::new("b", TypeRef::string()),
        ]);
        let ba = EdmType::Row(vec![
            RowProperty::new("b", TypeRef::string()),
            RowProperty::new("a", TypeRef::int32()),
        ]);
        assert!(is_equivalent_to(&ab, &ab.clone()));
        assert!(!is_equivalent_to(&ab, &ba));
    }

    #[test]
    fn test_signature_equivalence() {
        let f = Operation::function("NS", "F", TypeRef::int32())
            .parameter("x", TypeRef::int32())
            .parameter("y", TypeRef::string());
        let renamed = Operation::function("NS", "F", TypeRef::int32())
            .parameter("p", TypeRef::int32())
            .parameter("q", TypeRef::string());
        let reordered = Operation::function("NS", "F", TypeRef::int32())
            .parameter("y", TypeRef::string())
            .parameter("x", TypeRef::int32());
        assert!(signatures_equivalent(&f, &renamed));
        assert!(!signatures_equivalent(&f, &reordered));
    }
}
