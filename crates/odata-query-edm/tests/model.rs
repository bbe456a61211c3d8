//! Model construction, lookup and validation tests
//!
//! Covers:
//! - Inheritance-aware property and key lookup
//! - Derived types and derivation distance
//! - Builder rejections (duplicates, cycles, kind mismatches)
//! - Whole-model validation results

use odata_query_diagnostics::{ODQ0300, ODQ0306, ODQ0307, ODQ0308, ODQ0309};
use odata_query_edm::*;
use pretty_assertions::assert_eq;
use std::sync::Arc;

struct Fixture {
    model: EdmModel,
    person: SchemaTypeId,
    employee: SchemaTypeId,
    order: SchemaTypeId,
}

fn fixture() -> Fixture {
    let mut b = ModelBuilder::new("Sales", "Container");
    let person = b.add_entity_type("NS", "Person").unwrap();
    let employee = b.add_entity_type("NS", "Employee").unwrap();
    let order = b.add_entity_type("NS", "Order").unwrap();

    b.add_key_property(person, "Id", PrimitiveKind::Int32).unwrap();
    b.add_structural_property(person, "Name", TypeRef::string()).unwrap();
    b.add_navigation_property(person, NavigationProperty::collection("Orders", order))
        .unwrap();
    b.set_base_type(employee, person).unwrap();
    b.add_structural_property(employee, "Salary", TypeRef::primitive(PrimitiveKind::Decimal, true))
        .unwrap();
    b.add_key_property(order, "OrderId", PrimitiveKind::Int64).unwrap();

    b.add_entity_set("People", person).unwrap();
    b.add_entity_set("Orders", order).unwrap();
    b.add_navigation_binding("People", "Orders", "Orders").unwrap();

    Fixture {
        model: b.build(),
        person,
        employee,
        order,
    }
}

#[test]
fn test_inherited_property_lookup() {
    let f = fixture();
    let name = f.model.find_property(f.employee, "Name").unwrap();
    assert_eq!(name.type_ref(), TypeRef::string());
    assert!(f.model.find_property(f.person, "Salary").is_none());

    let names: Vec<&str> = f
        .model
        .all_properties(f.employee)
        .into_iter()
        .map(Property::name)
        .collect();
    assert_eq!(names, vec!["Id", "Name", "Orders", "Salary"]);
}

#[test]
fn test_keys_come_from_the_root_type() {
    let f = fixture();
    let keys: Vec<&str> = f
        .model
        .key_properties(f.employee)
        .into_iter()
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(keys, vec!["Id"]);
}

#[test]
fn test_derivation() {
    let f = fixture();
    assert_eq!(f.model.derivation_distance(f.employee, f.person), Some(1));
    assert_eq!(f.model.derivation_distance(f.person, f.person), Some(0));
    assert_eq!(f.model.derivation_distance(f.person, f.employee), None);
    assert_eq!(f.model.derived_types(f.person), vec![f.employee]);
    assert!(!f.model.is_or_derives_from(f.order, f.person));
}

#[test]
fn test_type_name_resolution() {
    let f = fixture();
    assert_eq!(
        f.model.resolve_type_name("Edm.Int32"),
        Some(EdmType::Primitive(PrimitiveKind::Int32))
    );
    assert_eq!(f.model.resolve_type_name("NS.Order"), Some(EdmType::Entity(f.order)));
    assert_eq!(f.model.resolve_type_name("NS.Missing"), None);
    assert_eq!(
        f.model.display_type(&TypeRef::collection(TypeRef::entity(f.order, false))),
        "Collection(NS.Order)"
    );
}

#[test]
fn test_container_lookup() {
    let f = fixture();
    let container = f.model.find_entity_container("Sales.Container").unwrap();
    assert_eq!(container.find_entity_set("People").unwrap().entity_type, f.person);
    assert_eq!(container.binding_target("People", "Orders").unwrap().name, "Orders");
    assert!(container.binding_target("Orders", "People").is_none());
}

#[test]
fn test_handles_from_other_models_are_rejected() {
    let f = fixture();
    let other = fixture();
    assert!(f.model.schema_type(other.person).is_none());
    assert!(!is_equivalent_to(&EdmType::Entity(f.person), &EdmType::Entity(other.person)));
}

#[test]
fn test_builder_rejections() {
    let mut b = ModelBuilder::default();
    let a = b.add_entity_type("NS", "A").unwrap();
    let c = b.add_entity_type("NS", "C").unwrap();
    let complex = b.add_complex_type("NS", "Address").unwrap();

    assert_eq!(
        b.add_entity_type("NS", "A"),
        Err(ModelError::DuplicateType("NS.A".into()))
    );
    b.set_base_type(c, a).unwrap();
    assert_eq!(
        b.set_base_type(a, c),
        Err(ModelError::InheritanceCycle("NS.A".into()))
    );
    assert!(matches!(
        b.set_base_type(complex, a),
        Err(ModelError::WrongKind(_, _))
    ));
    b.add_structural_property(a, "X", TypeRef::int32()).unwrap();
    assert!(matches!(
        b.add_structural_property(a, "X", TypeRef::string()),
        Err(ModelError::DuplicateProperty { .. })
    ));
}

#[test]
fn test_valid_model_has_no_errors() {
    let f = fixture();
    assert!(f.model.is_valid(), "{:?}", f.model.validation_errors());
}

#[test]
fn test_validation_accumulates_every_problem() {
    let mut b = ModelBuilder::default();
    let keyless = b.add_entity_type("NS", "Keyless").unwrap();
    let bad_key = b.add_entity_type("NS", "BadKey").unwrap();
    b.add_structural_property(bad_key, "Id", TypeRef::string()).unwrap();
    b.set_key(bad_key, &["Id"]).unwrap();
    b.add_entity_set("Things", keyless).unwrap();
    b.add_navigation_binding("Things", "Missing", "Nowhere").unwrap();

    b.add_operation(Operation::function("NS", "Orphan", TypeRef::int32()).bound());
    for (param, ty) in [
        ("x", TypeRef::string()),
        ("y", TypeRef::int32()),
        ("x", TypeRef::boolean()),
    ] {
        b.add_operation(
            Operation::function("NS", "F", TypeRef::int32())
                .bound()
                .parameter("it", TypeRef::entity(keyless, false))
                .parameter(param, ty),
        );
    }

    let model = Arc::new(b.build());
    let codes: Vec<_> = model.validation_errors().iter().map(|e| e.code).collect();
    assert_eq!(
        codes,
        vec![
            ODQ0306,
            // F(x: Boolean) repeats the parameter names of F(x: String)
            ODQ0300,
            ODQ0307,
            ODQ0308,
            ODQ0309,
            ODQ0309,
        ]
    );
    assert!(!model.is_valid());
}
