//! Shared sales model for the integration tests

use odata_query_edm::{EdmModel, ModelBuilder, NavigationProperty, Operation, PrimitiveKind, TypeRef};

/// Products, categories, sales and people with a small employee hierarchy
pub fn sales_model() -> EdmModel {
    let mut b = ModelBuilder::new("Sales", "Container");

    let category = b.add_entity_type("Sales", "Category").unwrap();
    b.add_key_property(category, "Id", PrimitiveKind::Int32).unwrap();
    b.add_structural_property(category, "Name", TypeRef::string()).unwrap();

    let product = b.add_entity_type("Sales", "Product").unwrap();
    b.add_key_property(product, "Id", PrimitiveKind::Int32).unwrap();
    b.add_structural_property(product, "Name", TypeRef::string()).unwrap();
    b.add_structural_property(product, "Category", TypeRef::string()).unwrap();
    b.add_structural_property(product, "Price", TypeRef::primitive(PrimitiveKind::Decimal, false))
        .unwrap();
    b.add_navigation_property(product, NavigationProperty::single("Group", category))
        .unwrap();

    let sale = b.add_entity_type("Sales", "Sale").unwrap();
    b.add_key_property(sale, "Id", PrimitiveKind::Int64).unwrap();
    b.add_structural_property(sale, "Amount", TypeRef::primitive(PrimitiveKind::Decimal, false))
        .unwrap();
    b.add_structural_property(sale, "Category", TypeRef::string()).unwrap();
    b.add_structural_property(sale, "Quantity", TypeRef::int32()).unwrap();
    b.add_navigation_property(sale, NavigationProperty::single("Product", product))
        .unwrap();

    let person = b.add_entity_type("Sales", "Person").unwrap();
    b.add_key_property(person, "Id", PrimitiveKind::Int32).unwrap();
    b.add_structural_property(person, "Name", TypeRef::string()).unwrap();
    b.add_structural_property(person, "Age", TypeRef::int32()).unwrap();
    b.add_navigation_property(person, NavigationProperty::collection("Sales", sale))
        .unwrap();
    let employee = b.add_entity_type("Sales", "Employee").unwrap();
    b.set_base_type(employee, person).unwrap();
    let manager = b.add_entity_type("Sales", "Manager").unwrap();
    b.set_base_type(manager, employee).unwrap();

    b.add_entity_set("Products", product).unwrap();
    b.add_entity_set("Categories", category).unwrap();
    b.add_entity_set("Sales", sale).unwrap();
    b.add_entity_set("People", person).unwrap();
    b.add_navigation_binding("Products", "Group", "Categories").unwrap();
    b.add_navigation_binding("Sales", "Product", "Products").unwrap();
    b.add_navigation_binding("People", "Sales", "Sales").unwrap();

    // Int32 on Person, Int64 on Employee so the chosen overload is visible in the type
    for (binding, returns) in [(person, TypeRef::int32()), (employee, TypeRef::int64())] {
        b.add_operation(
            Operation::function("Sales", "Rating", returns)
                .bound()
                .parameter("person", TypeRef::entity(binding, false)),
        );
    }
    b.add_operation(
        Operation::function("Sales", "Bonus", TypeRef::int32())
            .bound()
            .parameter("person", TypeRef::entity(employee, false)),
    );
    b.add_operation(
        Operation::function("Sales", "Bonus", TypeRef::int64())
            .bound()
            .parameter("person", TypeRef::entity(employee, false)),
    );
    b.build()
}
