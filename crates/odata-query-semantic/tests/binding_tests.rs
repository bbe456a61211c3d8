//! End-to-end binding of parsed query options against a model

mod common;

use common::sales_model;
use insta::assert_snapshot;
use odata_query_diagnostics::ErrorCode;
use odata_query_edm::PrimitiveKind;
use odata_query_parser::{parse_apply, parse_filter, parse_path, parse_search, ParserSettings, QueryParser};
use odata_query_semantic::{
    bind, bind_apply, bind_filter, bind_path, bind_search, BinderSettings, BindingContext, QueryNode,
};
use pretty_assertions::assert_eq;
use rstest::rstest;

#[test]
fn name_eq_bob_binds_property_access_against_constant() {
    let model = sales_model();
    let context = BindingContext::for_navigation_source(&model, "People").unwrap();
    let filter = bind_filter(&parse_filter("Name eq 'Bob'").unwrap(), &context).unwrap();

    assert_snapshot!(filter.expression.to_string(), @"($it/Name eq 'Bob')");
    let QueryNode::BinaryOperator(comparison) = &filter.expression else {
        panic!("expected a binary operator");
    };
    assert!(matches!(*comparison.left, QueryNode::SingleValuePropertyAccess(_)));
    assert!(matches!(*comparison.right, QueryNode::Constant(_)));
    assert_eq!(comparison.right.primitive_kind(), Some(PrimitiveKind::String));
    assert!(filter.expression.type_ref().is_boolean());
}

#[rstest]
#[case("a OR b AND c", "(a OR (b AND c))")]
#[case("a AND b OR c", "((a AND b) OR c)")]
#[case("NOT a b", "((NOT a) AND b)")]
#[case("NOT (a OR b)", "(NOT (a OR b))")]
fn search_and_binds_tighter_than_or(#[case] text: &str, #[case] expected: &str) {
    let clause = bind_search(&parse_search(text).unwrap());
    assert_eq!(clause.expression.to_string(), expected);
}

#[test]
fn search_not_excludes_matches() {
    let clause = bind_search(&parse_search("bike NOT red").unwrap());
    assert!(clause.matches("Blue Bike"));
    assert!(!clause.matches("Red Bike"));
}

#[test]
fn apply_projection_lists_groupings_then_aggregates() {
    let model = sales_model();
    let context = BindingContext::for_navigation_source(&model, "Sales").unwrap();
    let apply = bind_apply(
        &parse_apply("groupby((Category),aggregate(Amount with sum as Total))").unwrap(),
        &context,
    )
    .unwrap();
    assert_eq!(apply.context_projection(), Some("(Category,Total)"));

    let after = apply.apply_to(context);
    let filter = bind_filter(&parse_filter("Total gt 1000").unwrap(), &after).unwrap();
    assert_eq!(filter.expression.referenced_properties(), vec!["Total"]);
    let err = bind_filter(&parse_filter("Quantity gt 1").unwrap(), &after).unwrap_err();
    assert_eq!(err.code(), ErrorCode::new(212));
}

#[test]
fn binding_is_idempotent() {
    let model = sales_model();
    let context = BindingContext::for_navigation_source(&model, "People").unwrap();
    let token = parse_filter("Sales/any(s: s/Amount gt 10) and Age in (30, 40)").unwrap();
    assert_eq!(bind(&token, &context).unwrap(), bind(&token, &context).unwrap());

    let sales = BindingContext::for_navigation_source(&model, "Sales").unwrap();
    let pipeline = parse_apply("filter(Quantity gt 1)/groupby((Category))").unwrap();
    assert_eq!(bind_apply(&pipeline, &sales).unwrap(), bind_apply(&pipeline, &sales).unwrap());
}

#[test]
fn key_values_are_retyped_to_the_key_property() {
    let model = sales_model();
    let path = bind_path(&parse_path("Sales(42)/Product").unwrap(), &BindingContext::new(&model)).unwrap();
    let key = &path.segments[1];
    let odata_query_semantic::PathSegmentKind::Key(keys) = &key.kind else {
        panic!("expected a key segment");
    };
    assert_eq!(keys[0].0, "Id");
    assert_eq!(keys[0].1.type_ref.as_primitive(), Some(PrimitiveKind::Int64));
    assert_eq!(path.navigation_source(), Some("Products"));
}

#[test]
fn bound_function_prefers_most_derived_binding_type() {
    let model = sales_model();
    let context = BindingContext::for_navigation_source(&model, "People").unwrap();

    let on_person = bind(&parse_filter("Sales.Rating()").unwrap(), &context).unwrap();
    assert_eq!(on_person.primitive_kind(), Some(PrimitiveKind::Int32));

    let on_manager = bind(&parse_filter("Sales.Manager/Sales.Rating()").unwrap(), &context).unwrap();
    assert_eq!(on_manager.primitive_kind(), Some(PrimitiveKind::Int64));
}

#[rstest]
#[case("Sales.Employee/Sales.Bonus() gt 1", 207)]
#[case("Sales.Bonus() gt 1", 208)]
#[case("Sales.Rating(year=2020) gt 1", 208)]
#[case("Sales.Category/Name eq 'x'", 205)]
fn bound_function_resolution_errors(#[case] text: &str, #[case] code: u16) {
    let model = sales_model();
    let context = BindingContext::for_navigation_source(&model, "People").unwrap();
    let err = bind_filter(&parse_filter(text).unwrap(), &context).unwrap_err();
    assert!(err.is_binding());
    assert_eq!(err.code(), ErrorCode::new(code), "{err}");
}

#[rstest]
#[case("Sales/any(s: s/Amount gt 100)", "$it/Sales/any(s:(s/Amount gt 100))")]
#[case("Sales/all(s: s/Product/Price gt 1)", "$it/Sales/all(s:(s/Product/Price gt 1))")]
#[case("Sales/any()", "$it/Sales/any()")]
fn lambdas_introduce_range_variables(#[case] text: &str, #[case] expected: &str) {
    let model = sales_model();
    let context = BindingContext::for_navigation_source(&model, "People").unwrap();
    let filter = bind_filter(&parse_filter(text).unwrap(), &context).unwrap();
    assert_eq!(filter.expression.to_string(), expected);
    assert_eq!(filter.expression.referenced_properties(), vec!["Sales"]);
}

#[test]
fn parameter_aliases_bind_in_place() {
    let model = sales_model();
    let context = BindingContext::for_navigation_source(&model, "People")
        .unwrap()
        .with_alias("who", "'Ann'")
        .with_alias("loop", "@loop");

    let filter = bind_filter(&parse_filter("Name eq @who").unwrap(), &context).unwrap();
    assert_snapshot!(filter.expression.to_string(), @"($it/Name eq 'Ann')");

    let err = bind_filter(&parse_filter("Name eq @loop").unwrap(), &context).unwrap_err();
    assert_eq!(err.code(), ErrorCode::new(213));
}

#[test]
fn case_insensitive_resolution_is_opt_in() {
    let model = sales_model();
    let strict = BindingContext::for_navigation_source(&model, "People").unwrap();
    let err = bind_filter(&parse_filter("name eq 'Bob'").unwrap(), &strict).unwrap_err();
    assert_eq!(err.code(), ErrorCode::new(200));

    let relaxed = BindingContext::new(&model)
        .with_settings(BinderSettings::case_insensitive())
        .rooted_at("people")
        .unwrap();
    let filter = bind_filter(&parse_filter("name eq 'Bob'").unwrap(), &relaxed).unwrap();
    assert_eq!(filter.expression.to_string(), "($it/Name eq 'Bob')");
    assert_eq!(filter.range_variable.navigation_source.as_deref(), Some("People"));
}

#[test]
fn trees_within_the_default_parser_limit_bind_with_default_settings() {
    let model = sales_model();
    let context = BindingContext::for_navigation_source(&model, "People").unwrap();
    let limit = ParserSettings::default().max_depth;
    assert!(context.settings().max_depth <= limit);

    let negations = |n: usize| format!("{}true", "not ".repeat(n));
    let conjunctions = |n: usize| format!("true{}", " and true".repeat(n));
    for text in [negations(limit - 1), conjunctions(limit - 1)] {
        let token = parse_filter(&text).unwrap();
        assert!(bind_filter(&token, &context).is_ok());
    }

    // Trees only a relaxed parser accepts stop at the binding limit
    let relaxed = QueryParser::new(ParserSettings::default().with_max_depth(10 * limit));
    for text in [negations(limit), conjunctions(limit), negations(5 * limit)] {
        let token = relaxed.parse_filter(&text).unwrap();
        let err = bind_filter(&token, &context).unwrap_err();
        assert!(err.is_binding());
        assert_eq!(err.code(), ErrorCode::new(217));
    }
}
