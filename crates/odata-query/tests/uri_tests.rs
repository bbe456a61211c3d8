//! Whole-request parsing and binding
//!
//! Covers:
//! - Resource paths with keys and navigation
//! - Empty versus absent options
//! - Duplicate and no-dollar options
//! - Parameter aliases
//! - `$apply` and `$compute` feeding later options
//! - `$select`/`$expand` with nested options
//! - Nesting limits under the default settings

use insta::assert_snapshot;
use odata_query::ast::OrderByDirection;
use odata_query::diagnostics::{ODQ0105, ODQ0106, ODQ0112, ODQ0200, ODQ0212};
use odata_query::edm::NavigationProperty;
use odata_query::semantic::SelectItem;
use odata_query::{
    EdmModel, ModelBuilder, ParserSettings, PrimitiveKind, QueryOptions, SystemQueryOption, TypeRef, UriQueryParser,
};
use pretty_assertions::assert_eq;
use rstest::rstest;

fn shop_model() -> EdmModel {
    let mut b = ModelBuilder::new("Shop", "Container");

    let order = b.add_entity_type("Shop", "Order").unwrap();
    b.add_key_property(order, "Id", PrimitiveKind::Int32).unwrap();
    b.add_structural_property(order, "Region", TypeRef::string()).unwrap();
    b.add_structural_property(order, "Total", TypeRef::primitive(PrimitiveKind::Decimal, false))
        .unwrap();

    let person = b.add_entity_type("Shop", "Person").unwrap();
    b.add_key_property(person, "Id", PrimitiveKind::Int32).unwrap();
    b.add_structural_property(person, "Name", TypeRef::string()).unwrap();
    b.add_structural_property(person, "Age", TypeRef::int32()).unwrap();
    b.add_navigation_property(person, NavigationProperty::collection("Orders", order))
        .unwrap();

    b.add_entity_set("People", person).unwrap();
    b.add_entity_set("Orders", order).unwrap();
    b.add_navigation_binding("People", "Orders", "Orders").unwrap();
    b.build()
}

#[test]
fn test_filter_binds_relative_to_the_addressed_collection() {
    let model = shop_model();
    let uri = UriQueryParser::new(&model)
        .parse("People(1)/Orders?$filter=Total gt 100&$orderby=Region desc&$top=5&$skip=10&$count=true")
        .unwrap();

    assert_eq!(uri.path.to_string(), "People(1)/Orders");
    assert_eq!(uri.path.navigation_source(), Some("Orders"));
    let filter = uri.filter.unwrap();
    assert_snapshot!(filter.expression.to_string(), @"($it/Total gt 100)");
    assert_eq!(filter.range_variable.navigation_source.as_deref(), Some("Orders"));

    let orderby = uri.orderby.unwrap();
    assert_eq!(orderby.items.len(), 1);
    assert_eq!(orderby.items[0].direction, OrderByDirection::Descending);
    assert_eq!((uri.top, uri.skip, uri.count), (Some(5), Some(10), Some(true)));
}

#[test]
fn test_empty_expand_is_a_syntax_error_and_absent_expand_is_none() {
    let model = shop_model();
    let parser = UriQueryParser::new(&model);

    let err = parser.parse("People?$expand=").unwrap_err();
    assert!(err.is_syntactic());
    assert_eq!(err.code(), ODQ0105);

    let uri = parser.parse("People").unwrap();
    assert!(uri.select_expand.is_none());
    assert!(uri.filter.is_none());
}

#[test]
fn test_duplicate_option_is_rejected_before_binding() {
    let model = shop_model();
    let err = UriQueryParser::new(&model)
        .parse("People?$filter=Age gt 1&$filter=Age lt 9")
        .unwrap_err();
    assert_eq!(err.code(), ODQ0112);
}

#[test]
fn test_options_without_dollar() {
    let model = shop_model();
    let settings = ParserSettings {
        enable_no_dollar_query_options: true,
        ..ParserSettings::default()
    };
    let uri = UriQueryParser::new(&model)
        .with_parser_settings(settings)
        .parse("People?filter=Age gt 30&top=1&tracking=on")
        .unwrap();
    assert!(uri.filter.is_some());
    assert_eq!(uri.top, Some(1));
    assert_eq!(uri.custom, vec![("tracking".to_string(), "on".to_string())]);
}

#[test]
fn test_parameter_alias_values_come_from_the_query_string() {
    let model = shop_model();
    let uri = UriQueryParser::new(&model)
        .parse("People?$filter=Name eq @who&@who='Ann'")
        .unwrap();
    assert_eq!(uri.filter.unwrap().expression.to_string(), "($it/Name eq 'Ann')");
    assert_eq!(uri.aliases.get("who").map(String::as_str), Some("'Ann'"));
}

#[test]
fn test_apply_output_is_what_filter_and_orderby_see() {
    let model = shop_model();
    let parser = UriQueryParser::new(&model);
    let uri = parser
        .parse("Orders?$apply=groupby((Region),aggregate(Total with sum as Sum))&$filter=Sum gt 10&$orderby=Region")
        .unwrap();
    assert_eq!(uri.apply.as_ref().unwrap().context_projection(), Some("(Region,Sum)"));
    assert_eq!(uri.filter.unwrap().expression.referenced_properties(), vec!["Sum"]);

    let err = parser
        .parse("Orders?$apply=groupby((Region))&$filter=Total gt 10")
        .unwrap_err();
    assert!(err.is_binding());
    assert_eq!(err.code(), ODQ0212);
}

#[test]
fn test_computed_alias_is_visible_to_orderby() {
    let model = shop_model();
    let uri = UriQueryParser::new(&model)
        .parse("Orders?$compute=Total mul 2 as Twice&$orderby=Twice desc")
        .unwrap();
    let compute = uri.compute.unwrap();
    assert!(compute.find("Twice").is_some());
    assert_eq!(uri.orderby.unwrap().items[0].direction, OrderByDirection::Descending);
}

#[test]
fn test_select_and_nested_expand() {
    let model = shop_model();
    let uri = UriQueryParser::new(&model)
        .parse("People?$select=Name&$expand=Orders($filter=Total gt 5;$top=1)")
        .unwrap();
    let clause = uri.select_expand.unwrap();
    assert!(!clause.all_selected);

    let selected: Vec<_> = clause.selected().filter_map(SelectItem::path).collect();
    assert_eq!(selected, vec!["Name"]);

    let expanded: Vec<_> = clause.expanded().collect();
    assert_eq!(expanded.len(), 1);
    let SelectItem::ExpandedNavigation {
        navigation_source,
        options,
        ..
    } = expanded[0]
    else {
        panic!("expected an expanded navigation");
    };
    assert_eq!(navigation_source.as_deref(), Some("Orders"));
    assert_eq!(options.top, Some(1));
    assert!(options.filter.is_some());
}

#[rstest]
#[case("People?$filter=Nickname eq 'x'", true)]
#[case("People?$filter=Name eq", false)]
#[case("People?$orderby=Age,", false)]
#[case("People(1)/Friends", true)]
fn test_binding_and_syntax_errors_are_distinguishable(#[case] uri: &str, #[case] binding: bool) {
    let model = shop_model();
    let err = UriQueryParser::new(&model).parse(uri).unwrap_err();
    assert_eq!(err.is_binding(), binding, "{err}");
    assert_eq!(err.is_syntactic(), !binding, "{err}");
}

#[test]
fn test_unknown_property_is_a_binding_error() {
    let model = shop_model();
    let err = UriQueryParser::new(&model)
        .parse("People?$filter=Nickname eq 'x'")
        .unwrap_err();
    assert_eq!(err.code(), ODQ0200);
}

#[test]
fn test_bind_takes_pre_split_options() {
    let model = shop_model();
    let options = QueryOptions::parse("$search=blue NOT red", &ParserSettings::default()).unwrap();
    assert!(options.contains(SystemQueryOption::Search));
    let uri = UriQueryParser::new(&model).bind("Orders", &options).unwrap();
    assert_eq!(uri.search.unwrap().expression.to_string(), "(blue AND (NOT red))");
}

fn nested(open: &str, inner: &str, close: &str, levels: usize) -> String {
    format!("{}{inner}{}", open.repeat(levels), close.repeat(levels))
}

#[rstest]
#[case("$filter", nested("(", "true", ")", 3000))]
#[case("$filter", format!("Age gt 1{}", " or Age gt 1".repeat(3000)))]
#[case("$orderby", nested("(", "Age", ")", 3000))]
#[case("$compute", format!("{} as X", nested("(", "Age", ")", 3000)))]
#[case("$search", nested("(", "blue", ")", 3000))]
#[case("$search", "blue ".repeat(3000))]
#[case("$select", nested("Name($select=", "Name", ")", 3000))]
#[case("$expand", nested("Orders($expand=", "Orders", ")", 3000))]
#[case("$apply", nested("groupby((Name),", "groupby((Name))", ")", 3000))]
fn test_deep_options_fail_with_a_diagnostic(#[case] option: &str, #[case] value: String) {
    let model = shop_model();
    let err = UriQueryParser::new(&model)
        .parse(&format!("People?{option}={value}"))
        .unwrap_err();
    assert!(err.is_syntactic(), "{option}: {err}");
    assert_eq!(err.code(), ODQ0106, "{option}: {err}");
}
