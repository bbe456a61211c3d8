//! Tests for the structural query options
//!
//! Covers:
//! - `$search` precedence and negation
//! - `$select`/`$expand` trees, nesting and normalisation
//! - `$apply` pipelines and `$compute`
//! - Resource paths and the scalar options

use insta::assert_snapshot;
use odata_query_ast::*;
use odata_query_diagnostics::{ErrorCode, ODQ0104, ODQ0105, ODQ0106, ODQ0107, ODQ0109};
use odata_query_parser::*;
use pretty_assertions::assert_eq;
use rstest::rstest;

// === $search ===

#[test]
fn test_search_and_binds_tighter_than_or() {
    let tree = parse_search("A AND B OR C").expect("search parses");
    assert_eq!(
        tree,
        SearchToken::or(
            SearchToken::and(SearchToken::Term("A".into()), SearchToken::Term("B".into())),
            SearchToken::Term("C".into()),
        )
    );
}

#[test]
fn test_search_not_is_a_single_negation() {
    let tree = parse_search("NOT A").expect("search parses");
    assert_eq!(tree, SearchToken::not(SearchToken::Term("A".into())));
}

#[test]
fn test_search_rendering() {
    assert_snapshot!(
        parse_search("mountain bike OR \"road bike\" NOT red").expect("search parses").to_string(),
        @r#"((mountain AND bike) OR ("road bike" AND (NOT red)))"#
    );
}

#[test]
fn test_search_default_depth_limit() {
    let limit = ParserSettings::default().max_search_depth;
    let parens = |n: usize| format!("{}A{}", "(".repeat(n), ")".repeat(n));
    let nots = |n: usize| format!("{}A", "NOT ".repeat(n));
    let words = |n: usize| vec!["A"; n].join(" ");
    assert!(parse_search(&parens(limit - 1)).is_ok());
    assert!(parse_search(&nots(limit - 1)).is_ok());
    assert!(parse_search(&words(limit)).is_ok());
    for text in [parens(limit), nots(limit), words(limit + 1), parens(5000), words(5000)] {
        let err = parse_search(&text).expect_err("search nested past the default limit");
        assert_eq!(err.code(), ODQ0106);
    }
}

// === $select / $expand ===

#[test]
fn test_empty_expand_is_an_error() {
    let err = parse_expand("").expect_err("empty $expand");
    assert_eq!(err.code(), ODQ0105);
    assert!(err.is_syntactic());
}

#[test]
fn test_expand_tree_rendering() {
    let expand = parse_expand("Orders($expand=Items($select=Name,Price);$top=2),Manager/$ref")
        .expect("expand parses");
    let paths: Vec<String> = expand.terms.iter().map(|t| t.path.to_string()).collect();
    assert_eq!(paths, vec!["Orders", "Manager/$ref"]);

    let orders = &expand.terms[0];
    assert_eq!(orders.options.top, Some(2));
    let items = orders
        .expand
        .as_ref()
        .map(|nested| &nested.terms[0])
        .expect("nested expand");
    let selected: Vec<String> = items
        .options
        .select
        .iter()
        .flat_map(|s| s.terms.iter().map(|t| t.path.to_string()))
        .collect();
    assert_eq!(selected, vec!["Name", "Price"]);
}

#[test]
fn test_select_with_type_cast_and_nested_options() {
    let select = parse_select("Name,NS.Manager/Budget,Addresses($filter=City eq 'Oslo';$top=1)")
        .expect("select parses");
    assert_eq!(select.terms.len(), 3);
    assert_eq!(
        select.terms[1].path.segments(),
        vec![
            &SegmentKind::Named("NS.Manager".into()),
            &SegmentKind::Named("Budget".into())
        ]
    );
    assert_eq!(select.terms[2].options.top, Some(1));
}

#[test]
fn test_nested_values_keep_separators_inside_literals() {
    let expand = parse_expand(r#"Orders($filter=Note eq 'a;b)''s';$search="x,y;z";$top=1),Items"#)
        .expect("expand parses");
    assert_eq!(expand.terms.len(), 2);
    let options = &expand.terms[0].options;
    assert_snapshot!(
        options.filter.as_ref().map(ToString::to_string).unwrap_or_default(),
        @"(Note eq 'a;b)''s')"
    );
    assert_eq!(options.search, Some(SearchToken::Term("x,y;z".into())));
    assert_eq!(options.top, Some(1));
}

#[test]
fn test_no_dollar_nested_options_when_enabled() {
    let settings = ParserSettings {
        enable_no_dollar_query_options: true,
        ..ParserSettings::default()
    };
    let expand = QueryParser::new(settings)
        .parse_expand("Orders(top=1)")
        .expect("expand parses");
    assert_eq!(expand.terms[0].options.top, Some(1));
    assert!(parse_expand("Orders(top=1)").is_err());
}

#[test]
fn test_expand_depth_limit() {
    let parser = QueryParser::new(ParserSettings::default().with_expand_limits(Some(1), None));
    let err = parser
        .parse_expand("Orders($expand=Items)")
        .expect_err("nested expand over the limit");
    assert_eq!(err.code(), ODQ0109);
}

fn nested_option(option: &str, levels: usize) -> String {
    format!("{}B{}", format!("A(${option}=").repeat(levels - 1), ")".repeat(levels - 1))
}

#[rstest]
#[case("expand")]
#[case("select")]
fn test_default_nesting_limit(#[case] option: &str) {
    let limit = ParserSettings::default().max_depth;
    let parse = |text: &str| match option {
        "expand" => parse_expand(text).map(drop),
        _ => parse_select(text).map(drop),
    };
    assert!(parse(&nested_option(option, limit)).is_ok());
    for levels in [limit + 1, 3000] {
        let err = parse(&nested_option(option, levels)).expect_err("nested past the default limit");
        assert_eq!(err.code(), ODQ0106);
    }
}

#[test]
fn test_nested_select_counts_towards_expand_nesting() {
    let limit = ParserSettings::default().max_depth;
    let expands = limit / 2;
    let chain = |selects: usize| {
        format!(
            "{}{}B{}",
            "A($expand=".repeat(expands),
            "A($select=".repeat(selects),
            ")".repeat(expands + selects)
        )
    };
    let fits = limit - 1 - expands;
    assert!(parse_expand(&chain(fits)).is_ok());
    let err: ErrorCode = parse_expand(&chain(fits + 1)).expect_err("one level too deep").code();
    assert_eq!(err, ODQ0106);
}

// === $apply / $compute ===

#[test]
fn test_apply_pipeline() {
    let stages = parse_apply(
        "filter(Amount gt 0)/groupby((Category),aggregate(Amount with sum as Total))",
    )
    .expect("apply parses");
    assert_eq!(stages.len(), 2);
    assert_eq!(stages[0].name(), "filter");
    let ApplyTransformationToken::GroupBy { properties, child } = &stages[1] else {
        panic!("expected groupby");
    };
    assert_eq!(properties, &vec![QueryToken::end_path("Category")]);
    assert!(matches!(child.as_deref(), Some(ApplyTransformationToken::Aggregate(_))));
}

#[test]
fn test_apply_default_depth_limit() {
    let limit = ParserSettings::default().max_depth;
    let groupby = |n: usize| format!("{}groupby((a)){}", "groupby((a),".repeat(n - 1), ")".repeat(n - 1));
    assert!(parse_apply(&groupby(limit)).is_ok());
    assert_eq!(parse_apply(&groupby(limit + 1)).map_err(|e| e.code()).err(), Some(ODQ0106));

    let from = format!("aggregate({}Amount with sum as S{})", "Sales(".repeat(3000), ")".repeat(3001));
    assert_eq!(parse_apply(&from).map_err(|e| e.code()).err(), Some(ODQ0106));
}

#[test]
fn test_compute_items() {
    let items = parse_compute("Price mul Quantity as Total,year(Date) as Year").expect("compute parses");
    let aliases: Vec<&str> = items.iter().map(|i| i.alias.as_str()).collect();
    assert_eq!(aliases, vec!["Total", "Year"]);
    assert_eq!(items[0].expression.to_string(), "(Price mul Quantity)");
}

// === Resource path ===

#[test]
fn test_resource_path_segments() {
    let segments = parse_path("/People('russell')/Orders(1)/NS.VipOrder/NS.Total()").expect("path parses");
    let rendered: Vec<String> = segments.iter().map(ToString::to_string).collect();
    assert_eq!(
        rendered,
        vec!["People('russell')", "Orders(1)", "NS.VipOrder", "NS.Total()"]
    );
    assert!(segments[2].arguments.is_none());
    assert_eq!(segments[3].arguments.as_ref().map(Vec::len), Some(0));
}

#[test]
fn test_resource_path_error_offset_is_absolute() {
    let err = parse_path("People(1)/Orders(1").expect_err("unbalanced key");
    assert_eq!(err.code(), ODQ0104);
    assert_eq!(err.offset(), Some(18));
}

// === Scalar options ===

#[rstest]
#[case("10", Some(10))]
#[case(" 0 ", Some(0))]
#[case("-1", None)]
#[case("ten", None)]
fn test_top_values(#[case] text: &str, #[case] expected: Option<i64>) {
    match (parse_top(text), expected) {
        (Ok(value), Some(expected)) => assert_eq!(value, expected),
        (Err(err), None) => assert_eq!(err.code(), ODQ0107),
        (other, _) => panic!("unexpected result {other:?} for {text:?}"),
    }
}

#[test]
fn test_count_and_levels() {
    assert_eq!(parse_count("true").ok(), Some(true));
    assert_eq!(parse_count("yes").map_err(|e| e.code()), Err(ODQ0107));
    assert_eq!(parse_levels("max").ok(), Some(LevelsToken::Max));
    assert_eq!(parse_levels("3").ok(), Some(LevelsToken::Value(3)));
    assert!(parse_levels("0").is_err());
    assert_eq!(parse_skip("5").ok(), Some(5));
}
