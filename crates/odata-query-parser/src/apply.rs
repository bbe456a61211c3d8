//! `$apply` transformation parsing

use crate::expression::{is_builtin_function, ExpressionParser};
use crate::lexer::TokenKind;
use odata_query_ast::{
    AggregateExpressionToken, AggregationMethod, ApplyTransformationToken, QueryToken,
};
use odata_query_diagnostics::{QueryError, Result, ODQ0100, ODQ0103, ODQ0104, ODQ0111, ODQ0114};

impl ExpressionParser<'_> {
    /// `t1/t2/...` up to the end of input
    pub(crate) fn parse_apply_pipeline(&mut self) -> Result<Vec<ApplyTransformationToken>> {
        let mut transformations = vec![self.parse_transformation()?];
        while self.eat(&TokenKind::Slash)? {
            transformations.push(self.parse_transformation()?);
        }
        self.expect_end()?;
        Ok(transformations)
    }

    fn parse_transformation(&mut self) -> Result<ApplyTransformationToken> {
        let offset = self.offset()?;
        let (name, _) = self.expect_identifier("transformation")?;
        let transformation = match name.as_str() {
            "filter" => {
                self.expect(&TokenKind::OpenParen, ODQ0100)?;
                let predicate = self.parse_expression()?;
                self.expect(&TokenKind::CloseParen, ODQ0104)?;
                ApplyTransformationToken::Filter(predicate)
            }
            "aggregate" => {
                self.expect(&TokenKind::OpenParen, ODQ0100)?;
                let mut items = vec![self.parse_aggregate_item()?];
                while self.eat(&TokenKind::Comma)? {
                    items.push(self.parse_aggregate_item()?);
                }
                self.expect(&TokenKind::CloseParen, ODQ0104)?;
                ApplyTransformationToken::Aggregate(items)
            }
            "groupby" => self.parse_groupby()?,
            "compute" => {
                self.expect(&TokenKind::OpenParen, ODQ0100)?;
                ApplyTransformationToken::Compute(
                    self.parse_compute_list(Some(&TokenKind::CloseParen))?,
                )
            }
            other => {
                return Err(QueryError::syntax(
                    ODQ0114,
                    format!("Unknown transformation '{other}'"),
                    offset,
                ));
            }
        };
        Ok(transformation)
    }

    /// `groupby((p1, p2), child?)`
    fn parse_groupby(&mut self) -> Result<ApplyTransformationToken> {
        self.expect(&TokenKind::OpenParen, ODQ0100)?;
        self.expect(&TokenKind::OpenParen, ODQ0100)?;
        let mut properties = Vec::new();
        loop {
            let offset = self.offset()?;
            let property = self.parse_expression()?;
            if property.path_segments().is_none() {
                return Err(QueryError::syntax(
                    ODQ0111,
                    format!("Grouping property '{property}' is not a property path"),
                    offset,
                ));
            }
            properties.push(property);
            if self.eat(&TokenKind::CloseParen)? {
                break;
            }
            if !self.eat(&TokenKind::Comma)? {
                return Err(self.unexpected(ODQ0104, "',' or ')'"));
            }
        }
        let child = if self.eat(&TokenKind::Comma)? {
            self.descend()?;
            let child = self.parse_transformation()?;
            self.ascend();
            Some(Box::new(child))
        } else {
            None
        };
        self.expect(&TokenKind::CloseParen, ODQ0104)?;
        Ok(ApplyTransformationToken::GroupBy { properties, child })
    }

    /// `Sales/Items(` opens an entity-set aggregation unless the name is a function
    fn at_entity_set_aggregate(&mut self) -> Result<bool> {
        let mut index = 0;
        loop {
            match self.peek_kind(index)? {
                Some(TokenKind::Identifier(name))
                    if !name.contains('.') && !is_builtin_function(&name) => {}
                _ => return Ok(false),
            }
            match self.peek_kind(index + 1)? {
                Some(TokenKind::Slash) => index += 2,
                Some(TokenKind::OpenParen) => return Ok(true),
                _ => return Ok(false),
            }
        }
    }

    fn parse_aggregate_item(&mut self) -> Result<AggregateExpressionToken> {
        if self.at_entity_set_aggregate()? {
            let mut names = vec![self.expect_identifier("navigation property")?.0];
            while self.eat(&TokenKind::Slash)? {
                names.push(self.expect_identifier("navigation property")?.0);
            }
            let segments: Vec<&str> = names.iter().map(String::as_str).collect();
            let from = QueryToken::path(&segments);

            self.expect(&TokenKind::OpenParen, ODQ0100)?;
            self.descend()?;
            let mut inner = self.parse_aggregate_item()?;
            self.ascend();
            self.expect(&TokenKind::CloseParen, ODQ0104)?;
            inner.from = Some(from);
            return Ok(inner);
        }

        let offset = self.offset()?;
        let expression = self.parse_expression()?;
        if matches!(expression, QueryToken::Count { parent: None }) {
            self.expect_word("as", ODQ0111)?;
            let (alias, _) = self.expect_identifier("alias")?;
            return Ok(AggregateExpressionToken {
                expression,
                method: AggregationMethod::VirtualCount,
                alias,
                from: None,
            });
        }

        if !self.eat_word("with")? {
            return Err(QueryError::syntax(
                ODQ0111,
                format!("Aggregate expression '{expression}' needs 'with <method>'"),
                offset,
            ));
        }
        let (method, _) = self.expect_identifier("aggregation method")?;
        let from = if self.eat_word("from")? {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect_word("as", ODQ0111)?;
        let (alias, span) = self.expect_identifier("alias")?;
        if alias.contains('.') {
            return Err(QueryError::expected(ODQ0103, "simple alias", Some(alias.as_str()), span.start));
        }
        Ok(AggregateExpressionToken {
            expression,
            method: AggregationMethod::from_name(&method),
            alias,
            from,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ParserSettings;
    use odata_query_diagnostics::{ErrorCode, ODQ0106};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn pipeline(text: &str) -> Vec<ApplyTransformationToken> {
        ExpressionParser::new(text, 800)
            .parse_apply_pipeline()
            .unwrap_or_else(|e| panic!("{text:?}: {e}"))
    }

    #[test]
    fn test_groupby_with_aggregate_child() {
        let stages = pipeline("groupby((Category),aggregate(Amount with sum as Total))");
        let [ApplyTransformationToken::GroupBy { properties, child }] = stages.as_slice() else {
            panic!("expected one groupby, got {stages:?}");
        };
        assert_eq!(properties[0].to_string(), "Category");
        let Some(ApplyTransformationToken::Aggregate(items)) = child.as_deref() else {
            panic!("expected aggregate child");
        };
        assert_eq!(items[0].method, AggregationMethod::Sum);
        assert_eq!(items[0].alias, "Total");
    }

    #[test]
    fn test_pipeline_order_is_preserved() {
        let names: Vec<&str> = pipeline(
            "filter(Amount gt 1)/groupby((Category/Name,Region))/compute(Amount mul 2 as Double)",
        )
        .iter()
        .map(ApplyTransformationToken::name)
        .collect();
        assert_eq!(names, vec!["filter", "groupby", "compute"]);
    }

    #[test]
    fn test_virtual_count_and_entity_set_aggregation() {
        let stages = pipeline("aggregate($count as N,Sales(Amount with average as Avg))");
        let [ApplyTransformationToken::Aggregate(items)] = stages.as_slice() else {
            panic!("expected aggregate");
        };
        assert_eq!(items[0].method, AggregationMethod::VirtualCount);
        assert_eq!(items[1].method, AggregationMethod::Average);
        assert_eq!(items[1].from.as_ref().map(ToString::to_string).as_deref(), Some("Sales"));
        assert_eq!(items[1].expression.to_string(), "Amount");
    }

    #[test]
    fn test_function_is_not_an_entity_set() {
        let stages = pipeline("aggregate(round(Amount) with max as M)");
        let [ApplyTransformationToken::Aggregate(items)] = stages.as_slice() else {
            panic!("expected aggregate");
        };
        assert!(items[0].from.is_none());
        assert_eq!(items[0].expression.to_string(), "round(Amount)");
    }

    #[test]
    fn test_nested_transformations_stop_at_the_depth_limit() {
        let limit = ParserSettings::default().max_depth;
        let groupby = |n: usize| {
            format!("{}groupby((a)){}", "groupby((a),".repeat(n - 1), ")".repeat(n - 1))
        };
        // Each nested child takes one step, the innermost grouping property one more
        assert!(ExpressionParser::new(&groupby(limit), limit).parse_apply_pipeline().is_ok());
        for n in [limit + 1, 5000] {
            let err = ExpressionParser::new(&groupby(n), limit)
                .parse_apply_pipeline()
                .expect_err("too deep");
            assert_eq!(err.code(), ODQ0106);
        }

        let from = |n: usize| {
            format!("aggregate({}Amount with sum as S{})", "Sales(".repeat(n), ")".repeat(n + 1))
        };
        assert!(ExpressionParser::new(&from(limit - 1), limit).parse_apply_pipeline().is_ok());
        for n in [limit, 5000] {
            let err = ExpressionParser::new(&from(n), limit)
                .parse_apply_pipeline()
                .expect_err("too deep");
            assert_eq!(err.code(), ODQ0106);
        }
    }

    #[rstest]
    #[case("topcount(2, Amount)", ODQ0114, 0)]
    #[case("aggregate(Amount as Total)", ODQ0111, 10)]
    #[case("groupby((1 add 2))", ODQ0111, 9)]
    #[case("filter(true)/", ODQ0103, 13)]
    fn test_apply_errors(#[case] text: &str, #[case] code: ErrorCode, #[case] offset: usize) {
        let err = ExpressionParser::new(text, 800)
            .parse_apply_pipeline()
            .expect_err("should fail");
        assert_eq!((err.code(), err.offset()), (code, Some(offset)));
    }
}
