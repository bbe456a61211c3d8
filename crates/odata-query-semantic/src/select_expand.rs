//! `$select` and `$expand` binding

use crate::clauses::{
    bind_compute, bind_filter, bind_orderby, bind_search, ComputeClause, FilterClause, OrderByClause, SearchClause,
};
use crate::context::BindingContext;
use log::{debug, trace};
use odata_query_ast::{
    ExpandTermToken, ExpandToken, LevelsToken, NestedOptions, PathSegmentToken, SegmentKind, SelectToken,
    SystemSegment,
};
use odata_query_diagnostics::{QueryError, Result, ODQ0200, ODQ0205, ODQ0214};
use odata_query_edm::{EdmType, Property, SchemaTypeId, TypeRef};

/// Options nested in a select or expand item, bound against the item's element type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NestedQueryOptions {
    pub filter: Option<FilterClause>,
    pub orderby: Option<OrderByClause>,
    pub top: Option<i64>,
    pub skip: Option<i64>,
    pub count: Option<bool>,
    pub search: Option<SearchClause>,
    pub compute: Option<ComputeClause>,
    pub select_expand: Option<Box<SelectExpandClause>>,
}

impl NestedQueryOptions {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `*`
    Wildcard,
    /// `NS.*`: every operation of a namespace
    NamespaceWildcard(String),
    /// Selected property or operation, root-first
    Path {
        path: Vec<String>,
        type_ref: TypeRef,
        options: NestedQueryOptions,
    },
    ExpandedNavigation {
        path: Vec<String>,
        navigation_source: Option<String>,
        type_ref: TypeRef,
        options: NestedQueryOptions,
        levels: Option<LevelsToken>,
    },
    /// `Nav/$ref`
    ExpandedReference {
        path: Vec<String>,
        navigation_source: Option<String>,
        type_ref: TypeRef,
        options: NestedQueryOptions,
    },
    /// `Nav/$count`
    ExpandedCount {
        path: Vec<String>,
        navigation_source: Option<String>,
        options: NestedQueryOptions,
    },
}

impl SelectItem {
    pub fn path(&self) -> Option<String> {
        match self {
            Self::Wildcard | Self::NamespaceWildcard(_) => None,
            Self::Path { path, .. }
            | Self::ExpandedNavigation { path, .. }
            | Self::ExpandedReference { path, .. }
            | Self::ExpandedCount { path, .. } => Some(path.join("/")),
        }
    }

    pub fn is_expansion(&self) -> bool {
        matches!(
            self,
            Self::ExpandedNavigation { .. } | Self::ExpandedReference { .. } | Self::ExpandedCount { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectExpandClause {
    /// No `$select`, or `$select` contains `*`
    pub all_selected: bool,
    pub items: Vec<SelectItem>,
}

impl SelectExpandClause {
    pub fn selected(&self) -> impl Iterator<Item = &SelectItem> {
        self.items.iter().filter(|item| !item.is_expansion())
    }

    pub fn expanded(&self) -> impl Iterator<Item = &SelectItem> {
        self.items.iter().filter(|item| item.is_expansion())
    }
}

pub fn bind_select_expand(
    select: Option<&SelectToken>,
    expand: Option<&ExpandToken>,
    context: &BindingContext<'_>,
) -> Result<SelectExpandClause> {
    debug!(
        "binding $select ({} item(s)) and $expand ({} item(s))",
        select.map_or(0, |s| s.terms.len()),
        expand.map_or(0, |e| e.terms.len())
    );
    SelectExpandBinder { context }.bind(select, expand)
}

struct SelectExpandBinder<'c, 'm> {
    context: &'c BindingContext<'m>,
}

/// Where a walked path ends up
struct Walked {
    names: Vec<String>,
    type_ref: TypeRef,
    navigation_source: Option<String>,
}

impl<'c, 'm> SelectExpandBinder<'c, 'm> {
    fn bind(&self, select: Option<&SelectToken>, expand: Option<&ExpandToken>) -> Result<SelectExpandClause> {
        let mut items = Vec::new();
        let mut all_selected = select.is_none();
        if let Some(select) = select {
            for term in &select.terms {
                let item = self.bind_select_term(&term.path, &term.options)?;
                all_selected |= item == SelectItem::Wildcard;
                items.push(item);
            }
        }
        if let Some(expand) = expand {
            for term in &expand.terms {
                self.bind_expand_term(term, &mut items)?;
            }
        }
        Ok(SelectExpandClause { all_selected, items })
    }

    fn it_type(&self) -> TypeRef {
        self.context.it().type_ref
    }

    fn structured_id(&self, type_ref: &TypeRef, name: &str) -> Result<SchemaTypeId> {
        match &type_ref.ty {
            EdmType::Entity(id) | EdmType::Complex(id) => Ok(*id),
            _ => Err(QueryError::binding(
                ODQ0214,
                format!(
                    "'{name}' cannot follow a value of type {}",
                    self.context.model().display_type(type_ref)
                ),
            )),
        }
    }

    /// Type cast within a select or expand path
    fn cast(&self, current: &TypeRef, name: &str) -> Result<Option<TypeRef>> {
        let Some(ty) = self.context.find_type(name)? else {
            return Ok(None);
        };
        let model = self.context.model();
        let (EdmType::Entity(target) | EdmType::Complex(target)) = ty else {
            return Err(QueryError::binding(ODQ0205, format!("'{name}' is not a structured type")));
        };
        let related = current.schema_id().is_some_and(|id| {
            model.is_or_derives_from(id, target) || model.is_or_derives_from(target, id)
        });
        if !related {
            return Err(QueryError::binding(
                ODQ0205,
                format!("Cannot cast {} to {name}", model.display_type(current)),
            ));
        }
        Ok(Some(TypeRef::new(ty, current.nullable)))
    }

    fn bind_select_term(&self, path: &PathSegmentToken, options: &NestedOptions) -> Result<SelectItem> {
        if path.is_wildcard() {
            return Ok(match &path.kind {
                SegmentKind::Wildcard { namespace: Some(ns) } => SelectItem::NamespaceWildcard(ns.clone()),
                _ => SelectItem::Wildcard,
            });
        }
        let segments = path.segments();
        let last = segments.len() - 1;
        let mut current = self.it_type();
        let mut names = Vec::with_capacity(segments.len());
        for (index, segment) in segments.into_iter().enumerate() {
            let SegmentKind::Named(name) = segment else {
                return Err(QueryError::binding(ODQ0214, format!("'{segment}' is not allowed in $select")));
            };
            if current.is_collection() {
                return Err(QueryError::binding(
                    ODQ0214,
                    format!("'{name}' cannot follow the collection '{}'", names.join("/")),
                ));
            }
            if name.contains('.') {
                if let Some(cast) = self.cast(&current, name)? {
                    current = cast;
                    names.push(name.clone());
                    continue;
                }
                let operations = self.context.resolve_operations(name);
                if index == last && !operations.is_empty() {
                    names.push(name.clone());
                    current = TypeRef::none();
                    continue;
                }
            }
            let id = self.structured_id(&current, name)?;
            current = match self.context.find_property(id, name)? {
                Some(property) => {
                    names.push(property.name().to_string());
                    property.type_ref()
                }
                None if self.context.model().is_open(id) => {
                    names.push(name.clone());
                    TypeRef::none()
                }
                None => {
                    return Err(QueryError::binding(
                        ODQ0200,
                        format!("Type '{}' has no property '{name}'", self.context.model().type_name(id)),
                    ));
                }
            };
        }
        trace!("selected {}", names.join("/"));
        let options = if options.is_empty() {
            NestedQueryOptions::default()
        } else {
            let nested = self.context.clone().with_resource_type(current.clone(), None);
            bind_nested(options, None, &nested)?
        };
        Ok(SelectItem::Path {
            path: names,
            type_ref: current,
            options,
        })
    }

    fn bind_expand_term(&self, term: &ExpandTermToken, items: &mut Vec<SelectItem>) -> Result<()> {
        let segments = term.path.segments();
        let (system, navigation_segments) = match segments.split_last() {
            Some((SegmentKind::System(system), rest)) => (Some(*system), rest.to_vec()),
            _ => (None, segments.clone()),
        };
        if system == Some(SystemSegment::Value) {
            return Err(QueryError::binding(ODQ0214, "$value cannot be expanded"));
        }

        if let [SegmentKind::Wildcard { namespace: None }] = navigation_segments.as_slice() {
            let id = self.structured_id(&self.it_type(), "*")?;
            for property in self.context.model().all_properties(id) {
                if let Property::Navigation(navigation) = property {
                    let walked = self.navigation(&[], navigation.name.as_str(), id)?;
                    items.push(self.expanded(walked, system, term)?);
                }
            }
            return Ok(());
        }

        let walked = self.walk_expand_path(&navigation_segments, &term.path)?;
        items.push(self.expanded(walked, system, term)?);
        Ok(())
    }

    /// Follow complex properties and casts to a navigation property, then an optional cast
    fn walk_expand_path(&self, segments: &[&SegmentKind], path: &PathSegmentToken) -> Result<Walked> {
        let mut current = self.it_type();
        let mut names: Vec<String> = Vec::new();
        let mut walked: Option<Walked> = None;
        for segment in segments {
            let SegmentKind::Named(name) = segment else {
                return Err(QueryError::binding(ODQ0214, format!("'{segment}' is not allowed in $expand path '{path}'")));
            };
            if let Some(found) = walked.as_mut() {
                // only a cast may follow the navigation property
                let cast = self.cast(found.type_ref.element_type().unwrap_or(&found.type_ref), name)?;
                let Some(cast) = cast else {
                    return Err(QueryError::binding(
                        ODQ0214,
                        format!("$expand path '{path}' continues past a navigation property"),
                    ));
                };
                found.type_ref = if found.type_ref.is_collection() { TypeRef::collection(cast) } else { cast };
                found.names.push(name.clone());
                continue;
            }
            if name.contains('.') {
                if let Some(cast) = self.cast(&current, name)? {
                    current = cast;
                    names.push(name.clone());
                    continue;
                }
            }
            let id = self.structured_id(&current, name)?;
            match self.context.find_property(id, name)? {
                Some(Property::Navigation(navigation)) => {
                    walked = Some(self.navigation(&names, &navigation.name, id)?);
                }
                Some(Property::Structural(property)) if property.type_ref.is_structured() => {
                    names.push(property.name.clone());
                    current = property.type_ref.clone();
                }
                Some(_) => {
                    return Err(QueryError::binding(
                        ODQ0214,
                        format!("'{name}' is not a navigation property and cannot be expanded"),
                    ));
                }
                None => {
                    return Err(QueryError::binding(
                        ODQ0200,
                        format!("Type '{}' has no property '{name}'", self.context.model().type_name(id)),
                    ));
                }
            }
        }
        walked.ok_or_else(|| {
            QueryError::binding(ODQ0214, format!("$expand path '{path}' does not end at a navigation property"))
        })
    }

    fn navigation(&self, prefix: &[String], name: &str, owner: SchemaTypeId) -> Result<Walked> {
        let Some(Property::Navigation(navigation)) = self.context.find_property(owner, name)? else {
            return Err(QueryError::binding(ODQ0214, format!("'{name}' is not a navigation property")));
        };
        let mut names = prefix.to_vec();
        names.push(navigation.name.clone());
        let source = self.context.it().navigation_source;
        let binding_path = names
            .iter()
            .filter(|n| !n.contains('.'))
            .cloned()
            .collect::<Vec<_>>()
            .join("/");
        let navigation_source = self.context.binding_target(source.as_deref(), &binding_path).or_else(|| {
            let qualified = format!("{}/{}", self.context.model().type_name(owner), navigation.name);
            self.context.binding_target(source.as_deref(), &qualified)
        });
        Ok(Walked {
            names,
            type_ref: navigation.type_ref(),
            navigation_source,
        })
    }

    fn expanded(&self, walked: Walked, system: Option<SystemSegment>, term: &ExpandTermToken) -> Result<SelectItem> {
        let nested = self
            .context
            .clone()
            .with_resource_type(walked.type_ref.clone(), walked.navigation_source.clone());
        let Walked {
            names,
            type_ref,
            navigation_source,
        } = walked;
        match system {
            Some(SystemSegment::Ref) => {
                if term.options.select.is_some() || term.options.compute.is_some() || term.expand.is_some() {
                    return Err(QueryError::binding(
                        ODQ0214,
                        "$select, $compute and $expand cannot be nested in a $ref expansion",
                    ));
                }
                Ok(SelectItem::ExpandedReference {
                    path: names,
                    navigation_source,
                    type_ref,
                    options: bind_nested(&term.options, None, &nested)?,
                })
            }
            Some(SystemSegment::Count) => {
                let allowed = NestedOptions {
                    filter: term.options.filter.clone(),
                    search: term.options.search.clone(),
                    ..NestedOptions::default()
                };
                if allowed != term.options || term.expand.is_some() || term.levels.is_some() {
                    return Err(QueryError::binding(
                        ODQ0214,
                        "Only $filter and $search can be nested in a $count expansion",
                    ));
                }
                Ok(SelectItem::ExpandedCount {
                    path: names,
                    navigation_source,
                    options: bind_nested(&term.options, None, &nested)?,
                })
            }
            _ => Ok(SelectItem::ExpandedNavigation {
                path: names,
                navigation_source,
                type_ref,
                options: bind_nested(&term.options, term.expand.as_ref(), &nested)?,
                levels: term.levels,
            }),
        }
    }
}

fn bind_nested(
    options: &NestedOptions,
    expand: Option<&ExpandToken>,
    context: &BindingContext<'_>,
) -> Result<NestedQueryOptions> {
    let compute = options
        .compute
        .as_ref()
        .map(|items| bind_compute(items, context))
        .transpose()?;
    let context = match &compute {
        Some(compute) => compute.extend_context(context.clone()),
        None => context.clone(),
    };
    let select_expand = if options.select.is_some() || expand.is_some() {
        Some(Box::new(bind_select_expand(options.select.as_ref(), expand, &context)?))
    } else {
        None
    };
    Ok(NestedQueryOptions {
        filter: options.filter.as_ref().map(|f| bind_filter(f, &context)).transpose()?,
        orderby: options.orderby.as_ref().map(|o| bind_orderby(o, &context)).transpose()?,
        top: options.top,
        skip: options.skip,
        count: options.count,
        search: options.search.as_ref().map(bind_search),
        compute,
        select_expand,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use odata_query_diagnostics::ErrorCode;
    use odata_query_edm::{EdmModel, ModelBuilder, NavigationProperty, PrimitiveKind};
    use odata_query_parser::{parse_expand, parse_select};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn model() -> EdmModel {
        let mut b = ModelBuilder::default();
        let country = b.add_entity_type("NS", "Country").expect("type");
        b.add_key_property(country, "Code", PrimitiveKind::String).expect("key");
        let address = b.add_complex_type("NS", "Address").expect("type");
        b.add_structural_property(address, "City", TypeRef::string()).expect("prop");
        b.add_navigation_property(address, NavigationProperty::single("Country", country))
            .expect("nav");
        let order = b.add_entity_type("NS", "Order").expect("type");
        b.add_key_property(order, "Id", PrimitiveKind::Int32).expect("key");
        b.add_structural_property(order, "Amount", TypeRef::primitive(PrimitiveKind::Decimal, false))
            .expect("prop");
        let person = b.add_entity_type("NS", "Person").expect("type");
        b.add_key_property(person, "Id", PrimitiveKind::Int32).expect("key");
        b.add_structural_property(person, "Name", TypeRef::string()).expect("prop");
        b.add_structural_property(person, "Home", TypeRef::complex(address, true)).expect("prop");
        b.add_navigation_property(person, NavigationProperty::collection("Orders", order))
            .expect("nav");
        b.add_navigation_property(person, NavigationProperty::single("Best", order))
            .expect("nav");
        b.add_entity_set("People", person).expect("set");
        b.add_entity_set("Orders", order).expect("set");
        b.add_entity_set("Countries", country).expect("set");
        b.add_navigation_binding("People", "Orders", "Orders").expect("binding");
        b.add_navigation_binding("People", "Home/Country", "Countries").expect("binding");
        b.build()
    }

    fn bind(model: &EdmModel, select: Option<&str>, expand: Option<&str>) -> Result<SelectExpandClause> {
        let context = BindingContext::for_navigation_source(model, "People")?;
        let select = select.map(parse_select).transpose()?;
        let expand = expand.map(parse_expand).transpose()?;
        bind_select_expand(select.as_ref(), expand.as_ref(), &context)
    }

    #[test]
    fn test_select_paths_and_wildcards() {
        let model = model();
        let clause = bind(&model, Some("Name,Home/City"), None).expect("binds");
        assert!(!clause.all_selected);
        let paths: Vec<String> = clause.selected().filter_map(SelectItem::path).collect();
        assert_eq!(paths, vec!["Name", "Home/City"]);

        let clause = bind(&model, Some("*,NS.*"), None).expect("binds");
        assert!(clause.all_selected);
        assert_eq!(clause.items[1], SelectItem::NamespaceWildcard("NS".into()));
    }

    #[test]
    fn test_expand_resolves_navigation_sources() {
        let model = model();
        let clause = bind(&model, None, Some("Orders($filter=Amount gt 5;$top=2),Home/Country")).expect("binds");
        assert!(clause.all_selected);
        let SelectItem::ExpandedNavigation {
            navigation_source,
            options,
            ..
        } = &clause.items[0]
        else {
            panic!("expected expansion");
        };
        assert_eq!(navigation_source.as_deref(), Some("Orders"));
        assert_eq!(options.top, Some(2));
        let filter = options.filter.as_ref().expect("nested filter");
        assert_eq!(filter.range_variable.navigation_source.as_deref(), Some("Orders"));

        let SelectItem::ExpandedNavigation { path, navigation_source, .. } = &clause.items[1] else {
            panic!("expected expansion");
        };
        assert_eq!(path, &vec!["Home".to_string(), "Country".to_string()]);
        assert_eq!(navigation_source.as_deref(), Some("Countries"));
    }

    #[test]
    fn test_expand_ref_and_count() {
        let model = model();
        let clause = bind(&model, None, Some("Orders/$ref,Orders/$count($filter=Amount gt 1)")).expect("binds");
        assert!(matches!(clause.items[0], SelectItem::ExpandedReference { .. }));
        assert!(matches!(clause.items[1], SelectItem::ExpandedCount { .. }));
    }

    #[test]
    fn test_star_expands_every_navigation_property() {
        let model = model();
        let clause = bind(&model, None, Some("*")).expect("binds");
        let paths: Vec<String> = clause.expanded().filter_map(SelectItem::path).collect();
        assert_eq!(paths, vec!["Orders", "Best"]);
    }

    #[test]
    fn test_nested_expand_binds_against_target() {
        let model = model();
        let clause = bind(&model, None, Some("Orders($select=Amount;$orderby=Amount desc)")).expect("binds");
        let SelectItem::ExpandedNavigation { options, .. } = &clause.items[0] else {
            panic!("expected expansion");
        };
        let nested = options.select_expand.as_ref().expect("nested select");
        assert_eq!(nested.items[0].path().as_deref(), Some("Amount"));
        assert_eq!(options.orderby.as_ref().map(|o| o.items.len()), Some(1));
    }

    #[rstest]
    #[case(Some("Nickname"), None, 200)]
    #[case(None, Some("Name"), 214)]
    #[case(None, Some("Orders/Amount"), 214)]
    #[case(None, Some("Orders/$ref($select=Amount)"), 214)]
    #[case(None, Some("Orders($filter=Missing eq 1)"), 200)]
    #[case(Some("Orders/Amount"), None, 214)]
    fn test_select_expand_errors(#[case] select: Option<&str>, #[case] expand: Option<&str>, #[case] code: u16) {
        let model = model();
        let err = bind(&model, select, expand).expect_err("rejected");
        assert_eq!(err.code(), ErrorCode::new(code), "{err}");
    }
}
