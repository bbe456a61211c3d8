//! Binding context
//!
//! Read-only inputs of one binding operation: the model, the resource the
//! expression is evaluated against (`$it`), parameter-alias values, the
//! `$apply` output shape and `$compute` aliases. The context is never
//! mutated by binding, so the same context can be reused for any number of
//! binds.

use crate::apply::ApplyShape;
use crate::nodes::RangeVariable;
use crate::settings::BinderSettings;
use indexmap::IndexMap;
use odata_query_diagnostics::{QueryError, Result, ODQ0203, ODQ0218};
use odata_query_edm::{
    EdmType, NavigationSource, Operation, Property, SchemaTypeId, TypeModel, TypeRef,
};
use odata_query_parser::ParserSettings;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct BindingContext<'m> {
    model: &'m dyn TypeModel,
    it: Option<RangeVariable>,
    aliases: Arc<IndexMap<String, String>>,
    settings: BinderSettings,
    parser_settings: ParserSettings,
    shape: Option<ApplyShape>,
    computed: IndexMap<String, TypeRef>,
}

impl fmt::Debug for BindingContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingContext")
            .field("model", &self.model.model_id())
            .field("it", &self.it)
            .field("aliases", &self.aliases)
            .field("settings", &self.settings)
            .field("shape", &self.shape)
            .field("computed", &self.computed)
            .finish()
    }
}

impl<'m> BindingContext<'m> {
    /// Context with no implicit resource; only constants and unbound functions resolve
    pub fn new(model: &'m dyn TypeModel) -> Self {
        Self {
            model,
            it: None,
            aliases: Arc::new(IndexMap::new()),
            settings: BinderSettings::default(),
            parser_settings: ParserSettings::default(),
            shape: None,
            computed: IndexMap::new(),
        }
    }

    /// Context whose `$it` is an element of the named entity set or singleton
    pub fn for_navigation_source(model: &'m dyn TypeModel, name: &str) -> Result<Self> {
        Self::new(model).rooted_at(name)
    }

    pub fn rooted_at(self, name: &str) -> Result<Self> {
        let source = self.find_navigation_source(name)?.ok_or_else(|| {
            QueryError::binding(ODQ0203, format!("Unknown entity set or singleton '{name}'"))
        })?;
        let element = TypeRef::entity(source.entity_type, false);
        let source_name = source.name.clone();
        Ok(self.with_resource_type(element, Some(source_name)))
    }

    /// Set the type of `$it`; collections are unwrapped to their element type
    pub fn with_resource_type(mut self, type_ref: TypeRef, navigation_source: Option<String>) -> Self {
        let element = match type_ref.element_type() {
            Some(element) => element.clone(),
            None => type_ref,
        };
        self.it = Some(RangeVariable::new(RangeVariable::IT, element, navigation_source));
        self
    }

    pub fn with_settings(mut self, settings: BinderSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_parser_settings(mut self, settings: ParserSettings) -> Self {
        self.parser_settings = settings;
        self
    }

    /// Alias values keyed by name without the leading `@`
    pub fn with_aliases(mut self, aliases: IndexMap<String, String>) -> Self {
        self.aliases = Arc::new(aliases);
        self
    }

    pub fn with_alias(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.aliases).insert(name.into(), value.into());
        self
    }

    pub fn with_shape(mut self, shape: ApplyShape) -> Self {
        self.shape = Some(shape);
        self
    }

    pub fn with_computed(mut self, alias: impl Into<String>, type_ref: TypeRef) -> Self {
        self.computed.insert(alias.into(), type_ref);
        self
    }

    pub fn model(&self) -> &'m dyn TypeModel {
        self.model
    }

    pub fn settings(&self) -> &BinderSettings {
        &self.settings
    }

    pub fn parser_settings(&self) -> &ParserSettings {
        &self.parser_settings
    }

    /// `$it`; untyped when the context has no resource
    pub fn it(&self) -> RangeVariable {
        self.it
            .clone()
            .unwrap_or_else(|| RangeVariable::new(RangeVariable::IT, TypeRef::none(), None))
    }

    pub fn has_resource(&self) -> bool {
        self.it.is_some()
    }

    pub fn alias(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(String::as_str)
    }

    pub fn aliases(&self) -> &IndexMap<String, String> {
        &self.aliases
    }

    pub fn shape(&self) -> Option<&ApplyShape> {
        self.shape.as_ref()
    }

    pub fn computed(&self, alias: &str) -> Option<&TypeRef> {
        self.computed.get(alias)
    }

    fn names_match(&self, candidate: &str, name: &str) -> bool {
        if self.settings.case_insensitive {
            candidate.eq_ignore_ascii_case(name)
        } else {
            candidate == name
        }
    }

    /// Pick the single case-insensitive match, failing when the name is ambiguous
    fn unique<'a, T>(
        &self,
        what: &str,
        name: &str,
        candidates: impl IntoIterator<Item = (&'a str, T)>,
    ) -> Result<Option<T>> {
        let mut matches: Vec<(&str, T)> = candidates
            .into_iter()
            .filter(|(candidate, _)| self.names_match(candidate, name))
            .collect();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop().map(|(_, item)| item)),
            _ => {
                let names: Vec<&str> = matches.iter().map(|(n, _)| *n).collect();
                Err(QueryError::binding(
                    ODQ0218,
                    format!("'{name}' matches more than one {what}: {}", names.join(", ")),
                ))
            }
        }
    }

    /// Declared or inherited property of a structured type
    pub fn find_property(&self, type_id: SchemaTypeId, name: &str) -> Result<Option<&'m Property>> {
        if let Some(property) = self.model.find_property(type_id, name) {
            return Ok(Some(property));
        }
        if !self.settings.case_insensitive {
            return Ok(None);
        }
        let properties = self.model.all_properties(type_id);
        self.unique("property", name, properties.into_iter().map(|p| (p.name(), p)))
    }

    pub fn find_navigation_source(&self, name: &str) -> Result<Option<&'m NavigationSource>> {
        let Some(container) = self.model.entity_container() else {
            return Ok(None);
        };
        if let Some(source) = container.find_navigation_source(name) {
            return Ok(Some(source));
        }
        if !self.settings.case_insensitive {
            return Ok(None);
        }
        self.unique(
            "entity set or singleton",
            name,
            container.sources.values().map(|s| (s.name.as_str(), s)),
        )
    }

    /// Primitive or schema type by qualified name
    pub fn find_type(&self, qualified_name: &str) -> Result<Option<EdmType>> {
        if let Some(ty) = self.model.resolve_type_name(qualified_name) {
            return Ok(Some(ty));
        }
        if !self.settings.case_insensitive {
            return Ok(None);
        }
        let names: Vec<(String, SchemaTypeId)> = self
            .model
            .type_ids()
            .into_iter()
            .map(|id| (self.model.type_name(id), id))
            .collect();
        let id = self.unique("type", qualified_name, names.iter().map(|(n, id)| (n.as_str(), *id)))?;
        Ok(id.and_then(|id| self.model.type_kind(id)))
    }

    pub fn resolve_operations(&self, qualified_name: &str) -> Vec<&'m Operation> {
        let exact = self.model.resolve_operations(qualified_name);
        if !exact.is_empty() || !self.settings.case_insensitive {
            return exact;
        }
        self.model
            .operations()
            .iter()
            .filter(|op| op.qualified_name().eq_ignore_ascii_case(qualified_name))
            .collect()
    }

    /// Entity set reached by following `path` from `source`, if the model binds it
    pub fn binding_target(&self, source: Option<&str>, path: &str) -> Option<String> {
        let container = self.model.entity_container()?;
        container
            .binding_target(source?, path)
            .map(|target| target.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odata_query_diagnostics::ErrorCode;
    use odata_query_edm::{EdmModel, ModelBuilder, PrimitiveKind};

    fn model() -> EdmModel {
        let mut builder = ModelBuilder::default();
        let person = builder.add_entity_type("NS", "Person").expect("type");
        builder.add_key_property(person, "Id", PrimitiveKind::Int32).expect("key");
        builder.add_structural_property(person, "Name", TypeRef::string()).expect("prop");
        builder.add_structural_property(person, "NAME", TypeRef::string()).expect("prop");
        builder.add_structural_property(person, "Age", TypeRef::int32()).expect("prop");
        builder.add_entity_set("People", person).expect("set");
        builder.build()
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let model = model();
        let context = BindingContext::new(&model).with_settings(BinderSettings::case_insensitive());
        let context = context.rooted_at("people").expect("case-insensitive entity set");
        let person = context.it().type_ref.schema_id().expect("entity");

        let age = context.find_property(person, "age").expect("lookup");
        assert_eq!(age.map(Property::name), Some("Age"));
        // exact match wins over case-insensitive candidates
        let name = context.find_property(person, "Name").expect("lookup");
        assert_eq!(name.map(Property::name), Some("Name"));
        let err = context.find_property(person, "name").expect_err("ambiguous");
        assert_eq!(err.code(), ErrorCode::new(218));
    }

    #[test]
    fn test_unknown_root_is_a_binding_error() {
        let model = model();
        let err = BindingContext::for_navigation_source(&model, "Persons").expect_err("unknown");
        assert!(err.is_binding());
        assert_eq!(err.code(), ODQ0203);
    }

    #[test]
    fn test_aliases_are_shared_between_clones() {
        let model = model();
        let context = BindingContext::new(&model).with_alias("p", "1");
        let copy = context.clone().with_alias("q", "2");
        assert_eq!(context.alias("q"), None);
        assert_eq!(copy.alias("p"), Some("1"));
    }
}
