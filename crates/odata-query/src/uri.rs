//! Parsing and binding a whole request URI

use crate::options::{QueryOptions, SystemQueryOption};
use indexmap::IndexMap;
use log::debug;
use odata_query_diagnostics::Result;
use odata_query_edm::TypeModel;
use odata_query_parser::{ParserSettings, QueryParser};
use odata_query_semantic::{
    bind_apply, bind_compute, bind_filter, bind_orderby, bind_path, bind_search, bind_select_expand,
    ApplyClause, BinderSettings, BindingContext, ComputeClause, FilterClause, ODataPath, OrderByClause,
    SearchClause, SelectExpandClause,
};

/// A resource path together with its bound query options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ODataUri {
    pub path: ODataPath,
    pub filter: Option<FilterClause>,
    pub orderby: Option<OrderByClause>,
    /// `None` only when neither `$select` nor `$expand` was given
    pub select_expand: Option<SelectExpandClause>,
    pub search: Option<SearchClause>,
    pub apply: Option<ApplyClause>,
    pub compute: Option<ComputeClause>,
    pub top: Option<i64>,
    pub skip: Option<i64>,
    pub count: Option<bool>,
    pub format: Option<String>,
    pub skip_token: Option<String>,
    pub delta_token: Option<String>,
    pub aliases: IndexMap<String, String>,
    pub custom: Vec<(String, String)>,
}

/// Parses a relative request URI and binds it against a model
///
/// ```
/// use odata_query::{EdmModel, ModelBuilder, PrimitiveKind, TypeRef, UriQueryParser};
///
/// let mut builder = ModelBuilder::new("NS", "Container");
/// let person = builder.add_entity_type("NS", "Person").unwrap();
/// builder.add_key_property(person, "Id", PrimitiveKind::Int32).unwrap();
/// builder.add_structural_property(person, "Name", TypeRef::string()).unwrap();
/// builder.add_entity_set("People", person).unwrap();
/// let model: EdmModel = builder.build();
///
/// let uri = UriQueryParser::new(&model).parse("People?$filter=Name eq 'Bob'&$top=2").unwrap();
/// assert_eq!(uri.path.to_string(), "People");
/// assert_eq!(uri.filter.unwrap().expression.to_string(), "($it/Name eq 'Bob')");
/// assert_eq!(uri.top, Some(2));
/// ```
pub struct UriQueryParser<'m> {
    model: &'m dyn TypeModel,
    parser: QueryParser,
    binder_settings: BinderSettings,
}

impl<'m> UriQueryParser<'m> {
    pub fn new(model: &'m dyn TypeModel) -> Self {
        Self {
            model,
            parser: QueryParser::default(),
            binder_settings: BinderSettings::default(),
        }
    }

    pub fn with_parser_settings(mut self, settings: ParserSettings) -> Self {
        self.parser = QueryParser::new(settings);
        self
    }

    pub fn with_binder_settings(mut self, settings: BinderSettings) -> Self {
        self.binder_settings = settings;
        self
    }

    pub fn parser_settings(&self) -> &ParserSettings {
        self.parser.settings()
    }

    /// Parse `path?query#fragment`; the fragment is ignored
    pub fn parse(&self, uri: &str) -> Result<ODataUri> {
        let uri = uri.split_once('#').map_or(uri, |(before, _)| before);
        let (path, query) = uri.split_once('?').unwrap_or((uri, ""));
        self.parse_parts(path, query)
    }

    pub fn parse_parts(&self, path: &str, query: &str) -> Result<ODataUri> {
        let options = QueryOptions::parse(query, self.parser.settings())?;
        self.bind(path, &options)
    }

    /// Bind already split options against the resource at `path`
    ///
    /// `$apply` binds first; `$compute` binds against its output and every
    /// later option sees both.
    pub fn bind(&self, path: &str, options: &QueryOptions) -> Result<ODataUri> {
        debug!("binding request {path} with {} system option(s)", options.system_options().count());
        let root = self.root_context(options);
        let path = bind_path(&self.parser.parse_path(path)?, &root)?;
        let mut context = path.query_context(root);

        let mut uri = ODataUri {
            path,
            aliases: options.aliases().clone(),
            custom: options.custom().to_vec(),
            ..ODataUri::default()
        };

        if let Some(text) = options.get(SystemQueryOption::Apply) {
            let apply = bind_apply(&self.parser.parse_apply(text)?, &context)?;
            context = apply.apply_to(context);
            uri.apply = Some(apply);
        }
        if let Some(text) = options.get(SystemQueryOption::Compute) {
            let compute = bind_compute(&self.parser.parse_compute(text)?, &context)?;
            context = compute.extend_context(context);
            uri.compute = Some(compute);
        }
        if let Some(text) = options.get(SystemQueryOption::Filter) {
            uri.filter = Some(bind_filter(&self.parser.parse_filter(text)?, &context)?);
        }
        if let Some(text) = options.get(SystemQueryOption::OrderBy) {
            uri.orderby = Some(bind_orderby(&self.parser.parse_orderby(text)?, &context)?);
        }
        if let Some(text) = options.get(SystemQueryOption::Search) {
            uri.search = Some(bind_search(&self.parser.parse_search(text)?));
        }

        let select = options
            .get(SystemQueryOption::Select)
            .map(|text| self.parser.parse_select(text))
            .transpose()?;
        let expand = options
            .get(SystemQueryOption::Expand)
            .map(|text| self.parser.parse_expand(text))
            .transpose()?;
        if select.is_some() || expand.is_some() {
            uri.select_expand = Some(bind_select_expand(select.as_ref(), expand.as_ref(), &context)?);
        }

        uri.top = options.get(SystemQueryOption::Top).map(|t| self.parser.parse_top(t)).transpose()?;
        uri.skip = options.get(SystemQueryOption::Skip).map(|t| self.parser.parse_skip(t)).transpose()?;
        uri.count = options.get(SystemQueryOption::Count).map(|t| self.parser.parse_count(t)).transpose()?;
        uri.format = options.get(SystemQueryOption::Format).map(str::to_string);
        uri.skip_token = options.get(SystemQueryOption::SkipToken).map(str::to_string);
        uri.delta_token = options.get(SystemQueryOption::DeltaToken).map(str::to_string);
        Ok(uri)
    }

    fn root_context(&self, options: &QueryOptions) -> BindingContext<'m> {
        BindingContext::new(self.model)
            .with_settings(self.binder_settings.clone())
            .with_parser_settings(self.parser.settings().clone())
            .with_aliases(options.aliases().clone())
    }
}
