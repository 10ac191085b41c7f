//! Transform entry points.
//!
//! [`Transformer`] turns a parsed tree and a parameter set into SQL, binds and
//! coverage. [`SqlEngine`] adds a named template registry, a parse cache and
//! coverage aggregation on top.

use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use serde::Serialize;

use crate::cache::{CacheStats, TemplateCache};
use crate::cleanup::SqlCleaner;
use crate::config::{Config, TransformOptions};
use crate::context::{BindValue, TransformContext};
use crate::coverage::{CoverageCollector, CoverageHandler, CoverageRecord, CoverageSummary};
use crate::error::{TwoSqlError, TwoSqlResult};
use crate::node::NodeTree;
use crate::value::{Params, Value};

static DEFAULT_TRANSFORMER: LazyLock<Transformer> = LazyLock::new(Transformer::default);

/// The result of one transform pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlOutput {
    pub sql: String,
    /// One entry per placeholder, in placeholder order.
    pub bind_names: Vec<String>,
    pub bind_values: Vec<BindValue>,
    pub coverage: CoverageRecord,
}

impl SqlOutput {
    /// Bind values without their kinds, ready for a driver.
    pub fn values(&self) -> Vec<&Value> {
        self.bind_values.iter().map(|b| &b.value).collect()
    }
}

/// Renders trees with a fixed set of options.
#[derive(Debug, Clone, Default)]
pub struct Transformer {
    options: TransformOptions,
    cleaner: SqlCleaner,
}

impl Transformer {
    pub fn new(options: TransformOptions) -> Self {
        Self {
            options,
            cleaner: SqlCleaner::new(),
        }
    }

    pub fn options(&self) -> &TransformOptions {
        &self.options
    }

    pub fn transform(&self, tree: &NodeTree, params: &Params) -> TwoSqlResult<SqlOutput> {
        let mut ctx = TransformContext::new(params, &self.options);
        tree.transform(&mut ctx)?;
        let parts = ctx.into_parts();
        let sql = self.cleaner.clean(&parts.sql, &self.options);
        tracing::debug!(
            "transformed template: {} bind(s), {} branch(es) recorded",
            parts.bind_values.len(),
            parts.coverage.branches().count()
        );
        Ok(SqlOutput {
            sql,
            bind_names: parts.bind_names,
            bind_values: parts.bind_values,
            coverage: parts.coverage,
        })
    }
}

/// Render a tree with default options.
///
/// # Example
///
/// ```
/// use twosql::value::Params;
///
/// let tree = twosql::parse("SELECT * FROM t WHERE id = /*#id*/1").unwrap();
/// let out = twosql::transform(&tree, &Params::new().param("id", 5)).unwrap();
/// assert_eq!(out.sql, "SELECT * FROM t WHERE id = ?");
/// ```
pub fn transform(tree: &NodeTree, params: &Params) -> TwoSqlResult<SqlOutput> {
    DEFAULT_TRANSFORMER.transform(tree, params)
}

/// Named templates, a parse cache and optional coverage aggregation.
///
/// `SqlEngine` is `Send + Sync`; share it behind an `Arc`.
pub struct SqlEngine {
    transformer: Transformer,
    cache: TemplateCache,
    templates: DashMap<String, Arc<NodeTree>>,
    coverage: Option<Arc<dyn CoverageHandler>>,
    collector: Option<Arc<CoverageCollector>>,
}

impl Default for SqlEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlEngine {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Build an engine; `coverage.enabled` attaches an in-memory collector.
    pub fn with_config(config: Config) -> Self {
        let engine = Self {
            transformer: Transformer::new(config.transform),
            cache: TemplateCache::new(config.cache),
            templates: DashMap::new(),
            coverage: None,
            collector: None,
        };
        if config.coverage.enabled {
            engine.with_coverage_collector(Arc::new(CoverageCollector::new()))
        } else {
            engine
        }
    }

    /// Notify `handler` after every render.
    pub fn with_coverage_handler(mut self, handler: Arc<dyn CoverageHandler>) -> Self {
        self.coverage = Some(handler);
        self.collector = None;
        self
    }

    pub fn with_coverage_collector(mut self, collector: Arc<CoverageCollector>) -> Self {
        let handler: Arc<dyn CoverageHandler> = collector.clone();
        self.coverage = Some(handler);
        self.collector = Some(collector);
        self
    }

    pub fn options(&self) -> &TransformOptions {
        self.transformer.options()
    }

    /// Parse `template` and store it under `name`, replacing any previous one.
    pub fn register(&self, name: impl Into<String>, template: &str) -> TwoSqlResult<()> {
        let name = name.into();
        let tree = self.cache.get_or_parse(template)?;
        tracing::debug!("registered template '{}'", name);
        self.templates.insert(name, tree);
        Ok(())
    }

    pub fn template(&self, name: &str) -> Option<Arc<NodeTree>> {
        self.templates.get(name).map(|tree| Arc::clone(&tree))
    }

    pub fn template_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .templates
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Render a registered template.
    pub fn render(&self, name: &str, params: &Params) -> TwoSqlResult<SqlOutput> {
        let tree = self
            .template(name)
            .ok_or_else(|| TwoSqlError::UnknownTemplate(name.to_string()))?;
        self.execute(name, &tree, params)
    }

    /// Render template text directly, parsing through the cache.
    ///
    /// Coverage for ad-hoc templates is reported under the template text.
    pub fn render_text(&self, template: &str, params: &Params) -> TwoSqlResult<SqlOutput> {
        let tree = self.cache.get_or_parse(template)?;
        self.execute(template, &tree, params)
    }

    fn execute(&self, name: &str, tree: &NodeTree, params: &Params) -> TwoSqlResult<SqlOutput> {
        let output = self.transformer.transform(tree, params)?;
        if let Some(handler) = &self.coverage {
            handler.accept(name, tree, &output.coverage);
        }
        Ok(output)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Summaries from the attached collector, empty when none is attached.
    pub fn coverage_summaries(&self) -> Vec<CoverageSummary> {
        self.collector
            .as_ref()
            .map(|c| c.summaries())
            .unwrap_or_default()
    }

    pub fn coverage_summary(&self, name: &str) -> Option<CoverageSummary> {
        self.collector.as_ref()?.summary(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlaceholderStyle;
    use crate::context::BindKind;
    use crate::parser::parse;

    #[test]
    fn test_transform_defaults() {
        let tree = parse("SELECT * FROM t\nWHERE\n  /*IF a != null*/AND a = /*#a*/1/*END*/\n").unwrap();
        let out = transform(&tree, &Params::new().param("a", "x")).unwrap();
        assert_eq!(out.sql, "SELECT * FROM t\nWHERE\n  a = ?");
        assert_eq!(out.bind_names, vec!["a".to_string()]);
        assert_eq!(out.values(), vec![&Value::from("x")]);
    }

    #[test]
    fn test_null_bind_kind() {
        let tree = parse("SET a = /*#a*/1").unwrap();
        let out = transform(&tree, &Params::new().param("a", Value::Null)).unwrap();
        assert_eq!(out.bind_values[0].kind, BindKind::Null);
    }

    #[test]
    fn test_numbered_transformer() {
        let transformer = Transformer::new(TransformOptions {
            placeholder: PlaceholderStyle::Numbered,
            ..TransformOptions::default()
        });
        let tree = parse("a = /*#a*/1 AND b IN /*PAREN#b*/(1)").unwrap();
        let params = Params::new().param("a", 1).param("b", vec![2, 3]);
        let out = transformer.transform(&tree, &params).unwrap();
        assert_eq!(out.sql, "a = $1 AND b IN ($2, $3)");
    }

    #[test]
    fn test_engine_registry() {
        let engine = SqlEngine::new();
        engine.register("by_id", "SELECT * FROM t WHERE id = /*#id*/1").unwrap();
        let out = engine.render("by_id", &Params::new().param("id", 3)).unwrap();
        assert_eq!(out.sql, "SELECT * FROM t WHERE id = ?");
        assert_eq!(engine.template_names(), vec!["by_id".to_string()]);

        let err = engine.render("missing", &Params::new()).unwrap_err();
        assert!(matches!(err, TwoSqlError::UnknownTemplate(name) if name == "missing"));
    }

    #[test]
    fn test_engine_register_rejects_bad_template() {
        let engine = SqlEngine::new();
        assert!(engine.register("bad", "SELECT 1 /*END*/").is_err());
        assert!(engine.template("bad").is_none());
    }

    #[test]
    fn test_engine_coverage() {
        let engine = SqlEngine::with_config(Config::builder().coverage(true).build());
        engine.register("q", "SELECT 1 /*IF a*/+ 1/*END*/").unwrap();
        engine.render("q", &Params::new().param("a", true)).unwrap();
        engine.render("q", &Params::new()).unwrap();
        let summary = engine.coverage_summary("q").unwrap();
        assert_eq!(summary.executions, 2);
        assert_eq!(summary.branch_percent(), 100.0);
    }

    #[test]
    fn test_render_text_uses_cache() {
        let engine = SqlEngine::new();
        engine.render_text("SELECT 1", &Params::new()).unwrap();
        engine.render_text("SELECT 1", &Params::new()).unwrap();
        let stats = engine.cache_stats();
        assert_eq!(stats.hits, 1);
        assert!(engine.coverage_summaries().is_empty());
    }
}
