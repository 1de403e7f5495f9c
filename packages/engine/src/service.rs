//! Law execution service
//!
//! Top-level entry point: routes `(law_id, output)` and `regelrecht://`
//! requests to the article that produces the output, and serves as the
//! [`ServiceProvider`] the context calls back into for cross-regulation
//! resolution.
//!
//! Engines are pure functions of their regulation and article, so the
//! service reconstructs them per call rather than caching.

use crate::data_source::{DataSource, DataSourceRegistry, DictDataSource};
use crate::engine::{ArticleEngine, ArticleResult};
use crate::error::Result;
use crate::registry::RegulationRegistry;
use crate::types::{RegulatoryLayer, Value};
use crate::uri;
use std::collections::HashMap;
use std::path::Path;

/// Callback seam for cross-regulation resolution.
///
/// The evaluation context talks to this trait rather than the concrete
/// service, so tests can interpose (e.g. call counting for memoisation
/// checks).
pub trait ServiceProvider {
    /// The regulation registry backing this provider.
    fn registry(&self) -> &RegulationRegistry;

    /// Resolve and evaluate a reference at the given recursion depth.
    ///
    /// `depth` is threaded through recursive descents; the engine turns
    /// excessive depth into a resolution error.
    fn evaluate_uri_at_depth(
        &self,
        uri: &str,
        parameters: &HashMap<String, Value>,
        calculation_date: &str,
        depth: usize,
    ) -> Result<ArticleResult>;
}

/// Summary metadata about a loaded regulation.
#[derive(Debug, Clone)]
pub struct LawInfo {
    pub id: String,
    pub regulatory_layer: RegulatoryLayer,
    pub publication_date: String,
    pub bwb_id: Option<String>,
    pub url: Option<String>,
    /// Output names declared across all articles
    pub outputs: Vec<String>,
    pub article_count: usize,
}

/// Service for executing article-based regulations.
#[derive(Default)]
pub struct LawExecutionService {
    registry: RegulationRegistry,
    data_registry: DataSourceRegistry,
}

impl LawExecutionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a service with every regulation under `root` loaded.
    pub fn from_directory<P: AsRef<Path>>(root: P) -> Result<Self> {
        let mut service = Self::new();
        service.registry.load_directory(root)?;
        Ok(service)
    }

    /// Load a regulation from YAML; returns its id.
    pub fn load_regulation(&mut self, yaml: &str) -> Result<String> {
        self.registry.load_from_yaml(yaml)
    }

    pub fn registry(&self) -> &RegulationRegistry {
        &self.registry
    }

    /// Evaluate an output of a regulation.
    ///
    /// Returns every output the article produces; the named output is only
    /// used to locate the article.
    pub fn evaluate_law_output(
        &self,
        law_id: &str,
        output_name: &str,
        parameters: HashMap<String, Value>,
        calculation_date: &str,
    ) -> Result<ArticleResult> {
        let reference = uri::build(law_id, output_name, None)?;
        self.evaluate_uri_at_depth(&reference, &parameters, calculation_date, 0)
    }

    /// Evaluate a `regelrecht://` or file-path reference.
    ///
    /// When the reference carries a fragment, the result is filtered to
    /// that output.
    pub fn evaluate_uri(
        &self,
        reference: &str,
        parameters: &HashMap<String, Value>,
        calculation_date: &str,
    ) -> Result<ArticleResult> {
        self.evaluate_uri_at_depth(reference, parameters, calculation_date, 0)
    }

    // -------------------------------------------------------------------------
    // Discovery
    // -------------------------------------------------------------------------

    pub fn list_laws(&self) -> Vec<&str> {
        self.registry.list_regulations()
    }

    pub fn list_all_outputs(&self) -> Vec<(&str, &str)> {
        self.registry.list_outputs()
    }

    pub fn get_law_info(&self, law_id: &str) -> Option<LawInfo> {
        let regulation = self.registry.get_regulation(law_id)?;

        let mut outputs = Vec::new();
        for article in &regulation.articles {
            for output in article.output_names() {
                outputs.push(output.to_string());
            }
        }

        Some(LawInfo {
            id: regulation.id.clone(),
            regulatory_layer: regulation.regulatory_layer.clone(),
            publication_date: regulation.publication_date.clone(),
            bwb_id: regulation.bwb_id.clone(),
            url: regulation.url.clone(),
            outputs,
            article_count: regulation.articles.len(),
        })
    }

    // -------------------------------------------------------------------------
    // Data sources
    // -------------------------------------------------------------------------

    pub fn data_sources(&self) -> Option<&DataSourceRegistry> {
        Some(&self.data_registry)
    }

    pub fn add_data_source(&mut self, source: Box<dyn DataSource>) {
        self.data_registry.add_source(source);
    }

    /// Register a record-based dictionary source keyed on `key_field`.
    pub fn add_source_from_records(
        &mut self,
        name: impl Into<String>,
        priority: i32,
        key_field: &str,
        records: Vec<HashMap<String, Value>>,
    ) {
        self.data_registry.add_source(Box::new(DictDataSource::from_records(
            name, priority, key_field, records,
        )));
    }

    pub fn remove_data_source(&mut self, name: &str) -> bool {
        self.data_registry.remove_source(name)
    }

    pub fn clear_data_sources(&mut self) {
        self.data_registry.clear();
    }
}

impl ServiceProvider for LawExecutionService {
    fn registry(&self) -> &RegulationRegistry {
        &self.registry
    }

    fn evaluate_uri_at_depth(
        &self,
        reference: &str,
        parameters: &HashMap<String, Value>,
        calculation_date: &str,
        depth: usize,
    ) -> Result<ArticleResult> {
        tracing::debug!(uri = %reference, depth = depth, "Evaluating reference");

        let (regulation, article, field) = self.registry.resolve_uri(reference)?;

        let engine = ArticleEngine::new(article, regulation);
        engine.evaluate_at_depth(
            parameters.clone(),
            self,
            calculation_date,
            field.as_deref(),
            Some(&self.data_registry),
            depth,
        )
    }
}
