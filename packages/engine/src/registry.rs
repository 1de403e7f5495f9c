//! Regulation registry: loading and indexing
//!
//! Owns every loaded regulation for the process lifetime and answers
//! lookups by id, by produced output, by declared legal basis, and by
//! delegation selector. All indexes are built at load time and read-only
//! afterwards.

use crate::error::Result;
use crate::regulation::{Article, Regulation};
use crate::types::{RegulatoryLayer, Value};
use crate::uri::RegelrechtUri;
use std::collections::HashMap;
use std::path::Path;

/// Indexed store of regulation documents.
///
/// Duplicate `law_id`s overwrite with a warning (the later-loaded file
/// wins); duplicate `(law_id, output)` pairs likewise. Load order is a
/// deterministic (sorted) filesystem traversal so last-write-wins is
/// reproducible.
#[derive(Default)]
pub struct RegulationRegistry {
    by_id: HashMap<String, Regulation>,
    /// (law_id, output_name) -> article number
    by_output: HashMap<(String, String), String>,
    /// (law_id, article_number) -> implementing regulation ids, in load order
    by_legal_basis: HashMap<(String, String), Vec<String>>,
}

impl RegulationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.yaml` document under `root`.
    ///
    /// Traversal is sorted for determinism. Individual parse failures are
    /// logged and skipped; the registry stays usable.
    ///
    /// Returns the number of regulations loaded.
    pub fn load_directory<P: AsRef<Path>>(&mut self, root: P) -> Result<usize> {
        fn walk(registry: &mut RegulationRegistry, dir: &Path, count: &mut usize) -> Result<()> {
            let mut entries: Vec<_> = std::fs::read_dir(dir)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .collect();
            entries.sort();

            for path in entries {
                if path.is_dir() {
                    walk(registry, &path, count)?;
                } else if path.extension().is_some_and(|ext| ext == "yaml") {
                    match Regulation::from_yaml_file(&path) {
                        Ok(regulation) => {
                            registry.register(regulation);
                            *count += 1;
                        }
                        Err(e) => {
                            tracing::warn!(
                                path = %path.display(),
                                error = %e,
                                "Skipping unparseable regulation file"
                            );
                        }
                    }
                }
            }
            Ok(())
        }

        let mut count = 0;
        walk(self, root.as_ref(), &mut count)?;

        tracing::info!(
            regulations = self.regulation_count(),
            outputs = self.output_count(),
            "Registry loaded"
        );
        Ok(count)
    }

    /// Parse and register a regulation from YAML.
    ///
    /// Returns the regulation id.
    pub fn load_from_yaml(&mut self, yaml: &str) -> Result<String> {
        let regulation = Regulation::from_yaml_str(yaml)?;
        let id = regulation.id.clone();
        self.register(regulation);
        Ok(id)
    }

    /// Register a parsed regulation, rebuilding the affected indexes.
    pub fn register(&mut self, regulation: Regulation) {
        let law_id = regulation.id.clone();

        if self.by_id.contains_key(&law_id) {
            tracing::warn!(law_id = %law_id, "Duplicate regulation id, overwriting");
            self.remove_indexes_for(&law_id);
        }

        for article in &regulation.articles {
            for output_name in article.output_names() {
                let key = (law_id.clone(), output_name.to_string());
                if let Some(previous) = self.by_output.get(&key) {
                    tracing::warn!(
                        law_id = %law_id,
                        output = %output_name,
                        previous_article = %previous,
                        "Duplicate output declaration, later article wins"
                    );
                }
                self.by_output.insert(key, article.number.clone());
            }
        }

        for basis in regulation.legal_basis_entries() {
            let key = (basis.law_id.clone(), basis.article.clone());
            self.by_legal_basis
                .entry(key)
                .or_default()
                .push(law_id.clone());
        }

        self.by_id.insert(law_id, regulation);
    }

    fn remove_indexes_for(&mut self, law_id: &str) {
        self.by_output.retain(|(id, _), _| id != law_id);
        for candidates in self.by_legal_basis.values_mut() {
            candidates.retain(|id| id != law_id);
        }
        self.by_legal_basis.retain(|_, v| !v.is_empty());
    }

    pub fn get_regulation(&self, law_id: &str) -> Option<&Regulation> {
        self.by_id.get(law_id)
    }

    pub fn has_regulation(&self, law_id: &str) -> bool {
        self.by_id.contains_key(law_id)
    }

    /// Find the article of `law_id` that produces `output`.
    pub fn get_article_by_output(&self, law_id: &str, output: &str) -> Option<&Article> {
        let article_number = self
            .by_output
            .get(&(law_id.to_string(), output.to_string()))?;
        self.by_id.get(law_id)?.find_article_by_number(article_number)
    }

    /// Regulations declaring `(law_id, article)` as their legal basis,
    /// filtered to the ministerial-regulation layer.
    ///
    /// All layers are indexed; only `MINISTERIELE_REGELING` documents are
    /// returned by this lookup.
    pub fn find_implementing_regulations(
        &self,
        law_id: &str,
        article: &str,
    ) -> Vec<&Regulation> {
        self.candidates_for(law_id, article)
            .into_iter()
            .filter(|r| r.regulatory_layer == RegulatoryLayer::MinisterieleRegeling)
            .collect()
    }

    /// First regulation under `(law_id, article)` whose attributes match
    /// every criterion. Candidates are checked in load order.
    pub fn find_delegated_regulation(
        &self,
        law_id: &str,
        article: &str,
        criteria: &[(String, Value)],
    ) -> Option<&Regulation> {
        let candidates = self.candidates_for(law_id, article);
        tracing::debug!(
            law_id = %law_id,
            article = %article,
            candidates = candidates.len(),
            "Matching delegation criteria"
        );

        candidates.into_iter().find(|regulation| {
            criteria.iter().all(|(name, expected)| {
                match regulation.attribute(name) {
                    Some(actual) => values_match(&actual, expected),
                    None => false,
                }
            })
        })
    }

    fn candidates_for(&self, law_id: &str, article: &str) -> Vec<&Regulation> {
        self.by_legal_basis
            .get(&(law_id.to_string(), article.to_string()))
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.by_id.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resolve a reference to `(regulation, article, field)`.
    pub fn resolve_uri(
        &self,
        uri: &str,
    ) -> Result<(&Regulation, &Article, Option<String>)> {
        let parsed = RegelrechtUri::parse(uri)?;

        let regulation = self.get_regulation(parsed.law_id()).ok_or_else(|| {
            crate::error::EngineError::RegulationNotFound(parsed.law_id().to_string())
        })?;
        let article = self
            .get_article_by_output(parsed.law_id(), parsed.output())
            .ok_or_else(|| crate::error::EngineError::OutputNotFound {
                law_id: parsed.law_id().to_string(),
                output: parsed.output().to_string(),
            })?;

        Ok((regulation, article, parsed.field().map(str::to_string)))
    }

    /// All loaded regulation ids, sorted.
    pub fn list_regulations(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.by_id.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// All `(law_id, output_name)` pairs, sorted.
    pub fn list_outputs(&self) -> Vec<(&str, &str)> {
        let mut outputs: Vec<(&str, &str)> = self
            .by_output
            .keys()
            .map(|(law, output)| (law.as_str(), output.as_str()))
            .collect();
        outputs.sort_unstable();
        outputs
    }

    pub fn regulation_count(&self) -> usize {
        self.by_id.len()
    }

    pub fn output_count(&self) -> usize {
        self.by_output.len()
    }
}

/// Attribute equality for delegation matching, with int/float coercion.
fn values_match(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(i), Value::Float(f)) | (Value::Float(f), Value::Int(i)) => *i as f64 == *f,
        _ => a == b,
    }
}
