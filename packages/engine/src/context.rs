//! Execution context for article evaluation
//!
//! The context owns all per-invocation state: the variable tiers, the
//! cross-regulation memo, and the execution trace. Variable references
//! resolve through a fixed priority chain; first hit wins:
//!
//! 1. Built-in `referencedate` (derived from the calculation date)
//! 2. Local scope (nested evaluation)
//! 3. Outputs produced by earlier actions
//! 4. Already-resolved inputs (memo of prior cross-regulation calls)
//! 5. Article definitions
//! 6. Caller parameters (case-insensitive fallback match)
//! 7. Input spec with a `source` - always dispatched; outputs must come
//!    from their designated regulation
//! 8. External data sources, for leaf inputs without a `source`
//!
//! A name none of the tiers can answer yields null with one warning;
//! downstream operators decide whether null is acceptable.

use crate::config;
use crate::data_source::DataSourceRegistry;
use crate::engine::ArticleEngine;
use crate::error::{EngineError, Result};
use crate::operations;
use crate::regulation::{
    Article, Definition, Delegation, DelegationDefaults, Execution, Input, MachineReadable,
    OutputSpec, Regulation, Source,
};
use crate::service::ServiceProvider;
use crate::trace::{TraceNode, TraceStack};
use crate::types::{RegulatoryLayer, ResolveKind, TraceNodeType, Value};
use crate::uri::{self, RegelrechtUri};
use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;

/// Memoised cross-regulation call: the extracted value plus the sub-trace,
/// re-attached on cache hits.
struct CachedCall {
    value: Value,
    trace: Option<TraceNode>,
}

/// Per-invocation evaluation state.
///
/// Owned exclusively by the engine that created it and destroyed with it;
/// sub-engines for cross-regulation calls each own their own context.
pub struct EvalContext<'a> {
    service: &'a dyn ServiceProvider,
    regulation: &'a Regulation,
    definitions: HashMap<String, Value>,
    parameters: HashMap<String, Value>,
    outputs: HashMap<String, Value>,
    local: HashMap<String, Value>,
    resolved_inputs: HashMap<String, Value>,
    input_specs: &'a [Input],
    output_specs: &'a [OutputSpec],
    calculation_date: String,
    reference_date: NaiveDate,
    reference_date_value: Value,
    uri_cache: HashMap<String, CachedCall>,
    trace: TraceStack,
    data_registry: Option<&'a DataSourceRegistry>,
    depth: usize,
}

impl<'a> EvalContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service: &'a dyn ServiceProvider,
        regulation: &'a Regulation,
        parameters: HashMap<String, Value>,
        calculation_date: &str,
        input_specs: &'a [Input],
        output_specs: &'a [OutputSpec],
        data_registry: Option<&'a DataSourceRegistry>,
        depth: usize,
    ) -> Result<Self> {
        let reference_date = NaiveDate::parse_from_str(calculation_date, "%Y-%m-%d")
            .map_err(|e| EngineError::InvalidDate(format!("{calculation_date}: {e}")))?;

        Ok(Self {
            service,
            regulation,
            definitions: HashMap::new(),
            parameters,
            outputs: HashMap::new(),
            local: HashMap::new(),
            resolved_inputs: HashMap::new(),
            input_specs,
            output_specs,
            calculation_date: calculation_date.to_string(),
            reference_date,
            reference_date_value: date_to_value(reference_date),
            uri_cache: HashMap::new(),
            trace: TraceStack::new(),
            data_registry,
            depth,
        })
    }

    pub fn set_definitions(&mut self, definitions: &HashMap<String, Definition>) {
        self.definitions = definitions
            .iter()
            .map(|(k, v)| (k.clone(), v.value().clone()))
            .collect();
    }

    #[cfg(test)]
    pub(crate) fn set_definitions_raw(&mut self, definitions: HashMap<String, Value>) {
        self.definitions = definitions;
    }

    pub fn service(&self) -> &'a dyn ServiceProvider {
        self.service
    }

    pub fn data_registry(&self) -> Option<&'a DataSourceRegistry> {
        self.data_registry
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn calculation_date(&self) -> &str {
        &self.calculation_date
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    pub fn outputs(&self) -> &HashMap<String, Value> {
        &self.outputs
    }

    pub fn set_local(&mut self, name: impl Into<String>, value: Value) {
        self.local.insert(name.into(), value);
    }

    pub fn clear_local(&mut self) {
        self.local.clear();
    }

    /// Write an output, enforcing its type spec.
    ///
    /// Enforcement happens exactly once, here, on every write.
    pub fn set_output(&mut self, name: &str, value: Value) {
        let value = match self
            .output_specs
            .iter()
            .find(|spec| spec.name == name)
            .and_then(|spec| spec.type_spec.as_ref())
        {
            Some(type_spec) => type_spec.enforce(value),
            None => value,
        };
        self.outputs.insert(name.to_string(), value);
    }

    pub fn get_output(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name)
    }

    // =========================================================================
    // Trace
    // =========================================================================

    pub fn push_trace(&mut self, node: TraceNode) {
        self.trace.push(node);
    }

    pub fn pop_trace(&mut self) {
        self.trace.pop();
    }

    pub fn set_trace_result(&mut self, result: Value) {
        self.trace.set_result(result);
    }

    /// Attach a completed node (or subtree) to the current trace scope.
    pub fn attach_trace_child(&mut self, node: TraceNode) {
        self.trace.attach_child(node);
    }

    /// Consume the context, yielding outputs, resolved inputs and the trace.
    pub fn finish(
        self,
    ) -> (
        HashMap<String, Value>,
        HashMap<String, Value>,
        Option<TraceNode>,
    ) {
        (self.outputs, self.resolved_inputs, self.trace.finish())
    }

    // =========================================================================
    // Variable resolution
    // =========================================================================

    /// Resolve a variable reference through the priority tiers.
    ///
    /// Dotted paths resolve the head first, then navigate properties.
    pub fn resolve(&mut self, path: &str) -> Result<Value> {
        if let Some((base, property)) = path.split_once('.') {
            let base_value = self.resolve(base)?;
            if base_value.is_null() {
                tracing::warn!(variable = %base, "Could not resolve base variable");
                return Ok(Value::Null);
            }
            return Ok(get_property(&base_value, property, 0));
        }

        // 1. Built-in reference date
        if path == "referencedate" {
            return Ok(self.reference_date_value.clone());
        }

        // 2. Local scope
        if let Some(value) = self.local.get(path) {
            return Ok(value.clone());
        }

        // 3. Outputs of earlier actions
        if let Some(value) = self.outputs.get(path) {
            return Ok(value.clone());
        }

        // 4. Already-resolved inputs
        if let Some(value) = self.resolved_inputs.get(path) {
            return Ok(value.clone());
        }

        // 5. Definitions
        if let Some(value) = self.definitions.get(path) {
            return Ok(value.clone());
        }

        // 6. Parameters, exact match first, then case-insensitive
        if let Some(value) = self.parameters.get(path) {
            return Ok(value.clone());
        }
        let path_lower = path.to_lowercase();
        if let Some(value) = self
            .parameters
            .iter()
            .find(|(name, _)| name.to_lowercase() == path_lower)
            .map(|(_, v)| v.clone())
        {
            return Ok(value);
        }

        // 7. Input spec with a source: always dispatched
        if let Some(input) = self.find_input_spec(path) {
            if let Some(source) = &input.source {
                let value = self.resolve_from_source(source, path)?;
                self.resolved_inputs.insert(path.to_string(), value.clone());
                return Ok(value);
            }
        }

        // 8. External data sources, leaf inputs only
        if let Some(registry) = self.data_registry {
            let criteria: HashMap<String, Value> = self
                .parameters
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.clone()))
                .collect();
            if let Some(found) = registry.resolve(&path_lower, &criteria) {
                tracing::debug!(
                    variable = %path,
                    source = %found.source_name,
                    "Resolved from data source"
                );
                self.resolved_inputs.insert(path.to_string(), found.value.clone());
                return Ok(found.value);
            }
        }

        tracing::warn!(variable = %path, "Could not resolve variable");
        Ok(Value::Null)
    }

    /// Classify how a name resolves, for resolve trace nodes.
    pub fn resolve_kind(&self, path: &str) -> ResolveKind {
        let head = path.split('.').next().unwrap_or(path);
        if head == "referencedate" {
            ResolveKind::Context
        } else if self.parameters.contains_key(head) {
            ResolveKind::Parameter
        } else if self.definitions.contains_key(head) {
            ResolveKind::Definition
        } else if self.outputs.contains_key(head) {
            ResolveKind::Output
        } else if self.local.contains_key(head) {
            ResolveKind::Local
        } else if self.resolved_inputs.contains_key(head) {
            ResolveKind::UriCall
        } else if self
            .find_input_spec(head)
            .is_some_and(|input| input.source.is_some())
        {
            ResolveKind::UriCall
        } else if self
            .data_registry
            .is_some_and(|registry| registry.has_field(&head.to_lowercase()))
        {
            ResolveKind::DataSource
        } else {
            ResolveKind::Unknown
        }
    }

    fn find_input_spec(&self, name: &str) -> Option<&'a Input> {
        self.input_specs.iter().find(|input| input.name == name)
    }

    // =========================================================================
    // Cross-regulation resolution
    // =========================================================================

    /// Resolve an input's `source` spec.
    fn resolve_from_source(&mut self, source: &'a Source, input_name: &str) -> Result<Value> {
        if let Some(delegation) = &source.delegation {
            return self.resolve_from_delegation(delegation, source, input_name);
        }

        let uri = match (&source.regulation, &source.output) {
            (Some(regulation), Some(output)) => uri::build(regulation, output, Some(output))?,
            _ => {
                // Legacy reference forms
                if let Some(article_ref) = &source.article {
                    match article_ref.rsplit_once('.') {
                        Some((law_id, output)) => uri::build(law_id, output, Some(output))?,
                        None => uri::internal_reference(article_ref),
                    }
                } else if let Some(reference) =
                    source.reference.as_ref().or(source.url.as_ref())
                {
                    reference.clone()
                } else {
                    return Err(EngineError::MissingSource(input_name.to_string()));
                }
            }
        };

        let resolved_params = self.resolve_source_parameters(source)?;

        match uri.strip_prefix('#') {
            Some(output_name) => self.resolve_internal(output_name, resolved_params),
            None => self.resolve_external(&uri, resolved_params),
        }
    }

    /// Evaluate `source.parameters` in this context. `$`-references resolve
    /// against the caller's tiers; everything else passes through.
    fn resolve_source_parameters(
        &mut self,
        source: &Source,
    ) -> Result<HashMap<String, Value>> {
        let Some(spec) = &source.parameters else {
            return Ok(HashMap::new());
        };

        // Clone up front: resolving values needs &mut self
        let spec: Vec<(String, Value)> =
            spec.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        let mut params = HashMap::new();
        for (name, value) in spec {
            let resolved = match &value {
                Value::String(s) => match s.strip_prefix('$') {
                    Some(var) => self.resolve(var)?,
                    None => value,
                },
                _ => value,
            };
            params.insert(name, resolved);
        }
        Ok(params)
    }

    /// Same-document reference: instantiate a fresh engine on the article
    /// producing `output_name` within the current regulation.
    fn resolve_internal(
        &mut self,
        output_name: &str,
        params: HashMap<String, Value>,
    ) -> Result<Value> {
        let uri = uri::internal_reference(output_name);
        let cache_key = self.cache_key(&uri, &params);

        if let Some(cached) = self.uri_cache.get(&cache_key) {
            tracing::debug!(reference = %uri, "Memo hit for internal reference");
            let mut node = TraceNode::new(TraceNodeType::UriCall, format!("Internal {uri}"))
                .with_detail("output", output_name)
                .with_detail("cached", true)
                .with_result(cached.value.clone());
            if let Some(sub) = &cached.trace {
                node.add_child(sub.clone());
            }
            let value = cached.value.clone();
            self.attach_trace_child(node);
            return Ok(value);
        }

        let article = self
            .regulation
            .find_article_by_output(output_name)
            .ok_or_else(|| EngineError::OutputNotFound {
                law_id: self.regulation.id.clone(),
                output: output_name.to_string(),
            })?;

        self.push_trace(
            TraceNode::new(TraceNodeType::UriCall, format!("Internal {uri}"))
                .with_detail("output", output_name)
                .with_detail("law_id", self.regulation.id.as_str()),
        );

        let service = self.service;
        let data_registry = self.data_registry;
        let date = self.calculation_date.clone();
        let depth = self.depth;

        let engine = ArticleEngine::new(article, self.regulation);
        let result = engine.evaluate_at_depth(
            params,
            service,
            &date,
            Some(output_name),
            data_registry,
            depth + 1,
        );

        match result {
            Ok(sub) => {
                if let Some(trace) = &sub.trace {
                    self.attach_trace_child(trace.clone());
                }
                let value = sub.outputs.get(output_name).cloned().unwrap_or(Value::Null);
                self.set_trace_result(value.clone());
                self.pop_trace();
                self.uri_cache.insert(
                    cache_key,
                    CachedCall {
                        value: value.clone(),
                        trace: sub.trace,
                    },
                );
                Ok(value)
            }
            Err(e) => {
                self.pop_trace();
                Err(e)
            }
        }
    }

    /// Cross-regulation call through the service, memoised by
    /// `(uri, parameters, calculation date)`.
    fn resolve_external(
        &mut self,
        uri: &str,
        params: HashMap<String, Value>,
    ) -> Result<Value> {
        let cache_key = self.cache_key(uri, &params);

        if let Some(cached) = self.uri_cache.get(&cache_key) {
            tracing::debug!(uri = %uri, "Memo hit for cross-regulation call");
            let mut node = TraceNode::new(TraceNodeType::UriCall, format!("Call {uri}"))
                .with_detail("uri", uri)
                .with_detail("cached", true)
                .with_result(cached.value.clone());
            if let Some(sub) = &cached.trace {
                node.add_child(sub.clone());
            }
            let value = cached.value.clone();
            self.attach_trace_child(node);
            return Ok(value);
        }

        tracing::debug!(uri = %uri, "Resolving cross-regulation reference");
        self.push_trace(
            TraceNode::new(TraceNodeType::UriCall, format!("Call {uri}"))
                .with_detail("uri", uri)
                .with_detail("parameters", Value::Object(params.clone())),
        );

        let service = self.service;
        let date = self.calculation_date.clone();
        let depth = self.depth;

        let outcome = service
            .evaluate_uri_at_depth(uri, &params, &date, depth + 1)
            .and_then(|sub| {
                let parsed = RegelrechtUri::parse(uri)?;
                Ok((sub, parsed))
            });

        match outcome {
            Ok((sub, parsed)) => {
                if let Some(trace) = &sub.trace {
                    self.attach_trace_child(trace.clone());
                }

                let value = match parsed.field() {
                    Some(field) => sub.outputs.get(field).cloned().unwrap_or(Value::Null),
                    None => {
                        if sub.outputs.len() == 1 {
                            sub.outputs.values().next().cloned().unwrap_or(Value::Null)
                        } else {
                            Value::Object(sub.outputs.clone())
                        }
                    }
                };

                self.set_trace_result(value.clone());
                self.pop_trace();
                self.uri_cache.insert(
                    cache_key,
                    CachedCall {
                        value: value.clone(),
                        trace: sub.trace,
                    },
                );
                Ok(value)
            }
            Err(e) => {
                self.pop_trace();
                Err(e)
            }
        }
    }

    /// Memo key: target URI, canonically serialised sorted parameters, and
    /// the calculation date.
    fn cache_key(&self, uri: &str, params: &HashMap<String, Value>) -> String {
        let mut entries: Vec<(&String, String)> = params
            .iter()
            .map(|(k, v)| (k, canonical_param(v)))
            .collect();
        entries.sort();
        let params_str = entries
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join(",");
        format!("{uri}({params_str},{})", self.calculation_date)
    }

    // =========================================================================
    // Delegation
    // =========================================================================

    /// Resolve a delegated input: match an implementing regulation by the
    /// `select_on` criteria, falling back to the delegating article's
    /// declared defaults.
    fn resolve_from_delegation(
        &mut self,
        delegation: &'a Delegation,
        source: &'a Source,
        input_name: &str,
    ) -> Result<Value> {
        let output_name = source
            .output
            .as_deref()
            .ok_or_else(|| EngineError::MissingSource(input_name.to_string()))?;

        let criteria = self.resolve_select_on(delegation)?;
        if criteria.is_empty() {
            tracing::warn!(
                law_id = %delegation.law_id,
                article = %delegation.article,
                "No usable selection criteria for delegation"
            );
            return Ok(Value::Null);
        }

        let resolved_params = self.resolve_source_parameters(source)?;

        tracing::debug!(
            law_id = %delegation.law_id,
            article = %delegation.article,
            criteria = %format_criteria(&criteria),
            "Resolving delegation"
        );

        let service = self.service;
        let candidate = service.registry().find_delegated_regulation(
            &delegation.law_id,
            &delegation.article,
            &criteria,
        );

        if let Some(verordening) = candidate {
            match verordening.find_article_by_output(output_name) {
                Some(article) => {
                    return self.evaluate_delegated(
                        verordening,
                        article,
                        output_name,
                        resolved_params,
                        &criteria,
                    );
                }
                None => {
                    tracing::warn!(
                        verordening = %verordening.id,
                        output = %output_name,
                        "Matched regulation does not produce the requested output"
                    );
                }
            }
        }

        self.delegation_fallback(delegation, output_name, resolved_params, &criteria)
    }

    fn resolve_select_on(&mut self, delegation: &Delegation) -> Result<Vec<(String, Value)>> {
        let Some(select_on) = delegation.select_on.clone() else {
            return Ok(Vec::new());
        };

        let mut criteria = Vec::new();
        for criterion in &select_on {
            if criterion.name.is_empty() {
                tracing::warn!("Selection criterion missing a name, skipping");
                continue;
            }
            let value = operations::evaluate_expr(&criterion.value, self)?;
            if value.is_null() {
                tracing::warn!(
                    criterion = %criterion.name,
                    "Could not resolve selection criterion value, skipping"
                );
                continue;
            }
            criteria.push((criterion.name.clone(), value));
        }
        Ok(criteria)
    }

    fn evaluate_delegated(
        &mut self,
        verordening: &Regulation,
        article: &Article,
        output_name: &str,
        params: HashMap<String, Value>,
        criteria: &[(String, Value)],
    ) -> Result<Value> {
        tracing::debug!(
            verordening = %verordening.id,
            output = %output_name,
            "Executing delegated regulation"
        );

        self.push_trace(
            TraceNode::new(
                TraceNodeType::UriCall,
                format!("Delegation {}", verordening.id),
            )
            .with_detail("verordening_id", verordening.id.as_str())
            .with_detail("output", output_name)
            .with_detail("criteria", format_criteria(criteria)),
        );

        let service = self.service;
        let data_registry = self.data_registry;
        let date = self.calculation_date.clone();
        let depth = self.depth;

        let engine = ArticleEngine::new(article, verordening);
        let result =
            engine.evaluate_at_depth(params, service, &date, None, data_registry, depth + 1);

        match result {
            Ok(sub) => {
                if let Some(trace) = &sub.trace {
                    self.attach_trace_child(trace.clone());
                }
                let value = sub.outputs.get(output_name).cloned().unwrap_or(Value::Null);
                self.set_trace_result(value.clone());
                self.pop_trace();
                Ok(value)
            }
            Err(e) => {
                self.pop_trace();
                Err(e)
            }
        }
    }

    /// No implementing regulation matched: execute the delegating article's
    /// declared defaults, or raise the no-legal-basis error.
    fn delegation_fallback(
        &mut self,
        delegation: &Delegation,
        output_name: &str,
        params: HashMap<String, Value>,
        criteria: &[(String, Value)],
    ) -> Result<Value> {
        let service = self.service;
        let delegating = service
            .registry()
            .get_regulation(&delegation.law_id)
            .ok_or_else(|| EngineError::RegulationNotFound(delegation.law_id.clone()))?;
        let article = delegating
            .find_article_by_number(&delegation.article)
            .ok_or_else(|| EngineError::ArticleNotFound {
                law_id: delegation.law_id.clone(),
                article: delegation.article.clone(),
            })?;

        for foundation in article.legal_basis_for() {
            if !foundation.contract_outputs().contains(&output_name) {
                continue;
            }
            return match &foundation.defaults {
                Some(defaults) => {
                    tracing::info!(
                        law_id = %delegation.law_id,
                        article = %delegation.article,
                        "No implementing regulation matched, using defaults"
                    );
                    self.execute_defaults(delegation, defaults, output_name, params)
                }
                None => Err(EngineError::NoLegalBasis {
                    law_id: delegation.law_id.clone(),
                    article: delegation.article.clone(),
                    criteria: format_criteria(criteria),
                }),
            };
        }

        Err(EngineError::NoLegalBasis {
            law_id: delegation.law_id.clone(),
            article: delegation.article.clone(),
            criteria: format_criteria(criteria),
        })
    }

    /// Run a `defaults` block as a minimal synthesized article.
    fn execute_defaults(
        &mut self,
        delegation: &Delegation,
        defaults: &DelegationDefaults,
        output_name: &str,
        params: HashMap<String, Value>,
    ) -> Result<Value> {
        let article = Article {
            number: "defaults".to_string(),
            text: "Default values".to_string(),
            url: None,
            machine_readable: Some(MachineReadable {
                definitions: defaults.definitions.clone(),
                execution: Some(Execution {
                    actions: defaults.actions.clone(),
                    ..Default::default()
                }),
                legal_basis_for: None,
            }),
        };
        let regulation = Regulation {
            schema: None,
            id: "defaults".to_string(),
            uuid: None,
            regulatory_layer: RegulatoryLayer::Wet,
            publication_date: self.regulation.publication_date.clone(),
            valid_from: None,
            name: None,
            bwb_id: None,
            url: None,
            identifiers: None,
            gemeente_code: None,
            officiele_titel: None,
            jaar: None,
            legal_basis: None,
            articles: Vec::new(),
        };

        self.push_trace(
            TraceNode::new(
                TraceNodeType::UriCall,
                format!("Defaults {}.{}", delegation.law_id, delegation.article),
            )
            .with_detail("output", output_name),
        );

        let service = self.service;
        let data_registry = self.data_registry;
        let date = self.calculation_date.clone();
        let depth = self.depth;

        let engine = ArticleEngine::new(&article, &regulation);
        let result =
            engine.evaluate_at_depth(params, service, &date, None, data_registry, depth + 1);

        match result {
            Ok(sub) => {
                if let Some(trace) = &sub.trace {
                    self.attach_trace_child(trace.clone());
                }
                let Some(value) = sub.outputs.get(output_name).cloned() else {
                    self.pop_trace();
                    return Err(EngineError::OutputNotFound {
                        law_id: "defaults".to_string(),
                        output: output_name.to_string(),
                    });
                };
                self.set_trace_result(value.clone());
                self.pop_trace();
                Ok(value)
            }
            Err(e) => {
                self.pop_trace();
                Err(e)
            }
        }
    }
}

/// The `referencedate` object: year/month/day members plus the ISO form.
fn date_to_value(date: NaiveDate) -> Value {
    let mut obj = HashMap::new();
    obj.insert("year".to_string(), Value::Int(date.year() as i64));
    obj.insert("month".to_string(), Value::Int(date.month() as i64));
    obj.insert("day".to_string(), Value::Int(date.day() as i64));
    obj.insert(
        "iso".to_string(),
        Value::String(date.format("%Y-%m-%d").to_string()),
    );
    Value::Object(obj)
}

/// Iterated property access: map keys and numeric array indexes.
///
/// Unknown properties yield null with a warning rather than an error.
fn get_property(value: &Value, property_path: &str, depth: usize) -> Value {
    if depth >= config::MAX_PROPERTY_DEPTH {
        tracing::warn!(
            path = %property_path,
            "Property access exceeds maximum depth"
        );
        return Value::Null;
    }

    if let Some((first, rest)) = property_path.split_once('.') {
        let intermediate = get_property(value, first, depth + 1);
        if intermediate.is_null() {
            return Value::Null;
        }
        return get_property(&intermediate, rest, depth + 1);
    }

    match value {
        Value::Object(obj) => match obj.get(property_path) {
            Some(v) => v.clone(),
            None => {
                tracing::warn!(property = %property_path, "Property not found");
                Value::Null
            }
        },
        Value::Array(arr) => match property_path.parse::<usize>() {
            Ok(index) => arr.get(index).cloned().unwrap_or_else(|| {
                tracing::warn!(index = index, "Array index out of bounds");
                Value::Null
            }),
            Err(_) => {
                tracing::warn!(property = %property_path, "Cannot index array by name");
                Value::Null
            }
        },
        other => {
            tracing::warn!(
                property = %property_path,
                on = %other.type_name(),
                "Property access on non-object"
            );
            Value::Null
        }
    }
}

fn canonical_param(value: &Value) -> String {
    // Through serde_json::Value for deterministic (sorted) object keys
    serde_json::to_value(value)
        .map(|v| v.to_string())
        .unwrap_or_else(|_| format!("{value:?}"))
}

fn format_criteria(criteria: &[(String, Value)]) -> String {
    criteria
        .iter()
        .map(|(name, value)| match value {
            Value::String(s) => format!("{name}={s}"),
            other => format!("{name}={}", canonical_param(other)),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::LawExecutionService;

    fn empty_regulation() -> Regulation {
        Regulation::from_yaml_str(
            "$id: ctx_test\nregulatory_layer: WET\npublication_date: '2025-01-01'\narticles: []\n",
        )
        .unwrap()
    }

    fn make_context<'a>(
        service: &'a LawExecutionService,
        regulation: &'a Regulation,
    ) -> EvalContext<'a> {
        let mut params = HashMap::new();
        params.insert("BSN".to_string(), Value::String("999993653".to_string()));
        params.insert("inkomen".to_string(), Value::Int(30000));
        EvalContext::new(service, regulation, params, "2025-06-15", &[], &[], None, 0).unwrap()
    }

    #[test]
    fn test_resolve_parameter() {
        let service = LawExecutionService::new();
        let regulation = empty_regulation();
        let mut ctx = make_context(&service, &regulation);

        assert_eq!(ctx.resolve("inkomen").unwrap(), Value::Int(30000));
        // Case-insensitive fallback
        assert_eq!(
            ctx.resolve("bsn").unwrap(),
            Value::String("999993653".to_string())
        );
    }

    #[test]
    fn test_priority_chain() {
        let service = LawExecutionService::new();
        let regulation = empty_regulation();
        let mut ctx = make_context(&service, &regulation);

        // Definition shadows parameter
        let mut defs = HashMap::new();
        defs.insert("inkomen".to_string(), Value::Int(50000));
        ctx.set_definitions_raw(defs);
        assert_eq!(ctx.resolve("inkomen").unwrap(), Value::Int(50000));

        // Output shadows definition
        ctx.set_output("inkomen", Value::Int(60000));
        assert_eq!(ctx.resolve("inkomen").unwrap(), Value::Int(60000));

        // Local shadows output
        ctx.set_local("inkomen", Value::Int(70000));
        assert_eq!(ctx.resolve("inkomen").unwrap(), Value::Int(70000));

        ctx.clear_local();
        assert_eq!(ctx.resolve("inkomen").unwrap(), Value::Int(60000));
    }

    #[test]
    fn test_unresolvable_yields_null() {
        let service = LawExecutionService::new();
        let regulation = empty_regulation();
        let mut ctx = make_context(&service, &regulation);
        assert_eq!(ctx.resolve("bestaat_niet").unwrap(), Value::Null);
    }

    #[test]
    fn test_referencedate_members() {
        let service = LawExecutionService::new();
        let regulation = empty_regulation();
        let mut ctx = make_context(&service, &regulation);

        assert_eq!(ctx.resolve("referencedate.year").unwrap(), Value::Int(2025));
        assert_eq!(ctx.resolve("referencedate.month").unwrap(), Value::Int(6));
        assert_eq!(ctx.resolve("referencedate.day").unwrap(), Value::Int(15));
        assert_eq!(
            ctx.resolve("referencedate.iso").unwrap(),
            Value::String("2025-06-15".to_string())
        );
    }

    #[test]
    fn test_dotted_access_on_objects_and_arrays() {
        let service = LawExecutionService::new();
        let regulation = empty_regulation();
        let mut ctx = make_context(&service, &regulation);

        let mut address = HashMap::new();
        address.insert("plaats".to_string(), Value::String("Amsterdam".to_string()));
        let mut person = HashMap::new();
        person.insert("adres".to_string(), Value::Object(address));
        ctx.set_output("persoon", Value::Object(person));
        ctx.set_output(
            "lijst",
            Value::Array(vec![Value::Int(10), Value::Int(20)]),
        );

        assert_eq!(
            ctx.resolve("persoon.adres.plaats").unwrap(),
            Value::String("Amsterdam".to_string())
        );
        assert_eq!(ctx.resolve("lijst.1").unwrap(), Value::Int(20));
        // Unknown property is null with a warning, not an error
        assert_eq!(ctx.resolve("persoon.onbekend").unwrap(), Value::Null);
        assert_eq!(ctx.resolve("lijst.99").unwrap(), Value::Null);
    }

    #[test]
    fn test_invalid_calculation_date() {
        let service = LawExecutionService::new();
        let regulation = empty_regulation();
        let result = EvalContext::new(
            &service,
            &regulation,
            HashMap::new(),
            "not-a-date",
            &[],
            &[],
            None,
            0,
        );
        assert!(matches!(result, Err(EngineError::InvalidDate(_))));
    }

    #[test]
    fn test_set_output_enforces_type_spec() {
        let service = LawExecutionService::new();
        let regulation = empty_regulation();
        let output_specs = vec![OutputSpec {
            name: "premie".to_string(),
            value_type: Some("number".to_string()),
            type_spec: Some(crate::regulation::TypeSpec {
                unit: Some("eurocent".to_string()),
                min: Some(0.0),
                ..Default::default()
            }),
            description: None,
        }];
        let mut ctx = EvalContext::new(
            &service,
            &regulation,
            HashMap::new(),
            "2025-01-01",
            &[],
            &output_specs,
            None,
            0,
        )
        .unwrap();

        ctx.set_output("premie", Value::Float(-12.7));
        assert_eq!(ctx.get_output("premie"), Some(&Value::Int(0)));

        ctx.set_output("premie", Value::Float(2112.9));
        assert_eq!(ctx.get_output("premie"), Some(&Value::Int(2112)));

        // Outputs without a spec pass through untouched
        ctx.set_output("vrij", Value::Float(1.23456));
        assert_eq!(ctx.get_output("vrij"), Some(&Value::Float(1.23456)));
    }

    #[test]
    fn test_data_source_tier() {
        let mut service = LawExecutionService::new();
        let mut record = HashMap::new();
        record.insert("bsn".to_string(), Value::String("999993653".to_string()));
        record.insert("toetsingsinkomen".to_string(), Value::Int(35000));
        service.add_source_from_records("belastingdienst", 10, "bsn", vec![record]);

        let regulation = empty_regulation();
        let mut params = HashMap::new();
        params.insert("BSN".to_string(), Value::String("999993653".to_string()));
        let mut ctx = EvalContext::new(
            &service,
            &regulation,
            params,
            "2025-01-01",
            &[],
            &[],
            service.data_sources(),
            0,
        )
        .unwrap();

        assert_eq!(ctx.resolve("toetsingsinkomen").unwrap(), Value::Int(35000));
        // The hit is memoised as a resolved input
        assert_eq!(ctx.resolve_kind("toetsingsinkomen"), ResolveKind::UriCall);
    }

    #[test]
    fn test_resolve_kind_classification() {
        let service = LawExecutionService::new();
        let regulation = empty_regulation();
        let mut ctx = make_context(&service, &regulation);
        ctx.set_output("uitkomst", Value::Int(1));

        assert_eq!(ctx.resolve_kind("referencedate"), ResolveKind::Context);
        assert_eq!(ctx.resolve_kind("inkomen"), ResolveKind::Parameter);
        assert_eq!(ctx.resolve_kind("uitkomst"), ResolveKind::Output);
        assert_eq!(ctx.resolve_kind("bestaat_niet"), ResolveKind::Unknown);
    }
}
