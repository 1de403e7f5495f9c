//! Article execution engine
//!
//! Evaluates one article's machine-readable action list against a fresh
//! per-invocation context. Engines are cheap, borrow their article and
//! regulation, and carry no state between calls; recreating one is always
//! safe.

use crate::config;
use crate::context::EvalContext;
use crate::data_source::DataSourceRegistry;
use crate::error::{EngineError, Result};
use crate::operations::{evaluate_expr, execute_operation, values_equal};
use crate::regulation::{Action, Article, Regulation, ResolveSpec};
use crate::service::ServiceProvider;
use crate::trace::TraceNode;
use crate::types::{TraceNodeType, Value};
use std::collections::HashMap;

/// Result of evaluating one article.
#[derive(Debug, Clone)]
pub struct ArticleResult {
    /// Produced outputs, filtered to the requested one when set
    pub outputs: HashMap<String, Value>,
    /// Inputs resolved during evaluation (cross-regulation and data sources)
    pub resolved_inputs: HashMap<String, Value>,
    pub article_number: String,
    pub law_id: String,
    pub law_uuid: Option<String>,
    /// Execution trace; child order matches evaluation order
    pub trace: Option<TraceNode>,
}

/// Evaluator for a single article.
pub struct ArticleEngine<'a> {
    article: &'a Article,
    regulation: &'a Regulation,
}

impl<'a> ArticleEngine<'a> {
    pub fn new(article: &'a Article, regulation: &'a Regulation) -> Self {
        Self {
            article,
            regulation,
        }
    }

    /// Evaluate this article.
    ///
    /// All actions run in declared order; intermediate outputs may be
    /// dependencies of the requested one, so filtering to
    /// `requested_output` happens only on the returned result.
    pub fn evaluate(
        &self,
        parameters: HashMap<String, Value>,
        service: &dyn ServiceProvider,
        calculation_date: &str,
        requested_output: Option<&str>,
        data_registry: Option<&DataSourceRegistry>,
    ) -> Result<ArticleResult> {
        self.evaluate_at_depth(
            parameters,
            service,
            calculation_date,
            requested_output,
            data_registry,
            0,
        )
    }

    /// Evaluation with explicit recursion depth, used for cross-regulation
    /// and internal-reference descent. Exceeding the depth limit reports a
    /// resolution error instead of recursing unboundedly on cyclic
    /// references.
    pub fn evaluate_at_depth(
        &self,
        parameters: HashMap<String, Value>,
        service: &dyn ServiceProvider,
        calculation_date: &str,
        requested_output: Option<&str>,
        data_registry: Option<&DataSourceRegistry>,
        depth: usize,
    ) -> Result<ArticleResult> {
        if depth > config::MAX_CROSS_REGULATION_DEPTH {
            return Err(EngineError::DepthExceeded {
                limit: config::MAX_CROSS_REGULATION_DEPTH,
                reference: format!("{}/{}", self.regulation.id, self.article.number),
            });
        }

        tracing::debug!(
            law_id = %self.regulation.id,
            article = %self.article.number,
            depth = depth,
            requested_output = ?requested_output,
            "Evaluating article"
        );

        let execution = self.article.execution();
        let input_specs = execution
            .and_then(|exec| exec.input.as_deref())
            .unwrap_or(&[]);
        let output_specs = execution
            .and_then(|exec| exec.output.as_deref())
            .unwrap_or(&[]);

        let mut ctx = EvalContext::new(
            service,
            self.regulation,
            parameters.clone(),
            calculation_date,
            input_specs,
            output_specs,
            data_registry,
            depth,
        )?;

        if let Some(definitions) = self.article.definitions() {
            ctx.set_definitions(definitions);
        }

        ctx.push_trace(
            TraceNode::new(
                TraceNodeType::Root,
                format!(
                    "Evaluate {} article {}",
                    self.regulation.id, self.article.number
                ),
            )
            .with_detail("law_id", self.regulation.id.as_str())
            .with_detail("article", self.article.number.as_str())
            .with_detail("parameters", Value::Object(parameters)),
        );

        let run = self.execute_actions(&mut ctx);
        ctx.pop_trace();
        run?;

        let (mut outputs, resolved_inputs, trace) = ctx.finish();
        if let Some(requested) = requested_output {
            outputs.retain(|name, _| name == requested);
        }

        tracing::debug!(
            law_id = %self.regulation.id,
            article = %self.article.number,
            outputs = ?outputs.keys().collect::<Vec<_>>(),
            "Article evaluation complete"
        );

        Ok(ArticleResult {
            outputs,
            resolved_inputs,
            article_number: self.article.number.clone(),
            law_id: self.regulation.id.clone(),
            law_uuid: self.regulation.uuid.clone(),
            trace,
        })
    }

    fn execute_actions(&self, ctx: &mut EvalContext) -> Result<()> {
        let actions = self
            .article
            .execution()
            .and_then(|exec| exec.actions.as_deref())
            .unwrap_or(&[]);

        for action in actions {
            let Some(output_name) = &action.output else {
                continue;
            };

            ctx.push_trace(
                TraceNode::new(TraceNodeType::Action, format!("Calculate {output_name}"))
                    .with_detail("output", output_name.as_str()),
            );

            match self.evaluate_action(action, ctx) {
                Ok(value) => {
                    ctx.set_trace_result(value.clone());
                    ctx.pop_trace();
                    ctx.set_output(output_name, value);
                }
                Err(e) => {
                    ctx.pop_trace();
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    fn evaluate_action(&self, action: &Action, ctx: &mut EvalContext) -> Result<Value> {
        // An inline operation makes value/subject/values operands
        if let Some(operation) = action.operation {
            return execute_operation(&action.to_op_expr(operation), ctx);
        }

        if let Some(value) = &action.value {
            return evaluate_expr(value, ctx);
        }

        if let Some(resolve) = &action.resolve {
            return self.evaluate_resolve(resolve, ctx);
        }

        tracing::warn!(
            law_id = %self.regulation.id,
            article = %self.article.number,
            "Action without value, operation or resolve"
        );
        Ok(Value::Null)
    }

    /// Legal-basis dispatch.
    ///
    /// Candidates are the ministerial regulations declaring the current
    /// article as their legal basis. With match criteria present, phase 1
    /// computes only the match output and discards non-matching candidates;
    /// phase 2 computes the requested output for survivors. Exactly one
    /// candidate may produce a value.
    fn evaluate_resolve(&self, resolve: &ResolveSpec, ctx: &mut EvalContext) -> Result<Value> {
        let service = ctx.service();
        let candidates = service
            .registry()
            .find_implementing_regulations(&self.regulation.id, &self.article.number);

        tracing::debug!(
            law_id = %self.regulation.id,
            article = %self.article.number,
            output = %resolve.output,
            candidates = candidates.len(),
            "Resolving via legal basis"
        );

        if candidates.is_empty() {
            return Err(EngineError::NoImplementingRegulation {
                law_id: self.regulation.id.clone(),
                article: self.article.number.clone(),
            });
        }

        let expected_match = match &resolve.match_spec {
            Some(spec) => Some(evaluate_expr(&spec.value, ctx)?),
            None => None,
        };

        let data_registry = ctx.data_registry();
        let date = ctx.calculation_date().to_string();
        let depth = ctx.depth();

        let mut matched: Option<(String, Value, Option<TraceNode>)> = None;

        for candidate in candidates {
            let Some(candidate_article) = candidate.find_article_by_output(&resolve.output)
            else {
                tracing::debug!(
                    candidate = %candidate.id,
                    output = %resolve.output,
                    "Candidate lacks requested output, skipping"
                );
                continue;
            };

            let engine = ArticleEngine::new(candidate_article, candidate);

            // Phase 1: match probing
            if let (Some(spec), Some(expected)) = (&resolve.match_spec, &expected_match) {
                let probe = engine.evaluate_at_depth(
                    HashMap::new(),
                    service,
                    &date,
                    Some(&spec.output),
                    data_registry,
                    depth + 1,
                );
                match probe {
                    Ok(result) => match result.outputs.get(&spec.output) {
                        Some(actual) if values_equal(actual, expected) => {}
                        _ => {
                            tracing::debug!(
                                candidate = %candidate.id,
                                "Match criteria not met, skipping"
                            );
                            continue;
                        }
                    },
                    Err(e) if is_probe_error(&e) => {
                        tracing::debug!(
                            candidate = %candidate.id,
                            error = %e,
                            "Candidate probe failed, skipping"
                        );
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            // Phase 2: compute the requested output
            let outcome = engine.evaluate_at_depth(
                HashMap::new(),
                service,
                &date,
                Some(&resolve.output),
                data_registry,
                depth + 1,
            );
            match outcome {
                Ok(result) => {
                    let Some(value) = result.outputs.get(&resolve.output).cloned() else {
                        continue;
                    };
                    if let Some((previous_id, _, _)) = &matched {
                        return Err(EngineError::AmbiguousResolve {
                            law_id: self.regulation.id.clone(),
                            article: self.article.number.clone(),
                            candidates: format!("{previous_id}, {}", candidate.id),
                        });
                    }
                    matched = Some((candidate.id.clone(), value, result.trace));
                }
                Err(e) if is_probe_error(&e) => {
                    tracing::debug!(
                        candidate = %candidate.id,
                        error = %e,
                        "Candidate evaluation failed, skipping"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        let Some((matched_id, value, sub_trace)) = matched else {
            return Err(EngineError::NoResolveMatch {
                law_id: self.regulation.id.clone(),
                article: self.article.number.clone(),
                criteria: resolve
                    .match_spec
                    .as_ref()
                    .map(|m| m.output.clone())
                    .unwrap_or_else(|| "none".to_string()),
            });
        };

        tracing::info!(
            law_id = %self.regulation.id,
            article = %self.article.number,
            matched = %matched_id,
            "Resolved to unique implementing regulation"
        );

        let mut node = TraceNode::new(TraceNodeType::UriCall, format!("Resolve {matched_id}"))
            .with_detail("regeling_id", matched_id)
            .with_detail("output", resolve.output.as_str())
            .with_result(value.clone());
        if let Some(sub) = sub_trace {
            node.add_child(sub);
        }
        ctx.attach_trace_child(node);

        Ok(value)
    }
}

/// Errors expected while probing resolve candidates; these skip the
/// candidate. Everything else (division by zero included) propagates.
fn is_probe_error(error: &EngineError) -> bool {
    matches!(
        error,
        EngineError::TypeMismatch { .. }
            | EngineError::InvalidOperation(_)
            | EngineError::OutputNotFound { .. }
            | EngineError::ArticleNotFound { .. }
            | EngineError::MissingSource(_)
    )
}
