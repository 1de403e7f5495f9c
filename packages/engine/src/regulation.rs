//! Regulation data model and YAML loading
//!
//! Parses article-based regulation documents into the internal model. The
//! shapes here mirror the machine-readable annotation schema: a regulation
//! carries articles, selected articles carry an `execution` block with
//! parameters, inputs, outputs and an ordered action list.
//!
//! The loader enforces document size and array limits (see [`crate::config`])
//! so a malformed or hostile file cannot exhaust the process.

use crate::config;
use crate::error::{EngineError, Result};
use crate::types::{Operation, RegulatoryLayer, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Legal basis reference: this document implements `article` of `law_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegalBasis {
    pub law_id: String,
    pub article: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// The `legal_basis` key accepts a single mapping or a list of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LegalBasisEntries {
    Many(Vec<LegalBasis>),
    One(LegalBasis),
}

impl LegalBasisEntries {
    pub fn iter(&self) -> impl Iterator<Item = &LegalBasis> {
        match self {
            LegalBasisEntries::Many(v) => v.as_slice().iter(),
            LegalBasisEntries::One(b) => std::slice::from_ref(b).iter(),
        }
    }
}

/// Contract of a delegated authority: what implementing regulations provide.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DelegationContract {
    #[serde(default)]
    pub parameters: Option<Vec<Parameter>>,
    #[serde(default)]
    pub output: Option<Vec<OutputSpec>>,
}

/// Fallback rules used when no implementing regulation matches.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DelegationDefaults {
    #[serde(default)]
    pub definitions: Option<HashMap<String, Definition>>,
    #[serde(default)]
    pub actions: Option<Vec<Action>>,
}

/// `legal_basis_for` entry: a delegating article declares what lower
/// regulations may provide, optionally with default rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegalBasisFor {
    pub regulatory_layer: RegulatoryLayer,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub contract: Option<DelegationContract>,
    #[serde(default)]
    pub defaults: Option<DelegationDefaults>,
}

impl LegalBasisFor {
    /// Output names declared in this entry's contract.
    pub fn contract_outputs(&self) -> Vec<&str> {
        self.contract
            .as_ref()
            .and_then(|c| c.output.as_ref())
            .map(|outs| outs.iter().map(|o| o.name.as_str()).collect())
            .unwrap_or_default()
    }
}

/// Per-output constraints, enforced after every write to the output map.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TypeSpec {
    #[serde(rename = "type", default)]
    pub value_type: Option<String>,
    /// Unit of measurement; `eurocent` truncates to integer
    #[serde(default)]
    pub unit: Option<String>,
    /// Decimal places for rounding
    #[serde(default)]
    pub precision: Option<i32>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl TypeSpec {
    /// Apply the constraints to a value.
    ///
    /// Pure and idempotent: applying it twice yields the same value.
    pub fn enforce(&self, value: Value) -> Value {
        if value.is_null() {
            return value;
        }

        if self.value_type.as_deref() == Some("string") {
            return match value {
                Value::String(_) => value,
                Value::Int(i) => Value::String(i.to_string()),
                Value::Float(f) => Value::String(f.to_string()),
                Value::Bool(b) => Value::String(b.to_string()),
                other => other,
            };
        }

        // Numeric strings coerce before clamping
        let value = match value {
            Value::String(s) => match s.parse::<f64>() {
                Ok(f) => Value::Float(f),
                Err(_) => return Value::String(s),
            },
            other => other,
        };

        match value {
            Value::Int(mut i) => {
                if let Some(min) = self.min {
                    if (i as f64) < min {
                        i = min as i64;
                    }
                }
                if let Some(max) = self.max {
                    if (i as f64) > max {
                        i = max as i64;
                    }
                }
                Value::Int(i)
            }
            Value::Float(mut f) => {
                if let Some(min) = self.min {
                    f = f.max(min);
                }
                if let Some(max) = self.max {
                    f = f.min(max);
                }
                if let Some(precision) = self.precision {
                    let factor = 10f64.powi(precision);
                    f = (f * factor).round() / factor;
                }
                if self.unit.as_deref() == Some("eurocent") {
                    Value::Int(f as i64)
                } else {
                    Value::Float(f)
                }
            }
            other => other,
        }
    }
}

/// One selection criterion for delegation matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOn {
    pub name: String,
    /// May be a `$`-reference resolved in the caller's context
    pub value: Expr,
}

/// Delegation lookup: find the regulation implementing `article` of `law_id`
/// whose attributes match all `select_on` criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    pub law_id: String,
    pub article: String,
    #[serde(default)]
    pub select_on: Option<Vec<SelectOn>>,
}

/// Where an input value comes from.
///
/// Modern forms: `regulation` + `output` (cross-regulation call) or
/// `delegation` + `output`. Legacy forms remain accepted: `article`
/// (`"law_id.output"`), `ref` (`"#output"`), or `url`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Source {
    #[serde(default)]
    pub regulation: Option<String>,
    #[serde(default)]
    pub delegation: Option<Delegation>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub parameters: Option<HashMap<String, Value>>,
    #[serde(default)]
    pub article: Option<String>,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Parameter declared by an execution block (caller-supplied).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type", default)]
    pub value_type: Option<String>,
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Input declared by an execution block (sourced externally or cross-law).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    pub name: String,
    #[serde(rename = "type", default)]
    pub value_type: Option<String>,
    #[serde(default)]
    pub source: Option<Source>,
    #[serde(default)]
    pub type_spec: Option<TypeSpec>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Output declared by an execution block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub value_type: Option<String>,
    #[serde(default)]
    pub type_spec: Option<TypeSpec>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Legal character of what an article produces.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Produces {
    #[serde(default)]
    pub legal_character: Option<String>,
    #[serde(default)]
    pub decision_type: Option<String>,
}

/// Match phase of a resolve action: the candidate's `output` must equal the
/// evaluated `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveMatch {
    pub output: String,
    pub value: Expr,
}

/// Legal-basis dispatch: locate the implementing regulation producing
/// `output`, optionally narrowed by `match`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveSpec {
    #[serde(rename = "type", default)]
    pub resolve_type: Option<String>,
    pub output: String,
    #[serde(rename = "match", default)]
    pub match_spec: Option<ResolveMatch>,
}

/// One `{when, then}` arm of a SWITCH.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub when: Expr,
    pub then: Expr,
}

/// Expression: literal scalar, `$`-reference (a string literal starting with
/// `$`), or a nested operation.
///
/// `#[serde(untagged)]`: the operation variant is tried first, which is safe
/// because `OpExpr.operation` is required, so plain mappings without an
/// `operation` key fall through to the literal variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expr {
    Operation(Box<OpExpr>),
    Literal(Value),
}

impl Expr {
    /// Convenience constructor for a literal expression.
    pub fn literal(v: impl Into<Value>) -> Self {
        Expr::Literal(v.into())
    }
}

/// A compound operation expression.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OpExpr {
    pub operation: Operation,
    /// Subject for comparison / null-check / membership operations
    #[serde(default)]
    pub subject: Option<Expr>,
    /// Right-hand side for comparison operations
    #[serde(default)]
    pub value: Option<Expr>,
    /// Operand list for arithmetic / aggregate / membership / date operations
    #[serde(default)]
    pub values: Option<Vec<Expr>>,
    /// Condition for IF
    #[serde(default)]
    pub when: Option<Expr>,
    #[serde(default)]
    pub then: Option<Expr>,
    #[serde(rename = "else", default)]
    pub else_branch: Option<Expr>,
    /// Conditions for AND / OR
    #[serde(default)]
    pub conditions: Option<Vec<Expr>>,
    /// Cases for SWITCH
    #[serde(default)]
    pub cases: Option<Vec<SwitchCase>>,
    #[serde(default)]
    pub default: Option<Expr>,
    /// Unit for SUBTRACT_DATE ("days", "months", "years")
    #[serde(default)]
    pub unit: Option<String>,
}

/// One assignment in an action list. Exactly one of `value`, `operation`
/// (with inline operands) or `resolve` drives the evaluation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub operation: Option<Operation>,
    #[serde(default)]
    pub value: Option<Expr>,
    #[serde(default)]
    pub values: Option<Vec<Expr>>,
    #[serde(default)]
    pub subject: Option<Expr>,
    #[serde(default)]
    pub when: Option<Expr>,
    #[serde(default)]
    pub then: Option<Expr>,
    #[serde(rename = "else", default)]
    pub else_branch: Option<Expr>,
    #[serde(default)]
    pub conditions: Option<Vec<Expr>>,
    #[serde(default)]
    pub cases: Option<Vec<SwitchCase>>,
    #[serde(default)]
    pub default: Option<Expr>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub resolve: Option<ResolveSpec>,
}

impl Action {
    /// Lift an action with an inline `operation` into an [`OpExpr`].
    pub fn to_op_expr(&self, operation: Operation) -> OpExpr {
        OpExpr {
            operation,
            subject: self.subject.clone(),
            value: self.value.clone(),
            values: self.values.clone(),
            when: self.when.clone(),
            then: self.then.clone(),
            else_branch: self.else_branch.clone(),
            conditions: self.conditions.clone(),
            cases: self.cases.clone(),
            default: self.default.clone(),
            unit: self.unit.clone(),
        }
    }
}

/// Execution block of a machine-readable article.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Execution {
    #[serde(default)]
    pub produces: Option<Produces>,
    #[serde(default)]
    pub parameters: Option<Vec<Parameter>>,
    #[serde(default)]
    pub input: Option<Vec<Input>>,
    #[serde(default)]
    pub output: Option<Vec<OutputSpec>>,
    #[serde(default)]
    pub actions: Option<Vec<Action>>,
}

/// Article-level constant. Accepts `NAME: 123` and `NAME: {value: 123}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Definition {
    Structured { value: Value },
    Simple(Value),
}

impl Definition {
    pub fn value(&self) -> &Value {
        match self {
            Definition::Structured { value } => value,
            Definition::Simple(v) => v,
        }
    }
}

/// Machine-readable section of an article.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MachineReadable {
    #[serde(default)]
    pub definitions: Option<HashMap<String, Definition>>,
    #[serde(default)]
    pub execution: Option<Execution>,
    #[serde(default)]
    pub legal_basis_for: Option<Vec<LegalBasisFor>>,
}

/// A numbered section of a regulation. `number` is free-form: dotted forms
/// like `1.1.a` and section-prefixed forms like `B 1.2` both occur.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub number: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, alias = "ref")]
    pub url: Option<String>,
    #[serde(default)]
    pub machine_readable: Option<MachineReadable>,
}

impl Article {
    pub fn execution(&self) -> Option<&Execution> {
        self.machine_readable.as_ref()?.execution.as_ref()
    }

    pub fn definitions(&self) -> Option<&HashMap<String, Definition>> {
        self.machine_readable
            .as_ref()
            .and_then(|mr| mr.definitions.as_ref())
    }

    pub fn legal_basis_for(&self) -> &[LegalBasisFor] {
        self.machine_readable
            .as_ref()
            .and_then(|mr| mr.legal_basis_for.as_deref())
            .unwrap_or(&[])
    }

    /// Declared output names; these are the article's public endpoints.
    pub fn output_names(&self) -> Vec<&str> {
        self.execution()
            .and_then(|exec| exec.output.as_ref())
            .map(|outputs| outputs.iter().map(|o| o.name.as_str()).collect())
            .unwrap_or_default()
    }

    /// Allocation-free check whether this article produces `output_name`.
    pub fn has_output(&self, output_name: &str) -> bool {
        self.execution()
            .and_then(|exec| exec.output.as_ref())
            .is_some_and(|outputs| outputs.iter().any(|o| o.name == output_name))
    }

    pub fn is_public(&self) -> bool {
        self.execution()
            .and_then(|exec| exec.output.as_ref())
            .is_some_and(|outputs| !outputs.is_empty())
    }
}

/// An article-based regulation document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Regulation {
    #[serde(rename = "$schema", default)]
    pub schema: Option<String>,
    /// Identifying slug used in references
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(default)]
    pub uuid: Option<String>,
    pub regulatory_layer: RegulatoryLayer,
    pub publication_date: String,
    #[serde(default)]
    pub valid_from: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// BWB identifier for national regulations
    #[serde(default)]
    pub bwb_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub identifiers: Option<HashMap<String, String>>,
    /// Municipality code for gemeentelijke verordeningen
    #[serde(default)]
    pub gemeente_code: Option<String>,
    #[serde(default)]
    pub officiele_titel: Option<String>,
    /// Year for versioned regulations (tariffs)
    #[serde(default)]
    pub jaar: Option<i32>,
    #[serde(default)]
    pub legal_basis: Option<LegalBasisEntries>,
    #[serde(default)]
    pub articles: Vec<Article>,
}

impl Regulation {
    /// Load a regulation from a YAML file.
    ///
    /// Error messages omit the path so internal layout does not leak into
    /// caller-facing diagnostics.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        tracing::debug!(path = %path_ref.display(), "Loading regulation from YAML file");

        let metadata = fs::metadata(path_ref)
            .map_err(|_| EngineError::LoadError("Failed to access regulation file".to_string()))?;
        if metadata.len() as usize > config::MAX_YAML_SIZE {
            return Err(EngineError::LoadError(format!(
                "File exceeds maximum size limit ({} bytes)",
                config::MAX_YAML_SIZE
            )));
        }

        let content = fs::read_to_string(path_ref)
            .map_err(|_| EngineError::LoadError("Failed to read regulation file".to_string()))?;
        Self::from_yaml_str(&content)
    }

    /// Parse a regulation from a YAML string.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.len() > config::MAX_YAML_SIZE {
            return Err(EngineError::LoadError(format!(
                "YAML content exceeds maximum size limit ({} bytes)",
                config::MAX_YAML_SIZE
            )));
        }

        let regulation: Self = serde_yaml::from_str(content)?;
        regulation.validate_array_sizes()?;

        tracing::debug!(
            law_id = %regulation.id,
            articles = regulation.articles.len(),
            "Parsed regulation"
        );
        Ok(regulation)
    }

    fn validate_array_sizes(&self) -> Result<()> {
        if self.articles.len() > config::MAX_ARRAY_SIZE {
            return Err(EngineError::LoadError(format!(
                "Too many articles ({}, max {})",
                self.articles.len(),
                config::MAX_ARRAY_SIZE
            )));
        }

        for article in &self.articles {
            let Some(exec) = article.execution() else {
                continue;
            };
            let actions_len = exec.actions.as_ref().map_or(0, |a| a.len());
            let inputs_len = exec.input.as_ref().map_or(0, |i| i.len());
            let outputs_len = exec.output.as_ref().map_or(0, |o| o.len());
            if actions_len > config::MAX_ARRAY_SIZE
                || inputs_len > config::MAX_ARRAY_SIZE
                || outputs_len > config::MAX_ARRAY_SIZE
            {
                return Err(EngineError::LoadError(format!(
                    "Execution block of article {} exceeds array size limit ({})",
                    article.number,
                    config::MAX_ARRAY_SIZE
                )));
            }
        }

        Ok(())
    }

    /// Legal-basis declarations, normalised to a flat list.
    pub fn legal_basis_entries(&self) -> Vec<&LegalBasis> {
        self.legal_basis
            .as_ref()
            .map(|entries| entries.iter().collect())
            .unwrap_or_default()
    }

    /// Find the article producing the given output.
    pub fn find_article_by_output(&self, output_name: &str) -> Option<&Article> {
        self.articles
            .iter()
            .find(|article| article.has_output(output_name))
    }

    pub fn find_article_by_number(&self, number: &str) -> Option<&Article> {
        self.articles
            .iter()
            .find(|article| article.number == number)
    }

    /// Mapping of every declared output name to its article.
    pub fn all_outputs(&self) -> HashMap<String, &Article> {
        let mut outputs = HashMap::new();
        for article in &self.articles {
            for output_name in article.output_names() {
                outputs.insert(output_name.to_string(), article);
            }
        }
        outputs
    }

    /// Look up a top-level attribute for delegation matching.
    ///
    /// The closed set of struct fields is checked first, then the open
    /// `identifiers` map.
    pub fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "gemeente_code" => self
                .gemeente_code
                .as_ref()
                .map(|c| Value::String(c.clone())),
            "jaar" => self.jaar.map(|j| Value::Int(j as i64)),
            "name" => self.name.as_ref().map(|n| Value::String(n.clone())),
            "officiele_titel" => self
                .officiele_titel
                .as_ref()
                .map(|t| Value::String(t.clone())),
            "bwb_id" => self.bwb_id.as_ref().map(|b| Value::String(b.clone())),
            _ => self
                .identifiers
                .as_ref()
                .and_then(|ids| ids.get(name))
                .map(|v| Value::String(v.clone())),
        }
    }
}
