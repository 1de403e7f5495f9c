//! Golden-fixture framework
//!
//! Fixture files record test cases together with the result a conforming
//! engine must produce. The runner executes each case through the service
//! and compares canonicalised JSON: two implementations are equivalent iff
//! every fixture's canonical result is identical.
//!
//! Canonicalisation: booleans stay booleans, integers stay integers,
//! floats round to 6 decimal places, nulls serialise as JSON null, maps
//! and lists canonicalise recursively (map keys sort). Error outcomes
//! serialise as `{success: false, error_type}`; the `error_message` in a
//! fixture is advisory and never compared.

use crate::engine::ArticleResult;
use crate::error::Result;
use crate::service::LawExecutionService;
use crate::types::Value;
use serde::Deserialize;
use std::collections::HashMap;

/// A fixture file: one category of recorded test cases.
#[derive(Debug, Deserialize)]
pub struct FixtureFile {
    pub version: String,
    pub category: String,
    #[serde(default)]
    pub test_count: Option<usize>,
    pub test_cases: Vec<FixtureCase>,
}

/// One law in a multi-regulation test case.
#[derive(Debug, Deserialize)]
pub struct FixtureLaw {
    pub yaml: String,
}

/// One recorded test case.
#[derive(Debug, Deserialize)]
pub struct FixtureCase {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    #[serde(default = "default_calculation_date")]
    pub calculation_date: String,
    /// Single-regulation form
    #[serde(default)]
    pub law_yaml: Option<String>,
    /// Multi-regulation form
    #[serde(default)]
    pub multi_law: bool,
    #[serde(default)]
    pub laws: Option<Vec<FixtureLaw>>,
    pub law_id: String,
    pub output_name: String,
    #[serde(default)]
    pub expect_error: bool,
    /// The recorded outcome this engine must reproduce
    pub expected: serde_json::Value,
}

fn default_calculation_date() -> String {
    "2025-01-01".to_string()
}

/// Canonicalise a value for cross-engine comparison.
pub fn canonicalize(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => {
            let rounded = (f * 1e6).round() / 1e6;
            serde_json::Number::from_f64(rounded)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null)
        }
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        Value::Object(map) => {
            // serde_json's map sorts keys, which gives the stable ordering
            let mut canonical = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                canonical.insert(key.clone(), canonicalize(&map[key]));
            }
            serde_json::Value::Object(canonical)
        }
    }
}

fn canonicalize_map(map: &HashMap<String, Value>) -> serde_json::Value {
    canonicalize(&Value::Object(map.clone()))
}

/// Convert an evaluation outcome to the fixture comparison form.
pub fn outcome_json(outcome: &Result<ArticleResult>) -> serde_json::Value {
    match outcome {
        Ok(result) => serde_json::json!({
            "success": true,
            "article_number": result.article_number,
            "outputs": canonicalize_map(&result.outputs),
            "resolved_inputs": canonicalize_map(&result.resolved_inputs),
        }),
        Err(e) => serde_json::json!({
            "success": false,
            "error_type": e.kind(),
        }),
    }
}

/// The recorded expectation, stripped of advisory fields.
pub fn expected_for_comparison(case: &FixtureCase) -> serde_json::Value {
    let mut expected = case.expected.clone();
    if let Some(map) = expected.as_object_mut() {
        map.remove("error_message");
    }
    expected
}

/// Execute one fixture case against a fresh service.
pub fn run_case(case: &FixtureCase) -> serde_json::Value {
    let mut service = LawExecutionService::new();

    if case.multi_law {
        let Some(laws) = &case.laws else {
            return serde_json::json!({
                "success": false,
                "error_type": "LoadError",
            });
        };
        for law in laws {
            if let Err(e) = service.load_regulation(&law.yaml) {
                return outcome_json(&Err(e));
            }
        }
    } else if let Some(law_yaml) = &case.law_yaml {
        if let Err(e) = service.load_regulation(law_yaml) {
            return outcome_json(&Err(e));
        }
    }

    let outcome = service.evaluate_law_output(
        &case.law_id,
        &case.output_name,
        case.parameters.clone(),
        &case.calculation_date,
    );
    outcome_json(&outcome)
}
