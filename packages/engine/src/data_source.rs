//! External data sources for leaf-level field lookup
//!
//! Inputs without a `source` spec (raw facts such as income or insurance
//! status) are answered by registered data sources, queried in descending
//! priority order. Inputs *with* a source spec never reach this layer:
//! outputs must come from their designated regulation.

use crate::types::Value;
use std::collections::{HashMap, HashSet};

/// Result of a successful data-source lookup.
#[derive(Debug, Clone)]
pub struct DataSourceMatch {
    pub value: Value,
    pub source_name: String,
}

/// A queryable external data source.
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    /// Higher priority sources are consulted first.
    fn priority(&self) -> i32;

    /// Cheap check whether this source can answer `field` at all.
    fn has_field(&self, field: &str) -> bool;

    /// Look up `field` for the record selected by `criteria`
    /// (typically keyed on a national person number).
    fn get(&self, field: &str, criteria: &HashMap<String, Value>) -> Option<Value>;
}

/// In-memory data source backed by nested maps: record key -> field -> value.
///
/// Field names match case-insensitively; the record key is built from the
/// configured key fields found in the lookup criteria.
#[derive(Debug, Clone, Default)]
pub struct DictDataSource {
    name: String,
    priority: i32,
    /// record_key -> field (lowercase) -> value
    data: HashMap<String, HashMap<String, Value>>,
    field_index: HashSet<String>,
    /// Criteria fields used to build the record key; when empty, all
    /// criteria participate.
    key_fields: Vec<String>,
}

impl DictDataSource {
    pub fn new(
        name: impl Into<String>,
        priority: i32,
        data: HashMap<String, HashMap<String, Value>>,
    ) -> Self {
        let field_index = data
            .values()
            .flat_map(|record| record.keys())
            .map(|k| k.to_lowercase())
            .collect();

        let normalized = data
            .into_iter()
            .map(|(key, fields)| {
                let fields = fields
                    .into_iter()
                    .map(|(k, v)| (k.to_lowercase(), v))
                    .collect();
                (key, fields)
            })
            .collect();

        Self {
            name: name.into(),
            priority,
            data: normalized,
            field_index,
            key_fields: Vec::new(),
        }
    }

    /// Build a source from a flat record list keyed on `key_field`.
    pub fn from_records(
        name: impl Into<String>,
        priority: i32,
        key_field: &str,
        records: Vec<HashMap<String, Value>>,
    ) -> Self {
        let key_field_lower = key_field.to_lowercase();
        let mut data = HashMap::new();

        for record in records {
            let key_value = record
                .iter()
                .find(|(k, _)| k.to_lowercase() == key_field_lower)
                .map(|(_, v)| value_to_key(v));
            if let Some(key) = key_value {
                data.insert(key, record);
            }
        }

        let mut source = Self::new(name, priority, data);
        source.key_fields = vec![key_field_lower];
        source
    }

    /// Insert or replace a record.
    pub fn store(&mut self, key: impl Into<String>, fields: HashMap<String, Value>) {
        let fields: HashMap<String, Value> = fields
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        self.field_index.extend(fields.keys().cloned());
        self.data.insert(key.into(), fields);
    }

    pub fn record_count(&self) -> usize {
        self.data.len()
    }

    fn lookup_key(&self, criteria: &HashMap<String, Value>) -> String {
        let mut parts: Vec<(String, String)> = criteria
            .iter()
            .filter(|(k, _)| {
                self.key_fields.is_empty() || self.key_fields.contains(&k.to_lowercase())
            })
            .map(|(k, v)| (k.to_lowercase(), value_to_key(v)))
            .collect();
        parts.sort();
        parts
            .into_iter()
            .map(|(_, v)| v)
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl DataSource for DictDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn has_field(&self, field: &str) -> bool {
        self.field_index.contains(&field.to_lowercase())
    }

    fn get(&self, field: &str, criteria: &HashMap<String, Value>) -> Option<Value> {
        let key = self.lookup_key(criteria);
        self.data.get(&key)?.get(&field.to_lowercase()).cloned()
    }
}

fn value_to_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Bool(b) => b.to_string(),
        other => format!("{other:?}"),
    }
}

/// Priority-ordered collection of data sources.
#[derive(Default)]
pub struct DataSourceRegistry {
    /// Sorted by priority, highest first
    sources: Vec<Box<dyn DataSource>>,
}

impl DataSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(&mut self, source: Box<dyn DataSource>) {
        self.sources.push(source);
        self.sources
            .sort_by_key(|s| std::cmp::Reverse(s.priority()));
    }

    pub fn remove_source(&mut self, name: &str) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.name() != name);
        self.sources.len() < before
    }

    pub fn clear(&mut self) {
        self.sources.clear();
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn list_sources(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.sources.iter().any(|s| s.has_field(field))
    }

    /// Resolve a field: first non-null answer from the highest-priority
    /// source that declares the field wins.
    pub fn resolve(
        &self,
        field: &str,
        criteria: &HashMap<String, Value>,
    ) -> Option<DataSourceMatch> {
        for source in &self.sources {
            if !source.has_field(field) {
                continue;
            }
            if let Some(value) = source.get(field, criteria) {
                tracing::debug!(
                    field = %field,
                    source = %source.name(),
                    "Resolved field from data source"
                );
                return Some(DataSourceMatch {
                    value,
                    source_name: source.name().to_string(),
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bsn_criteria(bsn: &str) -> HashMap<String, Value> {
        let mut criteria = HashMap::new();
        criteria.insert("bsn".to_string(), Value::String(bsn.to_string()));
        criteria
    }

    fn person_source(name: &str, priority: i32, income: i64) -> DictDataSource {
        let mut record = HashMap::new();
        record.insert("toetsingsinkomen".to_string(), Value::Int(income));
        record.insert("bsn".to_string(), Value::String("999993653".to_string()));
        DictDataSource::from_records(name, priority, "bsn", vec![record])
    }

    #[test]
    fn test_dict_source_lookup() {
        let source = person_source("belastingdienst", 10, 35000);
        assert!(source.has_field("toetsingsinkomen"));
        assert!(source.has_field("TOETSINGSINKOMEN")); // case-insensitive
        assert!(!source.has_field("onbekend"));

        let value = source.get("toetsingsinkomen", &bsn_criteria("999993653"));
        assert_eq!(value, Some(Value::Int(35000)));

        let missing = source.get("toetsingsinkomen", &bsn_criteria("111111110"));
        assert_eq!(missing, None);
    }

    #[test]
    fn test_from_records_ignores_extra_criteria() {
        let source = person_source("belastingdienst", 10, 35000);
        let mut criteria = bsn_criteria("999993653");
        criteria.insert("jaar".to_string(), Value::Int(2025));

        // Extra criteria must not change the record key
        let value = source.get("toetsingsinkomen", &criteria);
        assert_eq!(value, Some(Value::Int(35000)));
    }

    #[test]
    fn test_registry_priority_order() {
        let mut registry = DataSourceRegistry::new();
        registry.add_source(Box::new(person_source("low", 1, 100)));
        registry.add_source(Box::new(person_source("high", 99, 200)));

        let found = registry
            .resolve("toetsingsinkomen", &bsn_criteria("999993653"))
            .unwrap();
        assert_eq!(found.source_name, "high");
        assert_eq!(found.value, Value::Int(200));
    }

    #[test]
    fn test_registry_falls_through_on_miss() {
        let mut registry = DataSourceRegistry::new();
        // Higher-priority source knows the field but not this record
        let mut empty = DictDataSource::from_records("empty", 99, "bsn", vec![]);
        let mut fields = HashMap::new();
        fields.insert("toetsingsinkomen".to_string(), Value::Int(0));
        empty.store("someone_else", fields);
        registry.add_source(Box::new(empty));
        registry.add_source(Box::new(person_source("fallback", 1, 300)));

        let found = registry
            .resolve("toetsingsinkomen", &bsn_criteria("999993653"))
            .unwrap();
        assert_eq!(found.source_name, "fallback");
    }

    #[test]
    fn test_registry_crud() {
        let mut registry = DataSourceRegistry::new();
        registry.add_source(Box::new(person_source("a", 1, 1)));
        registry.add_source(Box::new(person_source("b", 2, 2)));
        assert_eq!(registry.source_count(), 2);
        assert_eq!(registry.list_sources(), vec!["b", "a"]);

        assert!(registry.remove_source("a"));
        assert!(!registry.remove_source("a"));
        assert_eq!(registry.source_count(), 1);

        registry.clear();
        assert_eq!(registry.source_count(), 0);
        assert!(registry.resolve("toetsingsinkomen", &bsn_criteria("x")).is_none());
    }
}
