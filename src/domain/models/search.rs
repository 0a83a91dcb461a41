//! Simple column → value search used by `get_all` and `get_all_paginated`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::filter::{is_operator, FilterCondition};
use super::model::json_type_name;
use crate::domain::errors::{RepositoryError, RepositoryResult};

/// Column → value or `[operator, value]` mapping.
///
/// Entries are kept sorted by column name, so two searches built in a different
/// order compare (and hash into cache keys) identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchSpec(BTreeMap<String, Value>);

impl SearchSpec {
    /// Empty search.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    /// Set the value for `column`, replacing any previous one.
    pub fn insert(&mut self, column: &str, value: impl Into<Value>) {
        self.0.insert(column.to_string(), value.into());
    }

    /// True when no column is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Columns in insertion order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Translate every entry into a validated condition, in column order.
    ///
    /// `{"status": "paid"}` is an equality; `{"total": [">", 100]}` and
    /// `{"deleted_at": ["is null"]}` use the operator form.
    pub fn conditions(&self) -> RepositoryResult<Vec<FilterCondition>> {
        self.0
            .iter()
            .map(|(column, value)| match value {
                Value::Array(parts) if is_operator_form(parts) => {
                    let mut tuple = Vec::with_capacity(parts.len() + 1);
                    tuple.push(Value::String(column.clone()));
                    tuple.extend(parts.iter().cloned());
                    FilterCondition::parse(&Value::Array(tuple))
                }
                value => FilterCondition::parse(&Value::Array(vec![
                    Value::String(column.clone()),
                    value.clone(),
                ])),
            })
            .collect()
    }
}

fn is_operator_form(parts: &[Value]) -> bool {
    match parts.first() {
        Some(Value::String(op)) => is_operator(op),
        _ => false,
    }
}

impl From<BTreeMap<String, Value>> for SearchSpec {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for SearchSpec {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl TryFrom<Value> for SearchSpec {
    type Error = RepositoryError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(map.into_iter().collect()),
            other => Err(RepositoryError::InvalidFilter(format!(
                "Search must be an object, got {}",
                json_type_name(&other)
            ))),
        }
    }
}
