//! Entity-kind binding: the `Model` trait and its runtime descriptor.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

use crate::domain::errors::{RepositoryError, RepositoryResult};

/// Untyped attribute bag used for create/update payloads.
pub type Attributes = Map<String, Value>;

/// A persisted record as the store sees it.
pub type Record = Map<String, Value>;

/// A record type managed by a repository.
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Order { id: i64, status: String, total: i64 }
///
/// impl Model for Order {
///     const NAME: &'static str = "Order";
///     const TABLE: &'static str = "orders";
/// }
/// ```
pub trait Model: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Entity kind name, used for cache tags and error messages.
    const NAME: &'static str;

    /// Collection the records live in.
    const TABLE: &'static str;

    /// Primary key attribute.
    const KEY: &'static str = "id";

    /// Relations available to `with` / `with_count`.
    fn relations() -> Vec<Relation> {
        Vec::new()
    }
}

/// Primary key value: integer or string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordKey {
    /// Integer key.
    Int(i64),
    /// Caller-supplied string key.
    Str(String),
}

impl RecordKey {
    /// Extract a key from a JSON value. Floats, booleans and containers are not keys.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RecordKey::Int),
            Value::String(s) => Some(RecordKey::Str(s.clone())),
            _ => None,
        }
    }

    /// Key as a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            RecordKey::Int(i) => Value::from(*i),
            RecordKey::Str(s) => Value::from(s.clone()),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Int(i) => write!(f, "{i}"),
            RecordKey::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordKey {
    fn from(value: i64) -> Self {
        RecordKey::Int(value)
    }
}

impl From<i32> for RecordKey {
    fn from(value: i32) -> Self {
        RecordKey::Int(i64::from(value))
    }
}

impl From<&str> for RecordKey {
    fn from(value: &str) -> Self {
        RecordKey::Str(value.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(value: String) -> Self {
        RecordKey::Str(value)
    }
}

/// Target of an update or delete: a key to resolve, or an already loaded model.
#[derive(Debug, Clone)]
pub enum KeyOrModel<M> {
    /// Address a record by key.
    Key(RecordKey),
    /// Address a record by a previously read model.
    Model(M),
}

impl<M> From<RecordKey> for KeyOrModel<M> {
    fn from(key: RecordKey) -> Self {
        KeyOrModel::Key(key)
    }
}

impl<M> From<i64> for KeyOrModel<M> {
    fn from(key: i64) -> Self {
        KeyOrModel::Key(RecordKey::Int(key))
    }
}

impl<M> From<i32> for KeyOrModel<M> {
    fn from(key: i32) -> Self {
        KeyOrModel::Key(RecordKey::from(key))
    }
}

impl<M> From<&str> for KeyOrModel<M> {
    fn from(key: &str) -> Self {
        KeyOrModel::Key(RecordKey::from(key))
    }
}

/// Cardinality of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Related records point at this record: `related.foreign_key == self.local_key`.
    HasMany,
    /// This record points at the related record: `self.foreign_key == related.local_key`.
    BelongsTo,
}

/// An eager-loadable relation between two collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Name used with `with` / `with_count`.
    pub name: String,
    /// Cardinality.
    pub kind: RelationKind,
    /// Collection holding the related records.
    pub related: String,
    /// Attribute holding the foreign key.
    pub foreign_key: String,
    /// Attribute the foreign key points at.
    pub local_key: String,
}

impl Relation {
    /// Related records carry `foreign_key` pointing at this record's key.
    pub fn has_many(name: &str, related: &str, foreign_key: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: RelationKind::HasMany,
            related: related.to_string(),
            foreign_key: foreign_key.to_string(),
            local_key: "id".to_string(),
        }
    }

    /// This record carries `foreign_key` pointing at the related key.
    pub fn belongs_to(name: &str, related: &str, foreign_key: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: RelationKind::BelongsTo,
            related: related.to_string(),
            foreign_key: foreign_key.to_string(),
            local_key: "id".to_string(),
        }
    }

    /// Override the key on the "one" side of the relation (default `id`).
    pub fn with_local_key(mut self, local_key: &str) -> Self {
        self.local_key = local_key.to_string();
        self
    }

    /// Attribute name used for `with_count` results.
    pub fn count_attribute(&self) -> String {
        format!("{}_count", self.name)
    }
}

/// Plain identifier: `[A-Za-z_][A-Za-z0-9_]*`.
pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Attribute path: dot-separated identifiers, e.g. `address.city`.
pub(crate) fn is_attribute_path(s: &str) -> bool {
    !s.is_empty() && s.split('.').all(is_identifier)
}

/// Runtime description of the entity kind a repository is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelDescriptor {
    /// Entity name, e.g. `Order`.
    pub name: String,
    /// Collection records live in.
    pub table: String,
    /// Key attribute.
    pub key: String,
    /// Declared relations.
    pub relations: Vec<Relation>,
}

impl ModelDescriptor {
    /// Descriptor declared by `M`.
    pub fn of<M: Model>() -> Self {
        Self {
            name: M::NAME.to_string(),
            table: M::TABLE.to_string(),
            key: M::KEY.to_string(),
            relations: M::relations(),
        }
    }

    /// Check that the descriptor names a genuine record type.
    pub fn validate(&self) -> RepositoryResult<()> {
        if self.name.trim().is_empty() {
            return Err(RepositoryError::InvalidModelBinding(
                "Model name is empty".to_string(),
            ));
        }
        if !is_identifier(&self.name) {
            return Err(RepositoryError::InvalidModelBinding(format!(
                "{} is not a valid model name",
                self.name
            )));
        }
        if !is_identifier(&self.table) {
            return Err(RepositoryError::InvalidModelBinding(format!(
                "{} has an invalid table name '{}'",
                self.name, self.table
            )));
        }
        if !is_attribute_path(&self.key) {
            return Err(RepositoryError::InvalidModelBinding(format!(
                "{} has an invalid key attribute '{}'",
                self.name, self.key
            )));
        }

        let mut seen = HashSet::new();
        for relation in &self.relations {
            let valid = is_identifier(&relation.name)
                && is_identifier(&relation.related)
                && is_attribute_path(&relation.foreign_key)
                && is_attribute_path(&relation.local_key);
            if !valid {
                return Err(RepositoryError::InvalidModelBinding(format!(
                    "{} has an invalid relation '{}'",
                    self.name, relation.name
                )));
            }
            if !seen.insert(relation.name.as_str()) {
                return Err(RepositoryError::InvalidModelBinding(format!(
                    "{} declares relation '{}' twice",
                    self.name, relation.name
                )));
            }
        }

        Ok(())
    }

    /// Relation named `name`, or `UnknownRelation`.
    pub fn relation(&self, name: &str) -> RepositoryResult<&Relation> {
        self.relations
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| RepositoryError::UnknownRelation {
                model: self.name.clone(),
                relation: name.to_string(),
            })
    }

    /// Key stored in `record`, if usable.
    pub fn key_of(&self, record: &Record) -> Option<RecordKey> {
        record.get(&self.key).and_then(RecordKey::from_value)
    }

    /// Serialize a model into a record. Models must serialize to a JSON object.
    pub fn to_record<M: Model>(&self, model: &M) -> RepositoryResult<Record> {
        match serde_json::to_value(model)? {
            Value::Object(map) => Ok(map),
            other => Err(RepositoryError::Serialization(format!(
                "{} serialized to {} instead of an object",
                self.name,
                json_type_name(&other)
            ))),
        }
    }

    /// Deserialize `record` into `M`.
    pub fn from_record<M: Model>(&self, record: Record) -> RepositoryResult<M> {
        Ok(serde_json::from_value(Value::Object(record))?)
    }

    /// Remove eager-loaded attributes so they are never written back to the store.
    pub fn strip_loaded(&self, record: &mut Record) {
        for relation in &self.relations {
            record.remove(&relation.name);
            record.remove(&relation.count_attribute());
        }
    }
}

pub(crate) const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
