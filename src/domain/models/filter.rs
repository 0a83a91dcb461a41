//! Attribute filter conditions.
//!
//! A condition arrives as an untyped tuple, either `[attribute, value]` or
//! `[attribute, operator, value]`, and is validated into a [`FilterCondition`]
//! before any query is built:
//!
//! ```ignore
//! let conditions = FilterCondition::parse_list(&json!([
//!     ["status", "=", "paid"],
//!     ["total", ">", 100],
//!     ["deleted_at", "is null"],
//! ]))?;
//! ```

use serde::Serialize;
use serde_json::Value;
use std::fmt;

use super::model::{is_attribute_path, json_type_name};
use crate::domain::errors::{RepositoryError, RepositoryResult};

const MISSING_PARTS: &str = "Search params should contain at least attribute and value";
const MISSING_VALUE: &str = "Search attributes should be like [attribute, operator, value]";

/// Binary comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ComparisonOp {
    /// `=`
    Eq,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Gte,
    /// `<=`
    Lte,
    /// `like`, matched as a substring.
    Like,
}

impl ComparisonOp {
    /// Operator text as written in a condition tuple.
    pub const fn as_str(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Lt => "<",
            ComparisonOp::Gte => ">=",
            ComparisonOp::Lte => "<=",
            ComparisonOp::Like => "like",
        }
    }
}

/// Every operator string accepted in the three-element form.
pub const OPERATORS: [&str; 11] = [
    "=", "like", ">", "<", ">=", "<=", "between", "in", "not in", "is null", "not null",
];

fn normalize_operator(op: &str) -> String {
    op.trim().to_ascii_lowercase()
}

/// True if `op` is one of [`OPERATORS`] (case-insensitive).
pub fn is_operator(op: &str) -> bool {
    OPERATORS.contains(&normalize_operator(op).as_str())
}

/// One validated predicate unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FilterCondition {
    /// `attribute = value`. A JSON `null` value means `IS NULL`.
    Equality {
        attribute: String,
        value: Value,
    },
    /// `attribute <op> value` for a scalar value.
    Comparison {
        attribute: String,
        op: ComparisonOp,
        value: Value,
    },
    /// Inclusive `low <= attribute <= high`.
    Range {
        attribute: String,
        low: Value,
        high: Value,
    },
    /// `in` / `not in` over `values`.
    Membership {
        attribute: String,
        negated: bool,
        values: Vec<Value>,
    },
    /// `is null` / `not null`.
    Nullity {
        attribute: String,
        negated: bool,
    },
}

impl FilterCondition {
    /// Validate one untyped condition tuple.
    pub fn parse(raw: &Value) -> RepositoryResult<Self> {
        let Some(parts) = raw.as_array() else {
            return Err(RepositoryError::InvalidFilter(format!(
                "{MISSING_PARTS}, got {}",
                json_type_name(raw)
            )));
        };
        if parts.len() < 2 {
            return Err(RepositoryError::InvalidFilter(MISSING_PARTS.to_string()));
        }

        let attribute = match &parts[0] {
            Value::String(s) => checked_attribute(s)?,
            _ => return Err(RepositoryError::InvalidFilter(MISSING_PARTS.to_string())),
        };

        if parts.len() == 2 {
            if let Value::String(op) = &parts[1] {
                match normalize_operator(op).as_str() {
                    "is null" => return Ok(Self::Nullity { attribute, negated: false }),
                    "not null" => return Ok(Self::Nullity { attribute, negated: true }),
                    _ => {}
                }
            }
            return Ok(Self::Equality {
                attribute,
                value: parts[1].clone(),
            });
        }

        let op = match &parts[1] {
            Value::String(op) => normalize_operator(op),
            other => return Err(RepositoryError::UnsupportedOperator(other.to_string())),
        };
        let value = &parts[2];

        match op.as_str() {
            "=" | ">" | "<" | ">=" | "<=" | "like" => {
                let op = match op.as_str() {
                    "=" => ComparisonOp::Eq,
                    ">" => ComparisonOp::Gt,
                    "<" => ComparisonOp::Lt,
                    ">=" => ComparisonOp::Gte,
                    "<=" => ComparisonOp::Lte,
                    _ => ComparisonOp::Like,
                };
                Self::comparison(&attribute, op, value.clone())
            }
            "between" => match value.as_array().map(Vec::as_slice) {
                Some([low, high]) => Ok(Self::Range {
                    attribute,
                    low: low.clone(),
                    high: high.clone(),
                }),
                _ => Err(RepositoryError::InvalidFilter(format!(
                    "When the operator is `between` the data must be a two-element array, got {}",
                    json_type_name(value)
                ))),
            },
            "in" | "not in" => match value.as_array() {
                Some(values) => Ok(Self::Membership {
                    attribute,
                    negated: op == "not in",
                    values: values.clone(),
                }),
                None => Err(RepositoryError::InvalidFilter(format!(
                    "When the operator is `{op}` the data must be an array, got {}",
                    json_type_name(value)
                ))),
            },
            "is null" => Ok(Self::Nullity { attribute, negated: false }),
            "not null" => Ok(Self::Nullity { attribute, negated: true }),
            other => Err(RepositoryError::UnsupportedOperator(other.to_string())),
        }
    }

    /// Validate a JSON array of condition tuples.
    pub fn parse_list(raw: &Value) -> RepositoryResult<Vec<Self>> {
        match raw {
            Value::Array(items) => items.iter().map(Self::parse).collect(),
            other => Err(RepositoryError::InvalidFilter(format!(
                "Search conditions must be an array, got {}",
                json_type_name(other)
            ))),
        }
    }

    /// Equality condition.
    pub fn eq(attribute: &str, value: impl Into<Value>) -> RepositoryResult<Self> {
        Ok(Self::Equality {
            attribute: checked_attribute(attribute)?,
            value: value.into(),
        })
    }

    /// Comparison condition. `value` must be a scalar.
    pub fn comparison(attribute: &str, op: ComparisonOp, value: Value) -> RepositoryResult<Self> {
        let attribute = checked_attribute(attribute)?;
        match value {
            Value::Null => Err(RepositoryError::InvalidFilter(MISSING_VALUE.to_string())),
            Value::Array(_) | Value::Object(_) => Err(RepositoryError::InvalidFilter(format!(
                "Operator `{}` needs a scalar value, got {}",
                op.as_str(),
                json_type_name(&value)
            ))),
            value => Ok(Self::Comparison { attribute, op, value }),
        }
    }

    /// Inclusive range condition.
    pub fn between(
        attribute: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> RepositoryResult<Self> {
        Ok(Self::Range {
            attribute: checked_attribute(attribute)?,
            low: low.into(),
            high: high.into(),
        })
    }

    /// Membership condition: `attribute in values`.
    pub fn one_of<V: Into<Value>>(
        attribute: &str,
        values: impl IntoIterator<Item = V>,
    ) -> RepositoryResult<Self> {
        Ok(Self::Membership {
            attribute: checked_attribute(attribute)?,
            negated: false,
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    /// Negated membership condition: `attribute not in values`.
    pub fn none_of<V: Into<Value>>(
        attribute: &str,
        values: impl IntoIterator<Item = V>,
    ) -> RepositoryResult<Self> {
        Ok(Self::Membership {
            attribute: checked_attribute(attribute)?,
            negated: true,
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    /// `attribute is null`.
    pub fn is_null(attribute: &str) -> RepositoryResult<Self> {
        Ok(Self::Nullity {
            attribute: checked_attribute(attribute)?,
            negated: false,
        })
    }

    /// `attribute is not null`.
    pub fn not_null(attribute: &str) -> RepositoryResult<Self> {
        Ok(Self::Nullity {
            attribute: checked_attribute(attribute)?,
            negated: true,
        })
    }

    /// Attribute the condition tests.
    pub fn attribute(&self) -> &str {
        match self {
            Self::Equality { attribute, .. }
            | Self::Comparison { attribute, .. }
            | Self::Range { attribute, .. }
            | Self::Membership { attribute, .. }
            | Self::Nullity { attribute, .. } => attribute,
        }
    }
}

fn checked_attribute(attribute: &str) -> RepositoryResult<String> {
    if is_attribute_path(attribute) {
        Ok(attribute.to_string())
    } else {
        Err(RepositoryError::InvalidFilter(format!(
            "'{attribute}' is not a valid attribute name"
        )))
    }
}

/// Canonical text form, used for cache keys. Values render as compact JSON, so
/// `status="1"` and `status=1` stay distinct.
impl fmt::Display for FilterCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equality { attribute, value } => write!(f, "{attribute}={value}"),
            Self::Comparison {
                attribute,
                op: ComparisonOp::Like,
                value,
            } => write!(f, "{attribute} like {value}"),
            Self::Comparison {
                attribute,
                op,
                value,
            } => write!(f, "{attribute}{}{value}", op.as_str()),
            Self::Range {
                attribute,
                low,
                high,
            } => write!(f, "{attribute} between {low},{high}"),
            Self::Membership {
                attribute,
                negated,
                values,
            } => {
                let op = if *negated { "not in" } else { "in" };
                write!(f, "{attribute} {op} {}", Value::Array(values.clone()))
            }
            Self::Nullity { attribute, negated } => {
                let op = if *negated { "not null" } else { "is null" };
                write!(f, "{attribute} {op}")
            }
        }
    }
}
