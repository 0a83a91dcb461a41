//! Translation of validated filter conditions into store queries.

use serde_json::Value;

use crate::domain::models::{ComparisonOp, FilterCondition, Query};

/// Stateless compiler from [`FilterCondition`]s to [`Query`] predicates.
///
/// Conditions are ANDed onto `base` in the order given. Validation already
/// happened when the conditions were parsed, so compilation cannot fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttributeFilterCompiler;

impl AttributeFilterCompiler {
    /// Fold `conditions` onto `base`, in order.
    pub fn compile(conditions: &[FilterCondition], base: Query) -> Query {
        let query = conditions.iter().fold(base, Self::apply);
        tracing::debug!(predicates = query.predicates.len(), "compiled filter conditions");
        query
    }

    fn apply(query: Query, condition: &FilterCondition) -> Query {
        match condition {
            FilterCondition::Equality {
                attribute,
                value: Value::Null,
            } => query.where_null(attribute),
            FilterCondition::Equality { attribute, value } => {
                query.where_eq(attribute, value.clone())
            }
            FilterCondition::Comparison {
                attribute,
                op: ComparisonOp::Like,
                value,
            } => query.where_op(attribute, ComparisonOp::Like, wildcard(value)),
            FilterCondition::Comparison {
                attribute,
                op,
                value,
            } => query.where_op(attribute, *op, value.clone()),
            FilterCondition::Range {
                attribute,
                low,
                high,
            } => query.where_between(attribute, low.clone(), high.clone()),
            FilterCondition::Membership {
                attribute,
                negated: false,
                values,
            } => query.where_in(attribute, values.clone()),
            FilterCondition::Membership {
                attribute,
                negated: true,
                values,
            } => query.where_not_in(attribute, values.clone()),
            FilterCondition::Nullity {
                attribute,
                negated: false,
            } => query.where_null(attribute),
            FilterCondition::Nullity {
                attribute,
                negated: true,
            } => query.where_not_null(attribute),
        }
    }
}

/// `%value%`, rendering non-string scalars without JSON quoting.
fn wildcard(value: &Value) -> Value {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Value::String(format!("%{text}%"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Predicate;
    use serde_json::json;

    fn compile(raw: Value) -> Query {
        let conditions = FilterCondition::parse_list(&raw).unwrap();
        AttributeFilterCompiler::compile(&conditions, Query::new())
    }

    #[test]
    fn test_two_tuple_compiles_to_equality() {
        let query = compile(json!([["status", "paid"]]));
        assert_eq!(query, Query::new().where_eq("status", json!("paid")));
    }

    #[test]
    fn test_like_wraps_value() {
        let query = compile(json!([["name", "like", "bob"], ["code", "like", 42]]));
        assert_eq!(
            query.predicates,
            vec![
                Predicate::Compare {
                    column: "name".to_string(),
                    op: ComparisonOp::Like,
                    value: json!("%bob%"),
                },
                Predicate::Compare {
                    column: "code".to_string(),
                    op: ComparisonOp::Like,
                    value: json!("%42%"),
                },
            ]
        );
    }

    #[test]
    fn test_order_is_preserved() {
        let query = compile(json!([
            ["total", "between", [1, 10]],
            ["id", "in", [1, 2, 3]],
            ["id", "not in", [4]],
            ["deleted_at", "is null"],
            ["paid_at", "not null", null],
            ["total", "<=", 9],
        ]));

        assert!(matches!(query.predicates[0], Predicate::Between { .. }));
        assert_eq!(
            query.predicates[1],
            Predicate::In {
                column: "id".to_string(),
                values: vec![json!(1), json!(2), json!(3)],
            }
        );
        assert!(matches!(query.predicates[2], Predicate::NotIn { .. }));
        assert!(matches!(query.predicates[3], Predicate::Null { .. }));
        assert!(matches!(query.predicates[4], Predicate::NotNull { .. }));
        assert!(matches!(
            query.predicates[5],
            Predicate::Compare { op: ComparisonOp::Lte, .. }
        ));
    }

    #[test]
    fn test_null_equality_is_nullity() {
        let query = compile(json!([["deleted_at", null]]));
        assert_eq!(query, Query::new().where_null("deleted_at"));
    }

    #[test]
    fn test_base_query_is_extended() {
        let base = Query::new().where_eq("tenant", json!(1));
        let conditions = FilterCondition::parse_list(&json!([["status", "paid"]])).unwrap();
        let query = AttributeFilterCompiler::compile(&conditions, base);
        assert_eq!(query.predicates.len(), 2);
    }
}
