//! Property tests for cache key derivation and filter compilation.

mod helpers;

use proptest::prelude::*;
use repokit::{
    AttributeFilterCompiler, CacheTagIndex, FilterCondition, ModelDescriptor, Query,
    RepositoryError, SearchSpec, OPERATORS,
};
use serde_json::{json, Value};

use helpers::models::Order;

fn index() -> CacheTagIndex {
    CacheTagIndex::for_model(&ModelDescriptor::of::<Order>())
}

fn attribute_strategy() -> impl Strategy<Value = String> {
    "[a-z_][a-z0-9_]{0,10}"
}

/// Non-null scalars. Strings are single words, so never `is null` / `not null`.
fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[a-zA-Z0-9]{0,12}".prop_map(Value::from),
    ]
}

fn search_entries() -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::btree_map(attribute_strategy(), scalar_strategy(), 0..8)
        .prop_map(|entries| entries.into_iter().collect())
}

proptest! {
    /// Property: the same search built in any order derives the same key
    #[test]
    fn prop_search_key_ignores_insertion_order(
        (entries, shuffled) in search_entries()
            .prop_flat_map(|entries| (Just(entries.clone()), Just(entries).prop_shuffle()))
    ) {
        let mut forward = SearchSpec::new();
        for (column, value) in &entries {
            forward.insert(column, value.clone());
        }
        let mut reordered = SearchSpec::new();
        for (column, value) in &shuffled {
            reordered.insert(column, value.clone());
        }

        let index = index();
        prop_assert_eq!(
            index.derive_key(&forward, "all").unwrap(),
            index.derive_key(&reordered, "all").unwrap()
        );
    }

    /// Property: condition lists that differ only in order share a key
    #[test]
    fn prop_condition_key_ignores_order(
        (conditions, shuffled) in search_entries()
            .prop_map(|entries| {
                entries
                    .into_iter()
                    .map(|(column, value)| FilterCondition::eq(&column, value).unwrap())
                    .collect::<Vec<_>>()
            })
            .prop_flat_map(|conditions| (Just(conditions.clone()), Just(conditions).prop_shuffle()))
    ) {
        let index = index();
        prop_assert_eq!(
            index.derive_condition_key(&conditions, "first"),
            index.derive_condition_key(&shuffled, "first")
        );
    }

    /// Property: different discriminators never share a key
    #[test]
    fn prop_discriminator_separates_keys(entries in search_entries()) {
        let mut search = SearchSpec::new();
        for (column, value) in &entries {
            search.insert(column, value.clone());
        }
        let index = index();
        prop_assert_ne!(
            index.derive_key(&search, "all").unwrap(),
            index.derive_key(&search, "paginated:15:1").unwrap()
        );
    }

    /// Property: a two-element tuple compiles to an equality predicate
    #[test]
    fn prop_two_tuple_is_equality(attribute in attribute_strategy(), value in scalar_strategy()) {
        let condition = FilterCondition::parse(&json!([attribute.clone(), value.clone()])).unwrap();
        let compiled = AttributeFilterCompiler::compile(&[condition], Query::new());
        prop_assert_eq!(compiled, Query::new().where_eq(&attribute, value));
    }

    /// Property: compiling twice gives the same query
    #[test]
    fn prop_compile_is_deterministic(entries in search_entries()) {
        let conditions: Vec<FilterCondition> = entries
            .iter()
            .map(|(column, value)| FilterCondition::eq(column, value.clone()).unwrap())
            .collect();
        prop_assert_eq!(
            AttributeFilterCompiler::compile(&conditions, Query::new()),
            AttributeFilterCompiler::compile(&conditions, Query::new())
        );
    }

    /// Property: range and membership operators reject scalar values
    #[test]
    fn prop_sequence_operators_reject_scalars(
        attribute in attribute_strategy(),
        op in prop::sample::select(vec!["between", "in", "not in"]),
        value in scalar_strategy(),
    ) {
        let err = FilterCondition::parse(&json!([attribute, op, value])).unwrap_err();
        prop_assert!(matches!(err, RepositoryError::InvalidFilter(_)));
    }

    /// Property: anything outside the operator list is unsupported
    #[test]
    fn prop_unknown_operators_are_rejected(
        attribute in attribute_strategy(),
        op in "[a-z]{3,10}".prop_filter("known operator", |op| !OPERATORS.contains(&op.as_str())),
        value in scalar_strategy(),
    ) {
        let err = FilterCondition::parse(&json!([attribute, op, value])).unwrap_err();
        prop_assert!(matches!(err, RepositoryError::UnsupportedOperator(_)));
        prop_assert!(err.is_invalid_filter());
    }
}

#[test]
fn test_membership_compiles_exact_values() {
    let condition = FilterCondition::parse(&json!(["id", "in", [1, 2, 3]])).unwrap();
    let compiled = AttributeFilterCompiler::compile(&[condition], Query::new());
    assert_eq!(
        compiled,
        Query::new().where_in("id", vec![json!(1), json!(2), json!(3)])
    );
}
