//! Record types shared by the integration tests.

use repokit::{Attributes, Model, Relation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(default)]
    pub id: i64,
    pub status: String,
    pub total: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<OrderItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_count: Option<u64>,
}

impl Model for Order {
    const NAME: &'static str = "Order";
    const TABLE: &'static str = "orders";

    fn relations() -> Vec<Relation> {
        vec![Relation::has_many("items", "order_items", "order_id")]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    #[serde(default)]
    pub id: i64,
    pub order_id: i64,
    pub sku: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Value>,
}

impl Model for OrderItem {
    const NAME: &'static str = "OrderItem";
    const TABLE: &'static str = "order_items";

    fn relations() -> Vec<Relation> {
        vec![Relation::belongs_to("order", "orders", "order_id")]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: i64,
    pub email: String,
    pub name: String,
}

impl Model for User {
    const NAME: &'static str = "User";
    const TABLE: &'static str = "users";
}

/// Build an attribute bag from a `json!` object literal.
pub fn attrs(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}
