//! SQLite implementation of the RecordStore.
//!
//! Records of every collection share one table and keep their attributes in a
//! JSON `body`. Predicates compile to `json_extract(body, ?)` expressions; both
//! the JSON path and the compared value are bound parameters.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnection};
use sqlx::{Row, SqlitePool, Transaction};
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::models::model::{is_identifier, json_type_name};
use crate::domain::models::{
    ComparisonOp, Page, PageRequest, Predicate, Query, Record, RecordKey, Relation, RelationKind,
};
use crate::domain::ports::{RecordStore, StoreTransaction};

type SqlxQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// A value bound into a statement.
#[derive(Debug, Clone, PartialEq)]
enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    /// Match how `json_extract` surfaces the same JSON value.
    fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Int(i64::from(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(SqlValue::Int)
                .or_else(|| n.as_f64().map(SqlValue::Real))
                .unwrap_or(SqlValue::Null),
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
        }
    }
}

fn bind_values<'q>(mut query: SqlxQuery<'q>, values: &[SqlValue]) -> SqlxQuery<'q> {
    for value in values {
        query = match value {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Real(f) => query.bind(*f),
            SqlValue::Text(s) => query.bind(s.clone()),
        };
    }
    query
}

/// `$.a.b` for attribute path `a.b`.
fn json_path(attribute: &str) -> String {
    format!("$.{attribute}")
}

/// Read a dotted attribute path out of a record.
fn lookup<'a>(record: &'a Record, attribute: &str) -> Option<&'a Value> {
    let mut parts = attribute.split('.');
    let mut current = record.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

/// WHERE clause and bindings for one collection and predicate list.
struct Filter {
    sql: String,
    binds: Vec<SqlValue>,
}

impl Filter {
    fn new(collection: &str, predicates: &[Predicate]) -> Self {
        let mut filter = Self {
            sql: String::from(" WHERE collection = ?"),
            binds: vec![SqlValue::Text(collection.to_string())],
        };
        for predicate in predicates {
            filter.push(predicate);
        }
        filter
    }

    fn column(&mut self, column: &str) {
        self.sql.push_str("json_extract(body, ?)");
        self.binds.push(SqlValue::Text(json_path(column)));
    }

    fn list(&mut self, values: &[Value]) {
        let placeholders = vec!["?"; values.len()].join(", ");
        self.sql.push_str(&format!("({placeholders})"));
        self.binds.extend(values.iter().map(SqlValue::from_json));
    }

    fn push(&mut self, predicate: &Predicate) {
        self.sql.push_str(" AND ");
        match predicate {
            Predicate::Compare {
                column,
                op: ComparisonOp::Eq,
                value: Value::Null,
            }
            | Predicate::Null { column } => {
                self.column(column);
                self.sql.push_str(" IS NULL");
            }
            Predicate::NotNull { column } => {
                self.column(column);
                self.sql.push_str(" IS NOT NULL");
            }
            Predicate::Compare { column, op, value } => {
                self.column(column);
                let op = match op {
                    ComparisonOp::Like => "LIKE",
                    other => other.as_str(),
                };
                self.sql.push_str(&format!(" {op} ?"));
                self.binds.push(SqlValue::from_json(value));
            }
            Predicate::Between { column, low, high } => {
                self.column(column);
                self.sql.push_str(" BETWEEN ? AND ?");
                self.binds.push(SqlValue::from_json(low));
                self.binds.push(SqlValue::from_json(high));
            }
            Predicate::In { values, .. } if values.is_empty() => self.sql.push_str("0 = 1"),
            Predicate::NotIn { values, .. } if values.is_empty() => self.sql.push_str("1 = 1"),
            Predicate::In { column, values } => {
                self.column(column);
                self.sql.push_str(" IN ");
                self.list(values);
            }
            Predicate::NotIn { column, values } => {
                self.column(column);
                self.sql.push_str(" NOT IN ");
                self.list(values);
            }
        }
    }
}

fn decode_body(body: &str) -> StoreResult<Record> {
    match serde_json::from_str::<Value>(body)? {
        Value::Object(record) => Ok(record),
        other => Err(StoreError::InvalidRecord(format!(
            "stored body is {} instead of an object",
            json_type_name(&other)
        ))),
    }
}

fn map_write_error(err: sqlx::Error, collection: &str, key: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateKey {
            collection: collection.to_string(),
            key: key.to_string(),
        },
        _ => StoreError::from(err),
    }
}

async fn fetch(
    conn: &mut SqliteConnection,
    collection: &str,
    query: &Query,
    window: Option<(u64, u64)>,
) -> StoreResult<Vec<Record>> {
    let filter = Filter::new(collection, &query.predicates);
    let mut sql = format!("SELECT body FROM records{}", filter.sql);
    let mut binds = filter.binds;

    sql.push_str(" ORDER BY ");
    for order in &query.order {
        sql.push_str(&format!("json_extract(body, ?) {}, ", order.direction.as_sql()));
        binds.push(SqlValue::Text(json_path(&order.column)));
    }
    sql.push_str("rowid ASC");

    if let Some((limit, offset)) = window {
        sql.push_str(" LIMIT ? OFFSET ?");
        binds.push(SqlValue::Int(i64::try_from(limit).unwrap_or(i64::MAX)));
        binds.push(SqlValue::Int(i64::try_from(offset).unwrap_or(i64::MAX)));
    }

    debug!(collection, sql = %sql, "fetching records");
    let rows = bind_values(sqlx::query(&sql), &binds)
        .fetch_all(&mut *conn)
        .await?;

    let mut records = rows
        .iter()
        .map(|row| decode_body(&row.try_get::<String, _>("body")?))
        .collect::<StoreResult<Vec<_>>>()?;

    load_relations(conn, &mut records, query).await?;
    Ok(records)
}

async fn count(conn: &mut SqliteConnection, collection: &str, query: &Query) -> StoreResult<u64> {
    let filter = Filter::new(collection, &query.predicates);
    let sql = format!("SELECT COUNT(*) AS total FROM records{}", filter.sql);
    let row = bind_values(sqlx::query(&sql), &filter.binds)
        .fetch_one(&mut *conn)
        .await?;
    let total: i64 = row.try_get("total")?;
    Ok(u64::try_from(total).unwrap_or(0))
}

/// Related records for one relation, keyed on `value`.
///
/// Boxed because `fetch` loads relations through this function.
fn related<'a>(
    conn: &'a mut SqliteConnection,
    relation: &'a Relation,
    value: &'a Value,
) -> Pin<Box<dyn Future<Output = StoreResult<Vec<Record>>> + Send + 'a>> {
    Box::pin(async move {
        let column = match relation.kind {
            RelationKind::HasMany => &relation.foreign_key,
            RelationKind::BelongsTo => &relation.local_key,
        };
        let query = Query::new().where_eq(column, value.clone());
        fetch(conn, &relation.related, &query, None).await
    })
}

/// Attach `with` relations and `with_count` counts to every record.
async fn load_relations(
    conn: &mut SqliteConnection,
    records: &mut [Record],
    query: &Query,
) -> StoreResult<()> {
    if query.with.is_empty() && query.with_count.is_empty() {
        return Ok(());
    }

    for record in records.iter_mut() {
        for relation in query.with.iter().chain(&query.with_count) {
            let source = match relation.kind {
                RelationKind::HasMany => &relation.local_key,
                RelationKind::BelongsTo => &relation.foreign_key,
            };
            let matches = match lookup(record, source) {
                Some(value) if !value.is_null() => related(&mut *conn, relation, value).await?,
                _ => Vec::new(),
            };

            if query.with_count.contains(relation) {
                record.insert(relation.count_attribute(), Value::from(matches.len()));
            }
            if query.with.contains(relation) {
                let loaded = match relation.kind {
                    RelationKind::HasMany => {
                        Value::Array(matches.into_iter().map(Value::Object).collect())
                    }
                    RelationKind::BelongsTo => matches
                        .into_iter()
                        .next()
                        .map_or(Value::Null, Value::Object),
                };
                record.insert(relation.name.clone(), loaded);
            }
        }
    }
    Ok(())
}

/// [`RecordStore`] over a SQLite pool.
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Store over an existing pool. The `records` migration must already be applied.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get(&self, collection: &str, query: &Query) -> StoreResult<Vec<Record>> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, collection, query, None).await
    }

    async fn first(&self, collection: &str, query: &Query) -> StoreResult<Option<Record>> {
        let mut conn = self.pool.acquire().await?;
        Ok(fetch(&mut conn, collection, query, Some((1, 0)))
            .await?
            .into_iter()
            .next())
    }

    async fn paginate(
        &self,
        collection: &str,
        query: &Query,
        page: PageRequest,
    ) -> StoreResult<Page<Record>> {
        let mut conn = self.pool.acquire().await?;
        let total = count(&mut conn, collection, query).await?;
        let items = fetch(
            &mut conn,
            collection,
            query,
            Some((page.per_page, page.offset())),
        )
        .await?;
        Ok(Page::new(items, total, page))
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTransaction { tx: Some(tx) }))
    }
}

/// Open transaction. Dropped without `commit`, sqlx rolls it back.
pub struct SqliteTransaction {
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqliteTransaction {
    fn conn(&mut self) -> StoreResult<&mut SqliteConnection> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| StoreError::Database("transaction already finished".to_string()))
    }

    fn take(&mut self) -> StoreResult<Transaction<'static, Sqlite>> {
        self.tx
            .take()
            .ok_or_else(|| StoreError::Database("transaction already finished".to_string()))
    }

    async fn execute(&mut self, sql: &str) -> StoreResult<()> {
        sqlx::query(sql).execute(self.conn()?).await?;
        Ok(())
    }

    async fn next_int_key(&mut self, collection: &str, key_attribute: &str) -> StoreResult<i64> {
        let path = json_path(key_attribute);
        let row = sqlx::query(
            "SELECT COALESCE(MAX(json_extract(body, ?)), 0) + 1 AS next_key
             FROM records WHERE collection = ? AND json_type(body, ?) = 'integer'",
        )
        .bind(&path)
        .bind(collection)
        .bind(&path)
        .fetch_one(self.conn()?)
        .await?;
        Ok(row.try_get("next_key")?)
    }
}

fn checked_savepoint(name: &str) -> StoreResult<&str> {
    if is_identifier(name) {
        Ok(name)
    } else {
        Err(StoreError::InvalidRecord(format!(
            "'{name}' is not a valid savepoint name"
        )))
    }
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
    async fn first(&mut self, collection: &str, query: &Query) -> StoreResult<Option<Record>> {
        Ok(fetch(self.conn()?, collection, query, Some((1, 0)))
            .await?
            .into_iter()
            .next())
    }

    async fn insert(
        &mut self,
        collection: &str,
        key_attribute: &str,
        mut record: Record,
    ) -> StoreResult<Record> {
        let key = match record.get(key_attribute) {
            None | Some(Value::Null) => {
                let next = self.next_int_key(collection, key_attribute).await?;
                record.insert(key_attribute.to_string(), Value::from(next));
                RecordKey::Int(next)
            }
            Some(value) => RecordKey::from_value(value).ok_or_else(|| {
                StoreError::InvalidRecord(format!(
                    "'{key_attribute}' must be an integer or string, got {}",
                    json_type_name(value)
                ))
            })?,
        };

        let key_text = key.to_string();
        let body = serde_json::to_string(&record)?;
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO records (collection, record_key, body, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(collection)
        .bind(&key_text)
        .bind(&body)
        .bind(&now)
        .bind(&now)
        .execute(self.conn()?)
        .await
        .map_err(|e| map_write_error(e, collection, &key_text))?;

        debug!(collection, key = %key_text, "inserted record");
        Ok(record)
    }

    async fn update(
        &mut self,
        collection: &str,
        key: &RecordKey,
        record: Record,
    ) -> StoreResult<bool> {
        let body = serde_json::to_string(&record)?;
        let result = sqlx::query(
            "UPDATE records SET body = ?, updated_at = ? WHERE collection = ? AND record_key = ?",
        )
        .bind(&body)
        .bind(Utc::now().to_rfc3339())
        .bind(collection)
        .bind(key.to_string())
        .execute(self.conn()?)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&mut self, collection: &str, key: &RecordKey) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM records WHERE collection = ? AND record_key = ?")
            .bind(collection)
            .bind(key.to_string())
            .execute(self.conn()?)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn savepoint(&mut self, name: &str) -> StoreResult<()> {
        let sql = format!("SAVEPOINT {}", checked_savepoint(name)?);
        self.execute(&sql).await
    }

    async fn release_savepoint(&mut self, name: &str) -> StoreResult<()> {
        let sql = format!("RELEASE SAVEPOINT {}", checked_savepoint(name)?);
        self.execute(&sql).await
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> StoreResult<()> {
        let sql = format!("ROLLBACK TO SAVEPOINT {}", checked_savepoint(name)?);
        self.execute(&sql).await
    }

    async fn commit(&mut self) -> StoreResult<()> {
        self.take()?.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        self.take()?.rollback().await?;
        Ok(())
    }
}
