mod helpers;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use repokit::{
    CacheBackend, CacheError, CacheResult, CacheTagSet, CachingRepository, CrudRepository,
    KeyOrModel, MokaCacheBackend, PageRequest, RecordKey, Repository, RepositoryError,
    RepositoryOptions, SearchSpec, SqliteRecordStore,
};
use serde_json::{json, Value};

use helpers::database::setup_test_store;
use helpers::models::{attrs, Order, OrderItem, User};

type CachedOrders = CachingRepository<Order, Repository<Order>>;

fn order_repo(store: &Arc<SqliteRecordStore>) -> Arc<Repository<Order>> {
    Arc::new(Repository::new(store.clone(), RepositoryOptions::default()).unwrap())
}

fn cached_orders(store: &Arc<SqliteRecordStore>, cache: &Arc<MokaCacheBackend>) -> CachedOrders {
    CachingRepository::new(order_repo(store), cache.clone(), 60).unwrap()
}

fn order(id: i64, total: i64) -> repokit::Attributes {
    attrs(json!({"id": id, "status": "paid", "total": total}))
}

#[tokio::test]
async fn test_get_all_reflects_create() {
    let store = setup_test_store().await;
    let cache = Arc::new(MokaCacheBackend::default());
    let orders = cached_orders(&store, &cache);

    for id in 1..=3 {
        orders.create(order(id, id * 10)).await.unwrap().unwrap();
    }
    assert_eq!(orders.get_all(&SearchSpec::new()).await.unwrap().len(), 3);

    orders.create(order(4, 40)).await.unwrap().unwrap();
    assert_eq!(
        orders.get_all(&SearchSpec::new()).await.unwrap().len(),
        4,
        "a write must not leave the cached list stale"
    );
}

#[tokio::test]
async fn test_reads_are_served_from_cache() {
    let store = setup_test_store().await;
    let cache = Arc::new(MokaCacheBackend::default());
    let orders = cached_orders(&store, &cache);
    orders.create(order(1, 10)).await.unwrap().unwrap();

    let search = SearchSpec::new().with("status", "paid");
    assert_eq!(orders.get_all(&search).await.unwrap().len(), 1);
    assert!(cache.get("order.all.status=\"paid\"").await.unwrap().is_some());

    // Bypass the decorator: the cached result is still returned.
    orders.inner().create(order(2, 20)).await.unwrap().unwrap();
    assert_eq!(orders.get_all(&search).await.unwrap().len(), 1);

    orders.flush().await.unwrap();
    assert_eq!(orders.get_all(&search).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_written_record_is_recached_under_its_key() {
    let store = setup_test_store().await;
    let cache = Arc::new(MokaCacheBackend::default());
    let orders = cached_orders(&store, &cache);

    let created = orders.create(order(1, 10)).await.unwrap().unwrap();
    let cached: Value = cache.get("order.find.id=1").await.unwrap().unwrap();
    assert_eq!(cached["total"], 10);

    // Remove the row behind the decorator's back; find is answered from cache.
    orders.inner().delete(KeyOrModel::from(1)).await.unwrap();
    assert_eq!(orders.find(&RecordKey::Int(1)).await.unwrap(), Some(created));

    let updated = orders
        .inner()
        .create(order(2, 20))
        .await
        .unwrap()
        .unwrap();
    let changed = orders
        .update(KeyOrModel::Model(updated), attrs(json!({"total": 25})))
        .await
        .unwrap()
        .unwrap();
    let cached: Value = cache.get("order.find.id=2").await.unwrap().unwrap();
    assert_eq!(cached["total"], 25);
    assert_eq!(changed.total, 25);
}

#[tokio::test]
async fn test_absent_results_are_not_cached() {
    let store = setup_test_store().await;
    let cache = Arc::new(MokaCacheBackend::default());
    let orders = cached_orders(&store, &cache);

    assert!(orders.find(&RecordKey::Int(1)).await.unwrap().is_none());
    assert!(orders.find_or_fail(&json!(1), None).await.unwrap_err().is_not_found());

    orders.inner().create(order(1, 10)).await.unwrap().unwrap();
    assert!(orders.find(&RecordKey::Int(1)).await.unwrap().is_some());
    assert_eq!(orders.find_or_fail(&json!(1), None).await.unwrap().id, 1);
}

#[tokio::test]
async fn test_find_first_and_paginated_are_cached_per_shape() {
    let store = setup_test_store().await;
    let cache = Arc::new(MokaCacheBackend::default());
    let orders = cached_orders(&store, &cache);
    for id in 1..=5 {
        orders.create(order(id, id * 10)).await.unwrap().unwrap();
    }

    let conditions =
        repokit::FilterCondition::parse_list(&json!([["total", ">", 25], ["status", "paid"]]))
            .unwrap();
    assert_eq!(orders.find_first(&conditions).await.unwrap().unwrap().id, 3);

    let first = orders
        .get_all_paginated(&SearchSpec::new(), PageRequest::new(2))
        .await
        .unwrap();
    let second = orders
        .get_all_paginated(&SearchSpec::new(), PageRequest::new(2).page(2))
        .await
        .unwrap();
    assert_eq!(first.items.iter().map(|o| o.id).collect::<Vec<_>>(), vec![5, 4]);
    assert_eq!(second.items.iter().map(|o| o.id).collect::<Vec<_>>(), vec![3, 2]);
    assert_eq!(second.last_page, 3);

    assert!(cache.get("order.paginated:2:1.").await.unwrap().is_some());
    assert!(cache.get("order.paginated:2:2.").await.unwrap().is_some());
    assert!(cache
        .get("order.first.status=\"paid\"|total>25")
        .await
        .unwrap()
        .is_some());

    assert!(orders
        .get_all_paginated(&SearchSpec::new(), PageRequest::new(0))
        .await
        .is_err());
}

#[tokio::test]
async fn test_delete_flushes_before_deleting() {
    let store = setup_test_store().await;
    let cache = Arc::new(MokaCacheBackend::default());
    let orders = cached_orders(&store, &cache);
    orders.create(order(1, 10)).await.unwrap().unwrap();
    orders.create(order(2, 20)).await.unwrap().unwrap();
    assert_eq!(orders.get_all(&SearchSpec::new()).await.unwrap().len(), 2);

    assert!(orders.delete(KeyOrModel::from(1)).await.unwrap());
    assert!(orders.find(&RecordKey::Int(1)).await.unwrap().is_none());
    assert_eq!(orders.get_all(&SearchSpec::new()).await.unwrap().len(), 1);

    orders.delete_many(vec![KeyOrModel::from(2)]).await.unwrap();
    assert!(orders.get_all(&SearchSpec::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_flush_twice_is_safe() {
    let store = setup_test_store().await;
    let cache = Arc::new(MokaCacheBackend::default());
    let orders = cached_orders(&store, &cache);
    orders.create(order(1, 10)).await.unwrap().unwrap();
    orders.get_all(&SearchSpec::new()).await.unwrap();
    assert!(cache.entry_count().await > 0);

    orders.flush().await.unwrap();
    assert_eq!(cache.entry_count().await, 0);
    orders.flush().await.unwrap();
    assert_eq!(cache.entry_count().await, 0);
}

#[tokio::test]
async fn test_flush_is_scoped_to_entity_kind() {
    let store = setup_test_store().await;
    let cache = Arc::new(MokaCacheBackend::default());
    let orders = cached_orders(&store, &cache);
    let users: CachingRepository<User, Repository<User>> = CachingRepository::new(
        Arc::new(Repository::new(store.clone(), RepositoryOptions::default()).unwrap()),
        cache.clone(),
        60,
    )
    .unwrap();

    users
        .create(attrs(json!({"email": "a@x.com", "name": "A"})))
        .await
        .unwrap()
        .unwrap();
    users.get_all(&SearchSpec::new()).await.unwrap();

    orders.create(order(1, 10)).await.unwrap().unwrap();
    assert!(cache.get("user.all.").await.unwrap().is_some());
    assert!(cache.get("user.find.id=1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_untagged_backend_tracks_keys() {
    let store = setup_test_store().await;
    let cache = Arc::new(MokaCacheBackend::untagged(1_000));
    let orders = cached_orders(&store, &cache);
    orders.create(order(1, 10)).await.unwrap().unwrap();

    assert_eq!(orders.get_all(&SearchSpec::new()).await.unwrap().len(), 1);
    orders.inner().create(order(2, 20)).await.unwrap().unwrap();
    assert_eq!(orders.get_all(&SearchSpec::new()).await.unwrap().len(), 1);

    orders
        .update(KeyOrModel::from(1), attrs(json!({"status": "shipped"})))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(orders.get_all(&SearchSpec::new()).await.unwrap().len(), 2);

    orders.flush().await.unwrap();
    orders.flush().await.unwrap();
    assert_eq!(cache.entry_count().await, 0);
}

#[tokio::test]
async fn test_eager_loads_use_their_own_entries() {
    let store = setup_test_store().await;
    let cache = Arc::new(MokaCacheBackend::default());
    let orders = cached_orders(&store, &cache);
    let items: Repository<OrderItem> =
        Repository::new(store.clone(), RepositoryOptions::default()).unwrap();

    orders.create(order(1, 10)).await.unwrap().unwrap();
    items
        .create(attrs(json!({"order_id": 1, "sku": "A"})))
        .await
        .unwrap()
        .unwrap();

    let plain = orders.get_all(&SearchSpec::new()).await.unwrap();
    assert!(plain[0].items.is_none());

    let loaded = orders
        .with(&["items"])
        .unwrap()
        .get_all(&SearchSpec::new())
        .await
        .unwrap();
    assert_eq!(loaded[0].items.as_ref().map(Vec::len), Some(1));
    assert!(cache
        .get("order.all[with:items;count:].")
        .await
        .unwrap()
        .is_some());

    let counted = orders
        .with_count(&["items"])
        .unwrap()
        .find(&RecordKey::Int(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(counted.items_count, Some(1));

    let again = orders.get_all(&SearchSpec::new()).await.unwrap();
    assert!(again[0].items.is_none());
    assert!(orders.pending_eager_load().is_empty());
    assert!(orders.inner().pending_eager_load().is_empty());
}

#[tokio::test]
async fn test_failed_read_does_not_poison_plain_entries() {
    let store = setup_test_store().await;
    let cache = Arc::new(MokaCacheBackend::default());
    let inner = Arc::new(
        Repository::new(store.clone(), RepositoryOptions::default().filterable(["status"]))
            .unwrap(),
    );
    let orders: CachedOrders = CachingRepository::new(inner, cache.clone(), 60).unwrap();
    let items: Repository<OrderItem> =
        Repository::new(store.clone(), RepositoryOptions::default()).unwrap();

    orders.create(order(1, 10)).await.unwrap().unwrap();
    items
        .create(attrs(json!({"order_id": 1, "sku": "A"})))
        .await
        .unwrap()
        .unwrap();
    orders.flush().await.unwrap();

    let err = orders
        .with(&["items"])
        .unwrap()
        .get_all(&SearchSpec::new().with("total", 5))
        .await
        .unwrap_err();
    assert!(err.is_invalid_filter());
    assert!(orders.pending_eager_load().is_empty());
    assert!(orders.inner().pending_eager_load().is_empty());

    let miss = orders.find(&RecordKey::Int(1)).await.unwrap().unwrap();
    let hit = orders.find(&RecordKey::Int(1)).await.unwrap().unwrap();
    assert!(miss.items.is_none());
    assert!(hit.items.is_none());
    let cached: Value = cache.get("order.find.id=1").await.unwrap().unwrap();
    assert!(cached.get("items").map_or(true, Value::is_null));
}

#[tokio::test]
async fn test_untagged_backend_shares_tracking_between_instances() {
    let store = setup_test_store().await;
    let cache = Arc::new(MokaCacheBackend::untagged(100));
    let reader = cached_orders(&store, &cache);
    let writer = cached_orders(&store, &cache);

    writer.create(order(1, 10)).await.unwrap().unwrap();
    assert_eq!(reader.get_all(&SearchSpec::new()).await.unwrap().len(), 1);
    assert!(writer
        .index()
        .tracked_keys(cache.as_ref(), "order")
        .await
        .unwrap()
        .contains(&"order.all.".to_string()));

    writer.create(order(2, 20)).await.unwrap().unwrap();
    assert_eq!(reader.get_all(&SearchSpec::new()).await.unwrap().len(), 2);

    reader.flush().await.unwrap();
    assert!(writer
        .index()
        .tracked_keys(cache.as_ref(), "order")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_empty_tag_set_is_rejected() {
    let store = setup_test_store().await;
    let cache = Arc::new(MokaCacheBackend::default());

    let err = CachingRepository::with_tags(order_repo(&store), cache, 60, CacheTagSet::default())
        .err()
        .unwrap();
    assert!(matches!(err, RepositoryError::EmptyTagSet(model) if model == "Order"));
}

#[tokio::test]
async fn test_custom_tags_and_ttl() {
    let store = setup_test_store().await;
    let cache = Arc::new(MokaCacheBackend::default());
    let orders = CachingRepository::with_tags(
        order_repo(&store),
        cache.clone(),
        5,
        CacheTagSet::new(["orders", "sales"]),
    )
    .unwrap();

    assert_eq!(orders.ttl(), Duration::from_secs(300));
    assert_eq!(orders.index().tags().as_slice().len(), 2);

    orders.create(order(1, 10)).await.unwrap().unwrap();
    orders.get_all(&SearchSpec::new()).await.unwrap();
    cache.flush_tags(&CacheTagSet::single("sales")).await.unwrap();
    assert!(cache.get("order.all.").await.unwrap().is_none());
}

/// Backend that is always down.
struct UnavailableCache;

#[async_trait]
impl CacheBackend for UnavailableCache {
    async fn get(&self, _key: &str) -> CacheResult<Option<Value>> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn put(&self, _key: &str, _value: Value, _ttl: Duration) -> CacheResult<()> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn forget(&self, _key: &str) -> CacheResult<bool> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_cache_outage_propagates() {
    let store = setup_test_store().await;
    let orders: CachedOrders =
        CachingRepository::new(order_repo(&store), Arc::new(UnavailableCache), 60).unwrap();

    let err = orders.get_all(&SearchSpec::new()).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Cache(CacheError::Unavailable(_))));
}
