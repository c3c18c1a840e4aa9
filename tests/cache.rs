use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use journal_engine::{
    CacheError, CacheKey, CacheStore, MemoryStore, QueryPeriod, Tier, TieredCache,
    config::{CacheSettings, ENGINE},
    data::{EntryState, Lookup, Resolution, SnapshotStore, SqliteStore},
    domain::classify,
};

fn d(m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, m, day).unwrap()
}

/// Wednesday 2024-06-05 12:00 UTC
fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 5, 12, 0, 0).unwrap()
}

fn cache() -> (Arc<MemoryStore>, TieredCache) {
    let store = Arc::new(MemoryStore::new());
    let cache = TieredCache::new(store.clone(), CacheSettings::default());
    (store, cache)
}

fn key(period: QueryPeriod, identity: &str, kind: &str) -> CacheKey {
    CacheKey::new(period, identity).with_param("kind", kind)
}

#[tokio::test]
async fn stale_entry_is_served_when_refresh_fails() {
    let (_, cache) = cache();
    let june = key(QueryPeriod::month_of(d(6, 1)), "acct", "chart");

    let assignment = cache.put(&june, &vec![1.0, 2.0], t0()).await.unwrap();
    assert_eq!(assignment.tier, Tier::Current);
    assert_eq!(assignment.expiry, Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap());

    let later = Utc.with_ymd_and_hms(2024, 6, 11, 9, 0, 0).unwrap();
    let cached = cache
        .get_or_refresh(&june, later, || async { Err::<Vec<f64>, _>("upstream down") })
        .await
        .unwrap();

    assert!(cached.stale);
    assert_eq!(cached.resolution, Resolution::StaleServed);
    assert_eq!(cached.value, vec![1.0, 2.0]);
    // The stale entry is left in place for the next attempt
    assert_eq!(cache.state_of(&june, later).await.unwrap(), EntryState::Stale);
}

#[tokio::test]
async fn refresh_state_machine() {
    let (_, cache) = cache();
    let june = key(QueryPeriod::month_of(d(6, 1)), "acct", "tags");

    assert_eq!(cache.state_of(&june, t0()).await.unwrap(), EntryState::Empty);

    let err = cache
        .get_or_refresh(&june, t0(), || async { Err::<u32, _>("no data") })
        .await
        .unwrap_err();
    assert_eq!(err, CacheError::RefreshFailed("no data".to_string()));

    let first = cache
        .get_or_refresh(&june, t0(), || async { Ok::<_, String>(1u32) })
        .await
        .unwrap();
    assert_eq!((first.value, first.resolution), (1, Resolution::Fetched));

    let hit = cache
        .get_or_refresh(&june, t0(), || async { Ok::<_, String>(2u32) })
        .await
        .unwrap();
    assert_eq!((hit.value, hit.resolution, hit.stale), (1, Resolution::Hit, false));

    let next_week = Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap();
    let refreshed = cache
        .get_or_refresh(&june, next_week, || async { Ok::<_, String>(3u32) })
        .await
        .unwrap();
    assert_eq!((refreshed.value, refreshed.resolution), (3, Resolution::Refreshed));
    assert_eq!(cache.state_of(&june, next_week).await.unwrap(), EntryState::Fresh);
}

#[tokio::test]
async fn default_value_when_nothing_to_fall_back_on() {
    let (_, cache) = cache();
    let june = key(QueryPeriod::month_of(d(6, 1)), "acct", "daily");
    let value: Vec<u32> = cache
        .get_or_default(&june, t0(), || async { Err::<Vec<u32>, _>("offline") })
        .await;
    assert!(value.is_empty());
}

#[tokio::test]
async fn past_entries_stay_fresh_until_the_permanent_horizon() {
    let (_, cache) = cache();
    let may = key(QueryPeriod::month_of(d(5, 1)), "acct", "chart");

    let assignment = cache.put(&may, &"closed month", t0()).await.unwrap();
    assert_eq!(assignment.tier, Tier::Past);

    let threshold = t0() + Duration::days(ENGINE.cache.permanent_ttl_days);
    assert_eq!(assignment.expiry, threshold);

    let one_sec = Duration::seconds(1);
    assert_eq!(cache.state_of(&may, threshold - one_sec).await.unwrap(), EntryState::Fresh);
    assert_eq!(cache.state_of(&may, threshold).await.unwrap(), EntryState::Stale);
    assert_eq!(cache.state_of(&may, threshold + one_sec).await.unwrap(), EntryState::Stale);

    // A Past entry is never swept, before, at or after its horizon
    for at in [threshold - one_sec, threshold, threshold + one_sec] {
        let report = cache.sweep(at).await.unwrap();
        assert_eq!((report.scanned, report.removed, report.retained), (1, 0, 1), "sweep at {at}");
    }
    assert!(matches!(cache.get::<String>(&may, threshold + one_sec).await.unwrap(), Lookup::Stale(_)));
}

#[test]
fn tier_boundary_around_today() {
    let now = t0();
    let today = now.date_naive();
    let one = chrono::Days::new(1);

    let yesterday = QueryPeriod::new(d(6, 1), today - one);
    let ending_today = QueryPeriod::new(d(6, 1), today);
    let ending_tomorrow = QueryPeriod::new(d(6, 1), today + one);
    let starting_tomorrow = QueryPeriod::new(today + one, d(6, 30));

    assert_eq!(classify(&yesterday, now).tier, Tier::Past);
    assert_eq!(classify(&ending_today, now).tier, Tier::Current);
    assert_eq!(classify(&ending_tomorrow, now).tier, Tier::Current);
    assert_eq!(classify(&starting_tomorrow, now).tier, Tier::Future);

    // Same inputs, same answer
    assert_eq!(classify(&ending_today, now), classify(&ending_today, now));
}

#[tokio::test]
async fn sweep_removes_expired_current_and_future_entries() {
    let (store, cache) = cache();
    let past = key(QueryPeriod::month_of(d(5, 1)), "acct", "chart");
    let current = key(QueryPeriod::month_of(d(6, 1)), "acct", "chart");
    let future = key(QueryPeriod::month_of(d(7, 1)), "acct", "chart");

    cache.put(&past, &1, t0()).await.unwrap();
    cache.put(&current, &2, t0()).await.unwrap();
    cache.put(&future, &3, t0()).await.unwrap();
    store.set("jc:broken|entry|x.meta", "{not json".into()).await.unwrap();

    // Two days on: only the Future entry (24h) has expired
    let report = cache.sweep(t0() + Duration::days(2)).await.unwrap();
    assert_eq!(report.scanned, 4);
    assert_eq!(report.removed, 1);
    assert_eq!(report.corrupt, 1);
    assert_eq!(report.retained, 2);
    assert!(store.get("jc:broken|entry|x.meta").await.unwrap().is_none());

    // Monday midnight: the Current entry's week has rolled over
    let monday = Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap();
    let report = cache.sweep(monday).await.unwrap();
    assert_eq!((report.removed, report.retained), (1, 1));
    assert_eq!(cache.state_of(&current, monday).await.unwrap(), EntryState::Empty);
    assert_eq!(cache.state_of(&past, monday).await.unwrap(), EntryState::Fresh);
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn invalidate_by_parameter_and_identity() {
    let (_, cache) = cache();
    let june = QueryPeriod::month_of(d(6, 1));
    for identity in ["a", "b"] {
        for kind in ["chart", "tags"] {
            cache.put(&key(june, identity, kind), &0, t0()).await.unwrap();
        }
    }

    let removed = cache
        .invalidate(|meta| meta.params.get("kind").map(String::as_str) == Some("tags"))
        .await
        .unwrap();
    assert_eq!(removed, 2);

    let removed = cache.invalidate(|meta| meta.identity == "a").await.unwrap();
    assert_eq!(removed, 1);

    assert_eq!(cache.state_of(&key(june, "b", "chart"), t0()).await.unwrap(), EntryState::Fresh);
    assert_eq!(cache.state_of(&key(june, "b", "tags"), t0()).await.unwrap(), EntryState::Empty);
}

async fn honours_store_contract(store: &dyn CacheStore) {
    assert_eq!(store.get("jc:missing").await.unwrap(), None);

    store.set("jc:a_b", "1".into()).await.unwrap();
    store.set("jc:axb", "2".into()).await.unwrap();
    store.set("other:a_b", "3".into()).await.unwrap();
    store.set("jc:a_b", "updated".into()).await.unwrap();

    assert_eq!(store.get("jc:a_b").await.unwrap().as_deref(), Some("updated"));
    assert_eq!(store.list_keys("jc:").await.unwrap(), vec!["jc:a_b", "jc:axb"]);
    // '_' is not a wildcard
    assert_eq!(store.list_keys("jc:a_").await.unwrap(), vec!["jc:a_b"]);

    store.remove("jc:a_b").await.unwrap();
    store.remove("jc:never-there").await.unwrap();
    assert_eq!(store.get("jc:a_b").await.unwrap(), None);
    assert_eq!(store.list_keys("jc:").await.unwrap(), vec!["jc:axb"]);
}

#[tokio::test]
async fn memory_store_contract() {
    honours_store_contract(&MemoryStore::new()).await;
}

#[tokio::test]
async fn sqlite_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.sqlite");
    let store = SqliteStore::new(path.to_str().unwrap()).await.unwrap();
    honours_store_contract(&store).await;
}

#[tokio::test]
async fn snapshot_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::open(dir.path().join("cache.bin")).unwrap();
    honours_store_contract(&store).await;
}

#[tokio::test]
async fn tiered_cache_persists_through_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.sqlite");
    let june = key(QueryPeriod::month_of(d(6, 1)), "acct", "chart");

    {
        let store = Arc::new(SqliteStore::new(path.to_str().unwrap()).await.unwrap());
        let cache = TieredCache::new(store, CacheSettings::default());
        cache.put(&june, &vec!["x".to_string()], t0()).await.unwrap();
    }

    let store = Arc::new(SqliteStore::new(path.to_str().unwrap()).await.unwrap());
    let cache = TieredCache::new(store, CacheSettings::default());
    let Lookup::Fresh(entry) = cache.get::<Vec<String>>(&june, t0()).await.unwrap() else {
        panic!("expected a fresh entry after reopening");
    };
    assert_eq!(entry.value, vec!["x".to_string()]);
    assert_eq!(entry.meta.record_count, 1);
    assert_eq!(entry.meta.identity, "acct");
}
