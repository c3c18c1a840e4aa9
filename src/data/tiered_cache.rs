//! Expiry-aware result cache over any [`CacheStore`].
//!
//! Each entry is three records under the `jc:` namespace: the JSON value, its RFC 3339
//! expiry and a JSON meta block. Expiry comes from [`classify`], so a result about a
//! closed period is kept for good while one about the current week is refreshed when
//! the week rolls over. Stale entries are served, flagged, when a refresh fails.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::{CacheSettings, DF, PERSISTENCE, cache_record_key},
    data::CacheStore,
    domain::{QueryPeriod, Tier, TierAssignment, classify_with},
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CacheError {
    #[error("cache store failure: {0}")]
    Store(String),

    #[error("cache codec failure: {0}")]
    Codec(String),

    /// Refresh failed and there was nothing cached to fall back on.
    #[error("refresh failed with no cached value: {0}")]
    RefreshFailed(String),
}

impl CacheError {
    fn store(err: anyhow::Error) -> Self {
        CacheError::Store(format!("{:#}", err))
    }

    fn codec(err: serde_json::Error) -> Self {
        CacheError::Codec(err.to_string())
    }
}

/// Identity of a cached query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub period: QueryPeriod,
    /// Who or what the query is about, e.g. an account id
    pub identity: String,
    pub params: BTreeMap<String, String>,
}

impl CacheKey {
    pub fn new(period: QueryPeriod, identity: impl Into<String>) -> Self {
        Self {
            period,
            identity: identity.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Display) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    /// Stable hash of the parameters. Insertion order does not matter.
    pub fn params_hash(&self) -> String {
        let canonical = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .join("&");
        Uuid::new_v5(&Uuid::NAMESPACE_OID, canonical.as_bytes())
            .simple()
            .to_string()
    }

    /// `period|identity|params_hash`
    pub fn composite(&self) -> String {
        format!("{}|{}|{}", self.period, self.identity, self.params_hash())
    }
}

/// Descriptor stored next to every value. Predicates for [`TieredCache::invalidate`]
/// match against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub last_updated: DateTime<Utc>,
    pub record_count: usize,
    pub tier: Tier,
    pub period: QueryPeriod,
    pub identity: String,
    pub params_hash: String,
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub value: T,
    pub expiry: DateTime<Utc>,
    pub meta: CacheMeta,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Miss,
    Fresh(CacheEntry<T>),
    Stale(CacheEntry<T>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Empty,
    Fresh,
    Stale,
}

/// How a [`Cached`] value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Served from a fresh entry
    Hit,
    /// Nothing was cached; fetched and stored
    Fetched,
    /// The entry was stale and a refetch succeeded
    Refreshed,
    /// The entry was stale and the refetch failed
    StaleServed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    /// True when the value is past its expiry
    pub stale: bool,
    pub resolution: Resolution,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    pub corrupt: usize,
    pub retained: usize,
}

/// Raw records of one entry before the value is decoded.
struct RawEntry {
    value: String,
    expiry: DateTime<Utc>,
    meta: CacheMeta,
}

pub struct TieredCache {
    store: Arc<dyn CacheStore>,
    settings: CacheSettings,
}

impl TieredCache {
    pub fn new(store: Arc<dyn CacheStore>, settings: CacheSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    fn keys_for(composite: &str) -> [String; 3] {
        let cfg = &PERSISTENCE.cache;
        [
            cache_record_key(composite, cfg.value_suffix),
            cache_record_key(composite, cfg.expiry_suffix),
            cache_record_key(composite, cfg.meta_suffix),
        ]
    }

    async fn read_raw(&self, composite: &str) -> Result<Option<RawEntry>, CacheError> {
        let [value_key, expiry_key, meta_key] = Self::keys_for(composite);

        let Some(value) = self.store.get(&value_key).await.map_err(CacheError::store)? else {
            return Ok(None);
        };
        let expiry = self.store.get(&expiry_key).await.map_err(CacheError::store)?;
        let meta = self.store.get(&meta_key).await.map_err(CacheError::store)?;

        let expiry = expiry.as_deref().and_then(parse_expiry);
        let meta = meta.as_deref().and_then(|m| serde_json::from_str::<CacheMeta>(m).ok());

        match (expiry, meta) {
            (Some(expiry), Some(meta)) => Ok(Some(RawEntry {
                value,
                expiry,
                meta,
            })),
            _ => {
                log::warn!("CACHE: entry {} has unreadable expiry or meta, ignoring", composite);
                Ok(None)
            }
        }
    }

    async fn remove_composite(&self, composite: &str) -> Result<(), CacheError> {
        for key in Self::keys_for(composite) {
            self.store.remove(&key).await.map_err(CacheError::store)?;
        }
        Ok(())
    }

    /// Looks up `key`. An entry is fresh while `now < expiry`.
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        now: DateTime<Utc>,
    ) -> Result<Lookup<T>, CacheError> {
        let composite = key.composite();
        let Some(raw) = self.read_raw(&composite).await? else {
            return Ok(Lookup::Miss);
        };

        let value: T = match serde_json::from_str(&raw.value) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("CACHE: value for {} no longer decodes ({}), treating as miss", composite, e);
                return Ok(Lookup::Miss);
            }
        };

        let entry = CacheEntry {
            value,
            expiry: raw.expiry,
            meta: raw.meta,
        };

        if now < entry.expiry {
            Ok(Lookup::Fresh(entry))
        } else {
            Ok(Lookup::Stale(entry))
        }
    }

    /// Stores `value` with the tier-derived expiry for `key.period` at `write_time`.
    pub async fn put<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        write_time: DateTime<Utc>,
    ) -> Result<TierAssignment, CacheError> {
        let assignment = classify_with(&key.period, write_time, &self.settings);
        let json = serde_json::to_value(value).map_err(CacheError::codec)?;

        let meta = CacheMeta {
            last_updated: write_time,
            record_count: record_count(&json),
            tier: assignment.tier,
            period: key.period,
            identity: key.identity.clone(),
            params_hash: key.params_hash(),
            params: key.params.clone(),
        };

        let composite = key.composite();
        let [value_key, expiry_key, meta_key] = Self::keys_for(&composite);

        // Meta last: sweep and invalidate discover entries through it
        self.store
            .set(&value_key, json.to_string())
            .await
            .map_err(CacheError::store)?;
        self.store
            .set(&expiry_key, assignment.expiry.to_rfc3339())
            .await
            .map_err(CacheError::store)?;
        self.store
            .set(&meta_key, serde_json::to_string(&meta).map_err(CacheError::codec)?)
            .await
            .map_err(CacheError::store)?;

        if DF.log_cache {
            log::debug!(
                "CACHE: stored {} as {} until {}",
                composite,
                assignment.tier,
                assignment.expiry
            );
        }

        Ok(assignment)
    }

    pub async fn state_of(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<EntryState, CacheError> {
        Ok(match self.read_raw(&key.composite()).await? {
            None => EntryState::Empty,
            Some(raw) if now < raw.expiry => EntryState::Fresh,
            Some(_) => EntryState::Stale,
        })
    }

    /// Serves fresh entries as they are and refreshes everything else through `refresh`.
    ///
    /// A failed refresh falls back to the stale value (flagged `stale`) when one exists;
    /// with nothing cached the failure surfaces as [`CacheError::RefreshFailed`]. Store
    /// failures while reading or writing are logged and do not fail the call.
    pub async fn get_or_refresh<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        now: DateTime<Utc>,
        refresh: F,
    ) -> Result<Cached<T>, CacheError>
    where
        T: Serialize + DeserializeOwned,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let lookup = match self.get::<T>(key, now).await {
            Ok(lookup) => lookup,
            Err(e) => {
                log::warn!("CACHE: lookup of {} failed ({}), refreshing", key.composite(), e);
                Lookup::Miss
            }
        };

        match lookup {
            Lookup::Fresh(entry) => Ok(Cached {
                value: entry.value,
                stale: false,
                resolution: Resolution::Hit,
            }),
            Lookup::Stale(entry) => match refresh().await {
                Ok(value) => {
                    self.put_quietly(key, &value, now).await;
                    Ok(Cached {
                        value,
                        stale: false,
                        resolution: Resolution::Refreshed,
                    })
                }
                Err(e) => {
                    log::warn!(
                        "CACHE: refresh of {} failed ({}), serving stale value from {}",
                        key.composite(),
                        e,
                        entry.meta.last_updated
                    );
                    Ok(Cached {
                        value: entry.value,
                        stale: true,
                        resolution: Resolution::StaleServed,
                    })
                }
            },
            Lookup::Miss => match refresh().await {
                Ok(value) => {
                    self.put_quietly(key, &value, now).await;
                    Ok(Cached {
                        value,
                        stale: false,
                        resolution: Resolution::Fetched,
                    })
                }
                Err(e) => Err(CacheError::RefreshFailed(e.to_string())),
            },
        }
    }

    /// Like [`Self::get_or_refresh`] but degrades a propagated failure to `T::default()`.
    pub async fn get_or_default<T, E, F, Fut>(&self, key: &CacheKey, now: DateTime<Utc>, refresh: F) -> T
    where
        T: Serialize + DeserializeOwned + Default,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.get_or_refresh(key, now, refresh).await {
            Ok(cached) => cached.value,
            Err(e) => {
                log::warn!("CACHE: {} unavailable ({}), using empty result", key.composite(), e);
                T::default()
            }
        }
    }

    async fn put_quietly<T: Serialize>(&self, key: &CacheKey, value: &T, now: DateTime<Utc>) {
        if let Err(e) = self.put(key, value, now).await {
            log::warn!("CACHE: failed to store {} ({})", key.composite(), e);
        }
    }

    /// Every entry composite currently in the store, including half-written ones.
    async fn composites(&self) -> Result<Vec<String>, CacheError> {
        let cfg = &PERSISTENCE.cache;
        let keys = self
            .store
            .list_keys(cfg.key_prefix)
            .await
            .map_err(CacheError::store)?;

        Ok(keys
            .iter()
            .filter_map(|k| {
                let body = k.strip_prefix(cfg.key_prefix)?;
                [cfg.value_suffix, cfg.expiry_suffix, cfg.meta_suffix]
                    .iter()
                    .find_map(|suffix| body.strip_suffix(suffix))
            })
            .map(str::to_string)
            .unique()
            .collect())
    }

    /// Removes expired non-permanent entries and anything whose records are unreadable.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, CacheError> {
        let mut report = SweepReport::default();

        for composite in self.composites().await? {
            report.scanned += 1;
            let [_, expiry_key, meta_key] = Self::keys_for(&composite);

            let expiry = self.store.get(&expiry_key).await.map_err(CacheError::store)?;
            let meta = self.store.get(&meta_key).await.map_err(CacheError::store)?;

            let expiry = expiry.as_deref().and_then(parse_expiry);
            let tier = meta
                .as_deref()
                .and_then(|m| serde_json::from_str::<CacheMeta>(m).ok())
                .map(|m| m.tier);

            match (expiry, tier) {
                (Some(expiry), Some(tier)) => {
                    if !tier.is_permanent() && now >= expiry {
                        self.remove_composite(&composite).await?;
                        report.removed += 1;
                    } else {
                        report.retained += 1;
                    }
                }
                _ => {
                    self.remove_composite(&composite).await?;
                    report.corrupt += 1;
                }
            }
        }

        if DF.log_cache && (report.removed > 0 || report.corrupt > 0) {
            log::info!(
                "CACHE: sweep removed {} expired and {} corrupt of {} entries",
                report.removed,
                report.corrupt,
                report.scanned
            );
        }

        Ok(report)
    }

    /// Removes every entry whose descriptor matches `predicate`. Returns how many went.
    pub async fn invalidate<P>(&self, predicate: P) -> Result<usize, CacheError>
    where
        P: Fn(&CacheMeta) -> bool,
    {
        let mut removed = 0;

        for composite in self.composites().await? {
            let [_, _, meta_key] = Self::keys_for(&composite);
            let Some(meta) = self.store.get(&meta_key).await.map_err(CacheError::store)? else {
                continue;
            };
            let Ok(meta) = serde_json::from_str::<CacheMeta>(&meta) else {
                continue;
            };
            if predicate(&meta) {
                self.remove_composite(&composite).await?;
                removed += 1;
            }
        }

        if DF.log_cache {
            log::debug!("CACHE: invalidated {} entries", removed);
        }

        Ok(removed)
    }
}

fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Number of rows in a result: array length, object size, or 1 for a scalar. A tagged
/// `{ "kind", "data" }` envelope counts its `data`.
fn record_count(json: &serde_json::Value) -> usize {
    match json {
        serde_json::Value::Object(fields)
            if fields.len() == 2 && fields.contains_key("kind") && fields.contains_key("data") =>
        {
            fields.get("data").map(record_count).unwrap_or(0)
        }
        serde_json::Value::Array(items) => items.len(),
        serde_json::Value::Object(fields) => fields.len(),
        serde_json::Value::Null => 0,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemoryStore;
    use chrono::{NaiveDate, TimeZone};

    fn june() -> QueryPeriod {
        QueryPeriod::month_of(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
    }

    #[test]
    fn params_hash_ignores_insertion_order() {
        let a = CacheKey::new(june(), "acct").with_param("kind", "chart").with_param("tz", "UTC");
        let b = CacheKey::new(june(), "acct").with_param("tz", "UTC").with_param("kind", "chart");
        assert_eq!(a.composite(), b.composite());

        let c = CacheKey::new(june(), "acct").with_param("kind", "tags");
        assert_ne!(a.params_hash(), c.params_hash());
        assert!(a.composite().starts_with("2024-06-01..2024-06-30|acct|"));
    }

    #[tokio::test]
    async fn meta_records_row_count() {
        let store = Arc::new(MemoryStore::new());
        let cache = TieredCache::new(store.clone(), CacheSettings::default());
        let key = CacheKey::new(june(), "acct");
        let now = Utc.with_ymd_and_hms(2024, 6, 5, 12, 0, 0).unwrap();

        cache.put(&key, &vec![1, 2, 3], now).await.unwrap();
        assert_eq!(store.len(), 3);

        let Lookup::Fresh(entry) = cache.get::<Vec<i32>>(&key, now).await.unwrap() else {
            panic!("expected fresh entry");
        };
        assert_eq!(entry.meta.record_count, 3);
        assert_eq!(entry.meta.tier, Tier::Current);
        assert_eq!(entry.value, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn undecodable_value_is_a_miss() {
        let store = Arc::new(MemoryStore::new());
        let cache = TieredCache::new(store, CacheSettings::default());
        let key = CacheKey::new(june(), "acct");
        let now = Utc.with_ymd_and_hms(2024, 6, 5, 12, 0, 0).unwrap();

        cache.put(&key, &"text", now).await.unwrap();
        assert_eq!(cache.get::<Vec<i32>>(&key, now).await.unwrap(), Lookup::Miss);
    }
}
