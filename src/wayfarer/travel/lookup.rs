// SPDX-License-Identifier: MIT

//! Cached price and sight lookups
//!
//! A lookup is keyed on its kind and the parsed `travel_info`, and its whole
//! update is stored. Cache failures never fail the node: the lookup is
//! computed as if the cache were absent.

use crate::wayfarer::persistence::{cache_key, QueryCache};
use crate::wayfarer::workflow::state::{StateUpdate, WorkflowState};
use crate::wdk::node::{NodeExecutor, NodeResult};
use async_trait::async_trait;
use chrono::Duration;
use serde_json::Value;
use std::sync::Arc;

/// Shared cache handle plus the lifetime of new entries
#[derive(Clone)]
pub struct LookupCache {
    store: Arc<dyn QueryCache>,
    ttl: Duration,
}

impl LookupCache {
    pub fn new(store: Arc<dyn QueryCache>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn store(&self) -> &Arc<dyn QueryCache> {
        &self.store
    }

    /// Wrap `lookup` so its results are served from the cache when fresh
    pub fn wrap(
        &self,
        name: &'static str,
        kind: &'static str,
        lookup: fn(&WorkflowState) -> NodeResult,
    ) -> Arc<dyn NodeExecutor> {
        Arc::new(CachedLookup {
            name,
            kind,
            lookup,
            cache: self.clone(),
        })
    }
}

struct CachedLookup {
    name: &'static str,
    kind: &'static str,
    lookup: fn(&WorkflowState) -> NodeResult,
    cache: LookupCache,
}

impl CachedLookup {
    async fn cached(&self, key: &str) -> Option<StateUpdate> {
        match self.cache.store.get(key).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(update) => Some(update),
                Err(e) => {
                    log::warn!("Ignoring unreadable cached {} lookup: {}", self.kind, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                log::warn!("Cache read for {} lookup failed: {}", self.kind, e);
                None
            }
        }
    }

    async fn remember(&self, key: &str, params: &Value, update: &StateUpdate) {
        let stored = match serde_json::to_value(update) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Could not serialize {} lookup for the cache: {}", self.kind, e);
                return;
            }
        };
        if let Err(e) = self
            .cache
            .store
            .put(key, self.kind, params, &stored, self.cache.ttl)
            .await
        {
            log::warn!("Cache write for {} lookup failed: {}", self.kind, e);
        }
    }
}

#[async_trait]
impl NodeExecutor for CachedLookup {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, state: &WorkflowState) -> NodeResult {
        let params = state.get("travel_info").cloned().unwrap_or(Value::Null);
        let key = cache_key(self.kind, &params);

        if let Some(update) = self.cached(&key).await {
            log::info!("Serving {} lookup from cache", self.kind);
            return Ok(update);
        }

        let update = (self.lookup)(state)?;
        self.remember(&key, &params, &update).await;
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wayfarer::persistence::{CacheStats, MemoryQueryCache};
    use crate::wayfarer::workflow::state::{FieldType, StateFieldDef, StateSchema};
    use crate::wdk::error::{Result, WayfarerError};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn counted(_state: &WorkflowState) -> NodeResult {
        let n = CALLS.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(StateUpdate::new().set("flight", json!({ "price": 1850, "call": n })))
    }

    fn state(destination: &str) -> WorkflowState {
        let schema = StateSchema::new()
            .field("travel_info", StateFieldDef::new(FieldType::Object))
            .field("flight", StateFieldDef::new(FieldType::Object));
        let mut state = WorkflowState::new(&schema);
        state
            .apply(
                StateUpdate::new().set("travel_info", json!({ "destination": destination })),
                &schema,
            )
            .unwrap();
        state
    }

    /// Cache whose every call fails
    struct BrokenCache;

    #[async_trait]
    impl QueryCache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<Value>> {
            Err(WayfarerError::persistence("database is locked"))
        }

        async fn put(&self, _: &str, _: &str, _: &Value, _: &Value, _: Duration) -> Result<()> {
            Err(WayfarerError::persistence("database is locked"))
        }

        async fn purge_expired(&self) -> Result<u64> {
            Ok(0)
        }

        async fn stats(&self) -> Result<CacheStats> {
            Ok(CacheStats::default())
        }
    }

    #[tokio::test]
    async fn test_second_lookup_is_served_from_cache() {
        let cache = LookupCache::new(Arc::new(MemoryQueryCache::new()), Duration::hours(24));
        let lookup = cache.wrap("query_flights", "flight", counted);

        let first = lookup.execute(&state("yunnan")).await.unwrap();
        let second = lookup.execute(&state("yunnan")).await.unwrap();
        assert_eq!(first, second);

        let other = lookup.execute(&state("beijing")).await.unwrap();
        assert_ne!(first, other);

        let stats = cache.store().stats().await.unwrap();
        assert_eq!((stats.total, stats.hits), (2, 1));
    }

    #[tokio::test]
    async fn test_broken_cache_falls_back_to_lookup() {
        let cache = LookupCache::new(Arc::new(BrokenCache), Duration::hours(24));
        let lookup = cache.wrap("query_flights", "flight", counted);

        let update = lookup.execute(&state("xian")).await.unwrap();
        assert_eq!(update.fields["flight"]["price"], json!(1850));
    }
}
