// SPDX-License-Identifier: MIT

//! Expiring cache for lookup results
//!
//! Entries are keyed by lookup kind plus canonical parameters. A read only
//! counts as a hit while the entry is unexpired; expired rows stay until
//! `purge_expired` removes them.

use super::pool::DatabasePool;
use super::sqlite::format_ts;
use crate::wdk::error::{Result, WayfarerError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Cache size and usage counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub total: u64,
    /// Hits summed over every stored entry
    pub hits: u64,
    pub active: u64,
    pub expired: u64,
}

/// Key for a lookup of `kind` with `params`.
///
/// Object keys serialize in sorted order, so equal parameters always give
/// the same key.
pub fn cache_key(kind: &str, params: &Value) -> String {
    format!("{}:{}", kind, params)
}

#[async_trait]
pub trait QueryCache: Send + Sync {
    /// Unexpired result for `key`, counting the hit
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store or replace the result for `key`, resetting its hit count
    async fn put(
        &self,
        key: &str,
        kind: &str,
        params: &Value,
        result: &Value,
        ttl: Duration,
    ) -> Result<()>;

    /// Delete expired entries; returns how many went
    async fn purge_expired(&self) -> Result<u64>;

    async fn stats(&self) -> Result<CacheStats>;
}

struct Entry {
    result: Value,
    expires_at: DateTime<Utc>,
    hits: u64,
}

#[derive(Default)]
pub struct MemoryQueryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryQueryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueryCache for MemoryQueryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut entries = self.entries.lock().await;
        let now = Utc::now();
        Ok(entries
            .get_mut(key)
            .filter(|e| e.expires_at > now)
            .map(|e| {
                e.hits += 1;
                e.result.clone()
            }))
    }

    async fn put(
        &self,
        key: &str,
        _kind: &str,
        _params: &Value,
        result: &Value,
        ttl: Duration,
    ) -> Result<()> {
        self.entries.lock().await.insert(
            key.to_string(),
            Entry {
                result: result.clone(),
                expires_at: Utc::now() + ttl,
                hits: 0,
            },
        );
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        let now = Utc::now();
        entries.retain(|_, e| e.expires_at > now);
        Ok((before - entries.len()) as u64)
    }

    async fn stats(&self) -> Result<CacheStats> {
        let entries = self.entries.lock().await;
        let now = Utc::now();
        let active = entries.values().filter(|e| e.expires_at > now).count() as u64;
        let total = entries.len() as u64;
        Ok(CacheStats {
            total,
            hits: entries.values().map(|e| e.hits).sum(),
            active,
            expired: total - active,
        })
    }
}

/// Cache table in the checkpoint database
pub struct SqliteQueryCache {
    pool: DatabasePool,
}

impl SqliteQueryCache {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn to_count(raw: i64) -> Result<u64> {
    u64::try_from(raw)
        .map_err(|_| WayfarerError::persistence(format!("negative count {} in database", raw)))
}

#[async_trait]
impl QueryCache for SqliteQueryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        // Runs on the writer: the hit count moves in the same statement
        let row: Option<(String,)> = sqlx::query_as(
            "UPDATE query_cache SET hit_count = hit_count + 1
             WHERE cache_key = ? AND expires_at > ?
             RETURNING result_data",
        )
        .bind(key)
        .bind(format_ts(&Utc::now()))
        .fetch_optional(&self.pool.writer)
        .await?;

        match row {
            Some((raw,)) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        key: &str,
        kind: &str,
        params: &Value,
        result: &Value,
        ttl: Duration,
    ) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO query_cache
                (cache_key, query_type, query_params, result_data, created_at, expires_at, hit_count)
             VALUES (?, ?, ?, ?, ?, ?, 0)
             ON CONFLICT(cache_key) DO UPDATE SET
                query_type = excluded.query_type,
                query_params = excluded.query_params,
                result_data = excluded.result_data,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at,
                hit_count = 0",
        )
        .bind(key)
        .bind(kind)
        .bind(serde_json::to_string(params)?)
        .bind(serde_json::to_string(result)?)
        .bind(format_ts(&now))
        .bind(format_ts(&(now + ttl)))
        .execute(&self.pool.writer)
        .await?;
        log::debug!("Cached {} lookup under {}", kind, key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let done = sqlx::query("DELETE FROM query_cache WHERE expires_at <= ?")
            .bind(format_ts(&Utc::now()))
            .execute(&self.pool.writer)
            .await?;
        Ok(done.rows_affected())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let (total, hits, active): (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*),
                    COALESCE(SUM(hit_count), 0),
                    COUNT(CASE WHEN expires_at > ? THEN 1 END)
             FROM query_cache",
        )
        .bind(format_ts(&Utc::now()))
        .fetch_one(&self.pool.reader)
        .await?;

        let (total, active) = (to_count(total)?, to_count(active)?);
        Ok(CacheStats {
            total,
            hits: to_count(hits)?,
            active,
            expired: total - active,
        })
    }
}
