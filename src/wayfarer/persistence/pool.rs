// SPDX-License-Identifier: MIT

//! Database pool with split reader/writer connections.
//!
//! SQLite allows one writer at a time, so the writer pool holds a single
//! connection and every checkpoint transaction runs on it. Reads go through a
//! separate multi-connection pool. File databases use WAL so readers never
//! block the writer.

use super::schema::bootstrap_schema;
use crate::wdk::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open (creating if needed) the database and bootstrap the schema.
    ///
    /// An in-memory URL gets one shared connection that is never recycled,
    /// since each new connection would see an empty database.
    pub async fn connect(database_url: &str) -> Result<Self> {
        if is_memory_url(database_url) {
            let opts = SqliteConnectOptions::from_str(database_url)?.foreign_keys(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(opts)
                .await?;
            bootstrap_schema(&pool).await?;
            return Ok(Self {
                reader: pool.clone(),
                writer: pool,
            });
        }

        let base_opts = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(base_opts.clone())
            .await?;

        // Schema must exist before the read-only pool opens the file
        bootstrap_schema(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(base_opts.read_only(true))
            .await?;

        log::info!("Opened checkpoint database {}", database_url);
        Ok(Self { reader, writer })
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}
