// SPDX-License-Identifier: MIT

//! SQLite schema bootstrap.
//!
//! Every statement is `IF NOT EXISTS`, so this runs on each startup.

use crate::wdk::error::Result;
use sqlx::SqlitePool;

pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS session (
    id              TEXT PRIMARY KEY NOT NULL,
    status          TEXT NOT NULL CHECK(status IN ('active','suspended_for_human','completed','terminated','failed')),
    initial_query   TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    finished_at     TEXT
);

CREATE TABLE IF NOT EXISTS checkpoint (
    session_id      TEXT NOT NULL REFERENCES session(id),
    step_seq        INTEGER NOT NULL,
    next_node_id    TEXT NOT NULL,
    state           TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    PRIMARY KEY (session_id, step_seq)
);

CREATE INDEX IF NOT EXISTS idx_session_status_updated ON session(status, updated_at);

CREATE TABLE IF NOT EXISTS query_cache (
    cache_key       TEXT PRIMARY KEY NOT NULL,
    query_type      TEXT NOT NULL,
    query_params    TEXT NOT NULL,
    result_data     TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    expires_at      TEXT NOT NULL,
    hit_count       INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_query_cache_type ON query_cache(query_type);
CREATE INDEX IF NOT EXISTS idx_query_cache_expires ON query_cache(expires_at);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
