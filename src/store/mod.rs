//! Durable state: users, SSH profiles, terminal sessions, assistant queries
//!
//! Single-node SQLite via sqlx. Stores are thin per-aggregate wrappers over
//! a shared pool; every mutating operation runs in its own short
//! transaction. Live SSH connections are never persisted; see `ssh`.

pub mod profiles;
pub mod queries;
pub mod sessions;
pub mod users;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::error::ApiResult;

pub use profiles::{AuthMethod, NewCredentials, NewProfile, Profile, ProfileStore, ProfileUpdate};
pub use queries::{AiQueryRecord, AiQueryStore};
pub use sessions::{SessionStore, TerminalSession};
pub use users::{User, UserStore};

/// Relational schema. `IF NOT EXISTS` keeps startup idempotent.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY,
    email         TEXT NOT NULL UNIQUE COLLATE NOCASE,
    name          TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    preferences   TEXT NOT NULL DEFAULT '{}',
    created_at    TEXT NOT NULL,
    last_login    TEXT
);

CREATE TABLE IF NOT EXISTS ssh_profiles (
    id                    TEXT PRIMARY KEY,
    user_id               TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    name                  TEXT NOT NULL,
    host                  TEXT NOT NULL,
    port                  INTEGER NOT NULL,
    username              TEXT NOT NULL,
    auth_method           TEXT NOT NULL,
    encrypted_credentials TEXT NOT NULL,
    created_at            TEXT NOT NULL,
    last_used             TEXT,
    is_active             INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_ssh_profiles_user ON ssh_profiles(user_id);

CREATE TABLE IF NOT EXISTS terminal_sessions (
    id            TEXT PRIMARY KEY,
    user_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    profile_id    TEXT NOT NULL REFERENCES ssh_profiles(id) ON DELETE CASCADE,
    status        TEXT NOT NULL,
    title         TEXT,
    created_at    TEXT NOT NULL,
    last_activity TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_terminal_sessions_user ON terminal_sessions(user_id);

CREATE TABLE IF NOT EXISTS ai_queries (
    id          TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    session_id  TEXT REFERENCES terminal_sessions(id) ON DELETE SET NULL,
    prompt      TEXT NOT NULL,
    response    TEXT NOT NULL,
    commands    TEXT NOT NULL,
    explanation TEXT NOT NULL,
    warnings    TEXT NOT NULL,
    confidence  REAL NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ai_queries_user ON ai_queries(user_id);
"#;

/// Open the database, enable foreign keys, and apply the schema.
pub async fn connect(database_url: &str) -> ApiResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(sqlx::Error::from)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    sqlx::raw_sql(SCHEMA).execute(&pool).await?;

    info!("Database ready at {}", database_url);
    Ok(pool)
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    // A pool would give every pooled connection its own :memory: database;
    // pin to one connection and keep it alive for the test's duration.
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("in-memory url")
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .expect("in-memory database");

    sqlx::raw_sql(SCHEMA)
        .execute(&pool)
        .await
        .expect("schema applies");
    pool
}
