//! Durable terminal session records
//!
//! A row per client-visible session, written when the session is opened and
//! updated on every status transition. Rows survive disconnects so the
//! history stays listable; cascade rules remove them with their user or
//! profile.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSession {
    pub id: String,
    pub user_id: String,
    pub profile_id: String,
    pub status: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a session open. The id comes from the client; re-opening an
    /// id it already used (after a disconnect) re-points the row.
    pub async fn open(
        &self,
        session_id: &str,
        user_id: &str,
        profile_id: &str,
        status: &str,
        title: Option<&str>,
    ) -> ApiResult<()> {
        // Re-use across users is rejected by the conflict clause filter
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO terminal_sessions (id, user_id, profile_id, status, title, created_at, last_activity) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
               profile_id = excluded.profile_id, \
               status = excluded.status, \
               title = excluded.title, \
               last_activity = excluded.last_activity \
             WHERE terminal_sessions.user_id = excluded.user_id",
        )
        .bind(session_id)
        .bind(user_id)
        .bind(profile_id)
        .bind(status)
        .bind(title)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NameConflict(
                "Session id already in use".into(),
            ));
        }
        Ok(())
    }

    /// Update status (and activity timestamp) for a session the user owns.
    pub async fn set_status(&self, session_id: &str, user_id: &str, status: &str) -> ApiResult<()> {
        sqlx::query(
            "UPDATE terminal_sessions SET status = ?, last_activity = ? \
             WHERE id = ? AND user_id = ?",
        )
        .bind(status)
        .bind(Utc::now())
        .bind(session_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Sessions for a user that are not disconnected, newest first.
    pub async fn list_active(&self, user_id: &str) -> ApiResult<Vec<TerminalSession>> {
        let rows: Vec<TerminalSession> = sqlx::query_as(
            "SELECT * FROM terminal_sessions \
             WHERE user_id = ? AND status != 'disconnected' \
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
