//! Assistant query audit records
//!
//! Every assistant call is persisted verbatim: prompt, raw provider
//! response, and the extracted result. Write-only from the gateway's point
//! of view; never replayed.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::ApiResult;

/// One assistant exchange, ready to persist.
#[derive(Debug)]
pub struct AiQueryRecord<'a> {
    pub user_id: &'a str,
    pub session_id: Option<&'a str>,
    pub prompt: &'a str,
    pub raw_response: &'a str,
    pub commands: &'a [String],
    pub explanation: &'a str,
    pub warnings: &'a [String],
    pub confidence: f32,
}

#[derive(Clone)]
pub struct AiQueryStore {
    pool: SqlitePool,
}

impl AiQueryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, query: AiQueryRecord<'_>) -> ApiResult<String> {
        let id = uuid::Uuid::new_v4().to_string();

        // A session reference may point at a session that was already
        // removed; store NULL rather than fail the audit write.
        let session_id = match query.session_id {
            Some(sid) => {
                let exists: Option<(String,)> =
                    sqlx::query_as("SELECT id FROM terminal_sessions WHERE id = ?")
                        .bind(sid)
                        .fetch_optional(&self.pool)
                        .await?;
                exists.map(|_| sid)
            }
            None => None,
        };

        sqlx::query(
            "INSERT INTO ai_queries \
             (id, user_id, session_id, prompt, response, commands, explanation, warnings, confidence, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(query.user_id)
        .bind(session_id)
        .bind(query.prompt)
        .bind(query.raw_response)
        .bind(serde_json::to_string(query.commands).unwrap_or_else(|_| "[]".into()))
        .bind(query.explanation)
        .bind(serde_json::to_string(query.warnings).unwrap_or_else(|_| "[]".into()))
        .bind(query.confidence as f64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_pool;
    use crate::store::users::UserStore;

    #[tokio::test]
    async fn test_record_without_session() {
        let pool = test_pool().await;
        let user = UserStore::new(pool.clone())
            .create("a@b.co", "A", "h")
            .await
            .unwrap();
        let store = AiQueryStore::new(pool.clone());

        let id = store
            .record(AiQueryRecord {
                user_id: &user.id,
                session_id: None,
                prompt: "list files",
                raw_response: "{\"commands\":[\"ls\"]}",
                commands: &["ls".to_string()],
                explanation: "Lists files",
                warnings: &[],
                confidence: 0.9,
            })
            .await
            .unwrap();

        let row: (String, f64) =
            sqlx::query_as("SELECT prompt, confidence FROM ai_queries WHERE id = ?")
                .bind(&id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(row.0, "list files");
        assert!((row.1 - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_dangling_session_reference_stored_null() {
        let pool = test_pool().await;
        let user = UserStore::new(pool.clone())
            .create("a@b.co", "A", "h")
            .await
            .unwrap();
        let store = AiQueryStore::new(pool.clone());

        let id = store
            .record(AiQueryRecord {
                user_id: &user.id,
                session_id: Some("never-existed"),
                prompt: "p",
                raw_response: "r",
                commands: &[],
                explanation: "",
                warnings: &[],
                confidence: 0.0,
            })
            .await
            .unwrap();

        let row: (Option<String>,) =
            sqlx::query_as("SELECT session_id FROM ai_queries WHERE id = ?")
                .bind(&id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(row.0.is_none());
    }
}
