//! User records

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::{ApiError, ApiResult};

/// Public user shape. Never carries the password hash.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    /// Opaque preferences blob, persisted verbatim
    pub preferences: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    name: String,
    password_hash: String,
    preferences: String,
    created_at: DateTime<Utc>,
    last_login: Option<DateTime<Utc>>,
}

impl UserRow {
    fn into_user(self) -> User {
        User {
            id: self.id,
            email: self.email,
            name: self.name,
            preferences: serde_json::from_str(&self.preferences)
                .unwrap_or_else(|_| serde_json::json!({})),
            created_at: self.created_at,
            last_login: self.last_login,
        }
    }
}

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new user with default (empty) preferences.
    ///
    /// Email uniqueness is case-insensitive; a duplicate registers as a
    /// conflict, not a validation error.
    pub async fn create(&self, email: &str, name: &str, password_hash: &str) -> ApiResult<User> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT id FROM users WHERE email = ? COLLATE NOCASE")
                .bind(email)
                .fetch_optional(&mut *tx)
                .await?;
        if existing.is_some() {
            return Err(ApiError::NameConflict("Email already registered".into()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO users (id, email, name, password_hash, preferences, created_at) \
             VALUES (?, ?, ?, ?, '{}', ?)",
        )
        .bind(&id)
        .bind(email)
        .bind(name)
        .bind(password_hash)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(User {
            id,
            email: email.to_string(),
            name: name.to_string(),
            preferences: serde_json::json!({}),
            created_at: now,
            last_login: None,
        })
    }

    /// Look up a user by email for login. Returns the stored hash alongside
    /// the public shape so the caller can verify without a second query.
    pub async fn find_by_email(&self, email: &str) -> ApiResult<Option<(User, String)>> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT * FROM users WHERE email = ? COLLATE NOCASE")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|r| {
            let hash = r.password_hash.clone();
            (r.into_user(), hash)
        }))
    }

    pub async fn find_by_id(&self, id: &str) -> ApiResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(UserRow::into_user))
    }

    pub async fn touch_last_login(&self, id: &str) -> ApiResult<()> {
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Replace the preferences blob verbatim and return the updated user.
    pub async fn update_preferences(
        &self,
        id: &str,
        preferences: &serde_json::Value,
    ) -> ApiResult<User> {
        let raw = serde_json::to_string(preferences)
            .map_err(|e| ApiError::Internal(format!("preferences serialization: {}", e)))?;

        let result = sqlx::query("UPDATE users SET preferences = ? WHERE id = ?")
            .bind(&raw)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound("User"));
        }

        self.find_by_id(id)
            .await?
            .ok_or(ApiError::NotFound("User"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_pool;

    #[tokio::test]
    async fn test_create_and_find() {
        let store = UserStore::new(test_pool().await);

        let user = store.create("a@b.co", "A", "$argon2id$hash").await.unwrap();
        assert_eq!(user.email, "a@b.co");
        assert!(user.last_login.is_none());

        let (found, hash) = store.find_by_email("a@b.co").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(hash, "$argon2id$hash");
    }

    #[tokio::test]
    async fn test_email_lookup_is_case_insensitive() {
        let store = UserStore::new(test_pool().await);
        store.create("User@Example.com", "U", "h").await.unwrap();

        assert!(store
            .find_by_email("user@example.com")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = UserStore::new(test_pool().await);
        store.create("a@b.co", "A", "h").await.unwrap();

        let err = store.create("A@B.CO", "B", "h").await.unwrap_err();
        assert!(matches!(err, ApiError::NameConflict(_)));
    }

    #[tokio::test]
    async fn test_preferences_roundtrip() {
        let store = UserStore::new(test_pool().await);
        let user = store.create("a@b.co", "A", "h").await.unwrap();

        let prefs = serde_json::json!({"theme": "dark", "fontSize": 14});
        let updated = store.update_preferences(&user.id, &prefs).await.unwrap();
        assert_eq!(updated.preferences, prefs);

        let found = store.find_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(found.preferences, prefs);
    }

    #[tokio::test]
    async fn test_touch_last_login() {
        let store = UserStore::new(test_pool().await);
        let user = store.create("a@b.co", "A", "h").await.unwrap();

        store.touch_last_login(&user.id).await.unwrap();
        let found = store.find_by_id(&user.id).await.unwrap().unwrap();
        assert!(found.last_login.is_some());
    }
}
