//! Relational store for sessions, messages, and uploads.
//!
//! A WAL-mode SQLite file keeps the conversational state; everything keyed by
//! `session_id` cascades on session delete. The graph store holds the
//! extracted knowledge, so this layer stays deliberately small.

use std::str::FromStr;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub id: i64,
    pub name: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub id: i64,
    pub session_id: i64,
    pub role: String,
    pub content: String,
    pub token_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadRecord {
    pub id: i64,
    pub session_id: i64,
    pub file_name: String,
    pub size_bytes: i64,
    pub created_at: String,
}

#[derive(Debug)]
pub struct RelationalStore {
    pool: SqlitePool,
}

impl RelationalStore {
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::Internal(format!("invalid DATABASE_URL: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        // Every pooled connection to ":memory:" is its own database; pin the
        // pool to a single long-lived connection in that case.
        let in_memory = database_url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .idle_timeout(if in_memory { None } else { Some(std::time::Duration::from_secs(600)) })
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), AppError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                token_count INTEGER NOT NULL DEFAULT 0,
                truncated INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS uploads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                file_name TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session_id ON messages(session_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_uploads_session_id ON uploads(session_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub async fn create_session(&self, name: Option<String>) -> Result<SessionRecord, AppError> {
        let now = chrono::Utc::now().to_rfc3339();
        let row = sqlx::query(
            "INSERT INTO sessions (name, created_at, updated_at) VALUES (?1, ?2, ?2) \
             RETURNING id, name, created_at, updated_at",
        )
        .bind(name)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        Ok(session_from_row(&row)?)
    }

    pub async fn list_sessions(
        &self,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<SessionRecord>, AppError> {
        let rows = sqlx::query(
            "SELECT id, name, created_at, updated_at FROM sessions \
             ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
        )
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(session_from_row).collect()
    }

    pub async fn get_session(&self, id: i64) -> Result<Option<SessionRecord>, AppError> {
        let row = sqlx::query("SELECT id, name, created_at, updated_at FROM sessions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    pub async fn rename_session(
        &self,
        id: i64,
        name: &str,
    ) -> Result<Option<SessionRecord>, AppError> {
        let now = chrono::Utc::now().to_rfc3339();
        let row = sqlx::query(
            "UPDATE sessions SET name = ?1, updated_at = ?2 WHERE id = ?3 \
             RETURNING id, name, created_at, updated_at",
        )
        .bind(name)
        .bind(&now)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    /// Delete a session and, via cascade, its messages and uploads.
    pub async fn delete_session(&self, id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Append-only message log.
    pub async fn append_message(
        &self,
        session_id: i64,
        role: Role,
        content: &str,
        truncated: bool,
    ) -> Result<MessageRecord, AppError> {
        let now = chrono::Utc::now().to_rfc3339();
        let token_count = estimate_tokens(content);
        let row = sqlx::query(
            "INSERT INTO messages (session_id, role, content, token_count, truncated, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             RETURNING id, session_id, role, content, token_count, created_at",
        )
        .bind(session_id)
        .bind(role.as_str())
        .bind(content)
        .bind(token_count)
        .bind(truncated)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        Ok(message_from_row(&row)?)
    }

    /// Chronological history for the history endpoint.
    pub async fn message_history(
        &self,
        session_id: i64,
        limit: i64,
    ) -> Result<Vec<MessageRecord>, AppError> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, token_count, created_at \
             FROM messages WHERE session_id = ?1 ORDER BY id ASC LIMIT ?2",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    /// Recent messages for prompt assembly, oldest-first, clipped by
    /// cumulative `token_count` against the budget (not by message count).
    pub async fn history_window(
        &self,
        session_id: i64,
        token_budget: i64,
    ) -> Result<Vec<MessageRecord>, AppError> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, token_count, created_at \
             FROM messages WHERE session_id = ?1 ORDER BY id DESC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut window = Vec::new();
        let mut spent = 0i64;
        for row in &rows {
            let message = message_from_row(row)?;
            if spent + message.token_count > token_budget {
                break;
            }
            spent += message.token_count;
            window.push(message);
        }
        window.reverse();
        Ok(window)
    }

    // =========================================================================
    // Uploads
    // =========================================================================

    /// Record a file intake event; duplicates keyed by
    /// `(session_id, file_name, size)` are a conflict.
    pub async fn record_upload(
        &self,
        session_id: i64,
        file_name: &str,
        size_bytes: i64,
    ) -> Result<UploadRecord, AppError> {
        let existing = sqlx::query(
            "SELECT id FROM uploads WHERE session_id = ?1 AND file_name = ?2 AND size_bytes = ?3",
        )
        .bind(session_id)
        .bind(file_name)
        .bind(size_bytes)
        .fetch_optional(&self.pool)
        .await?;

        if existing.is_some() {
            return Err(AppError::Conflict(format!(
                "file '{file_name}' was already uploaded to this session"
            )));
        }

        let now = chrono::Utc::now().to_rfc3339();
        let row = sqlx::query(
            "INSERT INTO uploads (session_id, file_name, size_bytes, created_at) \
             VALUES (?1, ?2, ?3, ?4) \
             RETURNING id, session_id, file_name, size_bytes, created_at",
        )
        .bind(session_id)
        .bind(file_name)
        .bind(size_bytes)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        Ok(UploadRecord {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            file_name: row.try_get("file_name")?,
            size_bytes: row.try_get("size_bytes")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

fn session_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<SessionRecord, AppError> {
    Ok(SessionRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<MessageRecord, AppError> {
    Ok(MessageRecord {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        role: row.try_get("role")?,
        content: row.try_get("content")?,
        token_count: row.try_get("token_count")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Whitespace token estimate, good enough for history budgeting.
#[must_use]
pub fn estimate_tokens(text: &str) -> i64 {
    text.split_whitespace().count() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> RelationalStore {
        RelationalStore::connect("sqlite::memory:")
            .await
            .expect("in-memory store")
    }

    #[tokio::test]
    async fn session_crud_round_trip() {
        let store = memory_store().await;

        let created = store
            .create_session(Some("Lease review".to_string()))
            .await
            .unwrap();
        assert_eq!(created.name.as_deref(), Some("Lease review"));

        let fetched = store.get_session(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, created.id);

        let renamed = store
            .rename_session(created.id, "Updated name")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renamed.name.as_deref(), Some("Updated name"));

        assert!(store.delete_session(created.id).await.unwrap());
        assert!(store.get_session(created.id).await.unwrap().is_none());
        assert!(!store.delete_session(created.id).await.unwrap());
    }

    #[tokio::test]
    async fn messages_append_in_order() {
        let store = memory_store().await;
        let session = store.create_session(None).await.unwrap();

        store
            .append_message(session.id, Role::User, "hello", false)
            .await
            .unwrap();
        store
            .append_message(session.id, Role::Assistant, "hi there", false)
            .await
            .unwrap();

        let history = store.message_history(session.id, 50).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].role, "assistant");
        assert!(history[0].id < history[1].id);
    }

    #[tokio::test]
    async fn history_window_clips_by_token_budget() {
        let store = memory_store().await;
        let session = store.create_session(None).await.unwrap();

        // 5 tokens, 5 tokens, 3 tokens.
        store
            .append_message(session.id, Role::User, "one two three four five", false)
            .await
            .unwrap();
        store
            .append_message(session.id, Role::Assistant, "six seven eight nine ten", false)
            .await
            .unwrap();
        store
            .append_message(session.id, Role::User, "eleven twelve thirteen", false)
            .await
            .unwrap();

        let window = store.history_window(session.id, 8).await.unwrap();
        // Only the newest two fit in an 8-token budget.
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].content, "six seven eight nine ten");
        assert_eq!(window[1].content, "eleven twelve thirteen");
    }

    #[tokio::test]
    async fn duplicate_upload_is_a_conflict() {
        let store = memory_store().await;
        let session = store.create_session(None).await.unwrap();

        store
            .record_upload(session.id, "contract.pdf", 1024)
            .await
            .unwrap();

        let err = store
            .record_upload(session.id, "contract.pdf", 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // Different size is a different intake event.
        store
            .record_upload(session.id, "contract.pdf", 2048)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn deleting_session_cascades() {
        let store = memory_store().await;
        let session = store.create_session(None).await.unwrap();
        store
            .append_message(session.id, Role::User, "question", false)
            .await
            .unwrap();
        store
            .record_upload(session.id, "contract.pdf", 10)
            .await
            .unwrap();

        store.delete_session(session.id).await.unwrap();

        let history = store.message_history(session.id, 50).await.unwrap();
        assert!(history.is_empty());
        // Re-uploading after delete is not a conflict: the row cascaded away.
        let other = store.create_session(None).await.unwrap();
        store
            .record_upload(other.id, "contract.pdf", 10)
            .await
            .unwrap();
    }
}
