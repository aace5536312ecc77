use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};

use super::{MemoryStore, Role, SessionRecord, TranscriptLine};
use crate::core::errors::ProviderError;

#[derive(Clone)]
pub struct SqliteMemoryStore {
    pool: SqlitePool,
}

impl SqliteMemoryStore {
    pub async fn open(db_path: &Path) -> Result<Self, ProviderError> {
        let conn_str = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());
        Self::connect(&conn_str, 5).await
    }

    /// Private in-memory database, for tests and throwaway runs.
    pub async fn in_memory() -> Result<Self, ProviderError> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn connect(conn_str: &str, max_connections: u32) -> Result<Self, ProviderError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(conn_str)
            .await
            .map_err(|e| db_error("Failed to connect to memory db", e))?;

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .map_err(|e| db_error("Failed to enable foreign keys", e))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                metadata JSON
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| db_error("Failed to init sessions table", e))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| db_error("Failed to init messages table", e))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session_id ON messages(session_id)")
            .execute(&pool)
            .await
            .map_err(|e| db_error("Failed to create index", e))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id)")
            .execute(&pool)
            .await
            .map_err(|e| db_error("Failed to create index", e))?;

        Ok(Self { pool })
    }

    async fn load_transcript(&self, session_id: &str) -> Result<Vec<TranscriptLine>, ProviderError> {
        let rows = sqlx::query("SELECT role, content FROM messages WHERE session_id = ? ORDER BY id ASC")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load messages", e))?;

        Ok(rows
            .into_iter()
            .map(|row| TranscriptLine {
                role: Role::normalize(&row.try_get::<String, _>("role").unwrap_or_default()),
                content: row.try_get::<String, _>("content").unwrap_or_default(),
            })
            .collect())
    }

    async fn record_from_row(&self, row: sqlx::sqlite::SqliteRow) -> Result<SessionRecord, ProviderError> {
        let session_id = row.try_get::<String, _>("id").unwrap_or_default();
        let created_at = row
            .try_get::<String, _>("created_at")
            .ok()
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let transcript = self.load_transcript(&session_id).await?;

        Ok(SessionRecord {
            user_id: row.try_get::<String, _>("user_id").unwrap_or_default(),
            metadata: row
                .try_get::<Option<Value>, _>("metadata")
                .unwrap_or(None)
                .unwrap_or_else(|| Value::Object(Map::new())),
            session_id,
            transcript,
            created_at,
        })
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Health check failed", e))?;
        Ok(())
    }

    async fn create_session(&self, session_id: &str, user_id: &str) -> Result<(), ProviderError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT OR IGNORE INTO sessions (id, user_id, created_at, updated_at, metadata) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(user_id)
        .bind(&now)
        .bind(&now)
        .bind(Value::Object(Map::new()))
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to create session", e))?;
        Ok(())
    }

    async fn append(
        &self,
        session_id: &str,
        user_id: &str,
        lines: &[TranscriptLine],
    ) -> Result<(), ProviderError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        sqlx::query(
            "INSERT OR IGNORE INTO sessions (id, user_id, created_at, updated_at, metadata) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(user_id)
        .bind(&now)
        .bind(&now)
        .bind(Value::Object(Map::new()))
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to create session", e))?;

        let touched = sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ? AND user_id = ?")
            .bind(&now)
            .bind(session_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to touch session", e))?;

        // The session row exists after the insert above, so no match means
        // another user owns it. Dropping `tx` rolls back.
        if touched.rows_affected() == 0 {
            return Err(ProviderError::Forbidden(format!(
                "session {} belongs to another user",
                session_id
            )));
        }

        for line in lines {
            sqlx::query(
                "INSERT INTO messages (session_id, role, content, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(session_id)
            .bind(line.role.as_str())
            .bind(&line.content)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to insert message", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit messages", e))?;
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, ProviderError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load session", e))?;

        match row {
            Some(row) => Ok(Some(self.record_from_row(row).await?)),
            None => Ok(None),
        }
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionRecord>, ProviderError> {
        let rows = sqlx::query(
            "SELECT * FROM sessions WHERE user_id = ? ORDER BY updated_at DESC LIMIT 100",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list sessions", e))?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            sessions.push(self.record_from_row(row).await?);
        }
        Ok(sessions)
    }

    async fn delete(&self, session_id: &str) -> Result<(), ProviderError> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to delete session", e))?;
        Ok(())
    }

    async fn update_metadata(&self, session_id: &str, metadata: Value) -> Result<(), ProviderError> {
        let record = self
            .get(session_id)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("session {}", session_id)))?;

        let mut merged = match record.metadata {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Value::Object(update) = metadata {
            merged.extend(update);
        }

        sqlx::query("UPDATE sessions SET metadata = ?, updated_at = ? WHERE id = ?")
            .bind(Value::Object(merged))
            .bind(Utc::now().to_rfc3339())
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to update session", e))?;
        Ok(())
    }
}

fn db_error(context: &str, err: sqlx::Error) -> ProviderError {
    ProviderError::Transport(format!("{}: {}", context, err))
}
