//! libSQL implementation of the `Storage` trait.
//!
//! Entities are serialized to JSON documents; the columns next to them
//! exist only for lookups. Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::params::IntoParams;
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde::de::DeserializeOwned;
use tracing::info;
use uuid::Uuid;

use crate::auth::{Role, Token, User};
use crate::entity::{Command, Fragment, Message};
use crate::error::StorageError;
use crate::store::migrations;
use crate::store::traits::Storage;

/// libSQL storage backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStorage {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStorage {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StorageError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let storage = Self::from_database(db)?;
        migrations::run_migrations(&storage.conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(storage)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StorageError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StorageError::Pool(format!("Failed to create in-memory database: {e}")))?;

        let storage = Self::from_database(db)?;
        migrations::run_migrations(&storage.conn).await?;
        Ok(storage)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, StorageError> {
        let conn = db
            .connect()
            .map_err(|e| StorageError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    async fn execute(&self, sql: &str, params: impl IntoParams) -> Result<u64, StorageError> {
        self.conn
            .execute(sql, params)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))
    }

    /// Run a query whose first column is a JSON document.
    async fn documents<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: impl IntoParams,
    ) -> Result<Vec<T>, StorageError> {
        let mut rows = self
            .conn
            .query(sql, params)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        let mut documents = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?
        {
            let document: String = row
                .get(0)
                .map_err(|e| StorageError::Query(e.to_string()))?;
            documents.push(serde_json::from_str(&document)?);
        }
        Ok(documents)
    }

    async fn document<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: impl IntoParams,
    ) -> Result<Option<T>, StorageError> {
        Ok(self.documents(sql, params).await?.into_iter().next())
    }
}

#[async_trait]
impl Storage for LibSqlStorage {
    // ── Commands ────────────────────────────────────────────────────

    async fn save_command(&self, command: &Command) -> Result<(), StorageError> {
        let document = serde_json::to_string(command)?;
        self.execute(
            "INSERT OR REPLACE INTO commands (id, noun, verb, document) VALUES (?1, ?2, ?3, ?4)",
            params![
                command.id.to_string(),
                command.noun(),
                command.verb().as_str(),
                document
            ],
        )
        .await?;
        Ok(())
    }

    async fn recent_commands(&self, limit: usize) -> Result<Vec<Command>, StorageError> {
        self.documents(
            "SELECT document FROM commands ORDER BY rowid DESC LIMIT ?1",
            params![limit as i64],
        )
        .await
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn save_message(&self, message: &Message) -> Result<(), StorageError> {
        let document = serde_json::to_string(message)?;
        self.execute(
            "INSERT OR REPLACE INTO messages (id, channel, document) VALUES (?1, ?2, ?3)",
            params![
                message.id.to_string(),
                message.context.channel.id.as_str(),
                document
            ],
        )
        .await?;
        Ok(())
    }

    // ── Fragments ───────────────────────────────────────────────────

    async fn save_fragment(&self, fragment: &Fragment) -> Result<(), StorageError> {
        let document = serde_json::to_string(fragment)?;
        self.execute(
            "INSERT INTO fragments (id, user_id, document) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                document = excluded.document,
                updated_at = datetime('now')",
            params![
                fragment.id.to_string(),
                fragment.user_id.as_str(),
                document
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_fragment(&self, id: Uuid) -> Result<Option<Fragment>, StorageError> {
        self.document(
            "SELECT document FROM fragments WHERE id = ?1",
            params![id.to_string()],
        )
        .await
    }

    async fn delete_fragment(&self, id: Uuid) -> Result<bool, StorageError> {
        let affected = self
            .execute("DELETE FROM fragments WHERE id = ?1", params![id.to_string()])
            .await?;
        Ok(affected > 0)
    }

    // ── Roles & users ───────────────────────────────────────────────

    async fn save_role(&self, role: &Role) -> Result<(), StorageError> {
        let document = serde_json::to_string(role)?;
        self.execute(
            "INSERT OR REPLACE INTO roles (name, document) VALUES (?1, ?2)",
            params![role.name.as_str(), document],
        )
        .await?;
        Ok(())
    }

    async fn get_role(&self, name: &str) -> Result<Option<Role>, StorageError> {
        self.document("SELECT document FROM roles WHERE name = ?1", params![name])
            .await
    }

    async fn save_user(&self, user: &User) -> Result<(), StorageError> {
        let document = serde_json::to_string(user)?;
        self.execute(
            "INSERT INTO users (id, name, document) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, document = excluded.document",
            params![user.id.to_string(), user.name.as_str(), document],
        )
        .await?;
        Ok(())
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>, StorageError> {
        self.document("SELECT document FROM users WHERE name = ?1", params![name])
            .await
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StorageError> {
        self.document("SELECT document FROM users WHERE id = ?1", params![id.to_string()])
            .await
    }

    // ── Tokens ──────────────────────────────────────────────────────

    async fn save_token(&self, token: &Token) -> Result<(), StorageError> {
        let document = serde_json::to_string(token)?;
        self.execute(
            "INSERT OR REPLACE INTO tokens (id, subject, expires_at, document) VALUES (?1, ?2, ?3, ?4)",
            params![
                token.id.to_string(),
                token.subject.as_str(),
                token.expires_at.to_rfc3339(),
                document
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_token(&self, id: Uuid) -> Result<Option<Token>, StorageError> {
        self.document(
            "SELECT document FROM tokens WHERE id = ?1",
            params![id.to_string()],
        )
        .await
    }

    async fn find_tokens_by_subject(&self, subject: &str) -> Result<Vec<Token>, StorageError> {
        self.documents(
            "SELECT document FROM tokens WHERE subject = ?1 ORDER BY rowid",
            params![subject],
        )
        .await
    }

    async fn delete_token(&self, id: Uuid) -> Result<bool, StorageError> {
        let affected = self
            .execute("DELETE FROM tokens WHERE id = ?1", params![id.to_string()])
            .await?;
        Ok(affected > 0)
    }
}
