//! Backend-agnostic persistence interface.

use async_trait::async_trait;
use uuid::Uuid;

use crate::auth::{Role, Token, User};
use crate::entity::{Command, Fragment, Message};
use crate::error::StorageError;

/// Async save/find/delete for every persisted entity.
#[async_trait]
pub trait Storage: Send + Sync {
    // ── Commands ────────────────────────────────────────────────────

    /// Record a command for audit and history.
    async fn save_command(&self, command: &Command) -> Result<(), StorageError>;

    /// Most recently saved commands, newest first.
    async fn recent_commands(&self, limit: usize) -> Result<Vec<Command>, StorageError>;

    // ── Messages ────────────────────────────────────────────────────

    async fn save_message(&self, message: &Message) -> Result<(), StorageError>;

    // ── Fragments ───────────────────────────────────────────────────

    /// Insert or replace a fragment by id.
    async fn save_fragment(&self, fragment: &Fragment) -> Result<(), StorageError>;

    async fn get_fragment(&self, id: Uuid) -> Result<Option<Fragment>, StorageError>;

    /// Returns whether a fragment was removed.
    async fn delete_fragment(&self, id: Uuid) -> Result<bool, StorageError>;

    // ── Roles & users ───────────────────────────────────────────────

    async fn save_role(&self, role: &Role) -> Result<(), StorageError>;

    async fn get_role(&self, name: &str) -> Result<Option<Role>, StorageError>;

    /// Insert or replace a user. Names are unique across ids.
    async fn save_user(&self, user: &User) -> Result<(), StorageError>;

    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>, StorageError>;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StorageError>;

    // ── Tokens ──────────────────────────────────────────────────────

    async fn save_token(&self, token: &Token) -> Result<(), StorageError>;

    async fn get_token(&self, id: Uuid) -> Result<Option<Token>, StorageError>;

    async fn find_tokens_by_subject(&self, subject: &str) -> Result<Vec<Token>, StorageError>;

    /// Revoke a token. Returns whether it existed.
    async fn delete_token(&self, id: Uuid) -> Result<bool, StorageError>;
}
