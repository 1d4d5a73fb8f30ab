//! In-process storage for tests and single-run deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::{Role, Token, User};
use crate::entity::{Command, Fragment, Message};
use crate::error::StorageError;
use crate::store::traits::Storage;

/// Keeps everything in maps behind async locks.
#[derive(Default)]
pub struct MemoryStorage {
    commands: RwLock<Vec<Command>>,
    messages: RwLock<HashMap<Uuid, Message>>,
    fragments: RwLock<HashMap<Uuid, Fragment>>,
    roles: RwLock<HashMap<String, Role>>,
    users: RwLock<HashMap<Uuid, User>>,
    tokens: RwLock<HashMap<Uuid, Token>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_command(&self, command: &Command) -> Result<(), StorageError> {
        let mut commands = self.commands.write().await;
        commands.retain(|c| c.id != command.id);
        commands.push(command.clone());
        Ok(())
    }

    async fn recent_commands(&self, limit: usize) -> Result<Vec<Command>, StorageError> {
        Ok(self
            .commands
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn save_message(&self, message: &Message) -> Result<(), StorageError> {
        self.messages
            .write()
            .await
            .insert(message.id, message.clone());
        Ok(())
    }

    async fn save_fragment(&self, fragment: &Fragment) -> Result<(), StorageError> {
        self.fragments
            .write()
            .await
            .insert(fragment.id, fragment.clone());
        Ok(())
    }

    async fn get_fragment(&self, id: Uuid) -> Result<Option<Fragment>, StorageError> {
        Ok(self.fragments.read().await.get(&id).cloned())
    }

    async fn delete_fragment(&self, id: Uuid) -> Result<bool, StorageError> {
        Ok(self.fragments.write().await.remove(&id).is_some())
    }

    async fn save_role(&self, role: &Role) -> Result<(), StorageError> {
        self.roles
            .write()
            .await
            .insert(role.name.clone(), role.clone());
        Ok(())
    }

    async fn get_role(&self, name: &str) -> Result<Option<Role>, StorageError> {
        Ok(self.roles.read().await.get(name).cloned())
    }

    async fn save_user(&self, user: &User) -> Result<(), StorageError> {
        let mut users = self.users.write().await;
        if users
            .values()
            .any(|existing| existing.name == user.name && existing.id != user.id)
        {
            return Err(StorageError::Query(format!(
                "user name {} is already taken",
                user.name
            )));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>, StorageError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.name == name)
            .cloned())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StorageError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn save_token(&self, token: &Token) -> Result<(), StorageError> {
        self.tokens.write().await.insert(token.id, token.clone());
        Ok(())
    }

    async fn get_token(&self, id: Uuid) -> Result<Option<Token>, StorageError> {
        Ok(self.tokens.read().await.get(&id).cloned())
    }

    async fn find_tokens_by_subject(&self, subject: &str) -> Result<Vec<Token>, StorageError> {
        let mut tokens: Vec<Token> = self
            .tokens
            .read()
            .await
            .values()
            .filter(|token| token.subject == subject)
            .cloned()
            .collect();
        tokens.sort_by_key(|token| token.created_at);
        Ok(tokens)
    }

    async fn delete_token(&self, id: Uuid) -> Result<bool, StorageError> {
        Ok(self.tokens.write().await.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{CommandData, CommandVerb, Labels};

    fn fragment() -> Fragment {
        Fragment {
            id: Uuid::new_v4(),
            key: "count".into(),
            parser_id: Uuid::new_v4(),
            user_id: "u-1".into(),
            noun: "roll".into(),
            verb: CommandVerb::Create,
            data: CommandData::new(),
            labels: Labels::new(),
        }
    }

    #[tokio::test]
    async fn fragment_lifecycle() {
        let store = MemoryStorage::new();
        let mut fragment = fragment();
        store.save_fragment(&fragment).await.unwrap();

        fragment.key = "sides".into();
        store.save_fragment(&fragment).await.unwrap();
        let fetched = store.get_fragment(fragment.id).await.unwrap().unwrap();
        assert_eq!(fetched.key, "sides");

        assert!(store.delete_fragment(fragment.id).await.unwrap());
        assert!(!store.delete_fragment(fragment.id).await.unwrap());
        assert!(store.get_fragment(fragment.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn user_names_are_unique() {
        let store = MemoryStorage::new();
        let alice = User::new("alice", vec![]).unwrap();
        store.save_user(&alice).await.unwrap();
        store.save_user(&alice).await.unwrap();

        let imposter = User::new("alice", vec![]).unwrap();
        assert!(store.save_user(&imposter).await.is_err());

        let found = store.find_user_by_name("alice").await.unwrap().unwrap();
        assert_eq!(found.id, alice.id);
        assert_eq!(store.get_user(alice.id).await.unwrap(), Some(alice));
        assert!(store.get_user(imposter.id).await.unwrap().is_none());
    }
}
