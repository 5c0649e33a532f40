//! In-memory store — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use rustedchat_core::character::Character;
use rustedchat_core::error::StorageError;
use rustedchat_core::session::{ChatId, Session};
use rustedchat_core::storage::SessionStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A store that keeps sessions and characters in maps.
/// Nothing survives the process.
pub struct InMemoryStore {
    sessions: Arc<RwLock<HashMap<ChatId, Session>>>,
    characters: Arc<RwLock<HashMap<String, Character>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            characters: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a character definition under `id`.
    pub async fn add_character(&self, id: impl Into<String>, character: Character) {
        self.characters.write().await.insert(id.into(), character);
    }

    /// Number of stored sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load_session(&self, chat_id: ChatId) -> Result<Option<Session>, StorageError> {
        Ok(self.sessions.read().await.get(&chat_id).cloned())
    }

    async fn save_session(&self, chat_id: ChatId, session: &Session) -> Result<(), StorageError> {
        self.sessions.write().await.insert(chat_id, session.clone());
        Ok(())
    }

    async fn load_character(&self, id: &str) -> Result<Character, StorageError> {
        self.characters
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("character '{id}'")))
    }

    async fn list_characters(&self) -> Result<Vec<String>, StorageError> {
        let mut ids: Vec<String> = self.characters.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
