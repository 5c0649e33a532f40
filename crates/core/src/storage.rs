//! SessionStore trait — persistence of sessions and character definitions.
//!
//! The engine persists a session after every mutation and loads it lazily
//! on first contact from a chat. Deletion and export are not the store's
//! concern.

use async_trait::async_trait;

use crate::character::Character;
use crate::error::StorageError;
use crate::session::{ChatId, Session};

/// The core persistence trait.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Human-readable name of the store (e.g. "file", "in_memory").
    fn name(&self) -> &str;

    /// Load the saved session for `chat_id`. `Ok(None)` when none exists.
    async fn load_session(&self, chat_id: ChatId) -> Result<Option<Session>, StorageError>;

    /// Persist `session` for `chat_id`, replacing any previous copy.
    async fn save_session(&self, chat_id: ChatId, session: &Session) -> Result<(), StorageError>;

    /// Load a character definition by identifier.
    async fn load_character(&self, id: &str) -> Result<Character, StorageError>;

    /// List available character identifiers, sorted.
    async fn list_characters(&self) -> Result<Vec<String>, StorageError> {
        Ok(Vec::new())
    }
}
