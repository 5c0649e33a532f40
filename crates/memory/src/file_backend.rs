//! File-based store — sessions as pretty JSON, characters from a directory.
//!
//! Layout:
//! - `{history_dir}/{chat_id}.json` — one session per chat
//! - `{characters_dir}/{id}` — character definitions, `.json` or `.toml`
//!
//! Files are human-inspectable and can be edited while the bot is stopped.

use async_trait::async_trait;
use rustedchat_core::character::Character;
use rustedchat_core::error::StorageError;
use rustedchat_core::session::{ChatId, Session};
use rustedchat_core::storage::SessionStore;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct FileStore {
    history_dir: PathBuf,
    characters_dir: PathBuf,
}

impl FileStore {
    pub fn new(history_dir: impl Into<PathBuf>, characters_dir: impl Into<PathBuf>) -> Self {
        Self {
            history_dir: history_dir.into(),
            characters_dir: characters_dir.into(),
        }
    }

    fn session_path(&self, chat_id: ChatId) -> PathBuf {
        self.history_dir.join(format!("{chat_id}.json"))
    }

    /// Resolve a character id to a file. An id without extension tries
    /// `.json` first, then `.toml`.
    fn character_path(&self, id: &str) -> Option<PathBuf> {
        let direct = self.characters_dir.join(id);
        if Path::new(id).extension().is_some() {
            return direct.is_file().then_some(direct);
        }
        ["json", "toml"]
            .iter()
            .map(|ext| self.characters_dir.join(format!("{id}.{ext}")))
            .find(|p| p.is_file())
    }
}

fn read_error(path: &Path, e: std::io::Error) -> StorageError {
    StorageError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn parse_character(path: &Path, content: &str) -> Result<Character, StorageError> {
    let parse_error = |reason: String| StorageError::Parse {
        path: path.display().to_string(),
        reason,
    };
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(content).map_err(|e| parse_error(e.to_string())),
        _ => serde_json::from_str(content).map_err(|e| parse_error(e.to_string())),
    }
}

#[async_trait]
impl SessionStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load_session(&self, chat_id: ChatId) -> Result<Option<Session>, StorageError> {
        let path = self.session_path(chat_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(read_error(&path, e)),
        };

        let session = Session::from_json(&content).map_err(|e| StorageError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!(%chat_id, turns = session.history.len(), "Session loaded");
        Ok(Some(session))
    }

    async fn save_session(&self, chat_id: ChatId, session: &Session) -> Result<(), StorageError> {
        let path = self.session_path(chat_id);
        let write_error = |reason: String| StorageError::Write {
            path: path.display().to_string(),
            reason,
        };

        tokio::fs::create_dir_all(&self.history_dir)
            .await
            .map_err(|e| write_error(format!("Failed to create history directory: {e}")))?;

        let json = session.to_json().map_err(|e| write_error(e.to_string()))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| write_error(e.to_string()))?;
        Ok(())
    }

    async fn load_character(&self, id: &str) -> Result<Character, StorageError> {
        let path = self
            .character_path(id)
            .ok_or_else(|| StorageError::NotFound(format!("character '{id}'")))?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| read_error(&path, e))?;
        parse_character(&path, &content)
    }

    async fn list_characters(&self) -> Result<Vec<String>, StorageError> {
        let mut dir = match tokio::fs::read_dir(&self.characters_dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(read_error(&self.characters_dir, e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| read_error(&self.characters_dir, e))?
        {
            let path = entry.path();
            let is_character = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("json" | "toml")
            );
            if is_character && let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                ids.push(name.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> FileStore {
        FileStore::new(dir.path().join("history"), dir.path().join("characters"))
    }

    #[tokio::test]
    async fn missing_session_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store(&dir).load_session(ChatId(5)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn session_persists_as_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let mut session = Session::from_character("default.json", &Character::default());
        session.history_add("You: hi", "Bot: hello");
        store.save_session(ChatId(42), &session).await.unwrap();

        assert!(dir.path().join("history/42.json").is_file());
        let loaded = store.load_session(ChatId(42)).await.unwrap().unwrap();
        assert_eq!(loaded, session);
    }

    #[tokio::test]
    async fn corrupt_session_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("history")).unwrap();
        std::fs::write(dir.path().join("history/7.json"), "{ not json").unwrap();
        let err = store(&dir).load_session(ChatId(7)).await.unwrap_err();
        assert!(matches!(err, StorageError::Parse { .. }));
    }

    #[tokio::test]
    async fn characters_from_json_and_toml() {
        let dir = tempfile::tempdir().unwrap();
        let chars = dir.path().join("characters");
        std::fs::create_dir_all(&chars).unwrap();
        std::fs::write(
            chars.join("aqua.json"),
            r#"{"char_name": "Aqua", "char_persona": "A goddess."}"#,
        )
        .unwrap();
        std::fs::write(
            chars.join("kazuma.toml"),
            "name = \"Kazuma\"\ncontext = \"An adventurer.\"\ngreeting = \"Yo.\"\n",
        )
        .unwrap();
        std::fs::write(chars.join("notes.txt"), "ignored").unwrap();

        let store = store(&dir);
        assert_eq!(
            store.list_characters().await.unwrap(),
            vec!["aqua.json", "kazuma.toml"]
        );
        assert_eq!(store.load_character("aqua.json").await.unwrap().name, "Aqua");
        let kazuma = store.load_character("kazuma").await.unwrap();
        assert_eq!(kazuma.greeting, "Yo.");
    }

    #[tokio::test]
    async fn missing_character_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = store(&dir).load_character("ghost").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(store(&dir).list_characters().await.unwrap().is_empty());
    }
}
