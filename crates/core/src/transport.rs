//! Transport trait — the abstraction over chat platforms.
//!
//! A Transport delivers text to a chat and reports inbound events (typed
//! messages and button presses) back to the engine. Message rendering,
//! inline keyboards and file transfer are the transport's business.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ChannelError;
use crate::session::{ChatId, MessageId};

/// Buttons attached to delivered bot messages and to the options menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonCommand {
    Impersonate,
    Next,
    Continue,
    DeleteWord,
    Regenerate,
    Cutoff,
    Reset,
    Options,
    /// Close (delete) the pressed message.
    Delete,
    Download,
    ModelList,
    LoadModel(usize),
    LoadCharacter(String),
}

impl ButtonCommand {
    /// Commands that edit an already delivered bot turn.
    pub fn targets_delivered_turn(&self) -> bool {
        matches!(
            self,
            Self::Next | Self::Continue | Self::DeleteWord | Self::Regenerate | Self::Cutoff
        )
    }

    /// The callback token a transport attaches to the button.
    pub fn token(&self) -> String {
        match self {
            Self::Impersonate => "impersonate".into(),
            Self::Next => "next".into(),
            Self::Continue => "continue".into(),
            Self::DeleteWord => "delword".into(),
            Self::Regenerate => "regen".into(),
            Self::Cutoff => "cutoff".into(),
            Self::Reset => "reset".into(),
            Self::Options => "options".into(),
            Self::Delete => "delete".into(),
            Self::Download => "download".into(),
            Self::ModelList => "models".into(),
            Self::LoadModel(index) => format!("model:{index}"),
            Self::LoadCharacter(id) => format!("char:{id}"),
        }
    }
}

impl std::str::FromStr for ButtonCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cmd = match s {
            "impersonate" => Self::Impersonate,
            "next" => Self::Next,
            "continue" => Self::Continue,
            "delword" => Self::DeleteWord,
            "regen" => Self::Regenerate,
            "cutoff" => Self::Cutoff,
            "reset" => Self::Reset,
            "options" => Self::Options,
            "delete" => Self::Delete,
            "download" => Self::Download,
            "models" => Self::ModelList,
            other => {
                if let Some(index) = other.strip_prefix("model:") {
                    let index = index
                        .trim()
                        .parse()
                        .map_err(|_| format!("invalid model index in '{other}'"))?;
                    Self::LoadModel(index)
                } else if let Some(id) = other.strip_prefix("char:") {
                    if id.is_empty() {
                        return Err("empty character id".into());
                    }
                    Self::LoadCharacter(id.to_string())
                } else {
                    return Err(format!("unknown button '{other}'"));
                }
            }
        };
        Ok(cmd)
    }
}

/// An event reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A typed message.
    Message {
        chat_id: ChatId,
        text: String,
        /// Display name of the sender.
        speaker: String,
    },
    /// A button pressed on a delivered message.
    Button {
        chat_id: ChatId,
        message_id: MessageId,
        command: ButtonCommand,
        /// Display name of the presser.
        speaker: String,
    },
    /// A file sent to the chat (an exported session to import).
    Document {
        chat_id: ChatId,
        file_name: String,
        content: String,
    },
}

impl InboundEvent {
    pub fn chat_id(&self) -> ChatId {
        match self {
            Self::Message { chat_id, .. }
            | Self::Button { chat_id, .. }
            | Self::Document { chat_id, .. } => *chat_id,
        }
    }
}

/// How a reply was (or must be) delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryAction {
    /// A new bot message carrying edit buttons.
    Send,
    /// The text replaced the content of an existing message.
    EditExisting(MessageId),
    /// The message was deleted.
    Delete(MessageId),
    /// A plain notice that is not a conversational turn.
    SystemNotice,
}

/// The core Transport trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable transport name (e.g., "cli", "in_memory").
    fn name(&self) -> &str;

    /// Start listening for inbound events.
    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<InboundEvent, ChannelError>>, ChannelError>;

    /// Deliver a bot turn with edit buttons; returns its message id.
    async fn send(&self, chat_id: ChatId, text: &str) -> Result<MessageId, ChannelError>;

    /// Deliver a plain notice (no edit buttons).
    async fn notice(&self, chat_id: ChatId, text: &str) -> Result<(), ChannelError>;

    /// Replace the text of a delivered message.
    async fn edit(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> Result<(), ChannelError>;

    /// Delete a delivered message.
    async fn delete(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), ChannelError>;

    /// Hand an image-description prompt to the image collaborator.
    ///
    /// Default implementation delivers the description as a regular turn.
    async fn send_image(&self, chat_id: ChatId, prompt: &str) -> Result<MessageId, ChannelError> {
        self.send(chat_id, prompt).await
    }

    /// Remove the edit buttons from a delivered message.
    async fn clear_buttons(
        &self,
        _chat_id: ChatId,
        _message_id: MessageId,
    ) -> Result<(), ChannelError> {
        Ok(())
    }

    /// Put the edit buttons back on a delivered message.
    async fn restore_buttons(
        &self,
        _chat_id: ChatId,
        _message_id: MessageId,
    ) -> Result<(), ChannelError> {
        Ok(())
    }

    /// Send a typing indicator (if the platform supports it).
    async fn send_typing(&self, _chat_id: ChatId) -> Result<(), ChannelError> {
        Ok(()) // No-op default
    }

    /// Stop the transport gracefully.
    async fn stop(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_tokens_parse_back() {
        let all = [
            ButtonCommand::Impersonate,
            ButtonCommand::Next,
            ButtonCommand::Continue,
            ButtonCommand::DeleteWord,
            ButtonCommand::Regenerate,
            ButtonCommand::Cutoff,
            ButtonCommand::Reset,
            ButtonCommand::Options,
            ButtonCommand::Delete,
            ButtonCommand::Download,
            ButtonCommand::ModelList,
            ButtonCommand::LoadModel(3),
            ButtonCommand::LoadCharacter("aqua.json".into()),
        ];
        for cmd in all {
            assert_eq!(cmd.token().parse::<ButtonCommand>().unwrap(), cmd);
        }
    }

    #[test]
    fn malformed_tokens_rejected() {
        assert!("model:x".parse::<ButtonCommand>().is_err());
        assert!("char:".parse::<ButtonCommand>().is_err());
        assert!("explode".parse::<ButtonCommand>().is_err());
    }

    #[test]
    fn only_turn_edits_need_a_delivered_target() {
        assert!(ButtonCommand::Regenerate.targets_delivered_turn());
        assert!(ButtonCommand::Cutoff.targets_delivered_turn());
        assert!(!ButtonCommand::Impersonate.targets_delivered_turn());
        assert!(!ButtonCommand::Reset.targets_delivered_turn());
    }
}
