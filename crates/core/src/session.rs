//! Session domain types.
//!
//! A `Session` is the per-chat conversation log plus the persona fields it
//! was initialised from. The engine owns sessions exclusively; transports
//! only ever see the text it hands them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::character::Character;

/// Identifier of a chat (one session per chat).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a message delivered by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a user-originated turn was classified when it entered the history.
///
/// Regeneration replays the last record to re-derive the exact stub the
/// turn started from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnInput {
    /// An ordinary speaker line followed by a bot stub.
    Chat { text: String },
    /// A stub for the recorded speaker (button or prefix impersonation).
    Impersonate,
    /// An independent alternative bot turn.
    Next,
    /// Raw notebook text continued verbatim.
    Notebook { text: String },
    /// A resolved image-description prompt.
    Image { prompt: String },
}

/// Per-chat conversation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// User persona display name.
    pub name1: String,
    /// Bot persona display name.
    pub name2: String,
    /// Persona description placed at the top of every prompt.
    pub context: String,
    /// Opening line spoken by the bot.
    #[serde(default)]
    pub greeting: String,
    /// Example dialogue.
    #[serde(default)]
    pub example: String,
    /// Identifier of the character the persona was loaded from.
    #[serde(default)]
    pub char_file: String,

    /// Conversation turns, oldest first.
    #[serde(default)]
    pub history: Vec<String>,
    /// User-originated inputs, parallel to `name_in`.
    #[serde(default)]
    pub text_in: Vec<TurnInput>,
    /// Speaker names, parallel to `text_in`.
    #[serde(default)]
    pub name_in: Vec<String>,
    /// Transport ids of delivered bot turns, oldest first.
    #[serde(default)]
    pub msg_id: Vec<MessageId>,

    /// Passthrough for the translation collaborator.
    #[serde(default = "default_language")]
    pub language: String,
    /// Passthrough for the speech collaborator.
    #[serde(default)]
    pub voice: String,
    /// Used by flood control only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_msg_timestamp: Option<DateTime<Utc>>,
    /// Passthrough for the backend.
    #[serde(default)]
    pub turn_template: String,
}

fn default_language() -> String {
    "en".into()
}

impl Session {
    /// Create a fresh session from a character definition.
    pub fn from_character(char_file: impl Into<String>, character: &Character) -> Self {
        let mut session = Self {
            name1: String::new(),
            name2: String::new(),
            context: String::new(),
            greeting: String::new(),
            example: String::new(),
            char_file: String::new(),
            history: Vec::new(),
            text_in: Vec::new(),
            name_in: Vec::new(),
            msg_id: Vec::new(),
            language: default_language(),
            voice: String::new(),
            last_msg_timestamp: None,
            turn_template: String::new(),
        };
        session.load_character(char_file, character);
        session
    }

    /// Replace the persona with `character`. The conversation log is kept.
    pub fn load_character(&mut self, char_file: impl Into<String>, character: &Character) {
        self.char_file = char_file.into();
        self.name1 = character.user_name.clone();
        self.name2 = character.name.clone();
        self.context = character.context.clone();
        self.greeting = character.greeting.clone();
        self.example = character.example.clone();
    }

    /// Clear the conversation log and delivery bookkeeping.
    pub fn reset(&mut self) {
        self.history.clear();
        self.text_in.clear();
        self.name_in.clear();
        self.msg_id.clear();
    }

    /// Append a two-line turn (speaker-or-blank line, then stub).
    pub fn history_add(&mut self, first: impl Into<String>, second: impl Into<String>) {
        self.history.push(first.into());
        self.history.push(second.into());
    }

    /// Record a user-originated input and its speaker.
    pub fn record_input(&mut self, input: TurnInput, speaker: impl Into<String>) {
        self.text_in.push(input);
        self.name_in.push(speaker.into());
    }

    /// The most recent turn, if any.
    pub fn last_message(&self) -> Option<&str> {
        self.history.last().map(String::as_str)
    }

    /// Overwrite the most recent turn (or start the log with it).
    pub fn change_last_message(&mut self, text: impl Into<String>) {
        let text = text.into();
        match self.history.last_mut() {
            Some(last) => *last = text,
            None => self.history.push(text),
        }
    }

    /// Remove the last full exchange: its two history lines, its recorded
    /// input, and its delivered message id.
    pub fn truncate_last_message(&mut self) {
        let keep = self.history.len().saturating_sub(2);
        self.history.truncate(keep);
        self.text_in.pop();
        self.name_in.pop();
        self.msg_id.pop();
    }

    /// Whether `id` refers to a bot turn still represented in this session.
    pub fn is_delivered(&self, id: MessageId) -> bool {
        self.msg_id.contains(&id)
    }

    /// The id of the most recently delivered bot turn.
    pub fn last_delivered(&self) -> Option<MessageId> {
        self.msg_id.last().copied()
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
