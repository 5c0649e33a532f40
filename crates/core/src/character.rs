//! Character definitions: the fixed persona a session is initialised from.

use serde::{Deserialize, Serialize};

/// A character definition loaded by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    /// Bot persona display name (becomes `name2`).
    #[serde(alias = "char_name")]
    pub name: String,

    /// Persona description, always placed at the top of the prompt.
    #[serde(default, alias = "char_persona")]
    pub context: String,

    /// Opening line spoken by the bot.
    #[serde(default, alias = "char_greeting")]
    pub greeting: String,

    /// Example dialogue, separated from the chat by `<START>`.
    #[serde(default, alias = "example_dialogue")]
    pub example: String,

    /// Default user persona name (becomes `name1`).
    #[serde(default = "default_user_name", alias = "your_name")]
    pub user_name: String,
}

fn default_user_name() -> String {
    "You".into()
}

impl Default for Character {
    fn default() -> Self {
        Self {
            name: "Bot".into(),
            context: "Conversation between a user and a helpful assistant.".into(),
            greeting: String::new(),
            example: String::new(),
            user_name: default_user_name(),
        }
    }
}
