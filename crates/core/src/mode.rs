//! Operating modes of the bot.

use serde::{Deserialize, Serialize};

/// How the history mutator shapes turns and which stopping strings apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BotMode {
    /// Ordinary role-play chat.
    #[default]
    Chat,
    /// Chat where persona edits are reserved for admins.
    ChatRestricted,
    /// Free-form text continuation, no speaker tags.
    Notebook,
    /// Stateless question answering; history is cleared before each turn.
    Query,
    /// Chat with every affordance enabled.
    Admin,
}

impl BotMode {
    /// Chat-like modes add speaker names to the stopping strings.
    pub fn is_chat_like(self) -> bool {
        matches!(self, Self::Chat | Self::ChatRestricted | Self::Admin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::ChatRestricted => "chat-restricted",
            Self::Notebook => "notebook",
            Self::Query => "query",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for BotMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BotMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "chat-restricted" => Ok(Self::ChatRestricted),
            "notebook" => Ok(Self::Notebook),
            "query" => Ok(Self::Query),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown bot mode '{other}'")),
        }
    }
}
