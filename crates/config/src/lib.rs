//! Configuration loading, validation, and management for RustedChat.
//!
//! Loads configuration from `~/.rustedchat/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use rustedchat_core::{BotMode, GenerationParams};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.rustedchat/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Operating mode of the bot
    #[serde(default)]
    pub bot_mode: BotMode,

    /// Bounded wait for the generation lock (seconds)
    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_secs: u64,

    /// Minimum delay between two accepted messages of one chat (seconds)
    #[serde(default = "default_flood_delay")]
    pub flood_avoid_delay_secs: f64,

    /// Character loaded into new sessions
    #[serde(default = "default_character")]
    pub default_character: String,

    /// Language the model speaks
    #[serde(default = "default_model_lang")]
    pub model_lang: String,

    /// Prefix command grammar
    #[serde(default)]
    pub prefixes: PrefixConfig,

    /// Generation parameters forwarded to the backend
    #[serde(default)]
    pub generation: GenerationParams,

    /// Text-generation backend
    #[serde(default)]
    pub backend: BackendConfig,

    /// Session and character persistence
    #[serde(default)]
    pub storage: StorageConfig,

    /// Which chats the bot answers
    #[serde(default)]
    pub access: AccessConfig,

    /// User-visible message templates
    #[serde(default)]
    pub messages: MessagesConfig,
}

fn default_generation_timeout() -> u64 {
    120
}
fn default_flood_delay() -> f64 {
    10.0
}
fn default_character() -> String {
    "default.json".into()
}
fn default_model_lang() -> String {
    "en".into()
}

/// Control prefixes recognised at the start of a raw message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefixConfig {
    /// Replace the last history entry (one character)
    #[serde(default = "default_replace")]
    pub replace: Vec<String>,

    /// One-shot impersonation (one character)
    #[serde(default = "default_impersonate")]
    pub impersonate: Vec<String>,

    /// Rename the user persona (two characters)
    #[serde(default = "default_rename_user")]
    pub rename_user: Vec<String>,

    /// Rename the bot persona (two characters)
    #[serde(default = "default_rename_bot")]
    pub rename_bot: Vec<String>,

    /// Append a line to the context (two characters)
    #[serde(default = "default_add_context")]
    pub add_context: Vec<String>,

    /// Request an image description (one character)
    #[serde(default = "default_image")]
    pub image: Vec<String>,

    /// Prompt used when an object follows the image prefix; `OBJECT` is replaced
    #[serde(default = "default_image_prompt_of")]
    pub image_prompt_of: String,

    /// Prompt used when nothing follows the image prefix
    #[serde(default = "default_image_prompt_self")]
    pub image_prompt_self: String,
}

fn default_replace() -> Vec<String> {
    vec!["!".into(), "-".into()]
}
fn default_impersonate() -> Vec<String> {
    vec!["#".into(), "+".into()]
}
fn default_rename_user() -> Vec<String> {
    vec!["--".into()]
}
fn default_rename_bot() -> Vec<String> {
    vec!["++".into()]
}
fn default_add_context() -> Vec<String> {
    vec!["==".into()]
}
fn default_image() -> Vec<String> {
    ["📷", "📸", "📹", "🎥", "📽"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_image_prompt_of() -> String {
    "Detailed description of OBJECT:".into()
}
fn default_image_prompt_self() -> String {
    "Detailed description of appearance, surroundings and what doing right now: ".into()
}

impl Default for PrefixConfig {
    fn default() -> Self {
        Self {
            replace: default_replace(),
            impersonate: default_impersonate(),
            rename_user: default_rename_user(),
            rename_bot: default_rename_bot(),
            add_context: default_add_context(),
            image: default_image(),
            image_prompt_of: default_image_prompt_of(),
            image_prompt_self: default_image_prompt_self(),
        }
    }
}

/// Which backend implementation to resolve at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    TextGenerationWebui,
    OpenaiCompletions,
    Echo,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    #[serde(default = "default_backend_url")]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Context window of the model, used by backends that report it
    #[serde(default = "default_n_ctx")]
    pub n_ctx: usize,

    /// Per-request HTTP timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_backend_url() -> String {
    "http://localhost:5000".into()
}
fn default_n_ctx() -> usize {
    2048
}
fn default_request_timeout() -> u64 {
    300
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            url: default_backend_url(),
            api_key: None,
            model: None,
            n_ctx: default_n_ctx(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("kind", &self.kind)
            .field("url", &self.url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("n_ctx", &self.n_ctx)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_history_dir")]
    pub history_dir: PathBuf,

    #[serde(default = "default_characters_dir")]
    pub characters_dir: PathBuf,
}

fn default_history_dir() -> PathBuf {
    AppConfig::config_dir().join("history")
}
fn default_characters_dir() -> PathBuf {
    AppConfig::config_dir().join("characters")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            history_dir: default_history_dir(),
            characters_dir: default_characters_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Allowlist of chat ids. Empty = allow all.
    #[serde(default)]
    pub allowed_chats: Vec<i64>,
}

impl AccessConfig {
    pub fn is_allowed(&self, chat_id: i64) -> bool {
        self.allowed_chats.is_empty() || self.allowed_chats.contains(&chat_id)
    }
}

/// Message templates keyed by name. Entries here override the built-ins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesConfig {
    /// Wrapped around `_CUSTOM_STRING_` by templates that use it
    #[serde(default)]
    pub open_tag: String,

    #[serde(default)]
    pub close_tag: String,

    #[serde(default = "default_templates")]
    pub templates: HashMap<String, String>,
}

fn default_templates() -> HashMap<String, String> {
    [
        (
            "mem_lost",
            "MEMORY LOST!\nSend /start or any text for new session.",
        ),
        ("retyping", "_NAME2_ retyping..."),
        ("typing", "_NAME2_ typing..."),
        ("char_loaded", "_NAME2_ LOADED!\n_GREETING_ "),
        (
            "model_loaded",
            "LOADED MODEL: _OPEN_TAG__CUSTOM_STRING__CLOSE_TAG_",
        ),
        ("mem_reset", "MEMORY RESET!\n_GREETING_"),
        (
            "hist_to_chat",
            "To load history - send the exported file back to this chat",
        ),
        (
            "hist_loaded",
            "_NAME2_ LOADED!\n_GREETING_\n\nLAST MESSAGE:\n_CUSTOM_STRING_",
        ),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            open_tag: String::new(),
            close_tag: String::new(),
            templates: default_templates(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.rustedchat/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `RUSTEDCHAT_BACKEND_URL`
    /// - `RUSTEDCHAT_MODE`
    /// - `RUSTEDCHAT_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        // Templates given in the file override single entries, not the whole set
        let mut templates = default_templates();
        templates.extend(std::mem::take(&mut config.messages.templates));
        config.messages.templates = templates;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = std::env::var("RUSTEDCHAT_BACKEND_URL") {
            self.backend.url = url;
        }

        if let Ok(mode) = std::env::var("RUSTEDCHAT_MODE") {
            self.bot_mode = mode.parse().map_err(ConfigError::ValidationError)?;
        }

        if self.backend.api_key.is_none() {
            self.backend.api_key = std::env::var("RUSTEDCHAT_API_KEY").ok();
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".rustedchat")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.generation.truncation_length == 0 {
            return Err(ConfigError::ValidationError(
                "generation.truncation_length must be > 0".into(),
            ));
        }

        if self.generation_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "generation_timeout_secs must be > 0".into(),
            ));
        }

        if self.flood_avoid_delay_secs < 0.0 {
            return Err(ConfigError::ValidationError(
                "flood_avoid_delay_secs must not be negative".into(),
            ));
        }

        let p = &self.prefixes;
        check_prefixes("rename_user", &p.rename_user, 2)?;
        check_prefixes("rename_bot", &p.rename_bot, 2)?;
        check_prefixes("add_context", &p.add_context, 2)?;
        check_prefixes("replace", &p.replace, 1)?;
        check_prefixes("impersonate", &p.impersonate, 1)?;
        check_prefixes("image", &p.image, 1)?;

        Ok(())
    }

    /// Generate a default config TOML string (for `init-config`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Every prefix must be exactly `chars` characters long.
fn check_prefixes(field: &str, prefixes: &[String], chars: usize) -> Result<(), ConfigError> {
    for prefix in prefixes {
        if prefix.chars().count() != chars {
            return Err(ConfigError::ValidationError(format!(
                "prefixes.{field}: '{prefix}' must be exactly {chars} character(s)"
            )));
        }
    }
    Ok(())
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bot_mode: BotMode::default(),
            generation_timeout_secs: default_generation_timeout(),
            flood_avoid_delay_secs: default_flood_delay(),
            default_character: default_character(),
            model_lang: default_model_lang(),
            prefixes: PrefixConfig::default(),
            generation: GenerationParams::default(),
            backend: BackendConfig::default(),
            storage: StorageConfig::default(),
            access: AccessConfig::default(),
            messages: MessagesConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bot_mode, BotMode::Chat);
        assert_eq!(config.generation_timeout_secs, 120);
        assert_eq!(config.prefixes.rename_bot, vec!["++"]);
        assert_eq!(config.backend.kind, BackendKind::TextGenerationWebui);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.prefixes.image, config.prefixes.image);
        assert_eq!(
            parsed.generation.truncation_length,
            config.generation.truncation_length
        );
    }

    #[test]
    fn zero_truncation_length_rejected() {
        let mut config = AppConfig::default();
        config.generation.truncation_length = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn wrong_prefix_width_rejected() {
        let mut config = AppConfig::default();
        config.prefixes.rename_bot = vec!["+".into()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rename_bot"));

        let mut config = AppConfig::default();
        config.prefixes.image = vec!["📷📷".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn emoji_prefix_counts_as_one_character() {
        assert!(check_prefixes("image", &["📽".to_string()], 1).is_ok());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.flood_avoid_delay_secs, 10.0);
    }

    #[test]
    fn file_overrides_sections_and_keeps_default_templates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
bot_mode = "notebook"

[generation]
truncation_length = 512
temperature = 0.2

[backend]
kind = "echo"

[access]
allowed_chats = [1, 2]

[messages.templates]
mem_lost = "gone"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.bot_mode, BotMode::Notebook);
        assert_eq!(config.generation.truncation_length, 512);
        assert_eq!(config.backend.kind, BackendKind::Echo);
        assert_eq!(config.messages.templates["mem_lost"], "gone");
        assert!(config.messages.templates.contains_key("mem_reset"));
        assert!(config.access.is_allowed(2));
        assert!(!config.access.is_allowed(3));
    }

    #[test]
    fn empty_allowlist_allows_everyone() {
        assert!(AccessConfig::default().is_allowed(12345));
    }

    #[test]
    fn api_key_is_redacted() {
        let backend = BackendConfig {
            api_key: Some("sk-secret".into()),
            ..BackendConfig::default()
        };
        let debug = format!("{backend:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("text-generation-webui"));
        assert!(toml_str.contains("truncation_length"));
    }
}
