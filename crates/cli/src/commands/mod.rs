pub mod config_cmd;
pub mod models;
pub mod once;
pub mod run;

use rustedchat_config::AppConfig;
use rustedchat_core::SessionStore;
use rustedchat_memory::FileStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Load the config from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    config.map_err(|e| format!("Failed to load config: {e}").into())
}

pub fn config_path(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

/// The file store rooted at the configured history and character dirs.
pub fn file_store(config: &AppConfig) -> Arc<dyn SessionStore> {
    Arc::new(FileStore::new(
        &config.storage.history_dir,
        &config.storage.characters_dir,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_config_path_wins() {
        let explicit = Path::new("/etc/rustedchat.toml");
        assert_eq!(config_path(Some(explicit)), explicit);
        assert!(config_path(None).ends_with("config.toml"));
    }

    #[test]
    fn missing_config_file_loads_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/rustedchat.toml"))).unwrap();
        assert_eq!(config.default_character, "default.json");
    }
}
