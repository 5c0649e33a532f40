//! `rustedchat init-config` and `rustedchat config` — Configuration
//! management commands.

use rustedchat_config::AppConfig;
use std::path::Path;

use super::{config_path, load_config};

pub async fn init(
    path: Option<&Path>,
    write: bool,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !write {
        print!("{}", AppConfig::default_toml());
        return Ok(());
    }

    let target = config_path(path);
    if target.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            target.display()
        )
        .into());
    }
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&target, AppConfig::default_toml())?;
    println!("✅ Wrote default config to {}", target.display());
    Ok(())
}

pub async fn show(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(path)?;
    if config.backend.api_key.is_some() {
        config.backend.api_key = Some("[REDACTED]".into());
    }
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", config_path(path).display());
    Ok(())
}

pub async fn validate(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    let config = match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ {e}");
            return Err(e);
        }
    };
    println!("   ✅ Config parsed successfully");

    let mut warnings = Vec::new();
    if !config.storage.characters_dir.is_dir() {
        warnings.push(format!(
            "Characters directory {} does not exist",
            config.storage.characters_dir.display()
        ));
    }
    let max_new_tokens = config.generation.sampling_i64("max_new_tokens", 0);
    if max_new_tokens >= config.generation.truncation_length as i64 {
        warnings.push("max_new_tokens leaves no room for the prompt".to_string());
    }

    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!("   Mode:       {}", config.bot_mode);
    println!("   Backend:    {:?} at {}", config.backend.kind, config.backend.url);
    println!("   Character:  {}", config.default_character);
    println!("   Timeout:    {}s", config.generation_timeout_secs);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("config.toml");

        init(Some(&target), false, false).await.unwrap();
        assert!(!target.exists());

        init(Some(&target), true, false).await.unwrap();
        let config = AppConfig::load_from(&target).unwrap();
        assert_eq!(config.generation_timeout_secs, 120);

        assert!(init(Some(&target), true, false).await.is_err());
        init(Some(&target), true, true).await.unwrap();
    }
}
