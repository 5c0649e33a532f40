//! `rustedchat models` — List models offered by the configured backend.

use std::path::Path;

use super::load_config;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let backend = rustedchat_providers::build_from_config(&config)?;

    println!("🤖 Backend: {}", backend.name());
    if !backend.model_change_allowed() {
        println!("   Model switching is not supported by this backend.");
        return Ok(());
    }

    let models = backend.get_model_list().await?;
    if models.is_empty() {
        println!("   No models reported.");
    }
    for (index, model) in models.iter().enumerate() {
        println!("   {index}: {model}");
    }
    Ok(())
}
