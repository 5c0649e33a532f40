//! `rustedchat run` — Interactive chat in the terminal.

use rustedchat_channels::CliTransport;
use rustedchat_core::{DomainEvent, Transport};
use rustedchat_engine::ChatEngine;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use super::{file_store, load_config};

pub async fn run(config_path: Option<&Path>, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let backend = rustedchat_providers::build_from_config(&config)?;
    let store = file_store(&config);

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║        RustedChat — Interactive Mode         ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Mode:       {}", config.bot_mode);
    println!("  Backend:    {}", backend.name());
    println!("  Character:  {}", config.default_character);
    println!("  History:    {}", config.storage.history_dir.display());
    println!();
    println!("  Type a message and press Enter. Buttons are slash commands:");
    println!("    /continue /regen /next /impersonate /delword /cutoff /reset");
    println!("    /options /models /model N /char ID /export /import PATH");
    println!("  Type 'exit' or press Ctrl+D to quit.");
    println!();

    // An empty speaker lets each session use its own user name
    let transport = Arc::new(CliTransport::new(""));
    let rx = transport.start().await?;
    let engine = Arc::new(ChatEngine::new(
        config,
        backend,
        transport.clone(),
        store,
    ));

    if verbose {
        let mut events = engine.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(skipped)) => debug!(skipped, "Event log lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    tokio::select! {
        _ = Arc::clone(&engine).run(rx) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }
    transport.stop().await?;

    println!();
    println!("  Goodbye! 👋");
    println!();
    Ok(())
}

fn log_event(event: &DomainEvent) {
    match event {
        DomainEvent::MessageReceived {
            chat_id,
            content_preview,
            ..
        } => debug!(chat_id = %chat_id, preview = %content_preview, "Received"),
        DomainEvent::AnswerGenerated {
            chat_id,
            prompt_tokens,
            duration_ms,
            ..
        } => debug!(chat_id = %chat_id, prompt_tokens, duration_ms, "Answered"),
        DomainEvent::GenerationFailed {
            chat_id, reason, ..
        } => debug!(chat_id = %chat_id, reason = %reason, "Generation failed"),
        DomainEvent::SessionReset { chat_id, .. } => debug!(chat_id = %chat_id, "Session reset"),
        DomainEvent::ModelLoaded { model, .. } => debug!(model = %model, "Model loaded"),
    }
}
