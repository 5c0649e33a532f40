//! `rustedchat once` — Send one message and print what the bot delivers.

use rustedchat_channels::{Delivery, InMemoryTransport};
use rustedchat_core::{ChatId, InboundEvent, SessionStore};
use rustedchat_engine::ChatEngine;
use rustedchat_memory::InMemoryStore;
use std::path::Path;
use std::sync::Arc;

use super::{file_store, load_config};

pub async fn run(
    config_path: Option<&Path>,
    message: &str,
    chat: i64,
    ephemeral: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let backend = rustedchat_providers::build_from_config(&config)?;
    let store: Arc<dyn SessionStore> = if ephemeral {
        Arc::new(InMemoryStore::new())
    } else {
        file_store(&config)
    };

    let transport = Arc::new(InMemoryTransport::new());
    let engine = ChatEngine::new(config, backend, transport.clone(), store);
    engine
        .handle_event(InboundEvent::Message {
            chat_id: ChatId(chat),
            text: message.to_string(),
            speaker: String::new(),
        })
        .await?;

    for line in render(&transport.take_deliveries().await) {
        println!("{line}");
    }
    Ok(())
}

/// The user-visible lines of a delivery log.
fn render(deliveries: &[Delivery]) -> Vec<String> {
    deliveries
        .iter()
        .filter_map(|delivery| match delivery {
            Delivery::Sent { text, .. } | Delivery::Edited { text, .. } => Some(text.clone()),
            Delivery::Notice { text, .. } => Some(format!("-- {text}")),
            Delivery::Image { prompt, .. } => Some(format!("(image) {prompt}")),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustedchat_core::MessageId;

    #[test]
    fn render_skips_typing_and_buttons() {
        let chat_id = ChatId(0);
        let lines = render(&[
            Delivery::Typing { chat_id },
            Delivery::Sent {
                chat_id,
                message_id: MessageId(1),
                text: "Bot: Hi".into(),
            },
            Delivery::ButtonsCleared {
                chat_id,
                message_id: MessageId(1),
            },
            Delivery::Notice {
                chat_id,
                text: "New bot name: Max".into(),
            },
            Delivery::Image {
                chat_id,
                message_id: MessageId(2),
                prompt: "a cat".into(),
            },
        ]);
        assert_eq!(lines, ["Bot: Hi", "-- New bot name: Max", "(image) a cat"]);
    }
}
