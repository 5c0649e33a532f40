//! In-memory transport — records every delivery and accepts injected events.
//!
//! Used by tests and by embedders that drive the engine programmatically.
//! Keeps the current text of every live message so edits and deletions can
//! be asserted on.

use async_trait::async_trait;
use rustedchat_core::error::ChannelError;
use rustedchat_core::session::{ChatId, MessageId};
use rustedchat_core::transport::{ButtonCommand, InboundEvent, Transport};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::{Mutex, mpsc};

/// One call the engine made on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent { chat_id: ChatId, message_id: MessageId, text: String },
    Image { chat_id: ChatId, message_id: MessageId, prompt: String },
    Notice { chat_id: ChatId, text: String },
    Edited { chat_id: ChatId, message_id: MessageId, text: String },
    Deleted { chat_id: ChatId, message_id: MessageId },
    ButtonsCleared { chat_id: ChatId, message_id: MessageId },
    ButtonsRestored { chat_id: ChatId, message_id: MessageId },
    Typing { chat_id: ChatId },
}

pub struct InMemoryTransport {
    next_id: AtomicI64,
    deliveries: Mutex<Vec<Delivery>>,
    live: Mutex<BTreeMap<MessageId, String>>,
    /// Sender for injecting events.
    inject_tx: Mutex<Option<mpsc::Sender<Result<InboundEvent, ChannelError>>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            deliveries: Mutex::new(Vec::new()),
            live: Mutex::new(BTreeMap::new()),
            inject_tx: Mutex::new(None),
        }
    }

    /// Inject an event as if it came from a user.
    pub async fn inject(&self, event: InboundEvent) -> Result<(), ChannelError> {
        let guard = self.inject_tx.lock().await;
        if let Some(tx) = guard.as_ref() {
            tx.send(Ok(event))
                .await
                .map_err(|_| ChannelError::ConnectionLost("Event channel closed".into()))
        } else {
            Err(ChannelError::ConnectionLost("Transport not started".into()))
        }
    }

    /// Inject a typed message.
    pub async fn inject_text(
        &self,
        chat_id: ChatId,
        speaker: &str,
        text: &str,
    ) -> Result<(), ChannelError> {
        self.inject(InboundEvent::Message {
            chat_id,
            text: text.into(),
            speaker: speaker.into(),
        })
        .await
    }

    /// Inject a button press on `message_id`.
    pub async fn inject_button(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        command: ButtonCommand,
    ) -> Result<(), ChannelError> {
        self.inject(InboundEvent::Button {
            chat_id,
            message_id,
            command,
            speaker: String::new(),
        })
        .await
    }

    /// Inject a file upload, such as an exported session.
    pub async fn inject_document(
        &self,
        chat_id: ChatId,
        file_name: &str,
        content: &str,
    ) -> Result<(), ChannelError> {
        self.inject(InboundEvent::Document {
            chat_id,
            file_name: file_name.into(),
            content: content.into(),
        })
        .await
    }

    /// Everything delivered so far, oldest first.
    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().await.clone()
    }

    /// Drain the delivery log.
    pub async fn take_deliveries(&self) -> Vec<Delivery> {
        std::mem::take(&mut *self.deliveries.lock().await)
    }

    /// Current text of a message that has not been deleted.
    pub async fn message_text(&self, message_id: MessageId) -> Option<String> {
        self.live.lock().await.get(&message_id).cloned()
    }

    /// Id of the most recently sent message still alive.
    pub async fn last_message_id(&self) -> Option<MessageId> {
        self.live.lock().await.keys().next_back().copied()
    }

    async fn record(&self, delivery: Delivery) {
        self.deliveries.lock().await.push(delivery);
    }

    async fn deliver(&self, chat_id: ChatId, text: &str, image: bool) -> MessageId {
        let message_id = MessageId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.live.lock().await.insert(message_id, text.to_string());
        let delivery = if image {
            Delivery::Image {
                chat_id,
                message_id,
                prompt: text.into(),
            }
        } else {
            Delivery::Sent {
                chat_id,
                message_id,
                text: text.into(),
            }
        };
        self.record(delivery).await;
        message_id
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<InboundEvent, ChannelError>>, ChannelError> {
        let (tx, rx) = mpsc::channel(64);
        *self.inject_tx.lock().await = Some(tx);
        Ok(rx)
    }

    async fn send(&self, chat_id: ChatId, text: &str) -> Result<MessageId, ChannelError> {
        Ok(self.deliver(chat_id, text, false).await)
    }

    async fn send_image(&self, chat_id: ChatId, prompt: &str) -> Result<MessageId, ChannelError> {
        Ok(self.deliver(chat_id, prompt, true).await)
    }

    async fn notice(&self, chat_id: ChatId, text: &str) -> Result<(), ChannelError> {
        self.record(Delivery::Notice {
            chat_id,
            text: text.into(),
        })
        .await;
        Ok(())
    }

    async fn edit(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> Result<(), ChannelError> {
        match self.live.lock().await.get_mut(&message_id) {
            Some(current) => *current = text.to_string(),
            None => {
                return Err(ChannelError::DeliveryFailed {
                    chat_id: chat_id.to_string(),
                    reason: format!("message {message_id} does not exist"),
                });
            }
        }
        self.record(Delivery::Edited {
            chat_id,
            message_id,
            text: text.into(),
        })
        .await;
        Ok(())
    }

    async fn delete(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), ChannelError> {
        self.live.lock().await.remove(&message_id);
        self.record(Delivery::Deleted {
            chat_id,
            message_id,
        })
        .await;
        Ok(())
    }

    async fn clear_buttons(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), ChannelError> {
        self.record(Delivery::ButtonsCleared {
            chat_id,
            message_id,
        })
        .await;
        Ok(())
    }

    async fn restore_buttons(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), ChannelError> {
        self.record(Delivery::ButtonsRestored {
            chat_id,
            message_id,
        })
        .await;
        Ok(())
    }

    async fn send_typing(&self, chat_id: ChatId) -> Result<(), ChannelError> {
        self.record(Delivery::Typing { chat_id }).await;
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        *self.inject_tx.lock().await = None;
        Ok(())
    }
}
