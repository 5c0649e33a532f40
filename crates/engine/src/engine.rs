//! The chat engine: routes transport events through the edit state machine.
//!
//! Each inbound event is handled on its own task. Sessions are guarded by a
//! per-chat mutex held for the whole event, so two events from one chat
//! never interleave; the generation lock is only taken inside that, while
//! the backend is in use. Every handled event ends with the session being
//! persisted.

use chrono::Utc;
use rustedchat_config::AppConfig;
use rustedchat_core::error::{ChannelError, Error};
use rustedchat_core::{
    Backend, BotMode, ButtonCommand, Character, ChatId, DomainEvent, EventBus, InboundEvent,
    MessageId, Session, SessionStore, Transport,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::command::{Classification, CommandInterpreter, Directive, ImmediateAction, Trigger};
use crate::history;
use crate::invoker::{GenerationInvoker, GenerationOutcome, ReplyAction, duration_ms};
use crate::templates::MessageTemplates;

const NO_HISTORY: &str = "<no message in history>";
const PREVIEW_CHARS: usize = 50;

/// Routes events for every chat over one backend and one transport.
pub struct ChatEngine {
    config: AppConfig,
    interpreter: CommandInterpreter,
    invoker: GenerationInvoker,
    templates: MessageTemplates,
    transport: Arc<dyn Transport>,
    store: Arc<dyn SessionStore>,
    events: EventBus,
    sessions: RwLock<HashMap<ChatId, Arc<Mutex<Session>>>>,
}

impl ChatEngine {
    pub fn new(
        config: AppConfig,
        backend: Arc<dyn Backend>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let invoker = GenerationInvoker::new(
            backend,
            config.generation.clone(),
            Duration::from_secs(config.generation_timeout_secs),
        );
        Self {
            interpreter: CommandInterpreter::new(&config.prefixes),
            templates: MessageTemplates::new(&config.messages),
            invoker,
            transport,
            store,
            events: EventBus::default(),
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn mode(&self) -> BotMode {
        self.config.bot_mode
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.events.subscribe()
    }

    /// A copy of the chat's current session, if one was started.
    pub async fn session_snapshot(&self, chat_id: ChatId) -> Option<Session> {
        let handle = self.sessions.read().await.get(&chat_id).cloned()?;
        let session = handle.lock().await;
        Some(session.clone())
    }

    /// Consume `rx` until it closes, handling each event on its own task.
    ///
    /// Returns once the stream is closed and every in-flight event is done.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Result<InboundEvent, ChannelError>>) {
        info!(
            transport = self.transport.name(),
            backend = self.invoker.backend().name(),
            mode = %self.mode(),
            "Chat engine running"
        );
        let mut tasks = JoinSet::new();
        while let Some(item) = rx.recv().await {
            match item {
                Ok(event) => {
                    let engine = Arc::clone(&self);
                    tasks.spawn(async move {
                        let chat_id = event.chat_id();
                        if let Err(e) = engine.handle_event(event).await {
                            error!(chat_id = %chat_id, error = %e, "Failed to handle event");
                        }
                    });
                }
                Err(e) => warn!(transport = self.transport.name(), error = %e, "Transport error"),
            }
            while tasks.try_join_next().is_some() {}
        }
        while tasks.join_next().await.is_some() {}
        info!("Event stream closed, chat engine stopped");
    }

    /// Handle one inbound event and persist the session.
    pub async fn handle_event(&self, event: InboundEvent) -> Result<(), Error> {
        let chat_id = event.chat_id();
        if !self.config.access.is_allowed(chat_id.0) {
            info!(chat_id = %chat_id, "Chat not in allowed list, ignoring");
            return Ok(());
        }

        let handle = self.session(chat_id).await;
        let mut session = handle.lock().await;

        let result = match event {
            InboundEvent::Message { text, speaker, .. } => {
                self.handle_message(chat_id, &mut session, &text, &speaker)
                    .await
            }
            InboundEvent::Button {
                message_id,
                command,
                speaker,
                ..
            } => {
                self.handle_button(chat_id, &mut session, message_id, command, &speaker)
                    .await
            }
            InboundEvent::Document {
                file_name, content, ..
            } => {
                self.import_session(chat_id, &mut session, &file_name, &content)
                    .await
            }
        };

        self.store.save_session(chat_id, &session).await?;
        debug!(chat_id = %chat_id, turns = session.history.len(), "Session saved");
        result
    }

    /// The chat's session handle, loading or creating it on first contact.
    async fn session(&self, chat_id: ChatId) -> Arc<Mutex<Session>> {
        if let Some(handle) = self.sessions.read().await.get(&chat_id) {
            return Arc::clone(handle);
        }

        let mut sessions = self.sessions.write().await;
        if let Some(handle) = sessions.get(&chat_id) {
            return Arc::clone(handle);
        }

        let session = match self.store.load_session(chat_id).await {
            Ok(Some(session)) => {
                debug!(chat_id = %chat_id, turns = session.history.len(), "Session restored");
                session
            }
            Ok(None) => self.fresh_session(chat_id).await,
            Err(e) => {
                warn!(chat_id = %chat_id, error = %e, "Saved session unreadable, starting fresh");
                self.fresh_session(chat_id).await
            }
        };
        let handle = Arc::new(Mutex::new(session));
        sessions.insert(chat_id, Arc::clone(&handle));
        handle
    }

    async fn fresh_session(&self, chat_id: ChatId) -> Session {
        let id = &self.config.default_character;
        let character = self.character_or_default(id).await;
        info!(chat_id = %chat_id, character = %id, "New session");
        Session::from_character(id.as_str(), &character)
    }

    async fn character_or_default(&self, id: &str) -> Character {
        match self.store.load_character(id).await {
            Ok(character) => character,
            Err(e) => {
                warn!(character = %id, error = %e, "Character unavailable, using built-in default");
                Character::default()
            }
        }
    }

    fn publish_received(&self, chat_id: ChatId, content: &str) {
        self.events.publish(DomainEvent::MessageReceived {
            chat_id,
            transport: self.transport.name().to_string(),
            content_preview: content.chars().take(PREVIEW_CHARS).collect(),
            timestamp: Utc::now(),
        });
    }

    fn publish_outcome(&self, chat_id: ChatId, outcome: &GenerationOutcome) {
        let event = match (&outcome.fault, &outcome.metadata) {
            (Some(fault), _) => DomainEvent::GenerationFailed {
                chat_id,
                reason: fault.to_string(),
                timestamp: Utc::now(),
            },
            (None, metadata) => DomainEvent::AnswerGenerated {
                chat_id,
                backend: self.invoker.backend().name().to_string(),
                prompt_tokens: metadata.as_ref().map_or(0, |m| m.prompt_tokens()),
                duration_ms: duration_ms(outcome.duration),
                timestamp: Utc::now(),
            },
        };
        self.events.publish(event);
    }

    /// Whether `session` accepted a message too soon after the previous one.
    fn is_flooding(&self, session: &Session) -> bool {
        let Some(last) = session.last_msg_timestamp else {
            return false;
        };
        let elapsed = (Utc::now() - last).num_milliseconds() as f64 / 1000.0;
        elapsed < self.config.flood_avoid_delay_secs
    }

    async fn handle_message(
        &self,
        chat_id: ChatId,
        session: &mut Session,
        text: &str,
        speaker: &str,
    ) -> Result<(), Error> {
        if self.is_flooding(session) {
            info!(chat_id = %chat_id, "Message arrived inside flood delay, ignoring");
            return Ok(());
        }
        session.last_msg_timestamp = Some(Utc::now());
        self.publish_received(chat_id, text);

        match self
            .interpreter
            .classify(&Trigger::Text(text.to_string()), self.mode())
        {
            Classification::Immediate(action) => self.immediate(chat_id, session, &action).await,
            Classification::Directive(directive) => {
                self.deliver_new_turn(chat_id, session, directive, speaker)
                    .await
            }
        }
    }

    async fn immediate(
        &self,
        chat_id: ChatId,
        session: &mut Session,
        action: &ImmediateAction,
    ) -> Result<(), Error> {
        let persona_edit = !matches!(action, ImmediateAction::ReplaceLast(_));
        if persona_edit && self.mode() == BotMode::ChatRestricted {
            self.transport
                .notice(chat_id, "Persona changes are disabled in this mode.")
                .await?;
            return Ok(());
        }

        let reply = history::apply_immediate(session, action);
        debug!(chat_id = %chat_id, action = ?reply.action, "Immediate action applied");
        match reply.action {
            ReplyAction::DeleteLast => {
                if let Some(old) = session.msg_id.pop() {
                    self.transport.delete(chat_id, old).await?;
                }
                let id = self.transport.send(chat_id, &reply.text).await?;
                session.msg_id.push(id);
            }
            _ => self.transport.notice(chat_id, &reply.text).await?,
        }
        Ok(())
    }

    /// Generate a turn that is delivered as a new message.
    async fn deliver_new_turn(
        &self,
        chat_id: ChatId,
        session: &mut Session,
        directive: Directive,
        speaker: &str,
    ) -> Result<(), Error> {
        let previous = session.last_delivered();
        self.transport.send_typing(chat_id).await?;

        let outcome = self
            .invoker
            .invoke(session, self.mode(), &directive, speaker)
            .await;
        self.publish_outcome(chat_id, &outcome);

        let id = match outcome.action {
            ReplyAction::System if outcome.appended => {
                // The failed exchange keeps its stub in history, so it still
                // gets a message for the edit buttons to target.
                self.transport.notice(chat_id, &outcome.text).await?;
                let stub = session.last_message().unwrap_or_default().to_string();
                self.transport.send(chat_id, &stub).await?
            }
            ReplyAction::System => {
                self.transport.notice(chat_id, &outcome.text).await?;
                return Ok(());
            }
            ReplyAction::Image => self.transport.send_image(chat_id, &outcome.text).await?,
            ReplyAction::Send | ReplyAction::DeleteLast => {
                self.transport.send(chat_id, &outcome.text).await?
            }
        };
        if let Some(previous) = previous {
            self.transport.clear_buttons(chat_id, previous).await?;
        }
        session.msg_id.push(id);
        Ok(())
    }

    /// The directive a button trigger stands for.
    fn button_directive(&self, trigger: Trigger) -> Option<Directive> {
        match self.interpreter.classify(&trigger, self.mode()) {
            Classification::Directive(directive) => Some(directive),
            Classification::Immediate(_) => None,
        }
    }

    /// Generate a new turn for a button press.
    async fn button_turn(
        &self,
        chat_id: ChatId,
        session: &mut Session,
        trigger: Trigger,
        speaker: &str,
    ) -> Result<(), Error> {
        match self.button_directive(trigger) {
            Some(directive) => {
                self.deliver_new_turn(chat_id, session, directive, speaker)
                    .await
            }
            None => Ok(()),
        }
    }

    /// Generate into the last delivered message, editing it in place.
    async fn edit_last_turn(
        &self,
        chat_id: ChatId,
        session: &mut Session,
        trigger: Trigger,
        placeholder: &str,
        speaker: &str,
    ) -> Result<(), Error> {
        let (Some(target), Some(directive)) =
            (session.last_delivered(), self.button_directive(trigger))
        else {
            debug!(chat_id = %chat_id, "No delivered turn to edit, ignoring");
            return Ok(());
        };
        let waiting = self.templates.render(placeholder, chat_id, session, "");
        self.transport.edit(chat_id, target, &waiting).await?;
        self.transport.send_typing(chat_id).await?;

        let outcome = self
            .invoker
            .invoke(session, self.mode(), &directive, speaker)
            .await;
        self.publish_outcome(chat_id, &outcome);

        if outcome.action == ReplyAction::System || outcome.is_empty_answer() {
            self.transport.notice(chat_id, &outcome.text).await?;
            let current = session.last_message().unwrap_or_default();
            self.transport.edit(chat_id, target, current).await?;
        } else {
            self.transport.edit(chat_id, target, &outcome.text).await?;
        }
        Ok(())
    }

    async fn handle_button(
        &self,
        chat_id: ChatId,
        session: &mut Session,
        pressed: MessageId,
        command: ButtonCommand,
        speaker: &str,
    ) -> Result<(), Error> {
        self.publish_received(chat_id, &command.token());

        if command.targets_delivered_turn() && !session.is_delivered(pressed) {
            warn!(
                chat_id = %chat_id,
                message_id = %pressed,
                command = %command.token(),
                "Button on a message this session no longer holds"
            );
            let text = self.templates.render("mem_lost", chat_id, session, "");
            self.transport.clear_buttons(chat_id, pressed).await?;
            if let Err(e) = self.transport.edit(chat_id, pressed, &text).await {
                debug!(error = %e, "Pressed message not editable, sending notice instead");
                self.transport.notice(chat_id, &text).await?;
            }
            return Ok(());
        }

        match command {
            ButtonCommand::Impersonate => {
                self.button_turn(chat_id, session, Trigger::Impersonate, speaker)
                    .await
            }
            ButtonCommand::Next => {
                self.button_turn(chat_id, session, Trigger::Next, speaker)
                    .await
            }
            ButtonCommand::Continue => {
                self.edit_last_turn(chat_id, session, Trigger::Continue, "typing", speaker)
                    .await
            }
            ButtonCommand::Regenerate => {
                self.edit_last_turn(chat_id, session, Trigger::Regenerate, "retyping", speaker)
                    .await
            }
            ButtonCommand::DeleteWord => self.delete_word(chat_id, session).await,
            ButtonCommand::Cutoff => self.cutoff(chat_id, session).await,
            ButtonCommand::Reset => self.reset(chat_id, session).await,
            ButtonCommand::Options => self.show_options(chat_id, session).await,
            ButtonCommand::Delete => Ok(self.transport.delete(chat_id, pressed).await?),
            ButtonCommand::Download => self.export_session(chat_id, session).await,
            ButtonCommand::ModelList => self.list_models(chat_id).await,
            ButtonCommand::LoadModel(index) => self.load_model(chat_id, session, index).await,
            ButtonCommand::LoadCharacter(id) => self.switch_character(chat_id, session, &id).await,
        }
    }

    async fn delete_word(&self, chat_id: ChatId, session: &mut Session) -> Result<(), Error> {
        let Some(last) = session.last_message() else {
            return Ok(());
        };
        let trimmed = history::delete_last_word(last);
        if let Some(target) = session.last_delivered() {
            self.transport.edit(chat_id, target, &trimmed).await?;
        }
        session.change_last_message(trimmed);
        Ok(())
    }

    async fn cutoff(&self, chat_id: ChatId, session: &mut Session) -> Result<(), Error> {
        if let Some(last) = session.last_delivered() {
            self.transport.delete(chat_id, last).await?;
        }
        session.truncate_last_message();
        if let Some(previous) = session.last_delivered() {
            self.transport.restore_buttons(chat_id, previous).await?;
        }
        debug!(chat_id = %chat_id, turns = session.history.len(), "Last exchange cut off");
        Ok(())
    }

    async fn reset(&self, chat_id: ChatId, session: &mut Session) -> Result<(), Error> {
        if let Some(last) = session.last_delivered() {
            self.transport.clear_buttons(chat_id, last).await?;
        }
        session.reset();
        let char_file = session.char_file.clone();
        let character = self.character_or_default(&char_file).await;
        session.load_character(char_file, &character);

        let text = self.templates.render("mem_reset", chat_id, session, "");
        self.transport.notice(chat_id, &text).await?;
        self.events.publish(DomainEvent::SessionReset {
            chat_id,
            timestamp: Utc::now(),
        });
        info!(chat_id = %chat_id, "Session reset");
        Ok(())
    }

    /// The options summary shown by the options button.
    pub fn options_summary(&self, session: &Session, characters: &[String]) -> String {
        let backend = self.invoker.backend();
        let count = |text: &str| -> i64 {
            match backend.tokens_count(text) {
                Ok(n) => n as i64,
                Err(e) => {
                    warn!(error = %e, "Token count failed for options summary");
                    -1
                }
            }
        };
        let mut summary = format!(
            "{} ({}),\nConversation length: {} messages, ({} tokens).\nContext:{}, greeting:{} tokens.\nVoice: {}\nLanguage: {}",
            session.name2,
            session.char_file,
            session.history.len(),
            count(&session.history.join("\n")),
            count(&session.context),
            count(&session.greeting),
            session.voice,
            session.language,
        );
        if !characters.is_empty() {
            summary.push_str("\nCharacters: ");
            summary.push_str(&characters.join(", "));
        }
        summary
    }

    async fn show_options(&self, chat_id: ChatId, session: &Session) -> Result<(), Error> {
        let characters = self.store.list_characters().await.unwrap_or_else(|e| {
            warn!(error = %e, "Character listing failed");
            Vec::new()
        });
        let summary = self.options_summary(session, &characters);
        self.transport.notice(chat_id, &summary).await?;
        Ok(())
    }

    async fn export_session(&self, chat_id: ChatId, session: &Session) -> Result<(), Error> {
        let json = session.to_json()?;
        self.transport.notice(chat_id, &json).await?;
        let text = self.templates.render("hist_to_chat", chat_id, session, "");
        self.transport.notice(chat_id, &text).await?;
        Ok(())
    }

    async fn import_session(
        &self,
        chat_id: ChatId,
        session: &mut Session,
        file_name: &str,
        content: &str,
    ) -> Result<(), Error> {
        let imported = match Session::from_json(content) {
            Ok(imported) => imported,
            Err(e) => {
                warn!(chat_id = %chat_id, file = %file_name, error = %e, "History import failed");
                self.transport
                    .notice(chat_id, "Cannot load history from this file.")
                    .await?;
                return Ok(());
            }
        };
        *session = imported;
        let last = session.last_message().unwrap_or(NO_HISTORY).to_string();
        let text = self.templates.render("hist_loaded", chat_id, session, &last);
        self.transport.notice(chat_id, &text).await?;
        info!(chat_id = %chat_id, file = %file_name, turns = session.history.len(), "History imported");
        Ok(())
    }

    fn model_switching_refused(&self) -> Option<&'static str> {
        if self.mode() == BotMode::ChatRestricted {
            Some("Model change is disabled in this mode.")
        } else if !self.invoker.backend().model_change_allowed() {
            Some("Model change is not allowed.")
        } else {
            None
        }
    }

    async fn model_list(&self, chat_id: ChatId) -> Result<Option<Vec<String>>, Error> {
        if let Some(reason) = self.model_switching_refused() {
            self.transport.notice(chat_id, reason).await?;
            return Ok(None);
        }
        match self.invoker.backend().get_model_list().await {
            Ok(models) => Ok(Some(models)),
            Err(e) => {
                warn!(error = %e, "Model listing failed");
                self.transport.notice(chat_id, "Model list unavailable.").await?;
                Ok(None)
            }
        }
    }

    async fn list_models(&self, chat_id: ChatId) -> Result<(), Error> {
        let Some(models) = self.model_list(chat_id).await? else {
            return Ok(());
        };
        let mut text = String::from("Models:");
        for (index, model) in models.iter().enumerate() {
            text.push_str(&format!("\n{index}: {model}"));
        }
        self.transport.notice(chat_id, &text).await?;
        Ok(())
    }

    async fn load_model(
        &self,
        chat_id: ChatId,
        session: &Session,
        index: usize,
    ) -> Result<(), Error> {
        let Some(models) = self.model_list(chat_id).await? else {
            return Ok(());
        };
        let Some(model) = models.get(index) else {
            self.transport
                .notice(chat_id, &format!("No model with index {index}."))
                .await?;
            return Ok(());
        };

        self.transport
            .notice(chat_id, &format!("Loading {model}."))
            .await?;
        let backend = self.invoker.backend();
        let loaded = self
            .invoker
            .exclusive(backend.load_model(model))
            .await
            .and_then(|result| result.map_err(Into::into));

        match loaded {
            Ok(()) => {
                info!(model = %model, "Model loaded");
                self.events.publish(DomainEvent::ModelLoaded {
                    model: model.clone(),
                    timestamp: Utc::now(),
                });
                let text = self.templates.render("model_loaded", chat_id, session, model);
                self.transport.notice(chat_id, &text).await?;
            }
            Err(e) => {
                error!(model = %model, error = %e, "Model load failed");
                self.transport
                    .notice(chat_id, &format!("Error during {model} loading."))
                    .await?;
            }
        }
        Ok(())
    }

    async fn switch_character(
        &self,
        chat_id: ChatId,
        session: &mut Session,
        id: &str,
    ) -> Result<(), Error> {
        if self.mode() == BotMode::ChatRestricted {
            self.transport
                .notice(chat_id, "Persona changes are disabled in this mode.")
                .await?;
            return Ok(());
        }
        let character = match self.store.load_character(id).await {
            Ok(character) => character,
            Err(e) => {
                warn!(character = %id, error = %e, "Character load failed");
                self.transport
                    .notice(chat_id, &format!("Character not found: {id}"))
                    .await?;
                return Ok(());
            }
        };

        if let Some(last) = session.last_delivered() {
            self.transport.clear_buttons(chat_id, last).await?;
        }
        session.load_character(id, &character);
        session.reset();
        let text = self.templates.render("char_loaded", chat_id, session, "");
        self.transport.notice(chat_id, &text).await?;
        info!(chat_id = %chat_id, character = %id, "Character loaded");
        Ok(())
    }
}
