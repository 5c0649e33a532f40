//! Single-flight generation.
//!
//! One lock serialises every use of the backend across the process. It is
//! held from history shaping through folding the answer back in, and is
//! released on every exit path. Acquisition is bounded: a caller that
//! waits longer than the configured timeout gets a busy result and the
//! session is left exactly as it was.

use rustedchat_core::{Backend, BackendError, BotMode, GenerationParams, GenerationRequest, Session};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, warn};

use crate::assembler::{AssemblyMetadata, PromptAssembler};
use crate::command::Directive;
use crate::error::GenerationError;
use crate::history;

/// Delivered when the backend returns nothing.
pub const EMPTY_ANSWER: &str = "<EMPTY ANSWER>";
/// Delivered when generation fails. Also passed as the backend's default answer.
pub const GENERATION_FAIL: &str = "<GENERATION FAIL>";
/// Delivered when the generation lock could not be taken in time.
pub const GENERATOR_BUSY: &str = "<GENERATOR BUSY>";

/// How the caller must deliver a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyAction {
    /// A conversational turn.
    Send,
    /// A plain notice.
    System,
    /// Replace the last delivered turn with a new one.
    DeleteLast,
    /// An image description for the image collaborator.
    Image,
}

/// The result of one pass through the critical section.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    /// Text for the transport: the completed last turn, or a sentinel.
    pub text: String,
    pub action: ReplyAction,
    /// Set when generation did not complete.
    pub fault: Option<GenerationError>,
    /// Prompt assembly report, when assembly ran.
    pub metadata: Option<AssemblyMetadata>,
    /// A new exchange was appended to the history, whether or not the
    /// backend then produced an answer for it.
    pub appended: bool,
    pub duration: Duration,
}

impl GenerationOutcome {
    pub fn is_success(&self) -> bool {
        self.fault.is_none()
    }

    pub fn is_empty_answer(&self) -> bool {
        self.is_success() && self.text == EMPTY_ANSWER
    }
}

/// Milliseconds in `duration`, saturating at `u64::MAX`.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// What the critical section produced when it did not fail.
struct Generated {
    metadata: AssemblyMetadata,
    empty: bool,
}

/// Remove each stopping string the answer ends with, in order, once.
fn strip_stopping_strings<'a>(mut answer: &'a str, stopping_strings: &[String]) -> &'a str {
    for end in stopping_strings {
        if let Some(stripped) = answer.strip_suffix(end.as_str()) {
            answer = stripped;
        }
    }
    answer
}

pub struct GenerationInvoker {
    backend: Arc<dyn Backend>,
    lock: Arc<Mutex<()>>,
    timeout: Duration,
    params: GenerationParams,
}

impl GenerationInvoker {
    pub fn new(backend: Arc<dyn Backend>, params: GenerationParams, timeout: Duration) -> Self {
        Self {
            backend,
            lock: Arc::new(Mutex::new(())),
            timeout,
            params,
        }
    }

    /// Share an existing generation lock instead of owning a fresh one.
    pub fn with_shared_lock(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.lock = lock;
        self
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    async fn acquire(&self) -> Result<MutexGuard<'_, ()>, GenerationError> {
        tokio::time::timeout(self.timeout, self.lock.lock())
            .await
            .map_err(|_| {
                warn!(timeout = ?self.timeout, "Generation lock not acquired, backend busy");
                GenerationError::LockTimeout(self.timeout)
            })
    }

    /// Run `fut` while holding the generation lock.
    pub async fn exclusive<F>(&self, fut: F) -> Result<F::Output, GenerationError>
    where
        F: Future,
    {
        let _guard = self.acquire().await?;
        Ok(fut.await)
    }

    /// Base stopping strings plus, in chat-like modes, every speaker tag.
    pub fn stopping_strings(&self, session: &Session, mode: BotMode, speaker: &str) -> Vec<String> {
        let mut strings = self.params.stopping_strings.clone();
        if mode.is_chat_like() {
            for name in [speaker, session.name1.as_str(), session.name2.as_str()] {
                let tag = format!("\n{name}:");
                if !strings.contains(&tag) {
                    strings.push(tag);
                }
            }
        }
        strings
    }

    /// Shape the history for `directive`, generate, and fold the answer in.
    ///
    /// Never fails: faults come back as a `System` outcome carrying a
    /// sentinel text.
    pub async fn invoke(
        &self,
        session: &mut Session,
        mode: BotMode,
        directive: &Directive,
        speaker: &str,
    ) -> GenerationOutcome {
        let started = Instant::now();

        let result = match self.acquire().await {
            Ok(_guard) => self.generate(session, mode, directive, speaker).await,
            Err(e) => {
                return GenerationOutcome {
                    text: GENERATOR_BUSY.into(),
                    action: ReplyAction::System,
                    fault: Some(e),
                    metadata: None,
                    appended: false,
                    duration: started.elapsed(),
                };
            }
        };
        let duration = started.elapsed();
        // Shaping a new turn cannot fail, so the exchange exists on every
        // path past the lock.
        let appended = history::starts_new_turn(directive);

        match result {
            Ok(generated) => {
                let text = if generated.empty {
                    EMPTY_ANSWER.to_string()
                } else {
                    session.last_message().unwrap_or_default().to_string()
                };
                let action = match directive {
                    Directive::ImageRequest { .. } => ReplyAction::Image,
                    _ => ReplyAction::Send,
                };
                debug!(
                    backend = self.backend.name(),
                    prompt_tokens = generated.metadata.prompt_tokens(),
                    duration_ms = duration_ms(duration),
                    empty = generated.empty,
                    "Generation complete"
                );
                GenerationOutcome {
                    text,
                    action,
                    fault: None,
                    metadata: Some(generated.metadata),
                    appended,
                    duration,
                }
            }
            Err(e) => {
                error!(backend = self.backend.name(), error = %e, "Generation failed");
                GenerationOutcome {
                    text: GENERATION_FAIL.into(),
                    action: ReplyAction::System,
                    fault: Some(e),
                    metadata: None,
                    appended,
                    duration,
                }
            }
        }
    }

    /// The critical section. Caller holds the lock.
    async fn generate(
        &self,
        session: &mut Session,
        mode: BotMode,
        directive: &Directive,
        speaker: &str,
    ) -> Result<Generated, GenerationError> {
        history::apply(session, mode, directive, speaker)?;

        let assembled = PromptAssembler::new(self.params.truncation_length)
            .assemble(session, |text| self.backend.tokens_count(text))?;

        let speaker = match directive {
            Directive::Impersonate {
                speaker: Some(named),
            } => named.clone(),
            Directive::Regenerate => match session.name_in.last() {
                Some(recorded) => recorded.clone(),
                None => history::resolve_speaker(session, speaker),
            },
            _ => history::resolve_speaker(session, speaker),
        };
        let stopping_strings = self.stopping_strings(session, mode, &speaker);

        let request = GenerationRequest {
            prompt: assembled.prompt,
            params: self.params.clone(),
            eos_token: self.params.eos_token.clone(),
            stopping_strings: stopping_strings.clone(),
            default_answer: GENERATION_FAIL.into(),
            turn_template: session.turn_template.clone(),
        };
        let answer = self.backend.get_answer(request).await?;
        if answer == GENERATION_FAIL {
            return Err(BackendError::InvalidResponse(
                "backend returned its default answer".into(),
            )
            .into());
        }

        let answer = strip_stopping_strings(&answer, &stopping_strings);
        if answer.trim().is_empty() {
            warn!(backend = self.backend.name(), "Backend returned an empty answer");
            return Ok(Generated {
                metadata: assembled.metadata,
                empty: true,
            });
        }

        let folded = format!(
            "{} {}",
            session.last_message().unwrap_or_default(),
            answer.trim_start()
        );
        session.change_last_message(folded);

        Ok(Generated {
            metadata: assembled.metadata,
            empty: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedBackend, bare_session};

    fn invoker(backend: Arc<ScriptedBackend>) -> GenerationInvoker {
        let params = GenerationParams {
            truncation_length: 1000,
            ..GenerationParams::default()
        };
        GenerationInvoker::new(backend, params, Duration::from_secs(5))
    }

    fn normal(text: &str) -> Directive {
        Directive::Normal { text: text.into() }
    }

    #[tokio::test]
    async fn normal_turn_is_completed() {
        let backend = Arc::new(ScriptedBackend::answers(&["Hello!"]));
        let inv = invoker(backend.clone());
        let mut s = bare_session();

        let out = inv.invoke(&mut s, BotMode::Chat, &normal("Hi"), "Alice").await;

        assert!(out.is_success());
        assert_eq!(out.action, ReplyAction::Send);
        assert_eq!(out.text, "Bot: Hello!");
        assert_eq!(s.history, vec!["Alice: Hi", "Bot: Hello!"]);
        assert_eq!(
            backend.last_prompt().as_deref(),
            Some("You are Bot.\nAlice: Hi\nBot:")
        );
        assert_eq!(out.metadata.unwrap().turns_included, 2);
    }

    #[tokio::test]
    async fn continue_extends_last_turn() {
        let backend = Arc::new(ScriptedBackend::answers(&[" there"]));
        let inv = invoker(backend);
        let mut s = bare_session();
        s.history.push("Bot: Hello".into());

        let out = inv.invoke(&mut s, BotMode::Chat, &Directive::Continue, "").await;

        assert_eq!(out.text, "Bot: Hello there");
        assert_eq!(s.history, vec!["Bot: Hello there"]);
    }

    #[tokio::test]
    async fn backend_failure_keeps_stub_and_releases_lock() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(BackendError::Network("connection refused".into())),
            Ok("Hello!".into()),
        ]));
        let inv = invoker(backend);
        let mut s = bare_session();

        let out = inv.invoke(&mut s, BotMode::Chat, &normal("Hi"), "Alice").await;
        assert_eq!(out.action, ReplyAction::System);
        assert_eq!(out.text, GENERATION_FAIL);
        assert!(matches!(out.fault, Some(GenerationError::Backend(_))));
        assert!(out.appended);
        assert_eq!(s.history, vec!["Alice: Hi", "Bot:"]);

        // Lock was released: the retry goes through
        let out = inv.invoke(&mut s, BotMode::Chat, &Directive::Regenerate, "").await;
        assert!(out.is_success());
        assert!(!out.appended);
        assert_eq!(s.history, vec!["Alice: Hi", "Bot: Hello!"]);
    }

    #[tokio::test]
    async fn default_answer_counts_as_failure() {
        let backend = Arc::new(ScriptedBackend::answers(&[GENERATION_FAIL]));
        let inv = invoker(backend);
        let mut s = bare_session();
        let out = inv.invoke(&mut s, BotMode::Chat, &normal("Hi"), "Alice").await;
        assert_eq!(out.action, ReplyAction::System);
        assert_eq!(s.last_message(), Some("Bot:"));
    }

    #[tokio::test]
    async fn empty_answer_is_a_sentinel() {
        let backend = Arc::new(ScriptedBackend::answers(&["", "\nAlice:"]));
        let inv = invoker(backend);
        let mut s = bare_session();

        let out = inv.invoke(&mut s, BotMode::Chat, &normal("Hi"), "Alice").await;
        assert!(out.is_empty_answer());
        assert_eq!(out.action, ReplyAction::Send);
        assert_eq!(s.last_message(), Some("Bot:"));

        // Empty once stopping strings are removed
        let out = inv.invoke(&mut s, BotMode::Chat, &Directive::Regenerate, "").await;
        assert!(out.is_empty_answer());
    }

    #[tokio::test]
    async fn mutation_fault_releases_lock_without_calling_backend() {
        let backend = Arc::new(ScriptedBackend::answers(&["unused"]));
        let inv = invoker(backend.clone());
        let mut s = bare_session();

        let out = inv.invoke(&mut s, BotMode::Chat, &Directive::Continue, "").await;
        assert_eq!(out.action, ReplyAction::System);
        assert!(matches!(out.fault, Some(GenerationError::Mutation(_))));
        assert_eq!(backend.call_count(), 0);
        assert_eq!(inv.exclusive(async { 7 }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn regenerate_after_impersonate_uses_impersonated_speaker() {
        let backend = Arc::new(ScriptedBackend::answers(&["I agree.", "I disagree."]));
        let inv = invoker(backend.clone());
        let mut s = bare_session();
        let imp = Directive::Impersonate {
            speaker: Some("Alice".into()),
        };

        inv.invoke(&mut s, BotMode::Chat, &imp, "").await;
        assert_eq!(s.last_message(), Some("Alice: I agree."));

        let out = inv.invoke(&mut s, BotMode::Chat, &Directive::Regenerate, "").await;
        assert_eq!(out.text, "Alice: I disagree.");
        assert!(backend.last_prompt().unwrap().ends_with("\nAlice:"));
        assert!(
            backend.requests()[1]
                .stopping_strings
                .contains(&"\nAlice:".to_string())
        );
    }

    #[tokio::test]
    async fn stopping_string_suffix_is_stripped() {
        let backend = Arc::new(ScriptedBackend::answers(&["Hello!\nAlice:"]));
        let inv = invoker(backend);
        let mut s = bare_session();
        inv.invoke(&mut s, BotMode::Chat, &normal("Hi"), "Alice").await;
        assert_eq!(s.last_message(), Some("Bot: Hello!"));
    }

    #[test]
    fn stopping_strings_by_mode() {
        let backend = Arc::new(ScriptedBackend::answers(&[]));
        let mut params = GenerationParams::default();
        params.stopping_strings = vec!["###".into()];
        let inv = GenerationInvoker::new(backend, params, Duration::from_secs(1));
        let s = bare_session();

        assert_eq!(
            inv.stopping_strings(&s, BotMode::Chat, "Alice"),
            vec!["###", "\nAlice:", "\nYou:", "\nBot:"]
        );
        assert_eq!(
            inv.stopping_strings(&s, BotMode::Admin, "You"),
            vec!["###", "\nYou:", "\nBot:"]
        );
        assert_eq!(inv.stopping_strings(&s, BotMode::Notebook, "Alice"), vec!["###"]);
    }

    #[tokio::test]
    async fn lock_timeout_leaves_session_untouched() {
        let backend = Arc::new(ScriptedBackend::answers(&["never"]));
        let lock = Arc::new(Mutex::new(()));
        let inv = GenerationInvoker::new(
            backend.clone(),
            GenerationParams::default(),
            Duration::from_millis(20),
        )
        .with_shared_lock(lock.clone());
        let mut s = bare_session();
        let before = s.clone();

        let _held = lock.lock().await;
        let out = inv.invoke(&mut s, BotMode::Chat, &normal("Hi"), "Alice").await;

        assert_eq!(out.text, GENERATOR_BUSY);
        assert_eq!(out.action, ReplyAction::System);
        assert!(matches!(out.fault, Some(GenerationError::LockTimeout(_))));
        assert!(!out.appended);
        assert_eq!(s, before);
        assert_eq!(backend.call_count(), 0);
    }

    #[test]
    fn duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn generations_never_overlap() {
        let backend = Arc::new(
            ScriptedBackend::answers(&["a", "b", "c"]).with_delay(Duration::from_millis(30)),
        );
        let inv = Arc::new(invoker(backend.clone()));

        let mut handles = Vec::new();
        for i in 0..3 {
            let inv = inv.clone();
            handles.push(tokio::spawn(async move {
                let mut s = bare_session();
                inv.invoke(&mut s, BotMode::Chat, &normal(&format!("hi {i}")), "Alice")
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_success());
        }
        assert_eq!(backend.call_count(), 3);
        assert_eq!(backend.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn image_request_is_delivered_as_image() {
        let backend = Arc::new(ScriptedBackend::answers(&["a small red fox"]));
        let inv = invoker(backend);
        let mut s = bare_session();
        let d = Directive::ImageRequest {
            prompt: "Detailed description of fox:".into(),
        };
        let out = inv.invoke(&mut s, BotMode::Chat, &d, "Alice").await;
        assert_eq!(out.action, ReplyAction::Image);
        assert_eq!(out.text, "Detailed description of fox: a small red fox");
    }

    #[test]
    fn strips_each_matching_suffix_once() {
        let stops = vec!["\nAlice:".to_string(), "\nBot:".to_string()];
        assert_eq!(strip_stopping_strings("Hi\nBot:", &stops), "Hi");
        assert_eq!(strip_stopping_strings("Hi\nBot:\nAlice:", &stops), "Hi");
        assert_eq!(strip_stopping_strings("Hi", &stops), "Hi");
    }
}
