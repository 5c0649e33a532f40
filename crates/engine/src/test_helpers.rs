//! Shared test helpers for engine tests.

use async_trait::async_trait;
use rustedchat_core::{Backend, BackendError, Character, GenerationRequest, Session};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A backend that returns a sequence of scripted answers.
///
/// Tokens are counted as characters. Every request is recorded so tests can
/// assert on the prompt and stopping strings. Panics if more calls are made
/// than answers provided.
pub struct ScriptedBackend {
    answers: Mutex<VecDeque<Result<String, BackendError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    models: Vec<String>,
    loaded: Mutex<Option<String>>,
}

impl ScriptedBackend {
    pub fn new(answers: Vec<Result<String, BackendError>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            models: Vec::new(),
            loaded: Mutex::new(None),
        }
    }

    pub fn answers(answers: &[&str]) -> Self {
        Self::new(answers.iter().map(|a| Ok(a.to_string())).collect())
    }

    /// A backend whose only call fails.
    pub fn failing() -> Self {
        Self::new(vec![Err(BackendError::Network("connection refused".into()))])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Allow model switching between `models`.
    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.requests.lock().unwrap().last().map(|r| r.prompt.clone())
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Highest number of simultaneous `get_answer` calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn loaded_model(&self) -> Option<String> {
        self.loaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn get_answer(&self, request: GenerationRequest) -> Result<String, BackendError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let answer = self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedBackend: no more answers");
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        answer
    }

    fn tokens_count(&self, text: &str) -> Result<usize, BackendError> {
        Ok(text.chars().count())
    }

    fn model_change_allowed(&self) -> bool {
        !self.models.is_empty()
    }

    async fn get_model_list(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.models.clone())
    }

    async fn load_model(&self, model: &str) -> Result<(), BackendError> {
        if !self.models.iter().any(|m| m == model) {
            return Err(BackendError::ModelNotFound(model.into()));
        }
        *self.loaded.lock().unwrap() = Some(model.into());
        Ok(())
    }
}

pub fn bot_character() -> Character {
    Character {
        name: "Bot".into(),
        context: "You are Bot.".into(),
        greeting: "Hello there.".into(),
        example: String::new(),
        user_name: "You".into(),
    }
}

/// A session with context "You are Bot." and no greeting or history.
pub fn bare_session() -> Session {
    let mut session = Session::from_character("bot.json", &bot_character());
    session.greeting.clear();
    session
}
