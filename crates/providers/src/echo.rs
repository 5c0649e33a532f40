//! Deterministic echo backend for tests and offline runs.
//!
//! Two models: `like` wraps the prompt as `😀 {prompt} 👍`, `dislike` as
//! `🙁 {prompt} 👎`. Tokens are counted as characters.

use async_trait::async_trait;
use rustedchat_core::backend::{Backend, GenerationRequest};
use rustedchat_core::error::BackendError;
use std::sync::RwLock;
use std::time::Duration;

const MODELS: [&str; 2] = ["like", "dislike"];

pub struct EchoBackend {
    model: RwLock<String>,
    delay: Duration,
}

impl EchoBackend {
    pub fn new() -> Self {
        Self {
            model: RwLock::new(MODELS[0].to_string()),
            delay: Duration::ZERO,
        }
    }

    /// Start on `model` instead of `like`.
    pub fn with_model(self, model: &str) -> Result<Self, BackendError> {
        if !MODELS.contains(&model) {
            return Err(BackendError::ModelNotFound(model.to_string()));
        }
        Ok(Self {
            model: RwLock::new(model.to_string()),
            ..self
        })
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn model(&self) -> String {
        self.model
            .read()
            .map(|m| m.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }
}

impl Default for EchoBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    async fn get_answer(&self, request: GenerationRequest) -> Result<String, BackendError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.model().as_str() {
            "like" => Ok(format!("😀 {} 👍", request.prompt)),
            "dislike" => Ok(format!("🙁 {} 👎", request.prompt)),
            other => Err(BackendError::ModelNotFound(other.to_string())),
        }
    }

    fn tokens_count(&self, text: &str) -> Result<usize, BackendError> {
        Ok(text.chars().count())
    }

    fn model_change_allowed(&self) -> bool {
        true
    }

    async fn get_model_list(&self) -> Result<Vec<String>, BackendError> {
        Ok(MODELS.iter().map(|m| m.to_string()).collect())
    }

    async fn load_model(&self, model: &str) -> Result<(), BackendError> {
        if !MODELS.contains(&model) {
            return Err(BackendError::ModelNotFound(model.to_string()));
        }
        match self.model.write() {
            Ok(mut current) => *current = model.to_string(),
            Err(e) => *e.into_inner() = model.to_string(),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustedchat_core::GenerationParams;

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.into(),
            params: GenerationParams::default(),
            eos_token: None,
            stopping_strings: Vec::new(),
            default_answer: String::new(),
            turn_template: String::new(),
        }
    }

    #[tokio::test]
    async fn like_and_dislike() {
        let backend = EchoBackend::new();
        assert_eq!(backend.get_answer(request("hi")).await.unwrap(), "😀 hi 👍");

        backend.load_model("dislike").await.unwrap();
        assert_eq!(backend.get_answer(request("hi")).await.unwrap(), "🙁 hi 👎");
    }

    #[tokio::test]
    async fn unknown_model_rejected() {
        let backend = EchoBackend::new();
        let err = backend.load_model("gpt").await.unwrap_err();
        assert!(matches!(err, BackendError::ModelNotFound(_)));
        assert_eq!(backend.model(), "like");
    }

    #[test]
    fn tokens_are_characters() {
        assert_eq!(EchoBackend::new().tokens_count("héllo").unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_honoured() {
        let backend = EchoBackend::new().with_delay(Duration::from_secs(2));
        let start = tokio::time::Instant::now();
        backend.get_answer(request("x")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
