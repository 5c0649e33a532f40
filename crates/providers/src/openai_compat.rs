//! OpenAI-compatible completions backend.
//!
//! Works with any server exposing the legacy `/v1/completions` endpoint
//! (vLLM, llama.cpp server, Ollama, text-generation-webui's OpenAI
//! extension). The prompt is sent as raw text; chat formatting is already
//! done by the prompt assembler.

use async_trait::async_trait;
use rustedchat_core::backend::{Backend, GenerationRequest};
use rustedchat_core::error::BackendError;
use serde::Deserialize;
use std::sync::RwLock;
use tracing::{debug, warn};

use crate::token::estimate_tokens;

pub struct OpenAiCompletionsBackend {
    base_url: String,
    api_key: String,
    model: RwLock<String>,
    client: reqwest::Client,
}

impl OpenAiCompletionsBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: RwLock::new(model.into()),
            client,
        })
    }

    /// The model requests are currently sent to.
    pub fn model(&self) -> String {
        self.model
            .read()
            .map(|m| m.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    fn build_body(&self, request: &GenerationRequest) -> serde_json::Value {
        let p = &request.params;
        let mut body = serde_json::json!({
            "model": self.model(),
            "prompt": request.prompt,
            "max_tokens": p.sampling_i64("max_new_tokens", 250),
            "temperature": p.sampling_f64("temperature", 0.7),
            "top_p": p.sampling_f64("top_p", 0.1),
            "stream": false,
        });

        if !request.stopping_strings.is_empty() {
            body["stop"] = serde_json::json!(request.stopping_strings);
        }

        body
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.header("Authorization", format!("Bearer {}", self.api_key))
        }
    }
}

#[async_trait]
impl Backend for OpenAiCompletionsBackend {
    fn name(&self) -> &str {
        "openai-completions"
    }

    async fn get_answer(&self, request: GenerationRequest) -> Result<String, BackendError> {
        let url = format!("{}/completions", self.base_url);
        let body = self.build_body(&request);

        debug!(model = %body["model"], "Sending completion request");

        let response = self
            .authorized(self.client.post(&url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout(e.to_string())
                } else {
                    BackendError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Backend returned error");
            return Err(BackendError::Api {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: CompletionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.text)
            .ok_or_else(|| BackendError::InvalidResponse("No choices in response".into()))
    }

    fn tokens_count(&self, text: &str) -> Result<usize, BackendError> {
        Ok(estimate_tokens(text))
    }

    fn model_change_allowed(&self) -> bool {
        true
    }

    async fn get_model_list(&self) -> Result<Vec<String>, BackendError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Ok(Vec::new());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        Ok(model_ids(&body))
    }

    async fn load_model(&self, model: &str) -> Result<(), BackendError> {
        let known = self.get_model_list().await?;
        if !known.is_empty() && !known.iter().any(|m| m == model) {
            return Err(BackendError::ModelNotFound(model.to_string()));
        }
        match self.model.write() {
            Ok(mut current) => *current = model.to_string(),
            Err(e) => *e.into_inner() = model.to_string(),
        }
        Ok(())
    }
}

fn model_ids(body: &serde_json::Value) -> Vec<String> {
    body["data"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|m| m["id"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustedchat_core::GenerationParams;
    use std::time::Duration;

    fn backend() -> OpenAiCompletionsBackend {
        OpenAiCompletionsBackend::new(
            "http://localhost:8000/v1/",
            "",
            "llama-3-8b",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn body_carries_model_prompt_and_stops() {
        let request = GenerationRequest {
            prompt: "Bot:".into(),
            params: GenerationParams::default(),
            eos_token: None,
            stopping_strings: vec!["\nYou:".into()],
            default_answer: String::new(),
            turn_template: String::new(),
        };
        let body = backend().build_body(&request);
        assert_eq!(body["model"], "llama-3-8b");
        assert_eq!(body["prompt"], "Bot:");
        assert_eq!(body["max_tokens"], 250);
        assert_eq!(body["stop"][0], "\nYou:");
    }

    #[test]
    fn stop_omitted_when_empty() {
        let request = GenerationRequest {
            prompt: "x".into(),
            params: GenerationParams::default(),
            eos_token: None,
            stopping_strings: Vec::new(),
            default_answer: String::new(),
            turn_template: String::new(),
        };
        assert!(backend().build_body(&request).get("stop").is_none());
    }

    #[test]
    fn completion_response_parses() {
        let json = r#"{"id":"cmpl-1","choices":[{"text":" Hello!","index":0}]}"#;
        let resp: CompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.choices[0].text, " Hello!");
    }

    #[test]
    fn model_list_extracts_ids() {
        let body = serde_json::json!({ "data": [{ "id": "a" }, { "id": "b" }, {}] });
        assert_eq!(model_ids(&body), vec!["a", "b"]);
        assert!(model_ids(&serde_json::json!({})).is_empty());
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        assert_eq!(backend().base_url, "http://localhost:8000/v1");
        assert!(backend().model_change_allowed());
    }
}
