//! text-generation-webui backend.
//!
//! Talks to the legacy blocking chat API (`POST /api/v1/chat`) in instruct
//! mode, sending the fully assembled prompt as `user_input` with an empty
//! server-side history.

use async_trait::async_trait;
use rustedchat_core::backend::{Backend, GenerationRequest};
use rustedchat_core::error::BackendError;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::token::estimate_tokens;

const CHAT_PATH: &str = "/api/v1/chat";

pub struct TextGenWebUiBackend {
    url: String,
    n_ctx: usize,
    client: reqwest::Client,
}

impl TextGenWebUiBackend {
    /// Create a backend for `url`.
    ///
    /// A bare server address gets the chat endpoint path appended.
    pub fn new(
        url: impl Into<String>,
        n_ctx: usize,
        timeout: std::time::Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            url: chat_endpoint(&url.into()),
            n_ctx,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Build the request body. Sampling values missing from the request
    /// fall back to the server's historical defaults.
    fn build_body(&self, request: &GenerationRequest) -> Value {
        let p = &request.params;
        json!({
            "user_input": request.prompt,
            "max_new_tokens": p.sampling_i64("max_new_tokens", 250),
            "history": { "internal": [], "visible": [] },
            "mode": "instruct",
            "character": "Example",
            "your_name": "You",
            "regenerate": false,
            "_continue": false,
            "stop_at_newline": false,
            "chat_generation_attempts": 1,
            "preset": "None",
            "do_sample": true,
            "temperature": p.sampling_f64("temperature", 0.7),
            "top_p": p.sampling_f64("top_p", 0.1),
            "typical_p": p.sampling_f64("typical_p", 1.0),
            "epsilon_cutoff": p.sampling_f64("epsilon_cutoff", 0.0),
            "eta_cutoff": p.sampling_f64("eta_cutoff", 0.0),
            "tfs": p.sampling_f64("tfs", 1.0),
            "top_a": p.sampling_f64("top_a", 0.0),
            "repetition_penalty": p.sampling_f64("repetition_penalty", 1.18),
            "repetition_penalty_range": 0,
            "top_k": p.sampling_i64("top_k", 40),
            "min_length": 0,
            "no_repeat_ngram_size": 0,
            "num_beams": 1,
            "penalty_alpha": 0,
            "length_penalty": 1,
            "early_stopping": false,
            "mirostat_mode": 0,
            "mirostat_tau": 5,
            "mirostat_eta": 0.1,
            "seed": p.sampling_i64("seed", -1),
            "add_bos_token": true,
            "truncation_length": self.n_ctx,
            "ban_eos_token": false,
            "skip_special_tokens": true,
            "stopping_strings": request.stopping_strings,
        })
    }
}

fn chat_endpoint(url: &str) -> String {
    let url = url.trim_end_matches('/');
    if url.ends_with(CHAT_PATH) {
        url.to_string()
    } else {
        format!("{url}{CHAT_PATH}")
    }
}

/// Pull the bot's reply out of `results[0].history.visible[-1][1]`.
fn parse_reply(body: &Value) -> Result<String, BackendError> {
    body["results"][0]["history"]["visible"]
        .as_array()
        .and_then(|visible| visible.last())
        .and_then(|pair| pair[1].as_str())
        .map(String::from)
        .ok_or_else(|| BackendError::InvalidResponse("no visible history in reply".into()))
}

#[async_trait]
impl Backend for TextGenWebUiBackend {
    fn name(&self) -> &str {
        "text-generation-webui"
    }

    async fn get_answer(&self, request: GenerationRequest) -> Result<String, BackendError> {
        let body = self.build_body(&request);
        debug!(url = %self.url, prompt_chars = request.prompt.len(), "Sending chat request");

        let response = self
            .client
            .post(&self.url)
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

        let body: Value = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        parse_reply(&body)
    }

    fn tokens_count(&self, text: &str) -> Result<usize, BackendError> {
        Ok(estimate_tokens(text))
    }
}
