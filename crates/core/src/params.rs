//! Generation parameters passed through to the backend.

use serde::{Deserialize, Serialize};

/// Parameters for a single generation.
///
/// Only `truncation_length`, `eos_token` and `stopping_strings` are read by
/// the engine. Every other key (temperature, top_p, top_k,
/// repetition_penalty, ...) lands in `sampling` and is forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Token budget for the assembled prompt.
    #[serde(default = "default_truncation_length")]
    pub truncation_length: usize,

    /// End-of-sequence token, if the backend needs one spelled out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eos_token: Option<String>,

    /// Base stopping strings; chat modes add speaker names on top.
    #[serde(default)]
    pub stopping_strings: Vec<String>,

    /// Opaque sampling parameters.
    #[serde(flatten)]
    pub sampling: serde_json::Map<String, serde_json::Value>,
}

fn default_truncation_length() -> usize {
    2048
}

impl GenerationParams {
    /// Read a numeric sampling parameter, falling back to `default`.
    pub fn sampling_f64(&self, key: &str, default: f64) -> f64 {
        self.sampling
            .get(key)
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(default)
    }

    /// Read an integer sampling parameter, falling back to `default`.
    pub fn sampling_i64(&self, key: &str, default: i64) -> i64 {
        self.sampling
            .get(key)
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(default)
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        let mut sampling = serde_json::Map::new();
        sampling.insert("max_new_tokens".into(), serde_json::json!(250));
        sampling.insert("temperature".into(), serde_json::json!(0.7));
        sampling.insert("top_p".into(), serde_json::json!(0.1));
        sampling.insert("top_k".into(), serde_json::json!(40));
        sampling.insert("repetition_penalty".into(), serde_json::json!(1.18));
        Self {
            truncation_length: default_truncation_length(),
            eos_token: None,
            stopping_strings: Vec::new(),
            sampling,
        }
    }
}
