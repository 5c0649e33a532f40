//! Backend trait — the abstraction over text-generation services.
//!
//! A Backend turns a fully assembled prompt into a completion and can count
//! tokens for budget arithmetic. Implementations: text-generation-webui,
//! OpenAI-compatible completions, and a deterministic echo generator.
//!
//! The backend is modelled as one shared, non-reentrant resource. Callers
//! serialise access themselves; implementations do not need to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::params::GenerationParams;

/// Everything a backend needs to produce one completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The assembled prompt (context + example + greeting + history).
    pub prompt: String,

    /// Generation parameters, forwarded verbatim.
    pub params: GenerationParams,

    /// End-of-sequence token, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eos_token: Option<String>,

    /// Strings at which generation must stop.
    #[serde(default)]
    pub stopping_strings: Vec<String>,

    /// Text a backend may return when it cannot produce an answer.
    pub default_answer: String,

    /// Opaque instruction template.
    #[serde(default)]
    pub turn_template: String,
}

/// The core Backend trait.
///
/// Resolved once at startup from configuration; the engine never selects a
/// backend at runtime.
#[async_trait]
pub trait Backend: Send + Sync {
    /// A human-readable name for this backend.
    fn name(&self) -> &str;

    /// Generate a completion for `request.prompt`.
    async fn get_answer(&self, request: GenerationRequest) -> Result<String, BackendError>;

    /// Count tokens in `text` the way the backing model would.
    fn tokens_count(&self, text: &str) -> Result<usize, BackendError>;

    /// Whether the model can be swapped while the process runs.
    fn model_change_allowed(&self) -> bool {
        false
    }

    /// List models this backend can switch to.
    async fn get_model_list(&self) -> Result<Vec<String>, BackendError> {
        Ok(Vec::new())
    }

    /// Switch to another model.
    ///
    /// Default implementation reports the operation as unsupported.
    async fn load_model(&self, model: &str) -> Result<(), BackendError> {
        Err(BackendError::NotSupported {
            backend: self.name().to_string(),
            operation: format!("load_model({model})"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    #[async_trait]
    impl Backend for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn get_answer(&self, _request: GenerationRequest) -> Result<String, BackendError> {
            Ok("ok".into())
        }

        fn tokens_count(&self, text: &str) -> Result<usize, BackendError> {
            Ok(text.len())
        }
    }

    #[tokio::test]
    async fn optional_capabilities_default_to_unsupported() {
        let backend = Fixed;
        assert!(!backend.model_change_allowed());
        assert!(backend.get_model_list().await.unwrap().is_empty());
        let err = backend.load_model("other").await.unwrap_err();
        assert!(matches!(err, BackendError::NotSupported { .. }));
        assert!(err.to_string().contains("fixed"));
    }
}
