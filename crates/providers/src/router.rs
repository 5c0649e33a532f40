//! Backend resolution — turns the configured backend kind into a concrete
//! implementation once, at startup.

use std::sync::Arc;
use std::time::Duration;

use rustedchat_config::{AppConfig, BackendKind};
use rustedchat_core::backend::Backend;
use rustedchat_core::error::BackendError;
use tracing::info;

use crate::echo::EchoBackend;
use crate::openai_compat::OpenAiCompletionsBackend;
use crate::webui::TextGenWebUiBackend;

/// Build the configured backend.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Backend>, BackendError> {
    let backend_config = &config.backend;
    let timeout = Duration::from_secs(backend_config.request_timeout_secs);

    let backend: Arc<dyn Backend> = match backend_config.kind {
        BackendKind::TextGenerationWebui => Arc::new(TextGenWebUiBackend::new(
            &backend_config.url,
            backend_config.n_ctx,
            timeout,
        )?),
        BackendKind::OpenaiCompletions => Arc::new(OpenAiCompletionsBackend::new(
            &backend_config.url,
            backend_config.api_key.clone().unwrap_or_default(),
            backend_config.model.clone().unwrap_or_default(),
            timeout,
        )?),
        BackendKind::Echo => match &backend_config.model {
            Some(model) => Arc::new(EchoBackend::new().with_model(model)?),
            None => Arc::new(EchoBackend::new()),
        },
    };

    info!(backend = backend.name(), url = %backend_config.url, "Backend resolved");
    Ok(backend)
}
