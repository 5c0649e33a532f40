//! Text-generation backend implementations for RustedChat.
//!
//! All backends implement the `rustedchat_core::Backend` trait.
//! `build_from_config` resolves the configured one at startup.

pub mod echo;
pub mod openai_compat;
pub mod router;
pub mod token;
pub mod webui;

pub use echo::EchoBackend;
pub use openai_compat::OpenAiCompletionsBackend;
pub use router::build_from_config;
pub use webui::TextGenWebUiBackend;
