//! # RustedChat Engine
//!
//! The conversation core. Raw input flows through four stages:
//!
//! 1. [`command`] classifies a message as an immediate edit or a
//!    generation directive, using configurable prefix rules.
//! 2. [`history`] shapes the session log for the directive, leaving a stub
//!    for the backend to complete.
//! 3. [`assembler`] fits context, example, greeting and history into the
//!    token budget, newest turns first.
//! 4. [`invoker`] calls the backend under the process-wide generation lock
//!    and folds the answer back into the log.
//!
//! [`engine::ChatEngine`] builds the button-driven edit state machine
//! (continue, regenerate, next, impersonate, delete word, cutoff, reset)
//! on top of these and talks to the transport and session store.

pub mod assembler;
pub mod command;
pub mod engine;
pub mod error;
pub mod history;
pub mod invoker;
pub mod templates;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use assembler::{AssembledPrompt, AssemblyMetadata, PromptAssembler};
pub use command::{Classification, CommandInterpreter, Directive, ImmediateAction, Trigger};
pub use engine::ChatEngine;
pub use error::GenerationError;
pub use invoker::{
    EMPTY_ANSWER, GENERATION_FAIL, GENERATOR_BUSY, GenerationInvoker, GenerationOutcome,
    ReplyAction,
};
pub use templates::{MessageTemplates, UNKNOWN_TEMPLATE};
