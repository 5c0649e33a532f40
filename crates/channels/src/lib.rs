//! Chat transport implementations for RustedChat.
//!
//! Each transport connects to a chat surface and relays messages and
//! button presses to/from the engine.
//!
//! Available transports:
//! - **CLI** — Interactive terminal chat (stdin/stdout), slash commands as buttons
//! - **InMemory** — Scripted transport that records deliveries (tests, embedding)

pub mod cli;
pub mod in_memory;

pub use cli::{CLI_CHAT_ID, CliTransport};
pub use in_memory::{Delivery, InMemoryTransport};
