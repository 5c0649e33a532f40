//! # RustedChat Core
//!
//! Domain types, traits, and error definitions for the RustedChat
//! conversation engine. This crate has **no framework dependencies**: it
//! defines the session model and the collaborator interfaces (text backend,
//! chat transport, session storage) that every other crate implements or
//! consumes.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here. Implementations live in
//! their respective crates, which keeps the engine testable with scripted
//! stand-ins and lets a deployment pick its backend and transport from
//! configuration.

pub mod backend;
pub mod character;
pub mod error;
pub mod event;
pub mod mode;
pub mod params;
pub mod session;
pub mod storage;
pub mod transport;

// Re-export key types at crate root for ergonomics
pub use backend::{Backend, GenerationRequest};
pub use character::Character;
pub use error::{BackendError, ChannelError, Error, Result, StorageError};
pub use event::{DomainEvent, EventBus};
pub use mode::BotMode;
pub use params::GenerationParams;
pub use session::{ChatId, MessageId, Session, TurnInput};
pub use storage::SessionStore;
pub use transport::{ButtonCommand, DeliveryAction, InboundEvent, Transport};
