//! # Ringtale Core
//!
//! Domain types, traits, and error definitions for the Ringtale narrative
//! pipeline. Every other crate in the workspace depends inward on this one.
//!
//! ## Design Philosophy
//!
//! Collaborators the pipeline consumes (backends, world state, the card
//! store, the persisted key-value store) are defined as traits here.
//! Implementations live in their respective crates, which keeps:
//! - backends swappable via configuration
//! - tests free to use scripted stand-ins
//! - the dependency graph pointing inward

pub mod character;
pub mod error;
pub mod event;
pub mod language;
pub mod markers;
pub mod memory;
pub mod message;
pub mod provider;
pub mod window;
pub mod world;

// Re-export key types at crate root for ergonomics
pub use character::{Card, CharacterStore, Gender};
pub use error::{Error, MemoryError, ProviderError, Result, ScopeError};
pub use event::{DomainEvent, EventBus};
pub use language::Language;
pub use memory::KeyValueStore;
pub use message::{Message, Role};
pub use provider::{
    Channel, PromptInput, Provider, ProviderRequest, ProviderResponse, RequestStamp, RouteOverrides,
    TurnRole,
};
pub use window::{WindowContext, WindowId};
pub use world::{MomentRef, WorldState};
