//! Backend adapters for Ringtale.
//!
//! All providers implement the `ringtale_core::Provider` trait. Adapters are
//! chosen by declared kind (`local`, `openai`, `anthropic`); the router maps
//! each turn role to one of them.

pub mod anthropic;
pub mod local;
pub mod openai_compat;
pub mod router;

pub use anthropic::AnthropicProvider;
pub use local::LocalProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{ProviderRouter, ResolvedRoute, build_from_config};
