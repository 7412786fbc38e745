//! Key-value store trait: the persisted state shared by every window.
//!
//! All memory, override and binding records live in one store. Keys are
//! namespaced by window (see [`crate::window::WindowId::scoped_key`]) so one
//! window can never overwrite another's records.
//!
//! Writes are synchronous and run to completion: callers never hold a
//! store borrow across an `.await`.

use crate::error::MemoryError;

/// The core KeyValueStore trait.
///
/// Implementations: JSON file, in-memory (for testing).
pub trait KeyValueStore: Send + Sync {
    /// The backend name (e.g., "file", "memory").
    fn name(&self) -> &str;

    /// Read a value.
    fn get(&self, key: &str) -> Result<Option<String>, MemoryError>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> Result<(), MemoryError>;

    /// Remove a value. Returns `true` if it existed.
    fn remove(&self, key: &str) -> Result<bool, MemoryError>;

    /// All keys starting with `prefix`, sorted.
    fn keys(&self, prefix: &str) -> Result<Vec<String>, MemoryError>;
}
