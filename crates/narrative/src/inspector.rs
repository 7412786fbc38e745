//! Window-scoped memory inspection and manual edits.

use ringtale_core::error::ScopeError;
use ringtale_core::window::WindowContext;
use ringtale_memory::{WindowMemoryState, WindowMemoryStore};
use std::sync::Arc;
use tracing::info;

/// Read and edit memory tiers of the session's window. Every call names a
/// window id, which must resolve to the session's own.
pub struct MemoryInspector {
    window: WindowContext,
    memory: Arc<WindowMemoryStore>,
}

impl MemoryInspector {
    pub fn new(window: WindowContext, memory: Arc<WindowMemoryStore>) -> Self {
        Self { window, memory }
    }

    pub fn snapshot(&self, window_id: &str) -> Result<WindowMemoryState, ScopeError> {
        let w = self.window.resolve(window_id)?;
        Ok(self.memory.snapshot(&w))
    }

    pub fn stm(&self, window_id: &str) -> Result<String, ScopeError> {
        let w = self.window.resolve(window_id)?;
        Ok(self.memory.stm(&w))
    }

    pub fn set_stm(&self, window_id: &str, text: &str) -> Result<(), ScopeError> {
        let w = self.window.resolve(window_id)?;
        self.memory.set_stm(&w, text);
        info!(window = %w, "STM edited");
        Ok(())
    }

    pub fn ltm(&self, window_id: &str) -> Result<String, ScopeError> {
        let w = self.window.resolve(window_id)?;
        Ok(self.memory.ltm(&w))
    }

    pub fn set_ltm(&self, window_id: &str, text: &str) -> Result<(), ScopeError> {
        let w = self.window.resolve(window_id)?;
        self.memory.set_ltm(&w, text);
        info!(window = %w, "LTM edited");
        Ok(())
    }

    pub fn persona(&self, window_id: &str) -> Result<String, ScopeError> {
        let w = self.window.resolve(window_id)?;
        Ok(self.memory.persona(&w))
    }

    pub fn set_persona(&self, window_id: &str, text: &str) -> Result<(), ScopeError> {
        let w = self.window.resolve(window_id)?;
        self.memory.set_persona(&w, text);
        info!(window = %w, "Persona memory edited");
        Ok(())
    }

    pub fn raw_cache_limit(&self, window_id: &str) -> Result<usize, ScopeError> {
        let w = self.window.resolve(window_id)?;
        Ok(self.memory.raw_cache_limit(&w))
    }

    /// Returns the limit actually applied after clamping to 1..=20.
    pub fn set_raw_cache_limit(&self, window_id: &str, limit: usize) -> Result<usize, ScopeError> {
        let w = self.window.resolve(window_id)?;
        Ok(self.memory.set_raw_cache_limit(&w, limit))
    }

    pub fn reset(&self, window_id: &str) -> Result<(), ScopeError> {
        let w = self.window.resolve(window_id)?;
        self.memory.reset(&w);
        info!(window = %w, "Window memory reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringtale_memory::InMemoryStore;

    fn inspector() -> MemoryInspector {
        MemoryInspector::new(
            WindowContext::new("win-a"),
            Arc::new(WindowMemoryStore::new(Arc::new(InMemoryStore::new()))),
        )
    }

    #[test]
    fn edits_are_window_scoped() {
        let i = inspector();
        i.set_stm("win-a", "短期").unwrap();
        i.set_ltm("win-a", "长期").unwrap();
        assert_eq!(i.stm("win-a").unwrap(), "短期");
        assert!(i.snapshot("win-a").unwrap().has_ltm);
        assert!(matches!(
            i.set_stm("win-b", "x"),
            Err(ScopeError::WindowMismatch { .. })
        ));
    }

    #[test]
    fn raw_limit_is_clamped() {
        let i = inspector();
        assert_eq!(i.set_raw_cache_limit("win-a", 50).unwrap(), 20);
        assert_eq!(i.set_raw_cache_limit("win-a", 0).unwrap(), 1);
        assert_eq!(i.raw_cache_limit("win-a").unwrap(), 1);
    }
}
