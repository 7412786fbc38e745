//! World state: the simulated phone the story plays out on.
//!
//! The pipeline only reads it: the world driver lists and checks
//! side-effect targets, and memory consolidation pulls recent user turns
//! from the story log.

use serde::{Deserialize, Serialize};

use crate::window::WindowId;

/// A social post as seen by the world driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MomentRef {
    pub id: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub deleted: bool,
}

/// Read access to chats, moments and the story log of each window.
pub trait WorldState: Send + Sync {
    /// Whether a message thread exists in the window.
    fn thread_exists(&self, window: &WindowId, thread_id: &str) -> bool;

    /// Ids of the window's message threads, sorted.
    fn threads(&self, window: &WindowId) -> Vec<String>;

    /// Look up a moment by id.
    fn moment(&self, window: &WindowId, moment_id: &str) -> Option<MomentRef>;

    /// Moments of the window that have not been deleted, sorted by id.
    fn live_moments(&self, window: &WindowId) -> Vec<MomentRef>;

    /// The last `limit` user inputs from the story log, oldest first.
    fn recent_user_inputs(&self, window: &WindowId, limit: usize) -> Vec<String>;

    /// Append a completed turn to the story log.
    fn record_turn(&self, window: &WindowId, user_input: &str, reply: &str);
}
