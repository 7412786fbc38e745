//! Window context: the conversation scope every read and write is keyed by.
//!
//! A window id is derived once from launch parameters, sanitized to a safe
//! key alphabet, and then fixed for the session. Any component that receives
//! a window id from a caller resolves it through [`WindowContext::resolve`],
//! which fails if it does not name the session's window.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ScopeError;

/// Launch parameter names that carry the window id, in lookup order.
const WINDOW_PARAMS: [&str; 3] = ["window", "windowId", "win"];

/// Maximum sanitized length.
const MAX_WINDOW_LEN: usize = 64;

/// Window id used when launch parameters carry none.
pub const DEFAULT_WINDOW: &str = "default";

/// Namespace prefix for every persisted key.
pub const KEY_NAMESPACE: &str = "ringtale";

/// A sanitized conversation-scope identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(String);

impl WindowId {
    /// Sanitize raw input into a window id.
    ///
    /// Keeps ASCII alphanumerics, `-` and `_`; everything else is dropped.
    /// The result is truncated to 64 characters. Empty input yields
    /// [`DEFAULT_WINDOW`].
    pub fn sanitize(raw: &str) -> Self {
        let cleaned: String = raw
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .take(MAX_WINDOW_LEN)
            .collect();
        if cleaned.is_empty() {
            Self(DEFAULT_WINDOW.to_string())
        } else {
            Self(cleaned)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive a namespaced storage key for this window.
    pub fn scoped_key(&self, suffix: &str) -> String {
        format!("{KEY_NAMESPACE}:{}:{suffix}", self.0)
    }

    /// Recover the window id from a key built by [`WindowId::scoped_key`].
    pub fn from_scoped_key(key: &str, suffix: &str) -> Option<Self> {
        let rest = key.strip_prefix(KEY_NAMESPACE)?.strip_prefix(':')?;
        let id = rest.strip_suffix(suffix)?.strip_suffix(':')?;
        if id.is_empty() {
            return None;
        }
        Some(Self(id.to_string()))
    }
}

impl Default for WindowId {
    fn default() -> Self {
        Self(DEFAULT_WINDOW.to_string())
    }
}

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for WindowId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The session's window, derived once.
#[derive(Debug, Clone)]
pub struct WindowContext {
    window: WindowId,
}

impl WindowContext {
    /// Build a context from a raw window id.
    pub fn new(raw: &str) -> Self {
        Self {
            window: WindowId::sanitize(raw),
        }
    }

    /// Derive the window from a launch query string such as
    /// `window=win-a&theme=dark` (a leading `?` is accepted).
    pub fn from_launch_params(query: &str) -> Self {
        let query = query.trim().trim_start_matches('?');
        let pairs: Vec<(&str, &str)> = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .collect();

        let raw = WINDOW_PARAMS
            .iter()
            .find_map(|name| pairs.iter().find(|(k, _)| k == name).map(|(_, v)| *v))
            .unwrap_or("");

        let ctx = Self::new(&percent_decode(raw));
        debug!(window = %ctx.window, "Derived window from launch parameters");
        ctx
    }

    /// The session's window id.
    pub fn window(&self) -> &WindowId {
        &self.window
    }

    /// Resolve a caller-supplied window id against the session's.
    pub fn resolve(&self, candidate: &str) -> Result<WindowId, ScopeError> {
        let resolved = WindowId::sanitize(candidate);
        if resolved == self.window {
            Ok(resolved)
        } else {
            Err(ScopeError::WindowMismatch {
                expected: self.window.to_string(),
                actual: resolved.to_string(),
            })
        }
    }

    /// Namespaced key under the session's window.
    pub fn scoped_key(&self, suffix: &str) -> String {
        self.window.scoped_key(suffix)
    }
}

/// Minimal `%XX` decoding for launch parameters. Invalid escapes are kept
/// literally; sanitization drops them afterwards anyway.
fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
            if let Ok(b) = u8::from_str_radix(hex, 16) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(if bytes[i] == b'+' { b' ' } else { bytes[i] });
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
