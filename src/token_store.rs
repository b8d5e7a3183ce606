//! Per-core registration token persistence.

use std::collections::HashMap;
use std::sync::Mutex;

/// Abstract key/value store for registration tokens, keyed by core id.
///
/// The connection only depends on this interface; hosts supply a
/// persistent implementation if they want tokens to survive restarts.
/// Empty core ids are rejected by every operation.
pub trait TokenStore: Send + Sync {
    /// Token remembered for `core_id`, if any.
    fn token(&self, core_id: &str) -> Option<String>;

    /// Remember `token` for `core_id`.
    fn save_token(&self, core_id: &str, token: &str);

    /// Forget the token for `core_id`.
    fn remove_token(&self, core_id: &str);

    /// Forget every token.
    fn remove_all(&self);
}

/// In-memory token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TokenStore for MemoryTokenStore {
    fn token(&self, core_id: &str) -> Option<String> {
        if core_id.is_empty() {
            return None;
        }
        self.map().get(core_id).cloned()
    }

    fn save_token(&self, core_id: &str, token: &str) {
        if core_id.is_empty() {
            return;
        }
        self.map().insert(core_id.to_string(), token.to_string());
    }

    fn remove_token(&self, core_id: &str) {
        if core_id.is_empty() {
            return;
        }
        self.map().remove(core_id);
    }

    fn remove_all(&self) {
        self.map().clear();
    }
}
