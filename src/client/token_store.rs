//! Device-local key/value sidecar.
//!
//! The browser build backs this with localStorage; here it is a trait so
//! controllers can persist the device token and the last-known corners
//! without caring where they land.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::warn;

use crate::domain::{CornerSet, MesaId};

const CORNERS_KEY: &str = "mapper_corners";

/// Persistent string store scoped to one device.
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Storage key for the device token: `device_token` for the generic flow,
/// `device_token_{mesa}` when the session is pinned to a mesa.
pub fn token_key(mesa: Option<MesaId>) -> String {
    match mesa {
        Some(mesa) => format!("device_token_{mesa}"),
        None => "device_token".to_owned(),
    }
}

/// Cache the last applied corners as a fallback for server-less starts.
pub fn save_corners(store: &dyn TokenStore, corners: &CornerSet) {
    match serde_json::to_string(corners) {
        Ok(json) => store.set(CORNERS_KEY, &json),
        Err(error) => warn!(error = %error, "failed to encode corner cache"),
    }
}

pub fn load_corners(store: &dyn TokenStore) -> Option<CornerSet> {
    let json = store.get(CORNERS_KEY)?;
    match serde_json::from_str(&json) {
        Ok(corners) => Some(corners),
        Err(error) => {
            warn!(error = %error, "discarding corrupt corner cache");
            store.remove(CORNERS_KEY);
            None
        }
    }
}

/// In-memory store used by tests and headless runs.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_owned(), value.to_owned());
    }

    fn remove(&self, key: &str) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_keys_are_scoped_per_mesa() {
        assert_eq!(token_key(None), "device_token");
        assert_eq!(token_key(Some(MesaId(42))), "device_token_42");
    }

    #[test]
    fn corner_cache_round_trips() {
        let store = MemoryTokenStore::new();
        let corners = CornerSet::full_viewport(1920.0, 1080.0);
        save_corners(&store, &corners);
        assert_eq!(load_corners(&store), Some(corners));
    }

    #[test]
    fn corrupt_corner_cache_is_discarded() {
        let store = MemoryTokenStore::new();
        store.set(CORNERS_KEY, "not json");
        assert_eq!(load_corners(&store), None);
        assert_eq!(store.get(CORNERS_KEY), None);
    }
}
