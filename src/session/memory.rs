use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::{KeyValueStore, SessionError};

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), SessionError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn apply_batch(&self, set: &[(&str, String)], remove: &[&str]) -> Result<(), SessionError> {
        let mut map = self.entries.lock();
        for (key, value) in set {
            map.insert(key.to_string(), value.clone());
        }
        for key in remove {
            map.remove(*key);
        }
        Ok(())
    }
}
