use std::collections::HashMap;
use std::sync::Mutex;

/// A value held in process memory, along with the file extension it was persisted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct MemoryEntry {
    pub value: String,
    pub extension: String,
}

/// The in-memory tier.
///
/// Entries carry no timestamp of their own, they stay until they are removed explicitly or by
/// a scheduled removal. When disabled, the tier never holds anything.
#[derive(Debug)]
pub(super) struct MemoryTier {
    enabled: bool,
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryTier {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: Default::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap();
        entries.get(key).map(|entry| entry.value.clone())
    }

    /// The extension `key` was persisted under, if it is held in memory.
    pub fn extension(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap();
        entries.get(key).map(|entry| entry.extension.clone())
    }

    pub fn insert(&self, key: &str, value: &str, extension: &str) {
        if !self.enabled {
            return;
        }
        let entry = MemoryEntry {
            value: value.to_owned(),
            extension: extension.to_owned(),
        };
        self.entries.lock().unwrap().insert(key.to_owned(), entry);
    }

    pub fn remove(&self, key: &str) -> Option<MemoryEntry> {
        self.entries.lock().unwrap().remove(key)
    }

    /// A snapshot of all keys.
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}
