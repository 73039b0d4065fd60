use std::collections::HashMap;

/// In-memory key/value storage owned by the node. Writes always overwrite;
/// there is no TTL and no delete in the current contract. Conflicting writes
/// arriving from different peers resolve last-write-wins at each node.
#[derive(Debug, Default)]
pub struct DataStore {
    entries: HashMap<String, String>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: String, value: String) {
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    /// Bulk insert from a replication push or a join-time sync.
    pub fn merge(&mut self, entries: HashMap<String, String>) {
        self.entries.extend(entries);
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
