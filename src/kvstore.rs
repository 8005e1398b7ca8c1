use crate::message::LogEntry;
use std::collections::HashMap;

/// The key/value map produced solely by applying committed entries in
/// ascending index order. Deterministic given the log prefix.
#[derive(Debug, Default)]
pub struct KVStore {
    map: HashMap<String, String>,
}

impl KVStore {
    pub fn new() -> Self {
        KVStore { map: HashMap::new() }
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.map.get(key)
    }

    pub fn apply(&mut self, entry: &LogEntry) {
        self.map.insert(entry.key.clone(), entry.value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_is_last_write_wins_in_index_order() {
        let mut kv = KVStore::new();
        kv.apply(&LogEntry { term: 1, key: "k".into(), value: "v1".into(), mid: "1".into(), src: "c".into() });
        kv.apply(&LogEntry { term: 1, key: "k".into(), value: "v2".into(), mid: "2".into(), src: "c".into() });
        assert_eq!(kv.get("k"), Some(&"v2".to_string()));
    }
}
