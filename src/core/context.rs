use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Mutable, keyed bag of values persisted alongside a step's progress.
///
/// The execution loop records its chunk boundaries here after every commit,
/// and registered [`ItemStream`](crate::core::item::ItemStream)s record and
/// restore their own positions, so that a restarted execution can resume at
/// the last committed chunk.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ExecutionContext {
    entries: BTreeMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: &str, value: Value) {
        self.entries.insert(key.to_string(), value);
    }

    pub fn put_usize(&mut self, key: &str, value: usize) {
        self.entries.insert(key.to_string(), Value::from(value));
    }

    pub fn put_string(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), Value::from(value));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.entries
            .get(key)
            .and_then(Value::as_u64)
            .map(|v| v as usize)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
