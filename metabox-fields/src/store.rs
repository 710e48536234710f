//! Persistence adapter for per-content meta values.
//!
//! The host owns storage. This crate reads and writes one JSON value per
//! `(content_id, meta_key)` through [`MetaStore`].

use dashmap::DashMap;
use serde_json::Value;

use crate::error::StoreError;

/// Key/value meta storage scoped by content id.
pub trait MetaStore: Send + Sync {
    fn get(&self, content_id: u64, key: &str) -> Option<Value>;

    fn set(&self, content_id: u64, key: &str, value: Value) -> Result<(), StoreError>;
}

/// In-process store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryMetaStore {
    values: DashMap<(u64, String), Value>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries across all content.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl MetaStore for MemoryMetaStore {
    fn get(&self, content_id: u64, key: &str) -> Option<Value> {
        self.values
            .get(&(content_id, key.to_string()))
            .map(|entry| entry.value().clone())
    }

    fn set(&self, content_id: u64, key: &str, value: Value) -> Result<(), StoreError> {
        self.values.insert((content_id, key.to_string()), value);
        Ok(())
    }
}
