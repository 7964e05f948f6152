use crate::application::ports::environment::RecordStore;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// 正規化済みエントリを保持するメモリキャッシュ
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    entries: Arc<RwLock<HashMap<String, Value>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn lookup(&self, key: &str) -> Option<Value> {
        self.entries.read().await.get(key).cloned()
    }

    async fn ingest(&self, key: &str, value: Value) {
        self.entries.write().await.insert(key.to_string(), value);
    }

    async fn evict(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }
}
