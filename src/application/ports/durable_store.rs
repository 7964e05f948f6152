use crate::shared::error::AppError;
use crate::shared::listeners::{Listener, Subscription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DurableStoreExpiration {
    pub fresh: i64,
    pub stale: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DurableStoreEntry {
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DurableStoreExpiration>,
}

impl DurableStoreEntry {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            expiration: None,
        }
    }
}

pub type DurableStoreEntries = HashMap<String, DurableStoreEntry>;

#[derive(Debug, Clone, PartialEq)]
pub enum DurableStoreOperation {
    SetEntries {
        segment: String,
        entries: DurableStoreEntries,
    },
    EvictEntries {
        segment: String,
        ids: Vec<String>,
    },
}

impl DurableStoreOperation {
    pub fn segment(&self) -> &str {
        match self {
            DurableStoreOperation::SetEntries { segment, .. }
            | DurableStoreOperation::EvictEntries { segment, .. } => segment,
        }
    }

    /// この操作で発行される変更通知
    pub fn to_change(&self) -> DurableStoreChange {
        match self {
            DurableStoreOperation::SetEntries { segment, entries } => DurableStoreChange {
                ids: entries.keys().cloned().collect(),
                segment: segment.clone(),
                change_type: DurableStoreChangeType::SetEntries,
                is_external_change: false,
            },
            DurableStoreOperation::EvictEntries { segment, ids } => DurableStoreChange {
                ids: ids.clone(),
                segment: segment.clone(),
                change_type: DurableStoreChangeType::EvictEntries,
                is_external_change: false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurableStoreChangeType {
    SetEntries,
    EvictEntries,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DurableStoreChange {
    pub ids: Vec<String>,
    pub segment: String,
    pub change_type: DurableStoreChangeType,
    /// 呼び出し元以外（別セグメントからの再発行など）に起因する変更
    pub is_external_change: bool,
}

pub type DurableStoreChangeListener = Listener<Vec<DurableStoreChange>>;

/// セグメント分割されたキー・バリュー永続ストア
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// 見つかったキーのみを返す。1件もなければ `None`
    async fn get_entries(
        &self,
        ids: &[String],
        segment: &str,
    ) -> Result<Option<DurableStoreEntries>, AppError>;

    async fn get_all_entries(&self, segment: &str)
        -> Result<Option<DurableStoreEntries>, AppError>;

    async fn set_entries(&self, entries: DurableStoreEntries, segment: &str)
        -> Result<(), AppError>;

    async fn evict_entries(&self, ids: &[String], segment: &str) -> Result<(), AppError>;

    /// バックエンド単位で不可分に適用する
    async fn batch_operations(&self, operations: Vec<DurableStoreOperation>)
        -> Result<(), AppError>;

    fn register_on_changed_listener(&self, listener: DurableStoreChangeListener) -> Subscription;
}
