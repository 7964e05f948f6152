use crate::domain::entities::{FetchResponse, ResourceRequest};
use crate::shared::error::AppError;
use async_trait::async_trait;
use serde_json::Value;

/// 正規化されたメモリ上のレコードキャッシュ
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn lookup(&self, key: &str) -> Option<Value>;

    async fn ingest(&self, key: &str, value: Value);

    async fn evict(&self, key: &str);

    async fn keys(&self) -> Vec<String>;
}

/// キャッシュとネットワークをまとめた実行環境
#[async_trait]
pub trait Environment: Send + Sync {
    async fn dispatch_resource_request(
        &self,
        request: ResourceRequest,
    ) -> Result<FetchResponse, AppError>;

    /// レコードキーならフィールドエントリも含めて追い出す
    async fn evict(&self, key: &str) -> Result<(), AppError>;

    /// メモリにない場合は永続ストアから復元する。レコードは参照を展開して返す
    async fn store_lookup(&self, key: &str) -> Result<Option<Value>, AppError>;

    async fn store_ingest(&self, key: &str, value: Value) -> Result<(), AppError>;
}
