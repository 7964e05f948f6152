use crate::domain::entities::{FetchResponse, ResourceRequest};
use crate::shared::error::AppError;
use async_trait::async_trait;

/// リモートとの通信口。`Err` は通信自体の失敗を表し、HTTPエラーは `Ok` で返す
#[async_trait]
pub trait NetworkAdapter: Send + Sync {
    async fn dispatch(&self, request: ResourceRequest) -> Result<FetchResponse, AppError>;
}
