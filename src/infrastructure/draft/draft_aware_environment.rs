use super::DraftAwareDurableStore;
use crate::application::ports::environment::Environment;
use crate::application::services::draft_queue::DurableDraftQueue;
use crate::domain::entities::{FetchResponse, ResourceRequest};
use crate::domain::value_objects::draft::keys::{generate_draft_id, record_key_from_id};
use crate::domain::value_objects::{DraftTag, HttpMethod};
use crate::shared::error::AppError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// レコードのCUDリクエストをドラフトキューへ振り向ける実行環境
pub struct DraftAwareEnvironment {
    inner: Arc<dyn Environment>,
    queue: Arc<DurableDraftQueue>,
    durable_store: Arc<DraftAwareDurableStore>,
    records_path: String,
}

impl DraftAwareEnvironment {
    pub fn new(
        inner: Arc<dyn Environment>,
        queue: Arc<DurableDraftQueue>,
        durable_store: Arc<DraftAwareDurableStore>,
        records_path: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            queue,
            durable_store,
            records_path: records_path.into(),
        }
    }

    fn record_mutation(&self, request: &ResourceRequest) -> Option<HttpMethod> {
        if !request.base_path.contains(&self.records_path) {
            return None;
        }
        match request.http_method() {
            Ok(method @ (HttpMethod::Post | HttpMethod::Patch | HttpMethod::Delete)) => Some(method),
            _ => None,
        }
    }

    async fn revive_with_drafts(&self, key: &str) -> Result<Option<Value>, AppError> {
        self.inner.evict(key).await?;
        self.inner.store_lookup(key).await
    }

    async fn create(&self, request: ResourceRequest) -> Result<FetchResponse, AppError> {
        let draft_id = generate_draft_id();
        let key = record_key_from_id(&draft_id);
        let tag = DraftTag::new(key.clone()).map_err(AppError::InvalidInput)?;
        let action = self.queue.enqueue(request, tag, draft_id.clone()).await?;
        info!(action_id = %action.id, draft_id = %draft_id, "record create queued as draft");

        let record = self
            .revive_with_drafts(&key)
            .await?
            .ok_or_else(|| AppError::Internal(format!("draft record {draft_id} was not revived")))?;
        Ok(FetchResponse::new(201, record))
    }

    async fn update_or_delete(
        &self,
        mut request: ResourceRequest,
        method: HttpMethod,
    ) -> Result<FetchResponse, AppError> {
        let requested_id = request.record_id(&self.records_path).ok_or_else(|| {
            AppError::InvalidInput(format!(
                "{} on {} does not address a record",
                method.as_str(),
                request.base_path
            ))
        })?;
        let record_id = match self.durable_store.canonical_id(&requested_id) {
            Some(canonical) => {
                debug!(from = %requested_id, to = %canonical, "redirecting request to canonical id");
                request.redirect_record_id(&requested_id, &canonical);
                canonical
            }
            None => requested_id,
        };
        let key = record_key_from_id(&record_id);

        // キャッシュにもドラフトにも無いレコードは変更できない
        if self.inner.store_lookup(&key).await?.is_none() {
            return Err(AppError::ValidationError(format!(
                "cannot {} record {record_id}: it is not available offline",
                method.as_str()
            )));
        }

        let tag = DraftTag::new(key.clone()).map_err(AppError::InvalidInput)?;
        let action = self.queue.enqueue(request, tag, record_id.clone()).await?;
        info!(
            action_id = %action.id,
            record_id = %record_id,
            method = method.as_str(),
            "record change queued as draft"
        );

        let record = self.revive_with_drafts(&key).await?;
        if method == HttpMethod::Delete {
            return Ok(FetchResponse::new(204, Value::Null));
        }
        let record = record
            .ok_or_else(|| AppError::Internal(format!("record {record_id} was not revived")))?;
        Ok(FetchResponse::new(200, record))
    }
}

#[async_trait]
impl Environment for DraftAwareEnvironment {
    async fn dispatch_resource_request(
        &self,
        request: ResourceRequest,
    ) -> Result<FetchResponse, AppError> {
        match self.record_mutation(&request) {
            Some(HttpMethod::Post) => self.create(request).await,
            Some(method) => self.update_or_delete(request, method).await,
            None => self.inner.dispatch_resource_request(request).await,
        }
    }

    async fn evict(&self, key: &str) -> Result<(), AppError> {
        self.inner.evict(key).await
    }

    async fn store_lookup(&self, key: &str) -> Result<Option<Value>, AppError> {
        let key = self.durable_store.redirect_key(key);
        self.inner.store_lookup(&key).await
    }

    async fn store_ingest(&self, key: &str, value: Value) -> Result<(), AppError> {
        self.inner.store_ingest(key, value).await
    }
}
