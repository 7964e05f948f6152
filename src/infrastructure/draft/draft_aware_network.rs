use super::retrievers::ResponseRecordRetriever;
use crate::application::ports::network::NetworkAdapter;
use crate::application::services::draft_queue::DurableDraftQueue;
use crate::domain::entities::{FetchResponse, RecordRepresentation, ResourceRequest};
use crate::domain::overlay::replay_drafts_on_record;
use crate::domain::value_objects::{DraftTag, HttpMethod};
use crate::shared::error::AppError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// 取得レスポンスに含まれるレコードへ、キャッシュ層に届く前にドラフトを重ねる
pub struct DraftAwareNetworkAdapter {
    inner: Arc<dyn NetworkAdapter>,
    queue: Arc<DurableDraftQueue>,
    retrievers: Vec<Arc<dyn ResponseRecordRetriever>>,
    strict_mode: bool,
    current_user_id: String,
}

impl DraftAwareNetworkAdapter {
    pub fn new(
        inner: Arc<dyn NetworkAdapter>,
        queue: Arc<DurableDraftQueue>,
        retrievers: Vec<Arc<dyn ResponseRecordRetriever>>,
        strict_mode: bool,
        current_user_id: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            queue,
            retrievers,
            strict_mode,
            current_user_id: current_user_id.into(),
        }
    }

    fn skip_or_fail(&self, pointer: &str, error: AppError) -> Result<(), AppError> {
        if self.strict_mode {
            return Err(error);
        }
        warn!(pointer = %pointer, error = %error, "leaving response record without drafts");
        Ok(())
    }

    async fn overlay_drafts(&self, body: &mut Value) -> Result<(), AppError> {
        let mut pointers: Vec<String> = Vec::new();
        for retriever in &self.retrievers {
            for pointer in retriever.record_pointers(body) {
                if !pointers.contains(&pointer) {
                    debug!(retriever = retriever.name(), pointer = %pointer, "record found in response");
                    pointers.push(pointer);
                }
            }
        }
        if pointers.is_empty() {
            return Ok(());
        }

        let mut records: Vec<(String, RecordRepresentation)> = Vec::with_capacity(pointers.len());
        for pointer in pointers {
            let Some(value) = body.pointer(&pointer) else {
                continue;
            };
            match RecordRepresentation::from_value(value.clone()) {
                Ok(record) => records.push((pointer, record)),
                Err(e) => self.skip_or_fail(&pointer, AppError::Corrupt(e.to_string()))?,
            }
        }

        let tags: Vec<DraftTag> = records
            .iter()
            .filter_map(|(_, record)| DraftTag::new(record.key()).ok())
            .collect();
        let drafts = self.queue.get_actions_for_tags(&tags).await?;

        for (pointer, record) in records {
            let Some(actions) = DraftTag::new(record.key())
                .ok()
                .and_then(|tag| drafts.get(&tag))
                .filter(|actions| !actions.is_empty())
            else {
                continue;
            };
            match replay_drafts_on_record(Some(record), actions, &self.current_user_id) {
                Ok(Some(view)) => {
                    if let Some(slot) = body.pointer_mut(&pointer) {
                        *slot = view.to_value()?;
                    }
                }
                Ok(None) => {}
                Err(e) => self.skip_or_fail(&pointer, e.into())?,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkAdapter for DraftAwareNetworkAdapter {
    async fn dispatch(&self, request: ResourceRequest) -> Result<FetchResponse, AppError> {
        let is_read = matches!(request.http_method(), Ok(HttpMethod::Get));
        let mut response = self.inner.dispatch(request).await?;
        if is_read && response.is_success() {
            self.overlay_drafts(&mut response.body).await?;
        }
        Ok(response)
    }
}
