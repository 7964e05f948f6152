use crate::application::ports::action_handler::{ActionHandler, CompletionPlan};
use crate::application::ports::durable_store::{DurableStore, DurableStoreEntries, DurableStoreEntry};
use crate::application::ports::environment::RecordStore;
use crate::application::ports::network::NetworkAdapter;
use crate::domain::constants::DEFAULT_SEGMENT;
use crate::domain::entities::{
    DraftAction, DraftIdMappingEntry, FetchResponse, QueueOperation, RecordRepresentation,
};
use crate::domain::value_objects::draft::keys::{owning_record_key, record_key_from_id};
use crate::domain::value_objects::{DraftActionOperationType, DraftHandlerId, DraftTag};
use crate::shared::error::AppError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// レコードの作成・更新・削除を実行する組み込みハンドラ
pub struct RecordActionHandler {
    network: Arc<dyn NetworkAdapter>,
    /// ドラフトを重ねない生の永続ストア
    durable_store: Arc<dyn DurableStore>,
    record_store: Arc<dyn RecordStore>,
}

impl RecordActionHandler {
    pub fn new(
        network: Arc<dyn NetworkAdapter>,
        durable_store: Arc<dyn DurableStore>,
        record_store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            network,
            durable_store,
            record_store,
        }
    }

    fn canonical_id(action: &DraftAction) -> Option<&str> {
        action
            .response
            .as_ref()
            .and_then(|response| response.body.get("id"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    async fn evict_cached(&self, record_key: &str) {
        for key in self.record_store.keys().await {
            if owning_record_key(&key) == Some(record_key) {
                self.record_store.evict(&key).await;
            }
        }
    }
}

#[async_trait]
impl ActionHandler for RecordActionHandler {
    fn handler_id(&self) -> DraftHandlerId {
        DraftHandlerId::record()
    }

    async fn execute(&self, action: &DraftAction) -> Result<FetchResponse, AppError> {
        let request = action.data.clone().ok_or_else(|| {
            AppError::Corrupt(format!("Draft action {} has no request data", action.id))
        })?;
        debug!(action_id = %action.id, method = %request.method, path = %request.base_path, "uploading draft action");
        self.network.dispatch(request).await
    }

    fn completion_plan(
        &self,
        action: &DraftAction,
        remaining: &[DraftAction],
    ) -> Result<CompletionPlan, AppError> {
        let mut plan = CompletionPlan {
            operations: vec![QueueOperation::Delete(action.clone())],
            mapping: None,
        };
        if !action.is_create() {
            return Ok(plan);
        }
        let Some(canonical_id) = Self::canonical_id(action) else {
            warn!(action_id = %action.id, "create response carried no record id");
            return Ok(plan);
        };
        if canonical_id == action.target_id {
            return Ok(plan);
        }

        let canonical_tag =
            DraftTag::new(record_key_from_id(canonical_id)).map_err(AppError::InvalidInput)?;
        plan.mapping = Some(DraftIdMappingEntry::new(
            action.target_id.clone(),
            canonical_id,
        ));
        for queued in remaining
            .iter()
            .filter(|queued| queued.tag == action.tag && queued.id != action.id)
        {
            let mut rewritten = queued.clone();
            rewritten.tag = canonical_tag.clone();
            rewritten.target_id = canonical_id.to_string();
            if let Some(request) = rewritten.data.as_mut() {
                request.redirect_record_id(&action.target_id, canonical_id);
            }
            plan.operations.push(QueueOperation::Update {
                previous_key: queued.storage_key(),
                action: rewritten,
            });
        }
        Ok(plan)
    }

    async fn handle_action_completed(
        &self,
        action: &DraftAction,
        plan: &CompletionPlan,
    ) -> Result<(), AppError> {
        let mut stale_keys = vec![action.tag.as_str().to_string()];
        if let Some(mapping) = &plan.mapping {
            stale_keys.push(record_key_from_id(&mapping.canonical_id));
        }

        match action.operation_type()? {
            DraftActionOperationType::Create | DraftActionOperationType::Update => {
                let body = action.response.as_ref().map(|response| &response.body);
                match body.filter(|body| RecordRepresentation::looks_like_record(body)) {
                    Some(body) => {
                        let record = RecordRepresentation::from_value(body.clone())?;
                        let mut entries = DurableStoreEntries::new();
                        entries.insert(record.key(), DurableStoreEntry::new(body.clone()));
                        self.durable_store
                            .set_entries(entries, DEFAULT_SEGMENT)
                            .await?;
                    }
                    None => {
                        debug!(action_id = %action.id, "completed action returned no record to ingest");
                    }
                }
            }
            DraftActionOperationType::Delete => {
                self.durable_store
                    .evict_entries(&[action.tag.as_str().to_string()], DEFAULT_SEGMENT)
                    .await?;
            }
            DraftActionOperationType::Custom => {}
        }

        for key in stale_keys {
            self.evict_cached(&key).await;
        }
        Ok(())
    }
}
