use super::draft_queue::DurableDraftQueue;
use crate::application::ports::action_handler::CustomActionExecutor;
use crate::domain::entities::{
    DraftAction, DraftActionMetadata, DraftQueueEvent, DraftQueueItem, DraftQueueItemError,
    DraftQueueOperationType, DraftQueueSnapshot, DraftQueueState,
};
use crate::domain::value_objects::{DraftActionId, DraftActionOperationType, DraftHandlerId, DraftTag};
use crate::shared::error::AppError;
use crate::shared::listeners::Subscription;
use std::sync::Arc;
use tracing::warn;

/// `(キュー状態, 操作種別, 対象アイテム)` を受け取る購読者
pub type DraftQueueChangedListener =
    Arc<dyn Fn(DraftQueueState, DraftQueueOperationType, Option<&DraftQueueItem>) + Send + Sync>;

/// 利用者向けのドラフトキュー窓口
pub struct DraftManager {
    queue: Arc<DurableDraftQueue>,
}

impl DraftManager {
    pub fn new(queue: Arc<DurableDraftQueue>) -> Self {
        Self { queue }
    }

    pub async fn get_queue(&self) -> Result<DraftQueueSnapshot, AppError> {
        let items = self
            .queue
            .get_queue_actions()
            .await?
            .iter()
            .map(to_queue_item)
            .collect();
        Ok(DraftQueueSnapshot {
            queue_state: self.queue.get_queue_state(),
            items,
        })
    }

    pub async fn add_custom_action(
        &self,
        handler: DraftHandlerId,
        target_id: impl Into<String>,
        tag: DraftTag,
        metadata: DraftActionMetadata,
    ) -> Result<DraftQueueItem, AppError> {
        let action = self
            .queue
            .add_custom_action(handler, target_id, tag, metadata)
            .await?;
        Ok(to_queue_item(&action))
    }

    pub async fn start_queue(&self) -> Result<(), AppError> {
        self.queue.start_queue().await
    }

    pub fn stop_queue(&self) {
        self.queue.stop_queue();
    }

    pub fn register_draft_queue_changed_listener(
        &self,
        listener: DraftQueueChangedListener,
    ) -> Subscription {
        let queue = Arc::downgrade(&self.queue);
        self.queue
            .register_listener(Arc::new(move |event: &DraftQueueEvent| {
                let Some(queue) = queue.upgrade() else {
                    return;
                };
                let state = queue.get_queue_state();
                match event {
                    DraftQueueEvent::QueueStateChanged(next) => {
                        listener(*next, queue_operation(*next), None);
                    }
                    other => {
                        if let Some((operation, action)) = item_operation(other) {
                            let item = to_queue_item(action);
                            listener(state, operation, Some(&item));
                        }
                    }
                }
            }))
    }

    pub fn set_custom_action_executor(
        &self,
        handler: DraftHandlerId,
        executor: Arc<dyn CustomActionExecutor>,
    ) -> Result<Subscription, AppError> {
        self.queue.set_custom_action_executor(handler, executor)
    }

    /// 削除されたアイテム（作成アクションなら同じ対象の後続を含む）を返す
    pub async fn remove_draft_action(
        &self,
        id: &DraftActionId,
    ) -> Result<Vec<DraftQueueItem>, AppError> {
        let removed = self.queue.remove(id).await?;
        Ok(removed.iter().map(to_queue_item).collect())
    }

    pub async fn replace_action(
        &self,
        id: &DraftActionId,
        with_id: &DraftActionId,
    ) -> Result<DraftQueueItem, AppError> {
        let replaced = self.queue.replace_action(id, with_id).await?;
        Ok(to_queue_item(&replaced))
    }

    pub async fn set_metadata(
        &self,
        id: &DraftActionId,
        metadata: DraftActionMetadata,
    ) -> Result<DraftQueueItem, AppError> {
        let action = self.queue.set_metadata(id, metadata).await?;
        Ok(to_queue_item(&action))
    }

    pub async fn retry_action(&self, id: &DraftActionId) -> Result<DraftQueueItem, AppError> {
        let action = self.queue.retry_action(id).await?;
        Ok(to_queue_item(&action))
    }
}

fn queue_operation(state: DraftQueueState) -> DraftQueueOperationType {
    match state {
        DraftQueueState::Started => DraftQueueOperationType::QueueStarted,
        DraftQueueState::Stopped => DraftQueueOperationType::QueueStopped,
        DraftQueueState::Waiting => DraftQueueOperationType::QueueWaiting,
        DraftQueueState::Error => DraftQueueOperationType::QueueErrored,
    }
}

fn item_operation(event: &DraftQueueEvent) -> Option<(DraftQueueOperationType, &DraftAction)> {
    match event {
        DraftQueueEvent::ActionAdded(a) => Some((DraftQueueOperationType::ItemAdded, a)),
        DraftQueueEvent::ActionUploading(a) => Some((DraftQueueOperationType::ItemUploading, a)),
        DraftQueueEvent::ActionCompleted(a) => Some((DraftQueueOperationType::ItemCompleted, a)),
        DraftQueueEvent::ActionFailed(a) => Some((DraftQueueOperationType::ItemFailed, a)),
        DraftQueueEvent::ActionDeleted(a) => Some((DraftQueueOperationType::ItemDeleted, a)),
        DraftQueueEvent::ActionUpdated(a) => Some((DraftQueueOperationType::ItemUpdated, a)),
        DraftQueueEvent::QueueStateChanged(_) => None,
    }
}

fn to_queue_item(action: &DraftAction) -> DraftQueueItem {
    let operation_type = action.operation_type().unwrap_or_else(|e| {
        warn!(action_id = %action.id, error = %e, "draft action has an unclassifiable request");
        DraftActionOperationType::Custom
    });
    DraftQueueItem {
        id: action.id.clone(),
        target_id: action.target_id.clone(),
        state: action.status,
        operation_type,
        timestamp: action.timestamp,
        metadata: action.metadata.clone(),
        error: action.error.as_ref().map(DraftQueueItemError::from),
    }
}
