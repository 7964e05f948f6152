use super::validation::{validate_enqueue, validate_tag_sequence};
use crate::application::ports::action_handler::{
    ActionHandler, CompletionPlan, CustomActionExecutor,
};
use crate::application::ports::draft_store::DraftStore;
use crate::domain::entities::{
    DraftAction, DraftActionMetadata, DraftQueueEvent, DraftQueueState, FetchResponse,
    ProcessActionResult, QueueOperation, ResourceRequest,
};
use crate::domain::value_objects::{
    DraftActionId, DraftActionOperationType, DraftActionStatus, DraftHandlerId, DraftTag,
};
use crate::shared::error::AppError;
use crate::shared::listeners::{Listener, ListenerRegistry, Subscription};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use tracing::{debug, error, info, warn};

pub const INTERRUPTED_UPLOAD_MESSAGE: &str = "upload interrupted; verify server state";

type ExecutorMap = HashMap<DraftHandlerId, Arc<dyn CustomActionExecutor>>;

enum UploadOutcome {
    Response(FetchResponse),
    Transport(AppError),
    Failed(String),
}

/// 永続化されたドラフトキュー。
///
/// 先頭のアクションを1件ずつアップロードする。`Uploading` への遷移は
/// ネットワーク呼び出しの前に永続化されるため、同時に2件が送信されることはない。
pub struct DurableDraftQueue {
    draft_store: Arc<dyn DraftStore>,
    record_handler: Arc<dyn ActionHandler>,
    custom_executors: Arc<RwLock<ExecutorMap>>,
    state: RwLock<DraftQueueState>,
    /// 先頭の読み取りから状態の永続化までを直列化する
    gate: tokio::sync::Mutex<()>,
    last_id: Mutex<Option<DraftActionId>>,
    listeners: ListenerRegistry<DraftQueueEvent>,
    self_ref: Weak<DurableDraftQueue>,
}

impl DurableDraftQueue {
    /// キューを生成し、前回 `Uploading` のまま終了したアクションを `Error` に落とす
    pub async fn initialize(
        draft_store: Arc<dyn DraftStore>,
        record_handler: Arc<dyn ActionHandler>,
    ) -> Result<Arc<Self>, AppError> {
        let queue = Arc::new_cyclic(|self_ref| Self {
            draft_store,
            record_handler,
            custom_executors: Arc::new(RwLock::new(HashMap::new())),
            state: RwLock::new(DraftQueueState::Stopped),
            gate: tokio::sync::Mutex::new(()),
            last_id: Mutex::new(None),
            listeners: ListenerRegistry::new(),
            self_ref: self_ref.clone(),
        });
        queue.reconcile_interrupted_uploads().await?;
        Ok(queue)
    }

    async fn reconcile_interrupted_uploads(&self) -> Result<(), AppError> {
        let _guard = self.gate.lock().await;
        for mut action in self.draft_store.get_all_drafts().await? {
            if action.status != DraftActionStatus::Uploading {
                continue;
            }
            warn!(
                action_id = %action.id,
                tag = %action.tag,
                "draft action was uploading when the process stopped; marking as error"
            );
            action.mark_error(FetchResponse {
                status: 0,
                status_text: "Upload Interrupted".to_string(),
                ok: false,
                headers: Default::default(),
                body: json!({ "message": INTERRUPTED_UPLOAD_MESSAGE }),
            })?;
            self.draft_store.write_action(action).await?;
        }
        Ok(())
    }

    pub fn register_listener(&self, listener: Listener<DraftQueueEvent>) -> Subscription {
        self.listeners.subscribe(listener)
    }

    pub fn get_queue_state(&self) -> DraftQueueState {
        self.state
            .read()
            .map(|state| *state)
            .unwrap_or(DraftQueueState::Error)
    }

    fn set_state(&self, next: DraftQueueState) {
        let changed = match self.state.write() {
            Ok(mut state) if *state != next => {
                *state = next;
                true
            }
            _ => false,
        };
        if changed {
            info!(state = next.as_str(), "draft queue state changed");
            self.listeners
                .emit(&DraftQueueEvent::QueueStateChanged(next));
        }
    }

    pub async fn get_queue_actions(&self) -> Result<Vec<DraftAction>, AppError> {
        self.draft_store.get_all_drafts().await
    }

    /// タグごとのアクションを登録順で返す。該当がないタグは空の配列
    pub async fn get_actions_for_tags(
        &self,
        tags: &[DraftTag],
    ) -> Result<HashMap<DraftTag, Vec<DraftAction>>, AppError> {
        let mut grouped: HashMap<DraftTag, Vec<DraftAction>> =
            tags.iter().map(|tag| (tag.clone(), Vec::new())).collect();
        if tags.is_empty() {
            return Ok(grouped);
        }
        for action in self.draft_store.get_all_drafts().await? {
            if let Some(bucket) = grouped.get_mut(&action.tag) {
                bucket.push(action);
            }
        }
        Ok(grouped)
    }

    /// レコードCUDリクエストをキューに積む
    pub async fn enqueue(
        &self,
        request: ResourceRequest,
        tag: DraftTag,
        target_id: impl Into<String>,
    ) -> Result<DraftAction, AppError> {
        let method = request.http_method().map_err(AppError::UnsupportedMethod)?;
        let operation = DraftActionOperationType::from_method(method).ok_or_else(|| {
            AppError::UnsupportedMethod(format!(
                "{} cannot be queued as a draft",
                method.as_str()
            ))
        })?;

        let action = {
            let _guard = self.gate.lock().await;
            let queued = self.draft_store.get_all_drafts().await?;
            let for_tag: Vec<DraftAction> =
                queued.iter().filter(|a| a.tag == tag).cloned().collect();
            validate_enqueue(operation, Some(&request), &tag, &for_tag)?;

            let action = DraftAction::new_pending(
                self.next_action_id(&queued),
                tag,
                target_id.into(),
                DraftHandlerId::record(),
                Some(request),
                DraftActionMetadata::new(),
                Utc::now(),
            );
            self.draft_store.write_action(action.clone()).await?;
            action
        };

        info!(
            action_id = %action.id,
            tag = %action.tag,
            operation = operation.as_str(),
            "draft action enqueued"
        );
        self.listeners
            .emit(&DraftQueueEvent::ActionAdded(action.clone()));
        self.schedule_drain();
        Ok(action)
    }

    /// 独自ハンドラで処理するアクションを積む
    pub async fn add_custom_action(
        &self,
        handler: DraftHandlerId,
        target_id: impl Into<String>,
        tag: DraftTag,
        metadata: DraftActionMetadata,
    ) -> Result<DraftAction, AppError> {
        if handler.is_record() {
            return Err(AppError::InvalidInput(
                "Custom actions cannot use the record handler".to_string(),
            ));
        }

        let action = {
            let _guard = self.gate.lock().await;
            let queued = self.draft_store.get_all_drafts().await?;
            let for_tag: Vec<DraftAction> =
                queued.iter().filter(|a| a.tag == tag).cloned().collect();
            validate_enqueue(DraftActionOperationType::Custom, None, &tag, &for_tag)?;

            let action = DraftAction::new_pending(
                self.next_action_id(&queued),
                tag,
                target_id.into(),
                handler,
                None,
                metadata,
                Utc::now(),
            );
            self.draft_store.write_action(action.clone()).await?;
            action
        };

        info!(action_id = %action.id, handler = action.handler.as_str(), "custom draft action enqueued");
        self.listeners
            .emit(&DraftQueueEvent::ActionAdded(action.clone()));
        self.schedule_drain();
        Ok(action)
    }

    /// 現在時刻から採番し、既存IDや直前の採番と衝突しないよう繰り上げる
    fn next_action_id(&self, queued: &[DraftAction]) -> DraftActionId {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let mut candidate = DraftActionId::from_millis(now);
        let mut last = self
            .last_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = last.as_ref() {
            if candidate <= *previous {
                candidate = previous.successor();
            }
        }
        while queued.iter().any(|action| action.id == candidate) {
            candidate = candidate.successor();
        }
        *last = Some(candidate.clone());
        candidate
    }

    /// 先頭のアクションを1件処理する。先頭が `Pending` でなければ待たずに戻る
    pub async fn process_next_action(&self) -> Result<ProcessActionResult, AppError> {
        let action = {
            let _guard = self.gate.lock().await;
            let Some(mut head) = self.draft_store.get_all_drafts().await?.into_iter().next()
            else {
                return Ok(ProcessActionResult::NoActionToProcess);
            };
            if head.status != DraftActionStatus::Pending {
                debug!(action_id = %head.id, status = %head.status, "queue head is not pending");
                return Ok(ProcessActionResult::ActionAlreadyProcessing);
            }
            head.mark_uploading()?;
            self.draft_store.write_action(head.clone()).await?;
            head
        };

        info!(action_id = %action.id, tag = %action.tag, "draft action uploading");
        self.listeners
            .emit(&DraftQueueEvent::ActionUploading(action.clone()));

        match self.upload(&action).await {
            UploadOutcome::Response(response) if response.is_success() => {
                self.complete(action, response).await
            }
            UploadOutcome::Response(response) => {
                warn!(action_id = %action.id, status = response.status, "draft action rejected by server");
                self.fail(action, response).await?;
                Ok(ProcessActionResult::ActionErrored)
            }
            UploadOutcome::Transport(e) => {
                warn!(action_id = %action.id, error = %e, "draft action upload failed in transport");
                self.fail(action, FetchResponse::transport_failure(&e.to_string()))
                    .await?;
                Ok(ProcessActionResult::NetworkError)
            }
            UploadOutcome::Failed(message) => {
                warn!(action_id = %action.id, reason = %message, "draft action could not be executed");
                let mut response = FetchResponse::new(400, json!({ "message": message }));
                response.status_text = "Execution Failed".to_string();
                self.fail(action, response).await?;
                Ok(ProcessActionResult::ActionErrored)
            }
        }
    }

    async fn upload(&self, action: &DraftAction) -> UploadOutcome {
        let result = if action.handler.is_record() {
            self.record_handler.execute(action).await
        } else {
            let executor = self
                .custom_executors
                .read()
                .ok()
                .and_then(|executors| executors.get(&action.handler).cloned());
            match executor {
                Some(executor) => executor.execute(action).await,
                None => {
                    return UploadOutcome::Failed(format!(
                        "no executor registered for handler {}",
                        action.handler.as_str()
                    ))
                }
            }
        };
        match result {
            Ok(response) => UploadOutcome::Response(response),
            Err(AppError::Network(message)) => UploadOutcome::Transport(AppError::Network(message)),
            Err(other) => UploadOutcome::Failed(other.to_string()),
        }
    }

    /// `Error` を書き込めなかった場合も通知は行う。永続側は `Uploading` のまま残り、
    /// 次回の起動時に `Error` へ落とされる
    async fn fail(&self, mut action: DraftAction, response: FetchResponse) -> Result<(), AppError> {
        action.mark_error(response)?;
        let persisted = self.draft_store.write_action(action.clone()).await;
        if let Err(e) = &persisted {
            error!(action_id = %action.id, error = %e, "failed to persist draft action error");
        }
        self.listeners.emit(&DraftQueueEvent::ActionFailed(action));
        persisted
    }

    async fn complete(
        &self,
        action: DraftAction,
        response: FetchResponse,
    ) -> Result<ProcessActionResult, AppError> {
        let mut completed = action.clone();
        completed.mark_completed(response.clone())?;

        let plan = match self.persist_completion(&completed).await {
            Ok(plan) => plan,
            Err(e) => {
                error!(action_id = %action.id, error = %e, "failed to persist completed draft action");
                self.fail(action, completion_not_persisted(response, &e))
                    .await?;
                return Ok(ProcessActionResult::ActionErrored);
            }
        };
        let action = completed;

        if action.handler.is_record() {
            if let Err(e) = self
                .record_handler
                .handle_action_completed(&action, &plan)
                .await
            {
                error!(action_id = %action.id, error = %e, "failed to ingest completed draft action");
            }
        }

        info!(action_id = %action.id, tag = %action.tag, "draft action completed");
        self.listeners
            .emit(&DraftQueueEvent::ActionCompleted(action));
        for operation in plan.operations {
            if let QueueOperation::Update { action, .. } = operation {
                self.listeners.emit(&DraftQueueEvent::ActionUpdated(action));
            }
        }
        Ok(ProcessActionResult::ActionSucceeded)
    }

    async fn persist_completion(&self, action: &DraftAction) -> Result<CompletionPlan, AppError> {
        let _guard = self.gate.lock().await;
        let remaining = self.draft_store.get_all_drafts().await?;
        let plan = if action.handler.is_record() {
            self.record_handler.completion_plan(action, &remaining)?
        } else {
            CompletionPlan {
                operations: vec![QueueOperation::Delete(action.clone())],
                mapping: None,
            }
        };
        self.draft_store
            .complete_action(plan.operations.clone(), plan.mapping.clone())
            .await?;
        Ok(plan)
    }

    /// キューを開始し、処理対象がなくなるまで順に送信する
    pub async fn start_queue(&self) -> Result<(), AppError> {
        self.set_state(DraftQueueState::Started);
        self.drain().await
    }

    /// 停止する。送信中のアクションはそのまま完了する
    pub fn stop_queue(&self) {
        self.set_state(DraftQueueState::Stopped);
    }

    async fn drain(&self) -> Result<(), AppError> {
        while self.get_queue_state() == DraftQueueState::Started {
            match self.process_next_action().await? {
                ProcessActionResult::ActionSucceeded => continue,
                ProcessActionResult::NoActionToProcess
                | ProcessActionResult::ActionAlreadyProcessing => break,
                ProcessActionResult::ActionErrored => {
                    self.set_state(DraftQueueState::Error);
                    break;
                }
                ProcessActionResult::NetworkError => {
                    self.set_state(DraftQueueState::Waiting);
                    break;
                }
            }
        }
        Ok(())
    }

    fn schedule_drain(&self) {
        if self.get_queue_state() != DraftQueueState::Started {
            return;
        }
        let Some(queue) = self.self_ref.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = queue.drain().await {
                error!(error = %e, "background draft queue drain failed");
            }
        });
    }

    async fn find(&self, id: &DraftActionId) -> Result<DraftAction, AppError> {
        self.draft_store
            .get_all_drafts()
            .await?
            .into_iter()
            .find(|action| action.id == *id)
            .ok_or_else(|| AppError::NotFound(format!("Draft action {id} not found")))
    }

    /// `Error` のアクションを `Pending` に戻す
    pub async fn retry_action(&self, id: &DraftActionId) -> Result<DraftAction, AppError> {
        let action = {
            let _guard = self.gate.lock().await;
            let mut action = self.find(id).await?;
            action.reset_to_pending()?;
            self.draft_store.write_action(action.clone()).await?;
            action
        };
        info!(action_id = %action.id, "draft action queued for retry");
        self.listeners
            .emit(&DraftQueueEvent::ActionUpdated(action.clone()));
        self.schedule_drain();
        Ok(action)
    }

    /// アクションを削除する。作成アクションを消した場合は同じタグの後続も消える
    pub async fn remove(&self, id: &DraftActionId) -> Result<Vec<DraftAction>, AppError> {
        let removed = {
            let _guard = self.gate.lock().await;
            let all = self.draft_store.get_all_drafts().await?;
            let target = all
                .iter()
                .find(|action| action.id == *id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("Draft action {id} not found")))?;

            let removed: Vec<DraftAction> = if target.is_create() {
                all.into_iter().filter(|a| a.tag == target.tag).collect()
            } else {
                vec![target.clone()]
            };
            if let Some(busy) = removed
                .iter()
                .find(|a| a.status == DraftActionStatus::Uploading)
            {
                return Err(AppError::InvalidState(format!(
                    "Draft action {} is uploading and cannot be removed",
                    busy.id
                )));
            }

            if target.is_create() {
                self.draft_store.delete_by_tag(&target.tag).await?;
            } else {
                self.draft_store.delete_draft(&target.id).await?;
            }
            removed
        };

        for action in &removed {
            info!(action_id = %action.id, "draft action removed");
            self.listeners
                .emit(&DraftQueueEvent::ActionDeleted(action.clone()));
        }
        Ok(removed)
    }

    /// `target` の内容を `source` で置き換え、`source` を取り除く
    pub async fn replace_action(
        &self,
        target_id: &DraftActionId,
        source_id: &DraftActionId,
    ) -> Result<DraftAction, AppError> {
        if target_id == source_id {
            return Err(AppError::InvalidInput(
                "Cannot replace a draft action with itself".to_string(),
            ));
        }

        let (replaced, source) = {
            let _guard = self.gate.lock().await;
            let target = self.find(target_id).await?;
            let source = self.find(source_id).await?;

            if target.tag != source.tag {
                return Err(AppError::ValidationError(
                    "Replacement draft must target the same entity".to_string(),
                ));
            }
            if target.status == DraftActionStatus::Uploading
                || source.status == DraftActionStatus::Uploading
            {
                return Err(AppError::InvalidState(
                    "Cannot replace a draft action that is uploading".to_string(),
                ));
            }
            if target.is_create() != source.is_create() {
                return Err(AppError::ValidationError(
                    "A create draft can only be replaced by another create".to_string(),
                ));
            }

            let mut replaced = target.clone();
            replaced.handler = source.handler.clone();
            replaced.data = source.data.clone();
            replaced.metadata = source.metadata.clone();
            replaced.status = DraftActionStatus::Pending;
            replaced.error = None;
            replaced.response = None;

            let sequence: Vec<DraftAction> = self
                .draft_store
                .get_all_drafts()
                .await?
                .into_iter()
                .filter(|action| action.tag == target.tag && action.id != source.id)
                .map(|action| {
                    if action.id == target.id {
                        replaced.clone()
                    } else {
                        action
                    }
                })
                .collect();
            validate_tag_sequence(&target.tag, &sequence)?;

            self.draft_store
                .complete_action(
                    vec![
                        QueueOperation::Update {
                            previous_key: target.storage_key(),
                            action: replaced.clone(),
                        },
                        QueueOperation::Delete(source.clone()),
                    ],
                    None,
                )
                .await?;
            (replaced, source)
        };

        info!(target = %replaced.id, source = %source.id, "draft action replaced");
        self.listeners
            .emit(&DraftQueueEvent::ActionUpdated(replaced.clone()));
        self.listeners.emit(&DraftQueueEvent::ActionDeleted(source));
        Ok(replaced)
    }

    pub async fn set_metadata(
        &self,
        id: &DraftActionId,
        metadata: DraftActionMetadata,
    ) -> Result<DraftAction, AppError> {
        let action = {
            let _guard = self.gate.lock().await;
            let mut action = self.find(id).await?;
            action.metadata = metadata;
            self.draft_store.write_action(action.clone()).await?;
            action
        };
        self.listeners
            .emit(&DraftQueueEvent::ActionUpdated(action.clone()));
        Ok(action)
    }

    /// 独自ハンドラの実行戦略を登録する。同じIDの既存登録は置き換える
    pub fn set_custom_action_executor(
        &self,
        handler: DraftHandlerId,
        executor: Arc<dyn CustomActionExecutor>,
    ) -> Result<Subscription, AppError> {
        if handler.is_record() {
            return Err(AppError::InvalidInput(
                "The record handler cannot be overridden".to_string(),
            ));
        }
        {
            let mut executors = self
                .custom_executors
                .write()
                .map_err(|_| AppError::Internal("custom executor registry poisoned".to_string()))?;
            executors.insert(handler.clone(), Arc::clone(&executor));
        }
        debug!(handler = handler.as_str(), "custom action executor registered");

        let registry = Arc::downgrade(&self.custom_executors);
        Ok(Subscription::new(move || {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            if let Ok(mut executors) = registry.write() {
                let registered = executors
                    .get(&handler)
                    .map(|current| Arc::ptr_eq(current, &executor))
                    .unwrap_or(false);
                if registered {
                    executors.remove(&handler);
                }
            };
        }))
    }
}

/// サーバーは受理したが完了を記録できなかった応答。再送するかは利用者が決める
fn completion_not_persisted(response: FetchResponse, cause: &AppError) -> FetchResponse {
    FetchResponse {
        status: response.status,
        status_text: "Completion Not Persisted".to_string(),
        ok: false,
        headers: response.headers,
        body: json!({ "message": cause.to_string(), "response": response.body }),
    }
}
