//! 永続ストア上のドラフトアクションと、そのメモリ索引。
//!
//! 生成直後に永続ストアから索引を再構築（リバイバル）する。再構築中に届いた
//! 読み書きは到着順にキューへ積み、再構築完了後に順番に実行する。キューが空に
//! なるまで後続の操作も同じキューに並ぶため、リバイバル途中の索引は観測されない。

use crate::application::ports::draft_store::DraftStore;
use crate::application::ports::durable_store::{
    DurableStore, DurableStoreEntries, DurableStoreEntry, DurableStoreOperation,
};
use crate::domain::constants::{DRAFT_ID_MAPPINGS_SEGMENT, DRAFT_SEGMENT};
use crate::domain::entities::{DraftAction, DraftIdMappingEntry, QueueOperation};
use crate::domain::value_objects::{DraftActionId, DraftTag};
use crate::shared::error::AppError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, error, info, warn};

type QueuedOperation = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct RevivalState {
    syncing: bool,
    pending: VecDeque<QueuedOperation>,
    failure: Option<AppError>,
    /// 寛容モードで読み出しに失敗した。次の操作の前に再構築をやり直す
    stale: bool,
}

struct Inner {
    durable: Arc<dyn DurableStore>,
    /// 永続化キー -> アクション
    index: RwLock<HashMap<String, DraftAction>>,
    revival: Mutex<RevivalState>,
    strict_mode: bool,
}

impl Inner {
    fn revival(&self) -> MutexGuard<'_, RevivalState> {
        self.revival.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn failure(&self) -> Option<AppError> {
        self.revival().failure.clone()
    }

    async fn reload(&self) -> Result<(), AppError> {
        let mut index = self.index.write().await;

        let entries = match self.durable.get_all_entries(DRAFT_SEGMENT).await {
            Ok(entries) => entries.unwrap_or_default(),
            Err(e) => {
                error!(error = %e, "failed to read draft actions from durable store");
                let mut state = self.revival();
                if self.strict_mode {
                    state.failure = Some(e.clone());
                } else {
                    state.stale = true;
                }
                return Err(e);
            }
        };

        let mut revived = HashMap::with_capacity(entries.len());
        for (key, entry) in entries {
            match Self::decode(&key, entry) {
                Ok(action) => {
                    revived.insert(key, action);
                }
                Err(e) if self.strict_mode => {
                    error!(key = %key, error = %e, "corrupt draft action in durable store");
                    self.revival().failure = Some(e.clone());
                    return Err(e);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping corrupt draft action");
                }
            }
        }

        info!(count = revived.len(), "draft store revived");
        *index = revived;
        let mut state = self.revival();
        state.failure = None;
        state.stale = false;
        Ok(())
    }

    /// 前回の再構築が読み出しで失敗していれば、操作の前にやり直す
    async fn recover(&self) -> Result<(), AppError> {
        let stale = std::mem::replace(&mut self.revival().stale, false);
        if !stale {
            return Ok(());
        }
        warn!("retrying draft store revival after failed read");
        self.reload().await
    }

    fn decode(key: &str, entry: DurableStoreEntry) -> Result<DraftAction, AppError> {
        let action: DraftAction = serde_json::from_value(entry.data)
            .map_err(|e| AppError::Corrupt(format!("draft action {key}: {e}")))?;
        if action.handler.is_record() && action.data.is_none() {
            return Err(AppError::Corrupt(format!(
                "draft action {key} has no request data"
            )));
        }
        Ok(action)
    }

    /// 再構築後に積まれた操作を到着順に流す。空になった時点で同期状態を解除する
    async fn drain(&self) {
        loop {
            let next = {
                let mut state = self.revival();
                match state.pending.pop_front() {
                    Some(operation) => operation,
                    None => {
                        state.syncing = false;
                        return;
                    }
                }
            };
            next().await;
        }
    }

    async fn write_action(&self, action: DraftAction) -> Result<(), AppError> {
        let mut index = self.index.write().await;
        let key = action.storage_key();
        let mut entries = DurableStoreEntries::new();
        entries.insert(
            key.clone(),
            DurableStoreEntry::new(serde_json::to_value(&action)?),
        );
        self.durable.set_entries(entries, DRAFT_SEGMENT).await?;
        index.insert(key, action);
        Ok(())
    }

    async fn evict_where<F>(&self, predicate: F) -> Result<(), AppError>
    where
        F: Fn(&DraftAction) -> bool + Send,
    {
        let mut index = self.index.write().await;
        let keys: Vec<String> = index
            .iter()
            .filter(|(_, action)| predicate(action))
            .map(|(key, _)| key.clone())
            .collect();
        if keys.is_empty() {
            return Ok(());
        }
        self.durable.evict_entries(&keys, DRAFT_SEGMENT).await?;
        for key in keys {
            index.remove(&key);
        }
        Ok(())
    }

    async fn complete_action(
        &self,
        operations: Vec<QueueOperation>,
        mapping: Option<DraftIdMappingEntry>,
    ) -> Result<(), AppError> {
        let mut index = self.index.write().await;

        let mut writes = DurableStoreEntries::new();
        let mut evictions = Vec::new();
        for operation in &operations {
            match operation {
                QueueOperation::Add(action) => {
                    writes.insert(
                        action.storage_key(),
                        DurableStoreEntry::new(serde_json::to_value(action)?),
                    );
                }
                QueueOperation::Delete(action) => evictions.push(action.storage_key()),
                QueueOperation::Update {
                    previous_key,
                    action,
                } => {
                    let key = action.storage_key();
                    if *previous_key != key {
                        evictions.push(previous_key.clone());
                    }
                    writes.insert(key, DurableStoreEntry::new(serde_json::to_value(action)?));
                }
            }
        }

        let mut batch = Vec::new();
        if !evictions.is_empty() {
            batch.push(DurableStoreOperation::EvictEntries {
                segment: DRAFT_SEGMENT.to_string(),
                ids: evictions.clone(),
            });
        }
        if !writes.is_empty() {
            batch.push(DurableStoreOperation::SetEntries {
                segment: DRAFT_SEGMENT.to_string(),
                entries: writes,
            });
        }
        if let Some(mapping) = &mapping {
            let mut entries = DurableStoreEntries::new();
            entries.insert(
                mapping.storage_key(),
                DurableStoreEntry::new(serde_json::to_value(mapping)?),
            );
            batch.push(DurableStoreOperation::SetEntries {
                segment: DRAFT_ID_MAPPINGS_SEGMENT.to_string(),
                entries,
            });
        }
        self.durable.batch_operations(batch).await?;

        for key in evictions {
            index.remove(&key);
        }
        for operation in operations {
            match operation {
                QueueOperation::Add(action) | QueueOperation::Update { action, .. } => {
                    index.insert(action.storage_key(), action);
                }
                QueueOperation::Delete(_) => {}
            }
        }
        Ok(())
    }

    async fn all_drafts(&self) -> Vec<DraftAction> {
        let index = self.index.read().await;
        let mut actions: Vec<DraftAction> = index.values().cloned().collect();
        actions.sort_by(|a, b| a.id.cmp(&b.id));
        actions
    }
}

/// リバイバル手順を持つドラフトストア
pub struct DurableDraftStore {
    inner: Arc<Inner>,
}

impl DurableDraftStore {
    /// 生成と同時に索引の再構築を開始する。tokio ランタイム上で呼ぶこと
    pub fn new(durable: Arc<dyn DurableStore>, strict_mode: bool) -> Self {
        let inner = Arc::new(Inner {
            durable,
            index: RwLock::new(HashMap::new()),
            revival: Mutex::new(RevivalState {
                syncing: true,
                pending: VecDeque::new(),
                failure: None,
                stale: false,
            }),
            strict_mode,
        });

        let task = Arc::clone(&inner);
        tokio::spawn(async move {
            let _ = task.reload().await;
            task.drain().await;
        });

        Self { inner }
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.revival().syncing
    }

    /// 索引を永続ストアから再構築する。再構築中であれば完了後に改めて実行する
    pub async fn resync(&self) -> Result<(), AppError> {
        let start_now = {
            let mut state = self.inner.revival();
            if state.syncing {
                false
            } else {
                state.syncing = true;
                true
            }
        };

        if !start_now {
            debug!("resync deferred behind running revival");
            return self.run(|inner| async move { inner.reload().await }).await;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = inner.reload().await;
            inner.drain().await;
            result
        })
        .await
        .map_err(|e| AppError::Internal(format!("draft store resync task failed: {e}")))?
    }

    async fn run<T, F, Fut>(&self, operation: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Inner>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, AppError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let job: QueuedOperation = Box::new(move || {
            Box::pin(async move {
                let result = match inner.failure() {
                    Some(failure) => Err(failure),
                    None => match inner.recover().await {
                        Ok(()) => operation(Arc::clone(&inner)).await,
                        Err(e) => Err(e),
                    },
                };
                let _ = tx.send(result);
            })
        });

        let immediate = {
            let mut state = self.inner.revival();
            if state.syncing {
                state.pending.push_back(job);
                None
            } else {
                Some(job)
            }
        };
        match immediate {
            Some(job) => job().await,
            None => debug!("draft store operation queued behind revival"),
        }

        rx.await
            .map_err(|_| AppError::Internal("draft store operation was dropped".to_string()))?
    }

    #[cfg(test)]
    fn pending_operations(&self) -> usize {
        self.inner.revival().pending.len()
    }
}

#[async_trait]
impl DraftStore for DurableDraftStore {
    async fn write_action(&self, action: DraftAction) -> Result<(), AppError> {
        self.run(move |inner| async move { inner.write_action(action).await })
            .await
    }

    async fn get_all_drafts(&self) -> Result<Vec<DraftAction>, AppError> {
        self.run(|inner| async move { Ok(inner.all_drafts().await) })
            .await
    }

    async fn delete_draft(&self, id: &DraftActionId) -> Result<(), AppError> {
        let id = id.clone();
        self.run(move |inner| async move { inner.evict_where(|a| a.id == id).await })
            .await
    }

    async fn delete_by_tag(&self, tag: &DraftTag) -> Result<(), AppError> {
        let tag = tag.clone();
        self.run(move |inner| async move { inner.evict_where(|a| a.tag == tag).await })
            .await
    }

    async fn complete_action(
        &self,
        operations: Vec<QueueOperation>,
        mapping: Option<DraftIdMappingEntry>,
    ) -> Result<(), AppError> {
        self.run(move |inner| async move { inner.complete_action(operations, mapping).await })
            .await
    }
}
