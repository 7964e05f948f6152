use crate::application::ports::durable_store::{
    DurableStore, DurableStoreChange, DurableStoreChangeListener, DurableStoreEntries,
    DurableStoreOperation,
};
use crate::shared::error::AppError;
use crate::shared::listeners::{ListenerRegistry, Subscription};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type Segments = HashMap<String, DurableStoreEntries>;

/// プロセス内で完結する永続ストア。テストと一時利用向け
pub struct InMemoryDurableStore {
    segments: Arc<RwLock<Segments>>,
    listeners: ListenerRegistry<Vec<DurableStoreChange>>,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self {
            segments: Arc::new(RwLock::new(HashMap::new())),
            listeners: ListenerRegistry::new(),
        }
    }

    fn apply(segments: &mut Segments, operation: &DurableStoreOperation) {
        match operation {
            DurableStoreOperation::SetEntries { segment, entries } => {
                let target = segments.entry(segment.clone()).or_default();
                for (key, entry) in entries {
                    target.insert(key.clone(), entry.clone());
                }
            }
            DurableStoreOperation::EvictEntries { segment, ids } => {
                if let Some(target) = segments.get_mut(segment) {
                    for id in ids {
                        target.remove(id);
                    }
                }
            }
        }
    }

    async fn run(&self, operations: Vec<DurableStoreOperation>) {
        if operations.is_empty() {
            return;
        }
        {
            let mut segments = self.segments.write().await;
            for operation in &operations {
                Self::apply(&mut segments, operation);
            }
        }
        let changes = operations.iter().map(DurableStoreOperation::to_change).collect();
        self.listeners.emit(&changes);
    }
}

impl Default for InMemoryDurableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn get_entries(
        &self,
        ids: &[String],
        segment: &str,
    ) -> Result<Option<DurableStoreEntries>, AppError> {
        let segments = self.segments.read().await;
        let Some(target) = segments.get(segment) else {
            return Ok(None);
        };
        let found: DurableStoreEntries = ids
            .iter()
            .filter_map(|id| target.get(id).map(|entry| (id.clone(), entry.clone())))
            .collect();
        Ok(if found.is_empty() { None } else { Some(found) })
    }

    async fn get_all_entries(
        &self,
        segment: &str,
    ) -> Result<Option<DurableStoreEntries>, AppError> {
        let segments = self.segments.read().await;
        Ok(segments
            .get(segment)
            .filter(|entries| !entries.is_empty())
            .cloned())
    }

    async fn set_entries(
        &self,
        entries: DurableStoreEntries,
        segment: &str,
    ) -> Result<(), AppError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.run(vec![DurableStoreOperation::SetEntries {
            segment: segment.to_string(),
            entries,
        }])
        .await;
        Ok(())
    }

    async fn evict_entries(&self, ids: &[String], segment: &str) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.run(vec![DurableStoreOperation::EvictEntries {
            segment: segment.to_string(),
            ids: ids.to_vec(),
        }])
        .await;
        Ok(())
    }

    async fn batch_operations(
        &self,
        operations: Vec<DurableStoreOperation>,
    ) -> Result<(), AppError> {
        self.run(operations).await;
        Ok(())
    }

    fn register_on_changed_listener(&self, listener: DurableStoreChangeListener) -> Subscription {
        self.listeners.subscribe(listener)
    }
}
