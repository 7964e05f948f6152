//! ドラフトを意識する永続ストアのデコレータ。
//!
//! 書き込み時はレコードを展開してドラフトを剥がし、読み出し時はキュー上の
//! ドラフトを重ねて参照形式に戻す。DRAFT セグメントの変更通知は対象レコードの
//! キーへの変更として再発行する。

use crate::application::ports::durable_store::{
    DurableStore, DurableStoreChange, DurableStoreChangeListener, DurableStoreChangeType,
    DurableStoreEntries, DurableStoreEntry, DurableStoreOperation,
};
use crate::application::ports::environment::RecordStore;
use crate::application::services::draft_queue::DurableDraftQueue;
use crate::domain::constants::{DEFAULT_SEGMENT, DRAFT_ID_MAPPINGS_SEGMENT, DRAFT_SEGMENT};
use crate::domain::entities::{DraftAction, DraftIdMappingEntry, FieldEntry, RecordRepresentation};
use crate::domain::overlay::{denormalize_for_persistence, normalize_on_read, replay_drafts_on_record};
use crate::domain::value_objects::draft::keys::{
    is_draft_record_key, is_record_key, owning_record_key, parse_draft_action_key,
    record_id_from_key, record_key_from_id, split_field_key,
};
use crate::domain::value_objects::DraftTag;
use crate::shared::error::AppError;
use crate::shared::listeners::{Listener, ListenerRegistry, Subscription};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

type IdMappings = Arc<RwLock<HashMap<String, String>>>;

/// ドラフトを重ねたレコードの参照形式
struct OverlaidRecord {
    record: DurableStoreEntry,
    fields: DurableStoreEntries,
}

pub struct DraftAwareDurableStore {
    durable: Arc<dyn DurableStore>,
    queue: Arc<DurableDraftQueue>,
    record_store: Arc<dyn RecordStore>,
    strict_mode: bool,
    current_user_id: String,
    /// ローカルID -> 確定ID
    mappings: IdMappings,
    listeners: Arc<ListenerRegistry<Vec<DurableStoreChange>>>,
    remap_listeners: Arc<ListenerRegistry<DraftIdMappingEntry>>,
    upstream: Mutex<Option<Subscription>>,
}

impl DraftAwareDurableStore {
    pub async fn new(
        durable: Arc<dyn DurableStore>,
        queue: Arc<DurableDraftQueue>,
        record_store: Arc<dyn RecordStore>,
        strict_mode: bool,
        current_user_id: impl Into<String>,
    ) -> Result<Arc<Self>, AppError> {
        let store = Self {
            durable,
            queue,
            record_store,
            strict_mode,
            current_user_id: current_user_id.into(),
            mappings: Arc::new(RwLock::new(HashMap::new())),
            listeners: Arc::new(ListenerRegistry::new()),
            remap_listeners: Arc::new(ListenerRegistry::new()),
            upstream: Mutex::new(None),
        };
        store.load_mappings().await?;
        store.subscribe_upstream();
        Ok(Arc::new(store))
    }

    async fn load_mappings(&self) -> Result<(), AppError> {
        let Some(entries) = self
            .durable
            .get_all_entries(DRAFT_ID_MAPPINGS_SEGMENT)
            .await?
        else {
            return Ok(());
        };
        let mut mappings = self
            .mappings
            .write()
            .map_err(|_| AppError::Internal("id mapping cache poisoned".to_string()))?;
        for key in entries.keys() {
            if let Some(entry) = DraftIdMappingEntry::from_storage_key(key) {
                mappings.insert(entry.draft_id, entry.canonical_id);
            }
        }
        debug!(count = mappings.len(), "draft id mappings loaded");
        Ok(())
    }

    /// 下位ストアの変更通知を一度だけ購読する
    fn subscribe_upstream(&self) {
        let listeners = Arc::clone(&self.listeners);
        let mappings = Arc::clone(&self.mappings);
        let remap_listeners = Arc::clone(&self.remap_listeners);
        let subscription = self.durable.register_on_changed_listener(Arc::new(
            move |changes: &Vec<DurableStoreChange>| {
                let remapped = remap_changes(changes, &mappings, &remap_listeners);
                if !remapped.is_empty() {
                    listeners.emit(&remapped);
                }
            },
        ));
        if let Ok(mut upstream) = self.upstream.lock() {
            *upstream = Some(subscription);
        }
    }

    /// 作成が確定したローカルIDが判明したときに呼ばれる
    pub fn register_remap_callback(&self, callback: Listener<DraftIdMappingEntry>) -> Subscription {
        self.remap_listeners.subscribe(callback)
    }

    pub fn canonical_id(&self, record_id: &str) -> Option<String> {
        self.mappings
            .read()
            .ok()
            .and_then(|mappings| mappings.get(record_id).cloned())
    }

    /// 確定済みのローカルIDを指すキーを確定IDのキーへ付け替える
    pub fn redirect_key(&self, key: &str) -> String {
        redirect_with(key, &self.mappings)
    }

    async fn drafts_for(
        &self,
        record_keys: &[String],
    ) -> Result<HashMap<DraftTag, Vec<DraftAction>>, AppError> {
        let tags: Vec<DraftTag> = record_keys
            .iter()
            .filter_map(|key| DraftTag::new(key.clone()).ok())
            .collect();
        self.queue.get_actions_for_tags(&tags).await
    }

    fn corrupt(&self, key: &str, error: AppError) -> Result<(), AppError> {
        if self.strict_mode {
            return Err(error);
        }
        warn!(key = %key, error = %error, "skipping unusable record");
        Ok(())
    }

    /// ベースラインにドラフトを重ね、参照形式へ分解する
    async fn overlay_records(
        &self,
        record_keys: &[String],
        prefetched: Option<&DurableStoreEntries>,
    ) -> Result<HashMap<String, OverlaidRecord>, AppError> {
        let mut overlaid = HashMap::new();
        if record_keys.is_empty() {
            return Ok(overlaid);
        }

        let fetched;
        let baselines = match prefetched {
            Some(entries) => entries,
            None => {
                let durable_keys: Vec<String> = record_keys
                    .iter()
                    .filter(|key| !is_draft_record_key(key))
                    .cloned()
                    .collect();
                fetched = if durable_keys.is_empty() {
                    DurableStoreEntries::new()
                } else {
                    self.durable
                        .get_entries(&durable_keys, DEFAULT_SEGMENT)
                        .await?
                        .unwrap_or_default()
                };
                &fetched
            }
        };
        let drafts = self.drafts_for(record_keys).await?;
        let no_drafts = Vec::new();

        for key in record_keys {
            let entry = baselines.get(key);
            let queued = DraftTag::new(key.clone())
                .ok()
                .and_then(|tag| drafts.get(&tag))
                .unwrap_or(&no_drafts);

            if let Some(entry) = entry {
                if !RecordRepresentation::looks_like_record(&entry.data) {
                    overlaid.insert(
                        key.clone(),
                        OverlaidRecord {
                            record: entry.clone(),
                            fields: DurableStoreEntries::new(),
                        },
                    );
                    continue;
                }
            }

            let baseline = match entry.map(|e| RecordRepresentation::from_value(e.data.clone())) {
                Some(Ok(record)) => Some(record),
                Some(Err(e)) => {
                    self.corrupt(key, AppError::Corrupt(format!("record {key}: {e}")))?;
                    continue;
                }
                None => None,
            };
            if baseline.is_none() && queued.is_empty() {
                continue;
            }

            let view = match replay_drafts_on_record(baseline.clone(), queued, &self.current_user_id)
            {
                Ok(view) => view,
                Err(e) => {
                    self.corrupt(key, e.into())?;
                    baseline
                }
            };
            let Some(view) = view else {
                continue;
            };

            let expiration = entry.and_then(|e| e.expiration);
            let normalized = normalize_on_read(view);
            let mut fields = DurableStoreEntries::new();
            for (field_key, value) in normalized.fields {
                fields.insert(
                    field_key,
                    DurableStoreEntry {
                        data: serde_json::to_value(value)?,
                        expiration,
                    },
                );
            }
            overlaid.insert(
                key.clone(),
                OverlaidRecord {
                    record: DurableStoreEntry {
                        data: normalized.record.to_value()?,
                        expiration,
                    },
                    fields,
                },
            );
        }
        Ok(overlaid)
    }

    /// 永続化できる形に変換する。ローカルIDのレコードと作成ドラフト由来のレコードは除外
    async fn prepare_writes(
        &self,
        entries: DurableStoreEntries,
    ) -> Result<DurableStoreEntries, AppError> {
        let mut prepared = DurableStoreEntries::new();
        for (key, entry) in &entries {
            if is_draft_record_key(key) {
                debug!(key = %key, "not persisting entry of an uncreated record");
                continue;
            }
            if let Some((owner, _)) = split_field_key(key) {
                if entries.contains_key(owner) {
                    continue;
                }
            }
            if !is_record_key(key) || !RecordRepresentation::looks_like_record(&entry.data) {
                prepared.insert(key.clone(), entry.clone());
                continue;
            }

            match self.persistable_record(key, entry, &entries).await {
                Ok(Some(data)) => {
                    prepared.insert(
                        key.clone(),
                        DurableStoreEntry {
                            data,
                            expiration: entry.expiration,
                        },
                    );
                }
                Ok(None) => debug!(key = %key, "record only exists as a draft; not persisted"),
                Err(e) => self.corrupt(key, e)?,
            }
        }
        Ok(prepared)
    }

    async fn persistable_record(
        &self,
        key: &str,
        entry: &DurableStoreEntry,
        batch: &DurableStoreEntries,
    ) -> Result<Option<serde_json::Value>, AppError> {
        let record = RecordRepresentation::from_value(entry.data.clone())
            .map_err(|e| AppError::Corrupt(format!("record {key}: {e}")))?;

        let mut resolved = HashMap::new();
        for field in record.fields.values() {
            let FieldEntry::Link(link) = field else {
                continue;
            };
            if let Some(linked) = batch.get(&link.key) {
                resolved.insert(link.key.clone(), linked.data.clone());
            } else if let Some(value) = self.record_store.lookup(&link.key).await {
                resolved.insert(link.key.clone(), value);
            }
        }

        match denormalize_for_persistence(record, |k| resolved.get(k).cloned())? {
            Some(record) => Ok(Some(record.to_value()?)),
            None => Ok(None),
        }
    }

    /// 削除ドラフトが残っているレコードの追い出しを抑止する
    async fn prepare_evictions(&self, ids: &[String]) -> Result<Vec<String>, AppError> {
        let owners: Vec<String> = ids
            .iter()
            .filter_map(|id| owning_record_key(id))
            .map(str::to_string)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let drafts = self.drafts_for(&owners).await?;
        let pending_delete: HashSet<&str> = drafts
            .iter()
            .filter(|(_, actions)| actions.iter().any(DraftAction::is_delete))
            .map(|(tag, _)| tag.as_str())
            .collect();

        Ok(ids
            .iter()
            .filter(|id| {
                if is_draft_record_key(id) {
                    return false;
                }
                match owning_record_key(id) {
                    Some(owner) if pending_delete.contains(owner) => {
                        debug!(key = %id, "eviction suppressed until delete draft uploads");
                        false
                    }
                    _ => true,
                }
            })
            .cloned()
            .collect())
    }
}

impl Drop for DraftAwareDurableStore {
    fn drop(&mut self) {
        if let Ok(mut upstream) = self.upstream.lock() {
            if let Some(subscription) = upstream.take() {
                subscription.unsubscribe();
            }
        }
    }
}

fn redirect_with(key: &str, mappings: &RwLock<HashMap<String, String>>) -> String {
    let Some(owner) = owning_record_key(key) else {
        return key.to_string();
    };
    let Some(record_id) = record_id_from_key(owner) else {
        return key.to_string();
    };
    let canonical = mappings
        .read()
        .ok()
        .and_then(|mappings| mappings.get(record_id).cloned());
    match canonical {
        Some(canonical) => {
            let suffix = &key[owner.len()..];
            format!("{}{}", record_key_from_id(&canonical), suffix)
        }
        None => key.to_string(),
    }
}

/// 下位ストアの変更をこのストアの購読者向けに書き換える
fn remap_changes(
    changes: &[DurableStoreChange],
    mappings: &RwLock<HashMap<String, String>>,
    remap_listeners: &ListenerRegistry<DraftIdMappingEntry>,
) -> Vec<DurableStoreChange> {
    let mut remapped = Vec::with_capacity(changes.len());
    for change in changes {
        match change.segment.as_str() {
            DRAFT_SEGMENT => {
                let mut ids: Vec<String> = Vec::new();
                for id in &change.ids {
                    let Some((tag, _)) = parse_draft_action_key(id) else {
                        continue;
                    };
                    let key = redirect_with(tag.as_str(), mappings);
                    if !ids.contains(&key) {
                        ids.push(key);
                    }
                }
                if !ids.is_empty() {
                    debug!(keys = ?ids, "draft change republished as record change");
                    remapped.push(DurableStoreChange {
                        ids,
                        segment: DEFAULT_SEGMENT.to_string(),
                        change_type: DurableStoreChangeType::SetEntries,
                        is_external_change: true,
                    });
                }
            }
            DRAFT_ID_MAPPINGS_SEGMENT => {
                let entries: Vec<DraftIdMappingEntry> = change
                    .ids
                    .iter()
                    .filter_map(|key| DraftIdMappingEntry::from_storage_key(key))
                    .collect();
                if let Ok(mut cache) = mappings.write() {
                    for entry in &entries {
                        match change.change_type {
                            DurableStoreChangeType::SetEntries => {
                                cache.insert(entry.draft_id.clone(), entry.canonical_id.clone());
                            }
                            DurableStoreChangeType::EvictEntries => {
                                cache.remove(&entry.draft_id);
                            }
                        }
                    }
                }
                if change.change_type == DurableStoreChangeType::SetEntries {
                    for entry in &entries {
                        debug!(draft_id = %entry.draft_id, canonical_id = %entry.canonical_id, "draft id remapped");
                        remap_listeners.emit(entry);
                    }
                }
                remapped.push(change.clone());
            }
            _ => remapped.push(change.clone()),
        }
    }
    remapped
}

#[async_trait]
impl DurableStore for DraftAwareDurableStore {
    async fn get_entries(
        &self,
        ids: &[String],
        segment: &str,
    ) -> Result<Option<DurableStoreEntries>, AppError> {
        if segment != DEFAULT_SEGMENT {
            return self.durable.get_entries(ids, segment).await;
        }

        let requested: Vec<(String, String)> = ids
            .iter()
            .map(|id| (id.clone(), self.redirect_key(id)))
            .collect();
        let mut record_keys: Vec<String> = Vec::new();
        let mut passthrough: Vec<String> = Vec::new();
        for (_, effective) in &requested {
            match owning_record_key(effective) {
                Some(owner) => {
                    if !record_keys.iter().any(|k| k == owner) {
                        record_keys.push(owner.to_string());
                    }
                }
                None => passthrough.push(effective.clone()),
            }
        }

        let mut result = DurableStoreEntries::new();
        if !passthrough.is_empty() {
            if let Some(found) = self.durable.get_entries(&passthrough, segment).await? {
                result.extend(found);
            }
        }

        let overlaid = self.overlay_records(&record_keys, None).await?;
        for (requested_key, effective) in &requested {
            let Some(owner) = owning_record_key(effective) else {
                continue;
            };
            let Some(view) = overlaid.get(owner) else {
                continue;
            };
            if effective == owner {
                result.insert(requested_key.clone(), view.record.clone());
                for (field_key, field) in &view.fields {
                    result.insert(field_key.clone(), field.clone());
                }
            } else if let Some(field) = view.fields.get(effective) {
                result.insert(requested_key.clone(), field.clone());
            }
        }

        Ok(if result.is_empty() { None } else { Some(result) })
    }

    async fn get_all_entries(
        &self,
        segment: &str,
    ) -> Result<Option<DurableStoreEntries>, AppError> {
        if segment != DEFAULT_SEGMENT {
            return self.durable.get_all_entries(segment).await;
        }

        let stored = self
            .durable
            .get_all_entries(segment)
            .await?
            .unwrap_or_default();
        let mut result = DurableStoreEntries::new();
        let mut record_keys: Vec<String> = Vec::new();
        for (key, entry) in &stored {
            if is_record_key(key) {
                record_keys.push(key.clone());
            } else {
                result.insert(key.clone(), entry.clone());
            }
        }
        for action in self.queue.get_queue_actions().await? {
            let tag = action.tag.as_str();
            if action.is_create() && !record_keys.iter().any(|k| k == tag) {
                record_keys.push(tag.to_string());
            }
        }

        let overlaid = self.overlay_records(&record_keys, Some(&stored)).await?;
        for (key, view) in overlaid {
            result.insert(key, view.record);
            result.extend(view.fields);
        }
        Ok(if result.is_empty() { None } else { Some(result) })
    }

    async fn set_entries(
        &self,
        entries: DurableStoreEntries,
        segment: &str,
    ) -> Result<(), AppError> {
        if segment != DEFAULT_SEGMENT {
            return self.durable.set_entries(entries, segment).await;
        }
        let prepared = self.prepare_writes(entries).await?;
        if prepared.is_empty() {
            return Ok(());
        }
        self.durable.set_entries(prepared, segment).await
    }

    async fn evict_entries(&self, ids: &[String], segment: &str) -> Result<(), AppError> {
        if segment != DEFAULT_SEGMENT {
            return self.durable.evict_entries(ids, segment).await;
        }
        let allowed = self.prepare_evictions(ids).await?;
        if allowed.is_empty() {
            return Ok(());
        }
        self.durable.evict_entries(&allowed, segment).await
    }

    async fn batch_operations(
        &self,
        operations: Vec<DurableStoreOperation>,
    ) -> Result<(), AppError> {
        let mut prepared = Vec::with_capacity(operations.len());
        for operation in operations {
            if operation.segment() != DEFAULT_SEGMENT {
                prepared.push(operation);
                continue;
            }
            match operation {
                DurableStoreOperation::SetEntries { segment, entries } => {
                    let entries = self.prepare_writes(entries).await?;
                    if !entries.is_empty() {
                        prepared.push(DurableStoreOperation::SetEntries { segment, entries });
                    }
                }
                DurableStoreOperation::EvictEntries { segment, ids } => {
                    let ids = self.prepare_evictions(&ids).await?;
                    if !ids.is_empty() {
                        prepared.push(DurableStoreOperation::EvictEntries { segment, ids });
                    }
                }
            }
        }
        self.durable.batch_operations(prepared).await
    }

    fn register_on_changed_listener(&self, listener: DurableStoreChangeListener) -> Subscription {
        self.listeners.subscribe(listener)
    }
}
