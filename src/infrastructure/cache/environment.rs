use crate::application::ports::durable_store::{
    DurableStore, DurableStoreChange, DurableStoreEntries, DurableStoreEntry,
};
use crate::application::ports::environment::{Environment, RecordStore};
use crate::application::ports::network::NetworkAdapter;
use crate::domain::constants::DEFAULT_SEGMENT;
use crate::domain::entities::{FetchResponse, FieldEntry, RecordRepresentation, ResourceRequest};
use crate::domain::overlay::{denormalize_record, normalize_on_read};
use crate::domain::value_objects::draft::keys::{is_record_key, owning_record_key};
use crate::domain::value_objects::HttpMethod;
use crate::shared::error::AppError;
use crate::shared::listeners::Subscription;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

type StaleKeys = Arc<Mutex<HashSet<String>>>;

/// メモリキャッシュ・ネットワーク・永続ストアをまとめた標準の実行環境
///
/// 永続ストアが外部起因の変更を通知したレコードは古いとみなし、次の参照時に
/// メモリから捨てて永続ストアから読み直す。
pub struct DefaultEnvironment {
    record_store: Arc<dyn RecordStore>,
    network: Arc<dyn NetworkAdapter>,
    durable_store: Arc<dyn DurableStore>,
    /// 読み直しが必要なレコードキー
    stale: StaleKeys,
    subscription: Mutex<Option<Subscription>>,
}

impl DefaultEnvironment {
    pub fn new(
        record_store: Arc<dyn RecordStore>,
        network: Arc<dyn NetworkAdapter>,
        durable_store: Arc<dyn DurableStore>,
    ) -> Self {
        let stale: StaleKeys = Arc::new(Mutex::new(HashSet::new()));
        let marks = Arc::clone(&stale);
        let subscription = durable_store.register_on_changed_listener(Arc::new(
            move |changes: &Vec<DurableStoreChange>| mark_stale(changes, &marks),
        ));
        Self {
            record_store,
            network,
            durable_store,
            stale,
            subscription: Mutex::new(Some(subscription)),
        }
    }

    /// 古い印が付いていれば外して true を返す
    fn take_stale(&self, record_key: &str) -> bool {
        self.stale
            .lock()
            .map(|mut stale| stale.remove(record_key))
            .unwrap_or(false)
    }

    /// 永続ストアから復元してメモリへ載せる（永続ストアへは書き戻さない）
    async fn revive(&self, key: &str) -> Result<(), AppError> {
        let Some(mut entries) = self
            .durable_store
            .get_entries(&[key.to_string()], DEFAULT_SEGMENT)
            .await?
        else {
            return Ok(());
        };

        // 参照先のフィールドエントリが同梱されていなければ追加で読む
        let missing: Vec<String> = entries
            .values()
            .filter(|entry| RecordRepresentation::looks_like_record(&entry.data))
            .filter_map(|entry| RecordRepresentation::from_value(entry.data.clone()).ok())
            .flat_map(|record| record.fields.into_values())
            .filter_map(|field| match field {
                FieldEntry::Link(link) => Some(link.key),
                FieldEntry::Value(_) => None,
            })
            .filter(|link| !entries.contains_key(link))
            .collect();
        if !missing.is_empty() {
            if let Some(linked) = self
                .durable_store
                .get_entries(&missing, DEFAULT_SEGMENT)
                .await?
            {
                entries.extend(linked);
            }
        }

        debug!(key = %key, entries = entries.len(), "revived from durable store");
        for (entry_key, entry) in entries {
            self.record_store.ingest(&entry_key, entry.data).await;
        }
        Ok(())
    }

    /// レコードの参照フィールドをメモリ上のエントリで展開する
    async fn materialize(&self, value: Value) -> Result<Value, AppError> {
        if !RecordRepresentation::looks_like_record(&value) {
            return Ok(value);
        }
        let record = RecordRepresentation::from_value(value)?;
        if record.is_denormalized() {
            return Ok(record.to_value()?);
        }
        let mut resolved = HashMap::new();
        for entry in record.fields.values() {
            if let FieldEntry::Link(link) = entry {
                if let Some(value) = self.record_store.lookup(&link.key).await {
                    resolved.insert(link.key.clone(), value);
                }
            }
        }
        let record = denormalize_record(record, |k| resolved.get(k).cloned())?;
        Ok(record.to_value()?)
    }
}

#[async_trait]
impl Environment for DefaultEnvironment {
    async fn dispatch_resource_request(
        &self,
        request: ResourceRequest,
    ) -> Result<FetchResponse, AppError> {
        let is_read = matches!(request.http_method(), Ok(HttpMethod::Get));
        let response = self.network.dispatch(request).await?;
        if is_read
            && response.is_success()
            && RecordRepresentation::looks_like_record(&response.body)
        {
            let record = RecordRepresentation::from_value(response.body.clone())?;
            self.store_ingest(&record.key(), response.body.clone()).await?;
        }
        Ok(response)
    }

    async fn evict(&self, key: &str) -> Result<(), AppError> {
        if !is_record_key(key) {
            self.record_store.evict(key).await;
            return Ok(());
        }
        for candidate in self.record_store.keys().await {
            if owning_record_key(&candidate) == Some(key) {
                self.record_store.evict(&candidate).await;
            }
        }
        Ok(())
    }

    async fn store_lookup(&self, key: &str) -> Result<Option<Value>, AppError> {
        let owner = owning_record_key(key).unwrap_or(key).to_string();
        if self.take_stale(&owner) {
            debug!(key = %owner, "dropping stale entries before lookup");
            self.evict(&owner).await?;
        }
        if self.record_store.lookup(key).await.is_none() {
            self.revive(key).await?;
        }
        match self.record_store.lookup(key).await {
            Some(value) => Ok(Some(self.materialize(value).await?)),
            None => Ok(None),
        }
    }

    async fn store_ingest(&self, key: &str, value: Value) -> Result<(), AppError> {
        self.take_stale(owning_record_key(key).unwrap_or(key));
        let mut persisted = DurableStoreEntries::new();
        if RecordRepresentation::looks_like_record(&value) {
            let normalized = normalize_on_read(RecordRepresentation::from_value(value)?);
            for (field_key, field_value) in normalized.fields {
                let data = serde_json::to_value(field_value)?;
                self.record_store.ingest(&field_key, data.clone()).await;
                persisted.insert(field_key, DurableStoreEntry::new(data));
            }
            let data = normalized.record.to_value()?;
            self.record_store.ingest(key, data.clone()).await;
            persisted.insert(key.to_string(), DurableStoreEntry::new(data));
        } else {
            self.record_store.ingest(key, value.clone()).await;
            persisted.insert(key.to_string(), DurableStoreEntry::new(value));
        }
        self.durable_store
            .set_entries(persisted, DEFAULT_SEGMENT)
            .await
    }
}

impl Drop for DefaultEnvironment {
    fn drop(&mut self) {
        if let Ok(mut subscription) = self.subscription.lock() {
            if let Some(subscription) = subscription.take() {
                subscription.unsubscribe();
            }
        }
    }
}

fn mark_stale(changes: &[DurableStoreChange], stale: &Mutex<HashSet<String>>) {
    let keys: Vec<String> = changes
        .iter()
        .filter(|change| change.is_external_change && change.segment == DEFAULT_SEGMENT)
        .flat_map(|change| change.ids.iter())
        .map(|id| owning_record_key(id).unwrap_or(id.as_str()).to_string())
        .collect();
    if keys.is_empty() {
        return;
    }
    if let Ok(mut stale) = stale.lock() {
        stale.extend(keys);
    }
}
