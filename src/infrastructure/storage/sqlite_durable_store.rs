use crate::application::ports::durable_store::{
    DurableStore, DurableStoreChange, DurableStoreChangeListener, DurableStoreEntries,
    DurableStoreEntry, DurableStoreExpiration, DurableStoreOperation,
};
use crate::infrastructure::database::connection_pool::ConnectionPool;
use crate::shared::error::AppError;
use crate::shared::listeners::{ListenerRegistry, Subscription};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{FromRow, Sqlite, Transaction};
use tracing::debug;

#[derive(Debug, Clone, FromRow)]
struct DurableEntryRow {
    key: String,
    data: String,
    expiration_fresh: Option<i64>,
    expiration_stale: Option<i64>,
}

impl DurableEntryRow {
    fn into_entry(self) -> Result<(String, DurableStoreEntry), AppError> {
        let data = serde_json::from_str(&self.data).map_err(|e| {
            AppError::DeserializationError(format!("durable entry {}: {}", self.key, e))
        })?;
        let expiration = match (self.expiration_fresh, self.expiration_stale) {
            (Some(fresh), Some(stale)) => Some(DurableStoreExpiration { fresh, stale }),
            _ => None,
        };
        Ok((self.key, DurableStoreEntry { data, expiration }))
    }
}

/// SQLite上の `durable_entries` テーブルを使う永続ストア
pub struct SqliteDurableStore {
    pool: ConnectionPool,
    listeners: ListenerRegistry<Vec<DurableStoreChange>>,
}

impl SqliteDurableStore {
    pub fn new(pool: ConnectionPool) -> Self {
        Self {
            pool,
            listeners: ListenerRegistry::new(),
        }
    }

    async fn apply(
        tx: &mut Transaction<'_, Sqlite>,
        operation: &DurableStoreOperation,
    ) -> Result<(), AppError> {
        match operation {
            DurableStoreOperation::SetEntries { segment, entries } => {
                let now = Utc::now().timestamp_millis();
                for (key, entry) in entries {
                    let data = serde_json::to_string(&entry.data)?;
                    sqlx::query(
                        r#"
                        INSERT INTO durable_entries
                            (segment, key, data, expiration_fresh, expiration_stale, updated_at)
                        VALUES (?, ?, ?, ?, ?, ?)
                        ON CONFLICT(segment, key) DO UPDATE SET
                            data = excluded.data,
                            expiration_fresh = excluded.expiration_fresh,
                            expiration_stale = excluded.expiration_stale,
                            updated_at = excluded.updated_at
                        "#,
                    )
                    .bind(segment)
                    .bind(key)
                    .bind(data)
                    .bind(entry.expiration.map(|e| e.fresh))
                    .bind(entry.expiration.map(|e| e.stale))
                    .bind(now)
                    .execute(&mut **tx)
                    .await?;
                }
            }
            DurableStoreOperation::EvictEntries { segment, ids } => {
                for id in ids {
                    sqlx::query("DELETE FROM durable_entries WHERE segment = ? AND key = ?")
                        .bind(segment)
                        .bind(id)
                        .execute(&mut **tx)
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn run(&self, operations: Vec<DurableStoreOperation>) -> Result<(), AppError> {
        if operations.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.get_pool().begin().await?;
        for operation in &operations {
            Self::apply(&mut tx, operation).await?;
        }
        tx.commit().await?;

        debug!(operations = operations.len(), "durable batch committed");
        let changes = operations.iter().map(DurableStoreOperation::to_change).collect();
        self.listeners.emit(&changes);
        Ok(())
    }

    fn collect(rows: Vec<DurableEntryRow>) -> Result<Option<DurableStoreEntries>, AppError> {
        if rows.is_empty() {
            return Ok(None);
        }
        let entries = rows
            .into_iter()
            .map(DurableEntryRow::into_entry)
            .collect::<Result<DurableStoreEntries, AppError>>()?;
        Ok(Some(entries))
    }
}

#[async_trait]
impl DurableStore for SqliteDurableStore {
    async fn get_entries(
        &self,
        ids: &[String],
        segment: &str,
    ) -> Result<Option<DurableStoreEntries>, AppError> {
        if ids.is_empty() {
            return Ok(None);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT key, data, expiration_fresh, expiration_stale FROM durable_entries \
             WHERE segment = ? AND key IN ({placeholders})"
        );
        let mut query = sqlx::query_as::<_, DurableEntryRow>(&sql).bind(segment);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(self.pool.get_pool()).await?;
        Self::collect(rows)
    }

    async fn get_all_entries(
        &self,
        segment: &str,
    ) -> Result<Option<DurableStoreEntries>, AppError> {
        let rows = sqlx::query_as::<_, DurableEntryRow>(
            "SELECT key, data, expiration_fresh, expiration_stale FROM durable_entries WHERE segment = ?",
        )
        .bind(segment)
        .fetch_all(self.pool.get_pool())
        .await?;
        Self::collect(rows)
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
        .await
    }

    async fn evict_entries(&self, ids: &[String], segment: &str) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.run(vec![DurableStoreOperation::EvictEntries {
            segment: segment.to_string(),
            ids: ids.to_vec(),
        }])
        .await
    }

    async fn batch_operations(
        &self,
        operations: Vec<DurableStoreOperation>,
    ) -> Result<(), AppError> {
        self.run(operations).await
    }

    fn register_on_changed_listener(&self, listener: DurableStoreChangeListener) -> Subscription {
        self.listeners.subscribe(listener)
    }
}
