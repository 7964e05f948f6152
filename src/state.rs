use crate::application::ports::durable_store::DurableStore;
use crate::application::ports::network::NetworkAdapter;
use crate::application::services::{DraftManager, DurableDraftQueue};
use crate::infrastructure::cache::{DefaultEnvironment, InMemoryRecordStore};
use crate::infrastructure::database::ConnectionPool;
use crate::infrastructure::draft::{
    default_retrievers, DraftAwareDurableStore, DraftAwareEnvironment, DraftAwareNetworkAdapter,
    DurableDraftStore, RecordActionHandler,
};
use crate::infrastructure::storage::SqliteDurableStore;
use crate::shared::config::{AppConfig, DraftConfig};
use crate::shared::error::AppError;
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// ドラフト機能一式の状態
#[derive(Clone)]
pub struct DraftState {
    pub record_store: Arc<InMemoryRecordStore>,
    pub durable_store: Arc<DraftAwareDurableStore>,
    pub queue: Arc<DurableDraftQueue>,
    pub environment: Arc<DraftAwareEnvironment>,
    pub network: Arc<DraftAwareNetworkAdapter>,
    pub manager: Arc<DraftManager>,
}

impl DraftState {
    /// 生の永続ストアとネットワークからドラフト対応の各層を組み立てる
    pub async fn initialize(
        config: &DraftConfig,
        durable: Arc<dyn DurableStore>,
        network: Arc<dyn NetworkAdapter>,
    ) -> Result<Self, AppError> {
        let record_store = Arc::new(InMemoryRecordStore::new());

        let draft_store = Arc::new(DurableDraftStore::new(durable.clone(), config.strict_mode));
        // アップロードはドラフトを重ねない生のネットワークと永続ストアで行う
        let record_handler = Arc::new(RecordActionHandler::new(
            network.clone(),
            durable.clone(),
            record_store.clone(),
        ));
        let queue = DurableDraftQueue::initialize(draft_store, record_handler).await?;

        let durable_store = DraftAwareDurableStore::new(
            durable,
            queue.clone(),
            record_store.clone(),
            config.strict_mode,
            config.current_user_id.clone(),
        )
        .await?;
        let draft_network = Arc::new(DraftAwareNetworkAdapter::new(
            network,
            queue.clone(),
            default_retrievers(),
            config.strict_mode,
            config.current_user_id.clone(),
        ));
        let inner = Arc::new(DefaultEnvironment::new(
            record_store.clone(),
            draft_network.clone(),
            durable_store.clone(),
        ));
        let environment = Arc::new(DraftAwareEnvironment::new(
            inner,
            queue.clone(),
            durable_store.clone(),
            config.records_path.clone(),
        ));
        let manager = Arc::new(DraftManager::new(queue.clone()));

        if config.auto_start_queue {
            manager.start_queue().await?;
        }
        info!(
            strict_mode = config.strict_mode,
            auto_start = config.auto_start_queue,
            "draft state initialized"
        );

        Ok(Self {
            record_store,
            durable_store,
            queue,
            environment,
            network: draft_network,
            manager,
        })
    }

    /// SQLite を永続ストアにして初期化する
    pub async fn with_sqlite(
        config: &AppConfig,
        network: Arc<dyn NetworkAdapter>,
    ) -> anyhow::Result<Self> {
        config
            .validate()
            .map_err(anyhow::Error::msg)
            .context("invalid configuration")?;
        ensure_database_dir(&config.database.url)?;

        let pool = ConnectionPool::from_config(&config.database)
            .await
            .with_context(|| format!("failed to open {}", config.database.url))?;
        pool.migrate()
            .await
            .context("failed to migrate durable store")?;
        let durable = Arc::new(SqliteDurableStore::new(pool));

        let state = Self::initialize(&config.drafts, durable, network)
            .await
            .context("failed to initialize draft state")?;
        Ok(state)
    }
}

fn ensure_database_dir(url: &str) -> Result<(), AppError> {
    let path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path.starts_with(':') {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::Storage(format!("failed to create {}: {e}", parent.display())))?;
        }
    }
    Ok(())
}
