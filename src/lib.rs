//! オフラインで行ったレコード変更をドラフトとして保持し、
//! 接続回復後に順序通りアップロードするためのライブラリ。

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod shared;
pub mod state;

pub use application::services::{DraftManager, DurableDraftQueue};
pub use shared::config::AppConfig;
pub use shared::error::{AppError, Result};
pub use state::DraftState;

/// ログ設定の初期化。`RUST_LOG` があればそちらを優先する
pub fn init_logging(config: &shared::config::LoggingConfig) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.filter.as_str().into());
    // 二重初期化は無視する
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
