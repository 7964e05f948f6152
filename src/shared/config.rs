use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub drafts: DraftConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftConfig {
    /// 開発ビルド相当の厳格モード。破損データや下書きの漏洩をエラーとして扱う
    pub strict_mode: bool,
    /// 作成ドラフトから合成するレコードに刻む更新者ID
    pub current_user_id: String,
    /// レコードCUDリクエストを判定するパス
    pub records_path: String,
    /// 起動直後にキューを開始するか
    pub auto_start_queue: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://./data/drafts.db?mode=rwc".to_string(),
                max_connections: 5,
                connection_timeout: 30,
            },
            drafts: DraftConfig::default(),
            logging: LoggingConfig {
                filter: "offline_drafts=debug,info".to_string(),
            },
        }
    }
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            strict_mode: cfg!(debug_assertions),
            current_user_id: String::new(),
            records_path: "/ui-api/records".to_string(),
            auto_start_queue: false,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("DRAFTS_DATABASE_URL") {
            let v = v.trim();
            if !v.is_empty() {
                cfg.database.url = v.to_string();
            }
        }
        if let Ok(v) = std::env::var("DRAFTS_DATABASE_MAX_CONNECTIONS") {
            if let Some(value) = parse_u32(&v) {
                cfg.database.max_connections = value;
            }
        }
        if let Ok(v) = std::env::var("DRAFTS_STRICT_MODE") {
            cfg.drafts.strict_mode = parse_bool(&v, cfg.drafts.strict_mode);
        }
        if let Ok(v) = std::env::var("DRAFTS_CURRENT_USER_ID") {
            cfg.drafts.current_user_id = v.trim().to_string();
        }
        if let Ok(v) = std::env::var("DRAFTS_RECORDS_PATH") {
            let v = v.trim();
            if !v.is_empty() {
                cfg.drafts.records_path = v.to_string();
            }
        }
        if let Ok(v) = std::env::var("DRAFTS_AUTO_START_QUEUE") {
            cfg.drafts.auto_start_queue = parse_bool(&v, cfg.drafts.auto_start_queue);
        }
        if let Ok(v) = std::env::var("DRAFTS_LOG_FILTER") {
            if !v.trim().is_empty() {
                cfg.logging.filter = v.trim().to_string();
            }
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }
        if self.drafts.current_user_id.trim().is_empty() {
            return Err("Drafts current_user_id must not be empty".to_string());
        }
        if !self.drafts.records_path.starts_with('/') {
            return Err("Drafts records_path must start with '/'".to_string());
        }
        Ok(())
    }
}

fn parse_bool(s: &str, default: bool) -> bool {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn parse_u32(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok()
}
