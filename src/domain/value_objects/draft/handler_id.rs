use serde::{Deserialize, Serialize};
use std::fmt;

/// 組み込みのレコードCRUDハンドラ
pub const RECORD_HANDLER_ID: &str = "RECORD";

/// ドラフトアクションを処理する実行戦略の識別子。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DraftHandlerId(String);

impl DraftHandlerId {
    pub fn new(value: String) -> Result<Self, String> {
        if value.trim().is_empty() {
            return Err("Draft handler ID cannot be empty".to_string());
        }
        Ok(Self(value))
    }

    pub fn record() -> Self {
        Self(RECORD_HANDLER_ID.to_string())
    }

    pub fn is_record(&self) -> bool {
        self.0 == RECORD_HANDLER_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DraftHandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<DraftHandlerId> for String {
    fn from(value: DraftHandlerId) -> Self {
        value.0
    }
}
