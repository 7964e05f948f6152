use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// ドラフトアクションの状態。`Pending → Uploading → {Completed, Error}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftActionStatus {
    Pending,
    Uploading,
    Error,
    Completed,
}

impl DraftActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftActionStatus::Pending => "pending",
            DraftActionStatus::Uploading => "uploading",
            DraftActionStatus::Error => "error",
            DraftActionStatus::Completed => "completed",
        }
    }

    /// サーバー未反映のまま待機しているか
    pub fn is_outstanding(&self) -> bool {
        matches!(self, DraftActionStatus::Pending | DraftActionStatus::Uploading)
    }

    pub fn can_transition_to(&self, next: DraftActionStatus) -> bool {
        matches!(
            (self, next),
            (DraftActionStatus::Pending, DraftActionStatus::Uploading)
                | (DraftActionStatus::Uploading, DraftActionStatus::Completed)
                | (DraftActionStatus::Uploading, DraftActionStatus::Error)
                | (DraftActionStatus::Error, DraftActionStatus::Pending)
        )
    }
}

impl fmt::Display for DraftActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DraftActionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, String> {
        match value {
            "pending" => Ok(DraftActionStatus::Pending),
            "uploading" => Ok(DraftActionStatus::Uploading),
            "error" => Ok(DraftActionStatus::Error),
            "completed" => Ok(DraftActionStatus::Completed),
            other => Err(format!("Unknown draft action status: {other}")),
        }
    }
}
