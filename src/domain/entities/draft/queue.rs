use super::draft_action::{DraftAction, DraftActionMetadata};
use super::resource_request::FetchResponse;
use crate::domain::value_objects::{DraftActionId, DraftActionOperationType, DraftActionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftQueueState {
    /// キューを順に処理中（処理対象がなければ待機）
    Started,
    Stopped,
    /// 通信エラーでアップロードを中断している
    Waiting,
    /// サーバーエラーでアップロードを中断している
    Error,
}

impl DraftQueueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftQueueState::Started => "started",
            DraftQueueState::Stopped => "stopped",
            DraftQueueState::Waiting => "waiting",
            DraftQueueState::Error => "error",
        }
    }
}

/// `process_next_action` の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessActionResult {
    NoActionToProcess,
    ActionAlreadyProcessing,
    ActionSucceeded,
    ActionErrored,
    NetworkError,
}

/// 完了処理で一括適用するキュー操作
#[derive(Debug, Clone, PartialEq)]
pub enum QueueOperation {
    Add(DraftAction),
    Delete(DraftAction),
    /// キーが変わる場合は旧キーを削除して書き直す
    Update {
        previous_key: String,
        action: DraftAction,
    },
}

/// キューの変更通知
#[derive(Debug, Clone, PartialEq)]
pub enum DraftQueueEvent {
    ActionAdded(DraftAction),
    ActionUploading(DraftAction),
    ActionCompleted(DraftAction),
    ActionFailed(DraftAction),
    ActionDeleted(DraftAction),
    ActionUpdated(DraftAction),
    QueueStateChanged(DraftQueueState),
}

/// 外部公開用のエラー形
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DraftQueueItemError {
    pub ok: bool,
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
    pub body_string: String,
}

impl From<&FetchResponse> for DraftQueueItemError {
    fn from(response: &FetchResponse) -> Self {
        let body_string = match &response.body {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        Self {
            ok: response.ok,
            status: response.status,
            status_text: response.status_text.clone(),
            headers: response.headers.clone(),
            body_string,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DraftQueueItem {
    pub id: DraftActionId,
    pub target_id: String,
    pub state: DraftActionStatus,
    pub operation_type: DraftActionOperationType,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub metadata: DraftActionMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DraftQueueItemError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DraftQueueSnapshot {
    pub queue_state: DraftQueueState,
    pub items: Vec<DraftQueueItem>,
}

/// マネージャーが購読者へ通知する操作種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftQueueOperationType {
    ItemAdded,
    ItemUploading,
    ItemCompleted,
    ItemDeleted,
    ItemFailed,
    ItemUpdated,
    QueueStarted,
    QueueStopped,
    QueueWaiting,
    QueueErrored,
}
