//! ドラフトをサーバー値に重ねる純粋な変換群。
//!
//! - [`replay_drafts_on_record`]: ベースラインにドラフトを順に適用
//! - [`denormalize_for_persistence`]: 参照を展開し、ドラフトを剥がして永続化形へ
//! - [`normalize_on_read`]: 永続化形をレコード本体とフィールドエントリへ分解

pub mod persistence;
pub mod replay;

pub use persistence::{
    denormalize_for_persistence, denormalize_record, normalize_on_read, strip_drafts,
    NormalizedRecord,
};
pub use replay::replay_drafts_on_record;

use crate::shared::error::AppError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OverlayError {
    #[error("create draft {action_id} has no apiName in its payload")]
    MissingApiName { action_id: String },
    #[error("draft {action_id} has a malformed payload: {reason}")]
    MalformedPayload { action_id: String, reason: String },
    #[error("create draft {action_id} must be the first draft of its tag")]
    CreateNotFirst { action_id: String },
    #[error("draft {action_id} is not a record operation: {reason}")]
    UnsupportedAction { action_id: String, reason: String },
    #[error("record {record_key} still holds link fields")]
    NotDenormalized { record_key: String },
    #[error("record {record_key} field {field} links to missing entry {link}")]
    MissingLink {
        record_key: String,
        field: String,
        link: String,
    },
    #[error("entry {key} is not a field value: {reason}")]
    InvalidFieldEntry { key: String, reason: String },
    #[error("record {record_key} is edited but carries no server values")]
    DraftLeak { record_key: String },
}

impl From<OverlayError> for AppError {
    fn from(err: OverlayError) -> Self {
        AppError::Corrupt(err.to_string())
    }
}
