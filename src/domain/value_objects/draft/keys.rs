//! 永続化キーとレコードキーの組み立て・分解。

use super::{DraftActionId, DraftTag};
use crate::domain::constants::{
    DRAFT_ACTION_KEY_JUNCTION, DRAFT_ID_MAPPING_KEY_JUNCTION, DRAFT_ID_MAPPING_KEY_PREFIX,
    DRAFT_ID_PREFIX, FIELD_KEY_JUNCTION, RECORD_KEY_PREFIX,
};
use uuid::Uuid;

pub fn record_key_from_id(record_id: &str) -> String {
    format!("{RECORD_KEY_PREFIX}{record_id}")
}

/// レコード本体のキーであれば ID を返す（フィールドキーは対象外）
pub fn record_id_from_key(key: &str) -> Option<&str> {
    let id = key.strip_prefix(RECORD_KEY_PREFIX)?;
    if id.is_empty() || id.contains(FIELD_KEY_JUNCTION) {
        return None;
    }
    Some(id)
}

pub fn is_record_key(key: &str) -> bool {
    record_id_from_key(key).is_some()
}

pub fn field_key(record_key: &str, field_name: &str) -> String {
    format!("{record_key}{FIELD_KEY_JUNCTION}{field_name}")
}

/// `<recordKey>__fields__<Field>` を `(recordKey, Field)` に分解
pub fn split_field_key(key: &str) -> Option<(&str, &str)> {
    if !key.starts_with(RECORD_KEY_PREFIX) {
        return None;
    }
    key.split_once(FIELD_KEY_JUNCTION)
}

/// フィールドキーなら親レコードキー、レコードキーならそのまま
pub fn owning_record_key(key: &str) -> Option<&str> {
    if is_record_key(key) {
        return Some(key);
    }
    split_field_key(key).map(|(record_key, _)| record_key)
}

pub fn draft_action_key(tag: &DraftTag, id: &DraftActionId) -> String {
    format!("{}{}{}", tag.as_str(), DRAFT_ACTION_KEY_JUNCTION, id.as_str())
}

pub fn parse_draft_action_key(key: &str) -> Option<(DraftTag, DraftActionId)> {
    let (tag, id) = key.rsplit_once(DRAFT_ACTION_KEY_JUNCTION)?;
    let tag = DraftTag::new(tag.to_string()).ok()?;
    let id = DraftActionId::parse(id).ok()?;
    Some((tag, id))
}

pub fn id_mapping_key(draft_id: &str, canonical_id: &str) -> String {
    format!("{DRAFT_ID_MAPPING_KEY_PREFIX}{draft_id}{DRAFT_ID_MAPPING_KEY_JUNCTION}{canonical_id}")
}

/// `(draftId, canonicalId)` を返す
pub fn parse_id_mapping_key(key: &str) -> Option<(&str, &str)> {
    let rest = key.strip_prefix(DRAFT_ID_MAPPING_KEY_PREFIX)?;
    let (draft_id, canonical_id) = rest.split_once(DRAFT_ID_MAPPING_KEY_JUNCTION)?;
    if draft_id.is_empty() || canonical_id.is_empty() {
        return None;
    }
    Some((draft_id, canonical_id))
}

pub fn generate_draft_id() -> String {
    format!("{DRAFT_ID_PREFIX}{}", Uuid::new_v4().simple())
}

pub fn is_draft_id(id: &str) -> bool {
    id.starts_with(DRAFT_ID_PREFIX)
}

/// キーがローカル採番（未作成）レコードを指しているか
pub fn is_draft_record_key(key: &str) -> bool {
    owning_record_key(key)
        .and_then(record_id_from_key)
        .map(is_draft_id)
        .unwrap_or(false)
}
