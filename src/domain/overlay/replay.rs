use super::OverlayError;
use crate::domain::entities::{
    DraftAction, DraftRepresentation, FieldEntry, FieldValueRepresentation, RecordRepresentation,
};
use crate::domain::value_objects::DraftActionOperationType;
use chrono::SecondsFormat;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 作成ドラフトから合成したレコードの weakEtag
const SYNTHETIC_WEAK_ETAG: i64 = -1;

/// ベースラインに同一タグのドラフトを登録順に適用したビューを返す。
///
/// ベースラインが無く先頭が作成ドラフトでもない場合は `None`。
/// 呼び出し側は `drafts` を ID 順に並べて渡すこと。
pub fn replay_drafts_on_record(
    baseline: Option<RecordRepresentation>,
    drafts: &[DraftAction],
    current_user_id: &str,
) -> Result<Option<RecordRepresentation>, OverlayError> {
    if drafts.is_empty() {
        return Ok(baseline);
    }

    let mut record = baseline;
    if let Some(existing) = record.as_mut() {
        if !existing.is_denormalized() {
            return Err(OverlayError::NotDenormalized {
                record_key: existing.key(),
            });
        }
        existing.drafts = Some(DraftRepresentation::default());
    }

    for (index, action) in drafts.iter().enumerate() {
        let operation = action
            .operation_type()
            .map_err(|e| OverlayError::UnsupportedAction {
                action_id: action.id.to_string(),
                reason: e.to_string(),
            })?;

        match operation {
            DraftActionOperationType::Custom => continue,
            DraftActionOperationType::Create => {
                if index != 0 {
                    return Err(OverlayError::CreateNotFirst {
                        action_id: action.id.to_string(),
                    });
                }
                if record.is_none() {
                    record = Some(synthesize_from_create(action, current_user_id)?);
                }
            }
            DraftActionOperationType::Update => {
                let Some(target) = record.as_mut() else {
                    return Ok(None);
                };
                apply_update(target, action)?;
            }
            DraftActionOperationType::Delete => {
                let Some(target) = record.as_mut() else {
                    return Ok(None);
                };
                drafts_of(target).deleted = true;
            }
        }

        if let Some(target) = record.as_mut() {
            drafts_of(target).draft_action_ids.push(action.id.clone());
        }
    }

    Ok(record)
}

fn drafts_of(record: &mut RecordRepresentation) -> &mut DraftRepresentation {
    record.drafts.get_or_insert_with(DraftRepresentation::default)
}

fn payload_fields(action: &DraftAction) -> Result<&Map<String, Value>, OverlayError> {
    action
        .request_body()
        .and_then(|body| body.get("fields"))
        .and_then(Value::as_object)
        .ok_or_else(|| OverlayError::MalformedPayload {
            action_id: action.id.to_string(),
            reason: "body.fields must be an object".to_string(),
        })
}

fn synthesize_from_create(
    action: &DraftAction,
    current_user_id: &str,
) -> Result<RecordRepresentation, OverlayError> {
    let api_name = action
        .request_body()
        .and_then(|body| body.get("apiName"))
        .and_then(Value::as_str)
        .ok_or_else(|| OverlayError::MissingApiName {
            action_id: action.id.to_string(),
        })?;
    let fields = payload_fields(action)?;

    let stamped_at = action
        .timestamp
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut record = RecordRepresentation::new(api_name, action.target_id.clone());
    for (name, value) in fields {
        record.fields.insert(name.clone(), FieldEntry::value(value.clone()));
    }
    record.last_modified_by_id = Some(current_user_id.to_string());
    record.last_modified_date = Some(stamped_at.clone());
    record.system_modstamp = Some(stamped_at);
    record.weak_etag = SYNTHETIC_WEAK_ETAG;
    record.drafts = Some(DraftRepresentation {
        created: true,
        ..Default::default()
    });
    Ok(record)
}

fn apply_update(record: &mut RecordRepresentation, action: &DraftAction) -> Result<(), OverlayError> {
    let fields = payload_fields(action)?.clone();
    let created = record.drafts.as_ref().map(|d| d.created).unwrap_or(false);

    let mut captured: BTreeMap<String, Option<FieldValueRepresentation>> = BTreeMap::new();
    for (name, value) in fields {
        if !created {
            let prior = record.fields.get(&name).and_then(FieldEntry::as_value).cloned();
            captured.insert(name.clone(), prior);
        }
        record.fields.insert(name, FieldEntry::value(value));
    }

    let drafts = drafts_of(record);
    drafts.edited = true;
    if !created {
        let server_values = drafts.server_values.get_or_insert_with(BTreeMap::new);
        for (name, prior) in captured {
            // 最初に上書きされた時点の値だけを保持する
            server_values.entry(name).or_insert(prior);
        }
    }
    Ok(())
}
