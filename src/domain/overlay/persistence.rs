use super::OverlayError;
use crate::domain::entities::{FieldEntry, FieldValueRepresentation, RecordRepresentation};
use crate::domain::value_objects::draft::keys::field_key;
use serde_json::Value;

/// 永続化形から復元した、参照形式のレコードとフィールドエントリ
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub key: String,
    pub record: RecordRepresentation,
    pub fields: Vec<(String, FieldValueRepresentation)>,
}

/// `__ref` の参照先を解決してフィールドを値に置き換える。
///
/// 参照先が一つでも見つからなければレコード全体を拒否する。
pub fn denormalize_record<F>(
    mut record: RecordRepresentation,
    mut resolve: F,
) -> Result<RecordRepresentation, OverlayError>
where
    F: FnMut(&str) -> Option<Value>,
{
    let record_key = record.key();
    for (name, entry) in record.fields.iter_mut() {
        let FieldEntry::Link(link) = entry else {
            continue;
        };
        let resolved = resolve(&link.key).ok_or_else(|| OverlayError::MissingLink {
            record_key: record_key.clone(),
            field: name.clone(),
            link: link.key.clone(),
        })?;
        let value: FieldValueRepresentation =
            serde_json::from_value(resolved).map_err(|e| OverlayError::InvalidFieldEntry {
                key: link.key.clone(),
                reason: e.to_string(),
            })?;
        *entry = FieldEntry::Value(value);
    }
    Ok(record)
}

/// ドラフト情報を剥がし、サーバー値をフィールドへ戻す。
///
/// 作成ドラフトから合成されたレコードは永続化しない (`None`)。
/// 編集済みなのにサーバー値が無いレコードは漏洩として扱う。
pub fn strip_drafts(
    mut record: RecordRepresentation,
) -> Result<Option<RecordRepresentation>, OverlayError> {
    let Some(drafts) = record.drafts.take() else {
        return Ok(Some(record));
    };
    if drafts.created {
        return Ok(None);
    }
    if drafts.edited {
        let server_values = drafts.server_values.ok_or_else(|| OverlayError::DraftLeak {
            record_key: record.key(),
        })?;
        for (name, value) in server_values {
            match value {
                Some(value) => {
                    record.fields.insert(name, FieldEntry::Value(value));
                }
                None => {
                    record.fields.remove(&name);
                }
            }
        }
    }
    Ok(Some(record))
}

pub fn denormalize_for_persistence<F>(
    record: RecordRepresentation,
    resolve: F,
) -> Result<Option<RecordRepresentation>, OverlayError>
where
    F: FnMut(&str) -> Option<Value>,
{
    strip_drafts(denormalize_record(record, resolve)?)
}

/// 永続化形（全フィールド展開済み）を参照形式へ分解する
pub fn normalize_on_read(mut record: RecordRepresentation) -> NormalizedRecord {
    let key = record.key();
    let mut fields = Vec::with_capacity(record.fields.len());
    for (name, entry) in record.fields.iter_mut() {
        if matches!(entry, FieldEntry::Link(_)) {
            continue;
        }
        let child_key = field_key(&key, name);
        let link = FieldEntry::link(child_key.clone());
        if let FieldEntry::Value(value) = std::mem::replace(entry, link) {
            fields.push((child_key, value));
        }
    }
    NormalizedRecord {
        key,
        record,
        fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{DraftAction, DraftRepresentation, ResourceRequest};
    use crate::domain::overlay::replay_drafts_on_record;
    use crate::domain::value_objects::draft::keys::record_key_from_id;
    use crate::domain::value_objects::{DraftActionId, DraftHandlerId, DraftTag, HttpMethod};
    use chrono::{DateTime, Utc};
    use serde_json::json;
    use std::collections::HashMap;

    fn update(id: u64, fields: Value) -> DraftAction {
        DraftAction::new_pending(
            DraftActionId::from_millis(id),
            DraftTag::new(record_key_from_id("001A")).unwrap(),
            "001A".to_string(),
            DraftHandlerId::record(),
            Some(
                ResourceRequest::new(HttpMethod::Patch, "/ui-api/records/001A")
                    .with_body(json!({ "fields": fields })),
            ),
            Default::default(),
            DateTime::<Utc>::from_timestamp_millis(id as i64).unwrap(),
        )
    }

    fn no_links(_: &str) -> Option<Value> {
        None
    }

    #[test]
    fn test_round_trip_restores_baseline_fields() {
        let baseline = RecordRepresentation::new("Account", "001A")
            .with_field("Name", json!("X"))
            .with_field("Industry", json!("Retail"));
        let drafts = vec![
            update(1, json!({ "Name": "Y" })),
            update(2, json!({ "Name": "Z", "Phone": "555" })),
        ];

        let overlaid = replay_drafts_on_record(Some(baseline.clone()), &drafts, "005")
            .unwrap()
            .unwrap();
        let persisted = denormalize_for_persistence(overlaid, no_links)
            .unwrap()
            .unwrap();

        assert_eq!(persisted, baseline);
        assert!(persisted.field_value("Phone").is_none());
    }

    #[test]
    fn test_created_records_are_never_persisted() {
        let mut record = RecordRepresentation::new("Account", "DRAFT-1");
        record.drafts = Some(DraftRepresentation {
            created: true,
            ..Default::default()
        });
        assert_eq!(strip_drafts(record).unwrap(), None);
    }

    #[test]
    fn test_edited_without_server_values_is_a_leak() {
        let mut record = RecordRepresentation::new("Account", "001A");
        record.drafts = Some(DraftRepresentation {
            edited: true,
            ..Default::default()
        });
        assert!(matches!(
            strip_drafts(record),
            Err(OverlayError::DraftLeak { .. })
        ));
    }

    #[test]
    fn test_denormalize_resolves_links() {
        let key = record_key_from_id("001A");
        let mut record = RecordRepresentation::new("Account", "001A");
        record
            .fields
            .insert("Name".to_string(), FieldEntry::link(field_key(&key, "Name")));

        let mut source = HashMap::new();
        source.insert(field_key(&key, "Name"), json!({ "value": "Acme", "displayValue": null }));

        let flat = denormalize_record(record, |k| source.get(k).cloned()).unwrap();
        assert_eq!(flat.field_value("Name").unwrap().value, json!("Acme"));
    }

    #[test]
    fn test_missing_link_rejects_record() {
        let key = record_key_from_id("001A");
        let mut record = RecordRepresentation::new("Account", "001A");
        record
            .fields
            .insert("Owner".to_string(), FieldEntry::link(field_key(&key, "Owner")));

        let err = denormalize_for_persistence(record, no_links).unwrap_err();
        assert!(matches!(err, OverlayError::MissingLink { ref field, .. } if field == "Owner"));
    }

    #[test]
    fn test_normalize_on_read_splits_fields() {
        let record = RecordRepresentation::new("Account", "001A").with_field("Name", json!("Acme"));
        let normalized = normalize_on_read(record);

        let name_key = field_key(&normalized.key, "Name");
        assert_eq!(normalized.fields.len(), 1);
        assert_eq!(normalized.fields[0].0, name_key);
        assert_eq!(normalized.fields[0].1.value, json!("Acme"));
        assert_eq!(normalized.record.fields["Name"], FieldEntry::link(name_key));
    }
}
