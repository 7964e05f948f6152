use crate::domain::value_objects::draft::keys::record_key_from_id;
use crate::domain::value_objects::DraftActionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// フィールド値 `{ value, displayValue }`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldValueRepresentation {
    #[serde(rename = "displayValue", default)]
    pub display_value: Option<String>,
    pub value: Value,
}

impl FieldValueRepresentation {
    pub fn new(value: Value) -> Self {
        Self {
            display_value: None,
            value,
        }
    }
}

/// 正規化キャッシュ内の別エントリへの参照
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreLink {
    #[serde(rename = "__ref")]
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldEntry {
    Link(StoreLink),
    Value(FieldValueRepresentation),
}

impl FieldEntry {
    pub fn value(value: Value) -> Self {
        FieldEntry::Value(FieldValueRepresentation::new(value))
    }

    pub fn link(key: impl Into<String>) -> Self {
        FieldEntry::Link(StoreLink { key: key.into() })
    }

    pub fn as_value(&self) -> Option<&FieldValueRepresentation> {
        match self {
            FieldEntry::Value(value) => Some(value),
            FieldEntry::Link(_) => None,
        }
    }
}

/// レコードに付与されるドラフト情報
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DraftRepresentation {
    pub created: bool,
    pub edited: bool,
    pub deleted: bool,
    /// ドラフト適用前のサーバー値。`None` はサーバー側に存在しなかったフィールド
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_values: Option<BTreeMap<String, Option<FieldValueRepresentation>>>,
    #[serde(default)]
    pub draft_action_ids: Vec<DraftActionId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordRepresentation {
    pub api_name: String,
    pub id: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldEntry>,
    #[serde(default)]
    pub last_modified_by_id: Option<String>,
    #[serde(default)]
    pub last_modified_date: Option<String>,
    #[serde(default)]
    pub system_modstamp: Option<String>,
    #[serde(default)]
    pub weak_etag: i64,
    #[serde(default)]
    pub record_type_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drafts: Option<DraftRepresentation>,
}

impl RecordRepresentation {
    pub fn new(api_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            api_name: api_name.into(),
            id: id.into(),
            fields: BTreeMap::new(),
            last_modified_by_id: None,
            last_modified_date: None,
            system_modstamp: None,
            weak_etag: 0,
            record_type_id: None,
            drafts: None,
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), FieldEntry::value(value));
        self
    }

    pub fn key(&self) -> String {
        record_key_from_id(&self.id)
    }

    pub fn field_value(&self, name: &str) -> Option<&FieldValueRepresentation> {
        self.fields.get(name).and_then(FieldEntry::as_value)
    }

    /// 全フィールドが値として展開済みか
    pub fn is_denormalized(&self) -> bool {
        self.fields
            .values()
            .all(|entry| matches!(entry, FieldEntry::Value(_)))
    }

    /// レコードらしい形をしたJSONかどうか
    pub fn looks_like_record(value: &Value) -> bool {
        value.get("apiName").map(Value::is_string).unwrap_or(false)
            && value.get("id").map(Value::is_string).unwrap_or(false)
            && value.get("fields").map(Value::is_object).unwrap_or(false)
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
