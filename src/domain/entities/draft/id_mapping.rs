use crate::domain::value_objects::draft::keys::{id_mapping_key, parse_id_mapping_key};
use serde::{Deserialize, Serialize};

/// 作成ドラフトの完了時に記録する、ローカルIDと確定IDの対応
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct DraftIdMappingEntry {
    pub draft_id: String,
    pub canonical_id: String,
}

impl DraftIdMappingEntry {
    pub fn new(draft_id: impl Into<String>, canonical_id: impl Into<String>) -> Self {
        Self {
            draft_id: draft_id.into(),
            canonical_id: canonical_id.into(),
        }
    }

    /// `DraftIdMapping::<draftId>::<canonicalId>`
    pub fn storage_key(&self) -> String {
        id_mapping_key(&self.draft_id, &self.canonical_id)
    }

    pub fn from_storage_key(key: &str) -> Option<Self> {
        parse_id_mapping_key(key).map(|(draft_id, canonical_id)| Self::new(draft_id, canonical_id))
    }
}
