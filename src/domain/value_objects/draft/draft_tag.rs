use serde::{Deserialize, Serialize};
use std::fmt;

/// ドラフトが対象とするエンティティのキャッシュキー。同一タグのアクションはエンキュー順に適用される。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DraftTag(String);

impl DraftTag {
    pub fn new(value: String) -> Result<Self, String> {
        Self::validate(&value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(value: &str) -> Result<(), String> {
        if value.trim().is_empty() {
            return Err("Draft tag cannot be empty".to_string());
        }
        if value.contains(crate::domain::constants::DRAFT_ACTION_KEY_JUNCTION) {
            return Err("Draft tag cannot contain the draft action key junction".to_string());
        }
        Ok(())
    }
}

impl fmt::Display for DraftTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<DraftTag> for String {
    fn from(tag: DraftTag) -> Self {
        tag.0
    }
}
