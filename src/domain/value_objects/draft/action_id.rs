use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::{fmt, str::FromStr};

/// ドラフトアクションの識別子。
///
/// 作成時刻（ミリ秒）を元に採番され、数値として比較することでエンキュー順を保つ。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DraftActionId(String);

impl DraftActionId {
    pub fn new(value: String) -> Result<Self, String> {
        Self::validate(&value)?;
        Ok(Self(value))
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        Self::validate(value)?;
        Ok(Self(value.to_string()))
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(millis.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_number(&self) -> Option<u64> {
        self.0.parse::<u64>().ok()
    }

    /// 衝突回避用に次の候補を返す
    pub fn successor(&self) -> Self {
        match self.as_number() {
            Some(value) => Self::from_millis(value.saturating_add(1)),
            None => Self(format!("{}_1", self.0)),
        }
    }

    fn validate(value: &str) -> Result<(), String> {
        if value.trim().is_empty() {
            return Err("Draft action ID cannot be empty".to_string());
        }
        if value.contains("__") {
            return Err("Draft action ID cannot contain '__'".to_string());
        }
        Ok(())
    }
}

impl Ord for DraftActionId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for DraftActionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DraftActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<DraftActionId> for String {
    fn from(id: DraftActionId) -> Self {
        id.0
    }
}

impl FromStr for DraftActionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
