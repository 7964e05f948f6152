use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// リクエストのHTTPメソッド。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "get",
            HttpMethod::Post => "post",
            HttpMethod::Put => "put",
            HttpMethod::Patch => "patch",
            HttpMethod::Delete => "delete",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "get" => Ok(HttpMethod::Get),
            "post" => Ok(HttpMethod::Post),
            "put" => Ok(HttpMethod::Put),
            "patch" => Ok(HttpMethod::Patch),
            "delete" => Ok(HttpMethod::Delete),
            other => Err(format!("Unknown HTTP method: {other}")),
        }
    }
}

/// ドラフトアクションの大まかな操作種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftActionOperationType {
    Create,
    Update,
    Delete,
    Custom,
}

impl DraftActionOperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftActionOperationType::Create => "create",
            DraftActionOperationType::Update => "update",
            DraftActionOperationType::Delete => "delete",
            DraftActionOperationType::Custom => "custom",
        }
    }

    /// CRUDメソッドから操作種別へ。対応外は `None`
    pub fn from_method(method: HttpMethod) -> Option<Self> {
        match method {
            HttpMethod::Post => Some(DraftActionOperationType::Create),
            HttpMethod::Patch => Some(DraftActionOperationType::Update),
            HttpMethod::Delete => Some(DraftActionOperationType::Delete),
            HttpMethod::Get | HttpMethod::Put => None,
        }
    }
}

impl fmt::Display for DraftActionOperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
