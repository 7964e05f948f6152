use crate::domain::value_objects::HttpMethod;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const RECORD_ID_URL_PARAM: &str = "recordId";

/// ネットワークに送るリソースリクエスト。ドラフトアクションの再送に必要な情報をすべて持つ。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequest {
    pub method: String,
    #[serde(default)]
    pub base_uri: String,
    pub base_path: String,
    #[serde(default)]
    pub url_params: BTreeMap<String, String>,
    #[serde(default)]
    pub query_params: BTreeMap<String, Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl ResourceRequest {
    pub fn new(method: HttpMethod, base_path: impl Into<String>) -> Self {
        Self {
            method: method.as_str().to_string(),
            base_path: base_path.into(),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_url_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.url_params.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn http_method(&self) -> Result<HttpMethod, String> {
        self.method.parse()
    }

    /// `recordId` パラメータ、なければパス末尾のセグメント
    pub fn record_id(&self, records_path: &str) -> Option<String> {
        if let Some(id) = self.url_params.get(RECORD_ID_URL_PARAM) {
            if !id.trim().is_empty() {
                return Some(id.clone());
            }
        }
        let (_, rest) = self.base_path.split_once(records_path)?;
        let segment = rest.trim_matches('/');
        if segment.is_empty() || segment.contains('/') {
            return None;
        }
        Some(segment.to_string())
    }

    /// 確定IDへの付け替え
    pub fn redirect_record_id(&mut self, from: &str, to: &str) {
        if let Some(id) = self.url_params.get_mut(RECORD_ID_URL_PARAM) {
            if id == from {
                *id = to.to_string();
            }
        }
        let suffix = format!("/{from}");
        if self.base_path.ends_with(&suffix) {
            let cut = self.base_path.len() - suffix.len();
            self.base_path = format!("{}/{to}", &self.base_path[..cut]);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    pub ok: bool,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Value,
}

impl FetchResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            status_text: status_text_for(status).to_string(),
            ok: (200..300).contains(&status),
            headers: BTreeMap::new(),
            body,
        }
    }

    /// 通信自体が失敗したときの応答（status 0）
    pub fn transport_failure(message: &str) -> Self {
        Self {
            status: 0,
            status_text: "Network Error".to_string(),
            ok: false,
            headers: BTreeMap::new(),
            body: serde_json::json!({ "message": message }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.ok && (200..300).contains(&self.status)
    }
}

fn status_text_for(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "",
    }
}
