#![allow(dead_code)]

use async_trait::async_trait;
use offline_drafts::application::ports::durable_store::DurableStore;
use offline_drafts::application::ports::network::NetworkAdapter;
use offline_drafts::domain::entities::{FetchResponse, ResourceRequest};
use offline_drafts::domain::value_objects::HttpMethod;
use offline_drafts::shared::config::DraftConfig;
use offline_drafts::{AppError, DraftState};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const RECORDS_PATH: &str = "/ui-api/records";
pub const USER_ID: &str = "005000000000001";

/// レコードAPIを模したサーバー。オフライン時は通信エラーを返す
pub struct FakeServer {
    online: AtomicBool,
    next_id: AtomicUsize,
    records: Mutex<HashMap<String, Value>>,
    requests: Mutex<Vec<(String, String)>>,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            online: AtomicBool::new(true),
            next_id: AtomicUsize::new(1),
            records: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn seed(&self, id: &str, name: &str) {
        self.records
            .lock()
            .unwrap()
            .insert(id.to_string(), account(id, &json!({ "Name": name })));
    }

    pub fn record(&self, id: &str) -> Option<Value> {
        self.records.lock().unwrap().get(id).cloned()
    }

    /// `(method, path)` の一覧
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

fn account(id: &str, fields: &Value) -> Value {
    let fields: Map<String, Value> = fields
        .as_object()
        .map(|fields| {
            fields
                .iter()
                .map(|(name, value)| {
                    (name.clone(), json!({ "value": value, "displayValue": null }))
                })
                .collect()
        })
        .unwrap_or_default();
    json!({ "apiName": "Account", "id": id, "fields": fields, "weakEtag": 1 })
}

#[async_trait]
impl NetworkAdapter for FakeServer {
    async fn dispatch(&self, request: ResourceRequest) -> Result<FetchResponse, AppError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(AppError::Network("connection refused".to_string()));
        }
        self.requests
            .lock()
            .unwrap()
            .push((request.method.clone(), request.base_path.clone()));

        let method = request.http_method().map_err(AppError::UnsupportedMethod)?;
        let id = request
            .base_path
            .strip_prefix(RECORDS_PATH)
            .unwrap_or_default()
            .trim_matches('/')
            .to_string();
        let empty = json!({});
        let body_fields = request
            .body
            .as_ref()
            .and_then(|body| body.get("fields"))
            .unwrap_or(&empty);
        let mut records = self.records.lock().unwrap();

        let response = match method {
            HttpMethod::Get => match records.get(&id) {
                Some(record) => FetchResponse::new(200, record.clone()),
                None => FetchResponse::new(404, json!([{ "errorCode": "NOT_FOUND" }])),
            },
            HttpMethod::Post => {
                let n = self.next_id.fetch_add(1, Ordering::SeqCst);
                let id = format!("001{n:012}");
                let record = account(&id, body_fields);
                records.insert(id, record.clone());
                FetchResponse::new(201, record)
            }
            HttpMethod::Patch => match records.get_mut(&id) {
                Some(record) => {
                    let patch = account(&id, body_fields);
                    if let (Some(target), Some(changes)) = (
                        record["fields"].as_object_mut(),
                        patch["fields"].as_object(),
                    ) {
                        for (name, value) in changes {
                            target.insert(name.clone(), value.clone());
                        }
                    }
                    FetchResponse::new(200, record.clone())
                }
                None => FetchResponse::new(404, json!([{ "errorCode": "NOT_FOUND" }])),
            },
            HttpMethod::Delete => match records.remove(&id) {
                Some(_) => FetchResponse::new(204, Value::Null),
                None => FetchResponse::new(404, json!([{ "errorCode": "NOT_FOUND" }])),
            },
            _ => FetchResponse::new(405, Value::Null),
        };
        Ok(response)
    }
}

pub fn draft_config() -> DraftConfig {
    DraftConfig {
        strict_mode: true,
        current_user_id: USER_ID.to_string(),
        records_path: RECORDS_PATH.to_string(),
        auto_start_queue: false,
    }
}

pub async fn draft_state(server: Arc<FakeServer>, durable: Arc<dyn DurableStore>) -> DraftState {
    DraftState::initialize(&draft_config(), durable, server)
        .await
        .expect("draft state")
}

pub fn create_request(name: &str) -> ResourceRequest {
    ResourceRequest::new(HttpMethod::Post, RECORDS_PATH)
        .with_body(json!({ "apiName": "Account", "fields": { "Name": name } }))
}

pub fn update_request(id: &str, name: &str) -> ResourceRequest {
    ResourceRequest::new(HttpMethod::Patch, format!("{RECORDS_PATH}/{id}"))
        .with_body(json!({ "fields": { "Name": name } }))
}

pub fn delete_request(id: &str) -> ResourceRequest {
    ResourceRequest::new(HttpMethod::Delete, format!("{RECORDS_PATH}/{id}"))
}

pub fn get_request(id: &str) -> ResourceRequest {
    ResourceRequest::new(HttpMethod::Get, format!("{RECORDS_PATH}/{id}"))
}
