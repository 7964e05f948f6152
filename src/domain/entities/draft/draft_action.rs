use super::resource_request::{FetchResponse, ResourceRequest};
use crate::domain::value_objects::draft::keys::draft_action_key;
use crate::domain::value_objects::{
    DraftActionId, DraftActionOperationType, DraftActionStatus, DraftHandlerId, DraftTag,
    HttpMethod,
};
use crate::shared::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type DraftActionMetadata = BTreeMap<String, String>;

/// キューに積まれた1件の変更操作
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DraftAction {
    pub id: DraftActionId,
    pub tag: DraftTag,
    pub target_id: String,
    pub status: DraftActionStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub handler: DraftHandlerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResourceRequest>,
    #[serde(default)]
    pub metadata: DraftActionMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FetchResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<FetchResponse>,
}

impl DraftAction {
    #[allow(clippy::too_many_arguments)]
    pub fn new_pending(
        id: DraftActionId,
        tag: DraftTag,
        target_id: String,
        handler: DraftHandlerId,
        data: Option<ResourceRequest>,
        metadata: DraftActionMetadata,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tag,
            target_id,
            status: DraftActionStatus::Pending,
            timestamp,
            handler,
            data,
            metadata,
            error: None,
            response: None,
        }
    }

    /// 永続化キー `<tag>__DraftAction__<id>`
    pub fn storage_key(&self) -> String {
        draft_action_key(&self.tag, &self.id)
    }

    /// リクエストメソッドから操作種別を導出する
    pub fn operation_type(&self) -> Result<DraftActionOperationType, AppError> {
        if !self.handler.is_record() {
            return Ok(DraftActionOperationType::Custom);
        }
        let request = self.data.as_ref().ok_or_else(|| {
            AppError::Corrupt(format!("Draft action {} has no request data", self.id))
        })?;
        let method: HttpMethod = request
            .http_method()
            .map_err(AppError::UnsupportedMethod)?;
        DraftActionOperationType::from_method(method).ok_or_else(|| {
            AppError::UnsupportedMethod(format!(
                "{} is not a supported draft operation",
                method.as_str()
            ))
        })
    }

    pub fn is_create(&self) -> bool {
        matches!(self.operation_type(), Ok(DraftActionOperationType::Create))
    }

    pub fn is_delete(&self) -> bool {
        matches!(self.operation_type(), Ok(DraftActionOperationType::Delete))
    }

    pub fn request_body(&self) -> Option<&serde_json::Value> {
        self.data.as_ref().and_then(|request| request.body.as_ref())
    }

    pub fn mark_uploading(&mut self) -> Result<(), AppError> {
        self.transition(DraftActionStatus::Uploading)?;
        self.error = None;
        Ok(())
    }

    pub fn mark_error(&mut self, error: FetchResponse) -> Result<(), AppError> {
        self.transition(DraftActionStatus::Error)?;
        self.error = Some(error);
        Ok(())
    }

    pub fn mark_completed(&mut self, response: FetchResponse) -> Result<(), AppError> {
        self.transition(DraftActionStatus::Completed)?;
        self.error = None;
        self.response = Some(response);
        Ok(())
    }

    /// エラー状態からの明示的なリトライ
    pub fn reset_to_pending(&mut self) -> Result<(), AppError> {
        self.transition(DraftActionStatus::Pending)?;
        self.error = None;
        Ok(())
    }

    fn transition(&mut self, next: DraftActionStatus) -> Result<(), AppError> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidState(format!(
                "Draft action {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::draft::keys::record_key_from_id;
    use serde_json::json;

    fn action_with(method: &str, handler: DraftHandlerId) -> DraftAction {
        let mut request = ResourceRequest::new(HttpMethod::Post, "/ui-api/records");
        request.method = method.to_string();
        DraftAction::new_pending(
            DraftActionId::parse("1").unwrap(),
            DraftTag::new(record_key_from_id("001A")).unwrap(),
            "001A".to_string(),
            handler,
            Some(request),
            DraftActionMetadata::new(),
            DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap(),
        )
    }

    #[test]
    fn test_operation_type_from_method() {
        let record = DraftHandlerId::record();
        assert_eq!(
            action_with("POST", record.clone()).operation_type().unwrap(),
            DraftActionOperationType::Create
        );
        assert_eq!(
            action_with("patch", record.clone()).operation_type().unwrap(),
            DraftActionOperationType::Update
        );
        assert_eq!(
            action_with("delete", record.clone()).operation_type().unwrap(),
            DraftActionOperationType::Delete
        );
        assert!(matches!(
            action_with("get", record.clone()).operation_type(),
            Err(AppError::UnsupportedMethod(_))
        ));
        assert!(matches!(
            action_with("trace", record).operation_type(),
            Err(AppError::UnsupportedMethod(_))
        ));
    }

    #[test]
    fn test_custom_handler_is_custom_operation() {
        let custom = DraftHandlerId::new("SEND_EMAIL".to_string()).unwrap();
        assert_eq!(
            action_with("get", custom).operation_type().unwrap(),
            DraftActionOperationType::Custom
        );
    }

    #[test]
    fn test_status_transitions_are_enforced() {
        let mut action = action_with("post", DraftHandlerId::record());
        assert!(action.mark_completed(FetchResponse::new(200, json!({}))).is_err());

        action.mark_uploading().unwrap();
        action.mark_error(FetchResponse::new(400, json!({"message": "bad"}))).unwrap();
        assert_eq!(action.status, DraftActionStatus::Error);
        assert!(action.error.is_some());

        action.reset_to_pending().unwrap();
        assert_eq!(action.status, DraftActionStatus::Pending);
        assert!(action.error.is_none());
    }

    #[test]
    fn test_serialized_shape_is_stable() {
        let action = action_with("post", DraftHandlerId::record());
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["status"], json!("pending"));
        assert_eq!(value["targetId"], json!("001A"));
        let back: DraftAction = serde_json::from_value(value).unwrap();
        assert_eq!(back, action);
    }
}
