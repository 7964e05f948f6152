use crate::domain::entities::{DraftAction, ResourceRequest};
use crate::domain::value_objects::{DraftActionOperationType, DraftTag};
use crate::shared::error::AppError;
use serde_json::Value;

/// エンキュー前の検証。ここで拒否されたものは永続化されない
pub(super) fn validate_enqueue(
    operation: DraftActionOperationType,
    request: Option<&ResourceRequest>,
    tag: &DraftTag,
    queued_for_tag: &[DraftAction],
) -> Result<(), AppError> {
    if queued_for_tag.iter().any(DraftAction::is_delete) {
        return Err(AppError::ValidationError(format!(
            "Cannot enqueue a draft for {tag} after it has been deleted"
        )));
    }

    match operation {
        DraftActionOperationType::Create => {
            if queued_for_tag.iter().any(DraftAction::is_create) {
                return Err(AppError::ValidationError(format!(
                    "A create draft is already queued for {tag}"
                )));
            }
            if !queued_for_tag.is_empty() {
                return Err(AppError::ValidationError(format!(
                    "A create draft must be the first draft queued for {tag}"
                )));
            }
            let body = request_body(request)?;
            if !body.get("apiName").map(Value::is_string).unwrap_or(false) {
                return Err(AppError::ValidationError(
                    "Create request body must contain apiName".to_string(),
                ));
            }
            require_fields(body)
        }
        DraftActionOperationType::Update => require_fields(request_body(request)?),
        DraftActionOperationType::Delete | DraftActionOperationType::Custom => Ok(()),
    }
}

/// 同じタグに並ぶアクション列の整合性。作成は先頭、削除は末尾にしか置けない
pub(super) fn validate_tag_sequence(tag: &DraftTag, actions: &[DraftAction]) -> Result<(), AppError> {
    let last = actions.len().saturating_sub(1);
    for (position, action) in actions.iter().enumerate() {
        if action.is_create() && position != 0 {
            return Err(AppError::ValidationError(format!(
                "A create draft must be the first draft queued for {tag}"
            )));
        }
        if action.is_delete() && position != last {
            return Err(AppError::ValidationError(format!(
                "No draft may follow the delete of {tag}"
            )));
        }
    }
    Ok(())
}

fn request_body(request: Option<&ResourceRequest>) -> Result<&Value, AppError> {
    request
        .and_then(|request| request.body.as_ref())
        .ok_or_else(|| AppError::ValidationError("Request body is required".to_string()))
}

fn require_fields(body: &Value) -> Result<(), AppError> {
    if body.get("fields").map(Value::is_object).unwrap_or(false) {
        Ok(())
    } else {
        Err(AppError::ValidationError(
            "Request body must contain a fields object".to_string(),
        ))
    }
}
