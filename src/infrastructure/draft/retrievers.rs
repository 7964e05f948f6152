//! レスポンス本文に埋め込まれたレコードの探索。

use crate::domain::entities::RecordRepresentation;
use serde_json::Value;
use std::sync::Arc;

/// レスポンスの形に応じてレコードの位置を JSON ポインタで返す
pub trait ResponseRecordRetriever: Send + Sync {
    fn name(&self) -> &'static str;

    fn record_pointers(&self, body: &Value) -> Vec<String>;
}

/// 本文そのものがレコード
pub struct SingleRecordRetriever;

impl ResponseRecordRetriever for SingleRecordRetriever {
    fn name(&self) -> &'static str {
        "single-record"
    }

    fn record_pointers(&self, body: &Value) -> Vec<String> {
        if RecordRepresentation::looks_like_record(body) {
            vec![String::new()]
        } else {
            Vec::new()
        }
    }
}

/// `{ "records": [...] }`
pub struct RecordCollectionRetriever;

impl ResponseRecordRetriever for RecordCollectionRetriever {
    fn name(&self) -> &'static str {
        "record-collection"
    }

    fn record_pointers(&self, body: &Value) -> Vec<String> {
        let Some(records) = body.get("records").and_then(Value::as_array) else {
            return Vec::new();
        };
        records
            .iter()
            .enumerate()
            .filter(|(_, record)| RecordRepresentation::looks_like_record(record))
            .map(|(i, _)| format!("/records/{i}"))
            .collect()
    }
}

/// `{ "results": [{ "statusCode": 200, "result": {...} }] }`
pub struct BatchResultRetriever;

impl ResponseRecordRetriever for BatchResultRetriever {
    fn name(&self) -> &'static str {
        "batch-result"
    }

    fn record_pointers(&self, body: &Value) -> Vec<String> {
        let Some(results) = body.get("results").and_then(Value::as_array) else {
            return Vec::new();
        };
        results
            .iter()
            .enumerate()
            .filter(|(_, item)| {
                item.get("result")
                    .map(RecordRepresentation::looks_like_record)
                    .unwrap_or(false)
            })
            .map(|(i, _)| format!("/results/{i}/result"))
            .collect()
    }
}

pub fn default_retrievers() -> Vec<Arc<dyn ResponseRecordRetriever>> {
    vec![
        Arc::new(SingleRecordRetriever),
        Arc::new(RecordCollectionRetriever),
        Arc::new(BatchResultRetriever),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str) -> Value {
        json!({ "apiName": "Account", "id": id, "fields": {} })
    }

    #[test]
    fn test_single_record_points_at_root() {
        assert_eq!(SingleRecordRetriever.record_pointers(&record("001A")), vec![""]);
        assert!(SingleRecordRetriever
            .record_pointers(&json!({ "records": [] }))
            .is_empty());
    }

    #[test]
    fn test_collection_skips_non_records() {
        let body = json!({ "records": [record("001A"), { "count": 1 }, record("001B")] });
        assert_eq!(
            RecordCollectionRetriever.record_pointers(&body),
            vec!["/records/0", "/records/2"]
        );
    }

    #[test]
    fn test_batch_results_point_at_result() {
        let body = json!({
            "results": [
                { "statusCode": 200, "result": record("001A") },
                { "statusCode": 404, "result": [{ "errorCode": "NOT_FOUND" }] }
            ]
        });
        let pointers = BatchResultRetriever.record_pointers(&body);
        assert_eq!(pointers, vec!["/results/0/result"]);
        assert_eq!(body.pointer(&pointers[0]), Some(&record("001A")));
    }
}
