use super::core::{DurableDraftQueue, INTERRUPTED_UPLOAD_MESSAGE};
use crate::application::ports::action_handler::CustomActionExecutor;
use crate::application::ports::draft_store::DraftStore;
use crate::application::ports::durable_store::{
    DurableStore, DurableStoreChangeListener, DurableStoreEntries, DurableStoreEntry,
    DurableStoreOperation,
};
use crate::application::ports::network::NetworkAdapter;
use crate::domain::constants::{DRAFT_ID_MAPPINGS_SEGMENT, DRAFT_SEGMENT};
use crate::domain::entities::{
    DraftAction, DraftActionMetadata, DraftQueueEvent, DraftQueueState, FetchResponse,
    ProcessActionResult, ResourceRequest,
};
use crate::domain::value_objects::draft::keys::record_key_from_id;
use crate::domain::value_objects::{
    DraftActionId, DraftActionStatus, DraftHandlerId, DraftTag, HttpMethod,
};
use crate::infrastructure::cache::InMemoryRecordStore;
use crate::infrastructure::draft::{DurableDraftStore, RecordActionHandler};
use crate::infrastructure::storage::InMemoryDurableStore;
use crate::shared::error::AppError;
use crate::shared::listeners::Subscription;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::mock;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

mock! {
    pub Network {}

    #[async_trait]
    impl NetworkAdapter for Network {
        async fn dispatch(&self, request: ResourceRequest) -> Result<FetchResponse, AppError>;
    }
}

mock! {
    pub Executor {}

    #[async_trait]
    impl CustomActionExecutor for Executor {
        async fn execute(&self, action: &DraftAction) -> Result<FetchResponse, AppError>;
    }
}

/// 許可されるまで応答を返さないネットワーク
struct GatedNetwork {
    gate: Semaphore,
    calls: AtomicUsize,
}

#[async_trait]
impl NetworkAdapter for GatedNetwork {
    async fn dispatch(&self, _request: ResourceRequest) -> Result<FetchResponse, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;
        permit.forget();
        Ok(FetchResponse::new(200, json!({})))
    }
}

/// 一括操作だけが失敗する永続ストア
struct BatchFailingStore {
    inner: InMemoryDurableStore,
}

#[async_trait]
impl DurableStore for BatchFailingStore {
    async fn get_entries(
        &self,
        ids: &[String],
        segment: &str,
    ) -> Result<Option<DurableStoreEntries>, AppError> {
        self.inner.get_entries(ids, segment).await
    }

    async fn get_all_entries(&self, segment: &str) -> Result<Option<DurableStoreEntries>, AppError> {
        self.inner.get_all_entries(segment).await
    }

    async fn set_entries(&self, entries: DurableStoreEntries, segment: &str) -> Result<(), AppError> {
        self.inner.set_entries(entries, segment).await
    }

    async fn evict_entries(&self, ids: &[String], segment: &str) -> Result<(), AppError> {
        self.inner.evict_entries(ids, segment).await
    }

    async fn batch_operations(&self, _operations: Vec<DurableStoreOperation>) -> Result<(), AppError> {
        Err(AppError::Storage("disk full".to_string()))
    }

    fn register_on_changed_listener(&self, listener: DurableStoreChangeListener) -> Subscription {
        self.inner.register_on_changed_listener(listener)
    }
}

struct Harness {
    queue: Arc<DurableDraftQueue>,
    durable: Arc<InMemoryDurableStore>,
}

async fn harness_with_durable(
    network: Arc<dyn NetworkAdapter>,
    durable: Arc<InMemoryDurableStore>,
) -> Harness {
    let draft_store = Arc::new(DurableDraftStore::new(durable.clone(), true));
    let handler = Arc::new(RecordActionHandler::new(
        network,
        durable.clone(),
        Arc::new(InMemoryRecordStore::new()),
    ));
    let queue = DurableDraftQueue::initialize(draft_store, handler)
        .await
        .unwrap();
    Harness { queue, durable }
}

async fn harness(network: Arc<dyn NetworkAdapter>) -> Harness {
    harness_with_durable(network, Arc::new(InMemoryDurableStore::new())).await
}

fn tag(record_id: &str) -> DraftTag {
    DraftTag::new(record_key_from_id(record_id)).unwrap()
}

fn create_request(name: &str) -> ResourceRequest {
    ResourceRequest::new(HttpMethod::Post, "/ui-api/records")
        .with_body(json!({ "apiName": "Account", "fields": { "Name": name } }))
}

fn update_request(record_id: &str, name: &str) -> ResourceRequest {
    ResourceRequest::new(HttpMethod::Patch, format!("/ui-api/records/{record_id}"))
        .with_body(json!({ "fields": { "Name": name } }))
}

fn delete_request(record_id: &str) -> ResourceRequest {
    ResourceRequest::new(HttpMethod::Delete, format!("/ui-api/records/{record_id}"))
}

fn server_record(id: &str, name: &str) -> Value {
    json!({
        "apiName": "Account",
        "id": id,
        "fields": { "Name": { "value": name, "displayValue": null } }
    })
}

fn collect_events(queue: &DurableDraftQueue) -> Arc<Mutex<Vec<DraftQueueEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _subscription = queue.register_listener(Arc::new(move |event: &DraftQueueEvent| {
        sink.lock().unwrap().push(event.clone());
    }));
    events
}

#[tokio::test]
async fn test_second_create_on_tag_is_rejected_before_persistence() {
    let h = harness(Arc::new(MockNetwork::new())).await;
    h.queue
        .enqueue(create_request("A"), tag("DRAFT-1"), "DRAFT-1")
        .await
        .unwrap();

    let err = h
        .queue
        .enqueue(create_request("B"), tag("DRAFT-1"), "DRAFT-1")
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::ValidationError(_)));
    assert!(err.is_validation());
    let persisted = h.durable.get_all_entries(DRAFT_SEGMENT).await.unwrap().unwrap();
    assert_eq!(persisted.len(), 1);
}

#[tokio::test]
async fn test_nothing_may_follow_a_delete() {
    let h = harness(Arc::new(MockNetwork::new())).await;
    h.queue
        .enqueue(delete_request("001A"), tag("001A"), "001A")
        .await
        .unwrap();

    let err = h
        .queue
        .enqueue(update_request("001A", "B"), tag("001A"), "001A")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));

    let err = h
        .queue
        .add_custom_action(
            DraftHandlerId::new("share".to_string()).unwrap(),
            "001A",
            tag("001A"),
            DraftActionMetadata::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));
}

#[tokio::test]
async fn test_create_must_be_first_on_its_tag() {
    let h = harness(Arc::new(MockNetwork::new())).await;
    h.queue
        .add_custom_action(
            DraftHandlerId::new("share".to_string()).unwrap(),
            "DRAFT-1",
            tag("DRAFT-1"),
            DraftActionMetadata::new(),
        )
        .await
        .unwrap();

    let err = h
        .queue
        .enqueue(create_request("A"), tag("DRAFT-1"), "DRAFT-1")
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::ValidationError(_)));
    assert_eq!(h.queue.get_queue_actions().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unsupported_method_is_not_queued() {
    let h = harness(Arc::new(MockNetwork::new())).await;
    let request = ResourceRequest::new(HttpMethod::Put, "/ui-api/records/001A")
        .with_body(json!({ "fields": {} }));

    let err = h
        .queue
        .enqueue(request, tag("001A"), "001A")
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::UnsupportedMethod(_)));
    assert!(h.queue.get_queue_actions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rapid_enqueues_get_increasing_ids() {
    let h = harness(Arc::new(MockNetwork::new())).await;
    let mut ids = Vec::new();
    for index in 0..5 {
        let action = h
            .queue
            .enqueue(update_request("001A", &format!("N{index}")), tag("001A"), "001A")
            .await
            .unwrap();
        ids.push(action.id);
    }

    let mut sorted = ids.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted, ids);

    let queued: Vec<DraftActionId> = h
        .queue
        .get_queue_actions()
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(queued, ids);
}

#[tokio::test]
async fn test_concurrent_processing_uploads_once() {
    let network = Arc::new(GatedNetwork {
        gate: Semaphore::new(0),
        calls: AtomicUsize::new(0),
    });
    let h = harness(network.clone()).await;
    h.queue
        .enqueue(update_request("001A", "B"), tag("001A"), "001A")
        .await
        .unwrap();

    let first = {
        let queue = Arc::clone(&h.queue);
        tokio::spawn(async move { queue.process_next_action().await })
    };
    while network.calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    let second = h.queue.process_next_action().await.unwrap();
    assert_eq!(second, ProcessActionResult::ActionAlreadyProcessing);

    network.gate.add_permits(1);
    assert_eq!(
        first.await.unwrap().unwrap(),
        ProcessActionResult::ActionSucceeded
    );
    assert_eq!(network.calls.load(Ordering::SeqCst), 1);
    assert!(h.queue.get_queue_actions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_server_error_rests_in_error_until_retried() {
    let mut network = MockNetwork::new();
    network
        .expect_dispatch()
        .times(1)
        .returning(|_| Ok(FetchResponse::new(400, json!([{ "errorCode": "INVALID_FIELD" }]))));
    let h = harness(Arc::new(network)).await;
    let events = collect_events(&h.queue);
    let action = h
        .queue
        .enqueue(update_request("001A", "B"), tag("001A"), "001A")
        .await
        .unwrap();

    assert_eq!(
        h.queue.process_next_action().await.unwrap(),
        ProcessActionResult::ActionErrored
    );
    assert_eq!(
        h.queue.process_next_action().await.unwrap(),
        ProcessActionResult::ActionAlreadyProcessing
    );

    let stored = &h.queue.get_queue_actions().await.unwrap()[0];
    assert_eq!(stored.status, DraftActionStatus::Error);
    assert_eq!(stored.error.as_ref().unwrap().status, 400);
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, DraftQueueEvent::ActionFailed(a) if a.id == action.id)));

    let retried = h.queue.retry_action(&action.id).await.unwrap();
    assert_eq!(retried.status, DraftActionStatus::Pending);
    assert!(retried.error.is_none());
}

#[tokio::test]
async fn test_transport_failure_moves_started_queue_to_waiting() {
    let mut network = MockNetwork::new();
    network
        .expect_dispatch()
        .times(1)
        .returning(|_| Err(AppError::Network("offline".to_string())));
    let h = harness(Arc::new(network)).await;
    h.queue
        .enqueue(update_request("001A", "B"), tag("001A"), "001A")
        .await
        .unwrap();

    h.queue.start_queue().await.unwrap();

    assert_eq!(h.queue.get_queue_state(), DraftQueueState::Waiting);
    let stored = &h.queue.get_queue_actions().await.unwrap()[0];
    assert_eq!(stored.status, DraftActionStatus::Error);
    assert_eq!(stored.error.as_ref().unwrap().status, 0);
}

#[tokio::test]
async fn test_start_queue_drains_in_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let mut network = MockNetwork::new();
    network.expect_dispatch().times(2).returning(move |request| {
        sink.lock().unwrap().push(request.body.clone());
        Ok(FetchResponse::new(200, Value::Null))
    });
    let h = harness(Arc::new(network)).await;
    let events = collect_events(&h.queue);
    h.queue
        .enqueue(update_request("001A", "first"), tag("001A"), "001A")
        .await
        .unwrap();
    h.queue
        .enqueue(update_request("001B", "second"), tag("001B"), "001B")
        .await
        .unwrap();

    h.queue.start_queue().await.unwrap();

    assert_eq!(h.queue.get_queue_state(), DraftQueueState::Started);
    assert!(h.queue.get_queue_actions().await.unwrap().is_empty());
    let bodies = seen.lock().unwrap().clone();
    assert_eq!(bodies[0].as_ref().unwrap()["fields"]["Name"], json!("first"));
    assert_eq!(bodies[1].as_ref().unwrap()["fields"]["Name"], json!("second"));
    let completed = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, DraftQueueEvent::ActionCompleted(_)))
        .count();
    assert_eq!(completed, 2);
}

#[tokio::test]
async fn test_create_completion_remaps_follow_up_and_records_mapping() {
    let mut network = MockNetwork::new();
    network
        .expect_dispatch()
        .times(1)
        .returning(|_| Ok(FetchResponse::new(201, server_record("001A", "A"))));
    let h = harness(Arc::new(network)).await;
    h.queue
        .enqueue(create_request("A"), tag("DRAFT-1"), "DRAFT-1")
        .await
        .unwrap();
    let follow_up = h
        .queue
        .enqueue(update_request("DRAFT-1", "B"), tag("DRAFT-1"), "DRAFT-1")
        .await
        .unwrap();

    assert_eq!(
        h.queue.process_next_action().await.unwrap(),
        ProcessActionResult::ActionSucceeded
    );

    let remaining = h.queue.get_queue_actions().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, follow_up.id);
    assert_eq!(remaining[0].tag, tag("001A"));
    assert_eq!(
        remaining[0].data.as_ref().unwrap().base_path,
        "/ui-api/records/001A"
    );
    let mappings = h
        .durable
        .get_all_entries(DRAFT_ID_MAPPINGS_SEGMENT)
        .await
        .unwrap()
        .unwrap();
    assert!(mappings.contains_key("DraftIdMapping::DRAFT-1::001A"));
}

#[tokio::test]
async fn test_interrupted_upload_is_marked_error_on_startup() {
    let durable = Arc::new(InMemoryDurableStore::new());
    let mut interrupted = DraftAction::new_pending(
        DraftActionId::from_millis(1),
        tag("001A"),
        "001A".to_string(),
        DraftHandlerId::record(),
        Some(update_request("001A", "B")),
        DraftActionMetadata::new(),
        DateTime::<Utc>::from_timestamp_millis(1).unwrap(),
    );
    interrupted.mark_uploading().unwrap();
    let mut entries = DurableStoreEntries::new();
    entries.insert(
        interrupted.storage_key(),
        DurableStoreEntry::new(serde_json::to_value(&interrupted).unwrap()),
    );
    durable.set_entries(entries, DRAFT_SEGMENT).await.unwrap();

    let h = harness_with_durable(Arc::new(MockNetwork::new()), durable).await;

    let stored = &h.queue.get_queue_actions().await.unwrap()[0];
    assert_eq!(stored.status, DraftActionStatus::Error);
    assert_eq!(
        stored.error.as_ref().unwrap().body["message"],
        json!(INTERRUPTED_UPLOAD_MESSAGE)
    );
}

#[tokio::test]
async fn test_custom_action_uses_registered_executor() {
    let h = harness(Arc::new(MockNetwork::new())).await;
    let handler = DraftHandlerId::new("share".to_string()).unwrap();

    h.queue
        .add_custom_action(handler.clone(), "001A", tag("001A"), DraftActionMetadata::new())
        .await
        .unwrap();
    assert_eq!(
        h.queue.process_next_action().await.unwrap(),
        ProcessActionResult::ActionErrored
    );
    let failed = h.queue.get_queue_actions().await.unwrap().remove(0);
    h.queue.retry_action(&failed.id).await.unwrap();

    let mut executor = MockExecutor::new();
    executor
        .expect_execute()
        .times(1)
        .returning(|_| Ok(FetchResponse::new(200, Value::Null)));
    let subscription = h
        .queue
        .set_custom_action_executor(handler, Arc::new(executor))
        .unwrap();

    assert_eq!(
        h.queue.process_next_action().await.unwrap(),
        ProcessActionResult::ActionSucceeded
    );
    assert!(h.queue.get_queue_actions().await.unwrap().is_empty());
    subscription.unsubscribe();
}

#[tokio::test]
async fn test_removing_create_drops_the_whole_tag() {
    let h = harness(Arc::new(MockNetwork::new())).await;
    let create = h
        .queue
        .enqueue(create_request("A"), tag("DRAFT-1"), "DRAFT-1")
        .await
        .unwrap();
    h.queue
        .enqueue(update_request("DRAFT-1", "B"), tag("DRAFT-1"), "DRAFT-1")
        .await
        .unwrap();
    h.queue
        .enqueue(update_request("001Z", "Z"), tag("001Z"), "001Z")
        .await
        .unwrap();

    let removed = h.queue.remove(&create.id).await.unwrap();

    assert_eq!(removed.len(), 2);
    let remaining = h.queue.get_queue_actions().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].tag, tag("001Z"));
}

#[tokio::test]
async fn test_uploading_action_cannot_be_removed() {
    let network = Arc::new(GatedNetwork {
        gate: Semaphore::new(0),
        calls: AtomicUsize::new(0),
    });
    let h = harness(network.clone()).await;
    let action = h
        .queue
        .enqueue(update_request("001A", "B"), tag("001A"), "001A")
        .await
        .unwrap();
    let upload = {
        let queue = Arc::clone(&h.queue);
        tokio::spawn(async move { queue.process_next_action().await })
    };
    while network.calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    let err = h.queue.remove(&action.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    network.gate.add_permits(1);
    upload.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_replace_action_keeps_position_and_drops_source() {
    let h = harness(Arc::new(MockNetwork::new())).await;
    let target = h
        .queue
        .enqueue(update_request("001A", "B"), tag("001A"), "001A")
        .await
        .unwrap();
    let source = h
        .queue
        .enqueue(update_request("001A", "C"), tag("001A"), "001A")
        .await
        .unwrap();

    let replaced = h.queue.replace_action(&target.id, &source.id).await.unwrap();

    assert_eq!(replaced.id, target.id);
    let remaining = h.queue.get_queue_actions().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(
        remaining[0].request_body().unwrap()["fields"]["Name"],
        json!("C")
    );
}

#[tokio::test]
async fn test_replace_cannot_move_a_delete_ahead_of_updates() {
    let h = harness(Arc::new(MockNetwork::new())).await;
    let first = h
        .queue
        .enqueue(update_request("001A", "One"), tag("001A"), "001A")
        .await
        .unwrap();
    h.queue
        .enqueue(update_request("001A", "Two"), tag("001A"), "001A")
        .await
        .unwrap();
    let delete = h
        .queue
        .enqueue(delete_request("001A"), tag("001A"), "001A")
        .await
        .unwrap();

    let err = h
        .queue
        .replace_action(&first.id, &delete.id)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::ValidationError(_)));
    let remaining = h.queue.get_queue_actions().await.unwrap();
    assert_eq!(remaining.len(), 3);
    assert!(remaining[2].is_delete());
}

#[tokio::test]
async fn test_unrecorded_completion_leaves_action_in_error() {
    let mut network = MockNetwork::new();
    network
        .expect_dispatch()
        .times(1)
        .returning(|_| Ok(FetchResponse::new(200, server_record("001A", "B"))));
    let durable = Arc::new(BatchFailingStore {
        inner: InMemoryDurableStore::new(),
    });
    let draft_store = Arc::new(DurableDraftStore::new(durable.clone(), true));
    let handler = Arc::new(RecordActionHandler::new(
        Arc::new(network),
        durable,
        Arc::new(InMemoryRecordStore::new()),
    ));
    let queue = DurableDraftQueue::initialize(draft_store, handler)
        .await
        .unwrap();
    let events = collect_events(&queue);
    let action = queue
        .enqueue(update_request("001A", "B"), tag("001A"), "001A")
        .await
        .unwrap();

    assert_eq!(
        queue.process_next_action().await.unwrap(),
        ProcessActionResult::ActionErrored
    );

    let stored = &queue.get_queue_actions().await.unwrap()[0];
    assert_eq!(stored.status, DraftActionStatus::Error);
    let error = stored.error.as_ref().unwrap();
    assert_eq!(error.status, 200);
    assert!(!error.ok);
    assert_eq!(error.status_text, "Completion Not Persisted");
    assert_eq!(error.body["response"]["id"], json!("001A"));
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, DraftQueueEvent::ActionFailed(a) if a.id == action.id)));
}

#[tokio::test]
async fn test_set_metadata_is_persisted() {
    let durable = Arc::new(InMemoryDurableStore::new());
    let h = harness_with_durable(Arc::new(MockNetwork::new()), durable.clone()).await;
    let action = h
        .queue
        .enqueue(update_request("001A", "B"), tag("001A"), "001A")
        .await
        .unwrap();
    let mut metadata = DraftActionMetadata::new();
    metadata.insert("source".to_string(), "quick-action".to_string());

    h.queue.set_metadata(&action.id, metadata.clone()).await.unwrap();

    let reopened = DurableDraftStore::new(durable, true);
    let drafts = reopened.get_all_drafts().await.unwrap();
    assert_eq!(drafts[0].metadata, metadata);
}

#[tokio::test]
async fn test_get_actions_for_tags_groups_in_order() {
    let h = harness(Arc::new(MockNetwork::new())).await;
    let first = h
        .queue
        .enqueue(update_request("001A", "B"), tag("001A"), "001A")
        .await
        .unwrap();
    h.queue
        .enqueue(update_request("001B", "X"), tag("001B"), "001B")
        .await
        .unwrap();
    let second = h
        .queue
        .enqueue(update_request("001A", "C"), tag("001A"), "001A")
        .await
        .unwrap();

    let grouped = h
        .queue
        .get_actions_for_tags(&[tag("001A"), tag("001C")])
        .await
        .unwrap();

    let ids: Vec<_> = grouped[&tag("001A")].iter().map(|a| a.id.clone()).collect();
    assert_eq!(ids, vec![first.id, second.id]);
    assert!(grouped[&tag("001C")].is_empty());
    assert!(!grouped.contains_key(&tag("001B")));
}
