pub mod draft_action;
pub mod id_mapping;
pub mod queue;
pub mod record;
pub mod resource_request;

pub use draft_action::{DraftAction, DraftActionMetadata};
pub use id_mapping::DraftIdMappingEntry;
pub use queue::{
    DraftQueueEvent, DraftQueueItem, DraftQueueItemError, DraftQueueOperationType,
    DraftQueueSnapshot, DraftQueueState, ProcessActionResult, QueueOperation,
};
pub use record::{
    DraftRepresentation, FieldEntry, FieldValueRepresentation, RecordRepresentation, StoreLink,
};
pub use resource_request::{FetchResponse, RECORD_ID_URL_PARAM, ResourceRequest};
