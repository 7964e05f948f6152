pub mod draft;

pub use draft::{
    DraftAction, DraftActionMetadata, DraftIdMappingEntry, DraftQueueEvent, DraftQueueItem,
    DraftQueueItemError, DraftQueueOperationType, DraftQueueSnapshot, DraftQueueState,
    DraftRepresentation, FetchResponse, FieldEntry, FieldValueRepresentation,
    ProcessActionResult, QueueOperation, RecordRepresentation, ResourceRequest, StoreLink,
};
