pub mod draft;

pub use draft::{
    DraftActionId, DraftActionOperationType, DraftActionStatus, DraftHandlerId, DraftTag,
    HttpMethod, RECORD_HANDLER_ID,
};
