pub mod action_id;
pub mod action_status;
pub mod draft_tag;
pub mod handler_id;
pub mod keys;
pub mod operation_type;

pub use action_id::DraftActionId;
pub use action_status::DraftActionStatus;
pub use draft_tag::DraftTag;
pub use handler_id::{DraftHandlerId, RECORD_HANDLER_ID};
pub use operation_type::{DraftActionOperationType, HttpMethod};
