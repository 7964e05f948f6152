pub mod draft_manager;
pub mod draft_queue;

pub use draft_manager::{DraftManager, DraftQueueChangedListener};
pub use draft_queue::DurableDraftQueue;
