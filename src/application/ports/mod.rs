pub mod action_handler;
pub mod draft_store;
pub mod durable_store;
pub mod environment;
pub mod network;

pub use action_handler::{ActionHandler, CompletionPlan, CustomActionExecutor};
pub use draft_store::DraftStore;
pub use durable_store::{
    DurableStore, DurableStoreChange, DurableStoreChangeListener, DurableStoreChangeType,
    DurableStoreEntries, DurableStoreEntry, DurableStoreExpiration, DurableStoreOperation,
};
pub use environment::{Environment, RecordStore};
pub use network::NetworkAdapter;
