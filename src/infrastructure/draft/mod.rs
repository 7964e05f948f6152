pub mod draft_aware_durable_store;
pub mod draft_aware_environment;
pub mod draft_aware_network;
pub mod durable_draft_store;
pub mod record_action_handler;
pub mod retrievers;

pub use draft_aware_durable_store::DraftAwareDurableStore;
pub use draft_aware_environment::DraftAwareEnvironment;
pub use draft_aware_network::DraftAwareNetworkAdapter;
pub use durable_draft_store::DurableDraftStore;
pub use record_action_handler::RecordActionHandler;
pub use retrievers::{
    default_retrievers, BatchResultRetriever, RecordCollectionRetriever, ResponseRecordRetriever,
    SingleRecordRetriever,
};
