pub mod environment;
pub mod memory_record_store;

pub use environment::DefaultEnvironment;
pub use memory_record_store::InMemoryRecordStore;
