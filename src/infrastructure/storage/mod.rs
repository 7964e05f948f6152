pub mod memory_durable_store;
pub mod sqlite_durable_store;

pub use memory_durable_store::InMemoryDurableStore;
pub use sqlite_durable_store::SqliteDurableStore;
