pub mod cache;
pub mod database;
pub mod draft;
pub mod storage;
