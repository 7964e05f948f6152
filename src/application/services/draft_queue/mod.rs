pub mod core;
mod validation;

pub use core::{DurableDraftQueue, INTERRUPTED_UPLOAD_MESSAGE};

#[cfg(test)]
mod tests;
