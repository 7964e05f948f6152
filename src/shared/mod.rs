pub mod config;
pub mod error;
pub mod listeners;

pub use config::{AppConfig, DraftConfig};
pub use error::{AppError, Result};
pub use listeners::{Listener, ListenerRegistry, Subscription};
