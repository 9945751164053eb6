pub mod config;
pub mod error;
pub mod models;

pub use config::QueueConfig;
pub use error::QueueError;
pub use models::{Job, JobQueue, JobReceiver, JobSlot, bounded};
