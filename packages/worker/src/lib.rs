pub mod config;
pub mod error;
pub mod handlers;
pub mod models;

pub use config::WorkerSettings;
pub use error::{JudgeError, Result};
pub use models::sandbox::{Sandbox, from_config};
pub use models::worker::{WorkerContext, WorkerPool};

#[cfg(any(test, feature = "testing"))]
pub use models::sandbox::scripted::ScriptedSandbox;
