use std::sync::Arc;
use std::time::Instant;

use common::notify::BroadcastNotifier;
use common::storage::SubmissionStore;

use crate::config::AppConfig;
use crate::intake::SubmissionIntake;

#[derive(Clone)]
pub struct AppState {
    pub intake: Arc<SubmissionIntake>,
    pub submissions: Arc<dyn SubmissionStore>,
    pub notifier: Arc<BroadcastNotifier>,
    pub config: Arc<AppConfig>,
    pub started_at: Instant,
}
