use std::time::Duration;

/// Sizing of the job queue.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Maximum number of jobs waiting for a worker.
    pub capacity: usize,
    /// How long a producer may wait for a free slot. Zero rejects at once.
    pub enqueue_timeout: Duration,
}

impl QueueConfig {
    pub fn new(capacity: usize, enqueue_timeout: Duration) -> Self {
        Self {
            capacity,
            enqueue_timeout,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            enqueue_timeout: Duration::ZERO,
        }
    }
}
