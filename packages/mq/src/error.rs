use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Job queue is full (capacity {capacity})")]
    CapacityExceeded { capacity: usize },

    #[error("Job queue is closed")]
    Closed,
}
