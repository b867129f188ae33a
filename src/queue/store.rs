use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use uuid::Uuid;

use super::message::TaskMessage;

/// Error surfaced by [`TaskStore`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// None of the polled queues holds a processable task. Expected during
    /// normal operation; drives the dispatch loop's polling backoff.
    NoProcessableTask,
    /// The message is not in the in-progress holding area.
    NotInProgress { id: Uuid },
    /// The backing store could not serve the request.
    Unavailable { reason: String },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NoProcessableTask => write!(f, "no processable task in the polled queues"),
            StoreError::NotInProgress { id } => {
                write!(f, "task {id} is not in the in-progress holding area")
            }
            StoreError::Unavailable { reason } => write!(f, "task store unavailable: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Persistent task state consumed by the processor.
///
/// Every operation is atomic with respect to itself: a message observed
/// through this interface is in exactly one of the active queues, the
/// in-progress holding area, the retry bucket, or the dead bucket.
///
/// Implementations must keep `dequeue` latency bounded (immediate return or a
/// short blocking timeout); the dispatch loop is not responsive to shutdown
/// while a dequeue is in flight.
pub trait TaskStore: Send + Sync {
    /// Scans `queues` in the given order and moves the head task of the first
    /// non-empty queue into the in-progress holding area.
    ///
    /// Returns [`StoreError::NoProcessableTask`] when every polled queue is
    /// empty.
    fn dequeue<'a>(&'a self, queues: &'a [String]) -> BoxFuture<'a, Result<TaskMessage, StoreError>>;

    /// Moves `msg` from the in-progress holding area back to the head of its
    /// source queue, so it is the next task dequeued from that queue.
    fn requeue<'a>(&'a self, msg: &'a TaskMessage) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Removes `msg` from the in-progress holding area.
    fn done<'a>(&'a self, msg: &'a TaskMessage) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Removes `msg` from the in-progress holding area, increments its attempt
    /// counter, and inserts it into the retry bucket keyed on `retry_at` with
    /// `error` persisted.
    fn retry<'a>(
        &'a self,
        msg: &'a TaskMessage,
        retry_at: DateTime<Utc>,
        error: &'a str,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Removes `msg` from the in-progress holding area and inserts it into the
    /// dead bucket with `error` persisted.
    fn kill<'a>(&'a self, msg: &'a TaskMessage, error: &'a str)
        -> BoxFuture<'a, Result<(), StoreError>>;

    /// Moves every message in the in-progress holding area back to the tail of
    /// its source queue. Idempotent; returns the number of messages moved.
    fn restore_unfinished(&self) -> BoxFuture<'_, Result<usize, StoreError>>;
}
