use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Opaque key-value bag carried by every task.
pub type Payload = Map<String, Value>;

/// Persisted form of a unit of work.
///
/// A message lives in exactly one place at a time: an active queue, the
/// in-progress holding area, the retry bucket, or the dead bucket. The
/// processor observes `kind`, `payload`, `id`, `retry`, and `retried`; the
/// remaining fields belong to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Unique message identifier.
    pub id: Uuid,
    /// Routing key used to pick a handler behavior.
    pub kind: String,
    /// Opaque payload handed to the handler.
    pub payload: Payload,
    /// Name of the active queue the message was enqueued on.
    pub queue: String,
    /// Maximum number of retry attempts allowed.
    pub retry: u32,
    /// Retry attempts already made.
    pub retried: u32,
    /// Error text recorded by the most recent failed attempt.
    pub error_msg: String,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskMessage {
    /// Creates a message destined for `queue` with the default retry budget.
    pub fn new(queue: impl Into<String>, kind: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            payload,
            queue: queue.into(),
            retry: DEFAULT_MAX_RETRY,
            retried: 0,
            error_msg: String::new(),
            enqueued_at: Utc::now(),
        }
    }

    /// Overrides the retry budget. `retry = 0` allows exactly one attempt.
    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }
}

/// Default retry budget applied by [`TaskMessage::new`].
pub const DEFAULT_MAX_RETRY: u32 = 25;

/// Handler-facing view of a [`TaskMessage`].
///
/// Exposes only what a handler needs; queue placement and retry accounting
/// stay with the processor and the store.
#[derive(Debug, Clone)]
pub struct Task {
    kind: String,
    payload: Payload,
}

impl Task {
    pub fn new(kind: impl Into<String>, payload: Payload) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    pub(crate) fn from_message(msg: &TaskMessage) -> Self {
        Self::new(msg.kind.clone(), msg.payload.clone())
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Convenience accessor for a single payload entry.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}
