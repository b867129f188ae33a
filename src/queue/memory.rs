use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use uuid::Uuid;

use super::message::TaskMessage;
use super::store::{StoreError, TaskStore};

/// A message parked in the retry bucket until its due time.
#[derive(Debug, Clone)]
pub struct RetryEntry {
    pub message: TaskMessage,
    pub retry_at: DateTime<Utc>,
    pub error: String,
}

/// A message that exhausted its retry budget.
#[derive(Debug, Clone)]
pub struct DeadEntry {
    pub message: TaskMessage,
    pub error: String,
    pub died_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryInner {
    queues: HashMap<String, VecDeque<TaskMessage>>,
    in_progress: Vec<TaskMessage>,
    retry: Vec<RetryEntry>,
    dead: Vec<DeadEntry>,
}

/// In-process [`TaskStore`] backed by a single mutex.
///
/// Active queues are FIFO per name. All interface operations take the lock for
/// their whole duration, which makes each one atomic with respect to itself.
/// Suitable for embedded use and for tests; a deployment sharing work across
/// processes wants a store backed by an external system instead.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().expect("memory store mutex poisoned")
    }

    /// Appends `msg` to the tail of its queue, creating the queue on first use.
    pub fn enqueue(&self, msg: TaskMessage) {
        let mut inner = self.lock();
        inner
            .queues
            .entry(msg.queue.clone())
            .or_default()
            .push_back(msg);
    }

    /// Moves every retry-bucket entry due at or before `now` back to the tail
    /// of its source queue. Returns the number of messages promoted.
    ///
    /// This is the scheduler-facing half of the retry path; the processor
    /// itself never calls it.
    pub fn promote_due_retries(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.lock();
        let (due, waiting): (Vec<RetryEntry>, Vec<RetryEntry>) = std::mem::take(&mut inner.retry)
            .into_iter()
            .partition(|entry| entry.retry_at <= now);
        inner.retry = waiting;
        let promoted = due.len();
        for entry in due {
            inner
                .queues
                .entry(entry.message.queue.clone())
                .or_default()
                .push_back(entry.message);
        }
        promoted
    }

    /// Number of messages waiting in the named active queue.
    pub fn queue_len(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Number of messages in the in-progress holding area.
    pub fn in_progress_len(&self) -> usize {
        self.lock().in_progress.len()
    }

    /// Number of messages parked in the retry bucket.
    pub fn retry_len(&self) -> usize {
        self.lock().retry.len()
    }

    /// Snapshot of the retry bucket.
    pub fn retry_entries(&self) -> Vec<RetryEntry> {
        self.lock().retry.clone()
    }

    /// Snapshot of the dead bucket.
    pub fn dead_entries(&self) -> Vec<DeadEntry> {
        self.lock().dead.clone()
    }

    fn take_in_progress(inner: &mut MemoryInner, id: Uuid) -> Result<TaskMessage, StoreError> {
        let index = inner
            .in_progress
            .iter()
            .position(|held| held.id == id)
            .ok_or(StoreError::NotInProgress { id })?;
        Ok(inner.in_progress.swap_remove(index))
    }
}

impl TaskStore for MemoryStore {
    fn dequeue<'a>(&'a self, queues: &'a [String]) -> BoxFuture<'a, Result<TaskMessage, StoreError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            for name in queues {
                let msg = inner.queues.get_mut(name).and_then(VecDeque::pop_front);
                if let Some(msg) = msg {
                    inner.in_progress.push(msg.clone());
                    return Ok(msg);
                }
            }
            Err(StoreError::NoProcessableTask)
        })
    }

    fn requeue<'a>(&'a self, msg: &'a TaskMessage) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            let held = Self::take_in_progress(&mut inner, msg.id)?;
            inner
                .queues
                .entry(held.queue.clone())
                .or_default()
                .push_front(held);
            Ok(())
        })
    }

    fn done<'a>(&'a self, msg: &'a TaskMessage) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            Self::take_in_progress(&mut inner, msg.id).map(|_| ())
        })
    }

    fn retry<'a>(
        &'a self,
        msg: &'a TaskMessage,
        retry_at: DateTime<Utc>,
        error: &'a str,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            let mut held = Self::take_in_progress(&mut inner, msg.id)?;
            held.retried += 1;
            held.error_msg = error.to_owned();
            inner.retry.push(RetryEntry {
                message: held,
                retry_at,
                error: error.to_owned(),
            });
            Ok(())
        })
    }

    fn kill<'a>(
        &'a self,
        msg: &'a TaskMessage,
        error: &'a str,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            let mut held = Self::take_in_progress(&mut inner, msg.id)?;
            held.error_msg = error.to_owned();
            inner.dead.push(DeadEntry {
                message: held,
                error: error.to_owned(),
                died_at: Utc::now(),
            });
            Ok(())
        })
    }

    fn restore_unfinished(&self) -> BoxFuture<'_, Result<usize, StoreError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            let held: Vec<TaskMessage> = inner.in_progress.drain(..).collect();
            let moved = held.len();
            for msg in held {
                inner
                    .queues
                    .entry(msg.queue.clone())
                    .or_default()
                    .push_back(msg);
            }
            Ok(moved)
        })
    }
}
