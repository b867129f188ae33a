use anyhow::anyhow;
use futures::future::BoxFuture;
use std::future::Future;

use crate::queue::message::Task;

pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Executes tasks. Implemented by downstream consumers of the processor.
///
/// A returned error sends the task to the retry bucket until its retry budget
/// is exhausted, then to the dead bucket. Panics are caught and treated the
/// same way. Any `Fn(Task) -> impl Future` closure is a handler:
///
/// ```
/// use taskmill::{Task, TaskHandler};
///
/// fn handler() -> impl TaskHandler {
///     |task: Task| async move {
///         tracing::info!(kind = task.kind(), "handled");
///         Ok(())
///     }
/// }
/// ```
pub trait TaskHandler: Send + Sync + 'static {
    fn process(&self, task: Task) -> HandlerFuture;
}

impl<F, Fut> TaskHandler for F
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn process(&self, task: Task) -> HandlerFuture {
        Box::pin(self(task))
    }
}

/// Placeholder installed until a real handler is set; fails every task.
pub(crate) struct HandlerNotSet;

impl TaskHandler for HandlerNotSet {
    fn process(&self, _task: Task) -> HandlerFuture {
        Box::pin(async { Err(anyhow!("handler not set")) })
    }
}
