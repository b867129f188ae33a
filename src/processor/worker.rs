//! Worker execution: one spawned task per in-flight handler invocation.

use std::any::Any;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::processor::retry::RetryDelayFn;
use crate::queue::message::{Task, TaskMessage};
use crate::queue::store::TaskStore;
use crate::runtime::handler::TaskHandler;
use crate::runtime::telemetry::Telemetry;

/// Everything a worker needs besides the message itself.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) handler: Arc<dyn TaskHandler>,
    pub(crate) retry_delay: RetryDelayFn,
    pub(crate) quit: CancellationToken,
    pub(crate) telemetry: Arc<Telemetry>,
}

/// Runs `msg` on a fresh task. The worker owns `permit` for its whole
/// lifetime, so the slot is released on every exit path.
pub(crate) fn spawn(
    ctx: WorkerContext,
    msg: TaskMessage,
    permit: OwnedSemaphorePermit,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let _slot = permit;
        run(ctx, msg).await;
    })
}

async fn run(ctx: WorkerContext, msg: TaskMessage) {
    let task = Task::from_message(&msg);

    // The handler runs on its own task so that abandoning it on `quit` does
    // not cancel I/O the handler may still be performing; a late outcome is
    // simply discarded.
    let mut handler_task = {
        let handler = Arc::clone(&ctx.handler);
        let telemetry = Arc::clone(&ctx.telemetry);
        let task = task.clone();
        tokio::spawn(async move {
            match std::panic::AssertUnwindSafe(handler.process(task))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(panic) => {
                    telemetry.record_handler_panic();
                    Err(anyhow!("panic: {}", panic_message(panic.as_ref())))
                }
            }
        })
    };

    let joined = tokio::select! {
        _ = ctx.quit.cancelled() => {
            // The grace deadline passed. Leave the in-progress record alone;
            // startup recovery returns it to its queue.
            tracing::warn!(
                id = %msg.id,
                kind = %msg.kind,
                "terminating in-progress task; it will be restored on next startup"
            );
            return;
        }
        joined = &mut handler_task => joined,
    };

    let failure = match joined {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err),
        Err(join_err) => Some(anyhow!("handler task failed: {join_err}")),
    };

    match failure {
        None => mark_done(&ctx, &msg).await,
        Some(err) if msg.retried >= msg.retry => kill(&ctx, &msg, &err).await,
        Some(err) => retry(&ctx, &msg, &task, &err).await,
    }
}

async fn mark_done(ctx: &WorkerContext, msg: &TaskMessage) {
    match ctx.store.done(msg).await {
        Ok(()) => ctx.telemetry.record_succeeded(),
        Err(err) => {
            ctx.telemetry.record_store_error();
            tracing::error!(
                id = %msg.id,
                error = %err,
                "could not remove task from the in-progress holding area"
            );
        }
    }
}

async fn retry(ctx: &WorkerContext, msg: &TaskMessage, task: &Task, cause: &anyhow::Error) {
    let delay = (ctx.retry_delay)(msg.retried, cause, task);
    let retry_at = Utc::now() + delay;
    match ctx.store.retry(msg, retry_at, &format!("{cause:#}")).await {
        Ok(()) => ctx.telemetry.record_retried(),
        Err(err) => {
            ctx.telemetry.record_store_error();
            tracing::error!(
                id = %msg.id,
                error = %err,
                "could not move task to the retry bucket"
            );
        }
    }
}

async fn kill(ctx: &WorkerContext, msg: &TaskMessage, cause: &anyhow::Error) {
    tracing::warn!(kind = %msg.kind, id = %msg.id, "retry exhausted for task");
    match ctx.store.kill(msg, &format!("{cause:#}")).await {
        Ok(()) => ctx.telemetry.record_killed(),
        Err(err) => {
            ctx.telemetry.record_store_error();
            tracing::error!(
                id = %msg.id,
                error = %err,
                "could not move task to the dead bucket"
            );
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
