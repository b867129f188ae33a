//! The dispatch loop and the processor lifecycle built around it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::lifecycle::ShutdownSignals;
use super::retry::{default_retry_delay_fn, RetryDelayFn};
use super::selector::QueueSelector;
use super::worker::{self, WorkerContext};
use crate::queue::store::{StoreError, TaskStore};
use crate::runtime::config::ProcessorConfig;
use crate::runtime::handler::{HandlerNotSet, TaskHandler};
use crate::runtime::telemetry::{spawn_metrics_reporter, Telemetry};

/// Long-running task processor.
///
/// Pulls messages from the configured queues, hands each one to the installed
/// handler on a bounded pool of worker tasks, and drives every message to one
/// terminal store operation. `start` may be called once; `stop` is idempotent
/// and stops intake without touching in-flight work; `terminate` waits for
/// in-flight work up to the configured grace deadline and then abandons it to
/// startup recovery. A terminated processor cannot be restarted.
pub struct Processor {
    config: ProcessorConfig,
    store: Arc<dyn TaskStore>,
    handler: Arc<dyn TaskHandler>,
    retry_delay: RetryDelayFn,
    selector: QueueSelector,
    slots: Arc<Semaphore>,
    signals: ShutdownSignals,
    telemetry: Arc<Telemetry>,
    dispatch_handle: Option<JoinHandle<()>>,
    reporter_handle: Option<JoinHandle<()>>,
    running: bool,
    terminated: bool,
}

impl Processor {
    /// Creates a processor over `store` with the given configuration.
    ///
    /// Until [`Processor::set_handler`] is called, a placeholder handler is
    /// installed that fails every task with "handler not set".
    pub fn new(config: ProcessorConfig, store: Arc<dyn TaskStore>) -> Self {
        let selector = QueueSelector::new(config.queues().clone(), config.strict_priority());
        let slots = Arc::new(Semaphore::new(config.concurrency()));
        Self {
            config,
            selector,
            slots,
            store,
            handler: Arc::new(HandlerNotSet),
            retry_delay: default_retry_delay_fn(),
            signals: ShutdownSignals::new(),
            telemetry: Arc::new(Telemetry::default()),
            dispatch_handle: None,
            reporter_handle: None,
            running: false,
            terminated: false,
        }
    }

    /// Installs the handler invoked for every dequeued task.
    pub fn set_handler(&mut self, handler: impl TaskHandler) {
        self.handler = Arc::new(handler);
    }

    /// Replaces the retry-delay policy. The default is exponential backoff;
    /// see [`crate::processor::retry::default_retry_delay`].
    pub fn set_retry_delay(
        &mut self,
        delay: impl Fn(u32, &anyhow::Error, &crate::queue::message::Task) -> Duration
            + Send
            + Sync
            + 'static,
    ) {
        self.retry_delay = Arc::new(delay);
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Returns a clone of the telemetry handle for observability.
    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Restores unfinished tasks left behind by a previous run, then spawns
    /// the dispatch loop.
    ///
    /// Restoration completes before the first dequeue so a restarted
    /// processor cannot race itself on its own prior in-flight tasks.
    pub async fn start(&mut self) -> Result<()> {
        if self.terminated {
            bail!("processor already terminated");
        }
        if self.running {
            bail!("processor already running");
        }

        self.restore_unfinished().await;

        tracing::info!(
            concurrency = self.config.concurrency(),
            queues = self.selector.queue_count(),
            strict = self.config.strict_priority(),
            "starting task processor"
        );

        self.reporter_handle = Some(spawn_metrics_reporter(
            self.telemetry.clone(),
            self.signals.abort_token(),
            self.config.metrics_interval(),
        ));

        let ctx = DispatchContext {
            store: Arc::clone(&self.store),
            selector: self.selector.clone(),
            slots: Arc::clone(&self.slots),
            abort: self.signals.abort_token(),
            done_rx: self.signals.done_receiver(),
            poll_interval: self.config.poll_interval(),
            idle_backoff: self.config.idle_backoff(),
            telemetry: self.telemetry.clone(),
            worker_ctx: WorkerContext {
                store: Arc::clone(&self.store),
                handler: Arc::clone(&self.handler),
                retry_delay: Arc::clone(&self.retry_delay),
                quit: self.signals.quit_token(),
                telemetry: self.telemetry.clone(),
            },
        };
        self.dispatch_handle = Some(tokio::spawn(dispatch_loop(ctx)));
        self.running = true;
        Ok(())
    }

    /// Stops pulling new tasks. In-flight handlers keep running.
    ///
    /// Idempotent and safe to call from any thread; raises `abort` so a
    /// dequeued-but-unstarted task is requeued rather than executed, then
    /// tells the dispatch loop to exit.
    pub fn stop(&self) {
        if self.signals.raise_stop() {
            tracing::info!("processor shutting down");
        }
    }

    /// Stops intake, waits for in-flight workers up to the grace deadline,
    /// abandons whatever is still running past it, and returns abandoned
    /// tasks to their queues.
    ///
    /// After this returns, the in-progress holding area holds nothing owned
    /// by this processor and the instance is unusable.
    pub async fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.stop();

        let quit_timer = self.signals.arm_quit_after(self.config.shutdown_grace());
        tracing::info!("waiting for in-flight workers to finish");

        // Every worker owns one slot for its whole lifetime, so holding all
        // of them means no handler is running. Closing the slot source before
        // releasing them keeps the dispatch loop from starting a late worker.
        let limit = self.config.concurrency() as u32;
        if let Ok(permits) = self.slots.acquire_many(limit).await {
            self.slots.close();
            drop(permits);
        }
        quit_timer.abort();
        tracing::info!("all workers have finished");

        if let Some(handle) = self.dispatch_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "dispatch loop task panicked");
            }
        }
        if let Some(handle) = self.reporter_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "metrics reporter task panicked");
            }
        }

        // Return tasks abandoned past the grace deadline to their queues.
        self.restore_unfinished().await;

        self.running = false;
        self.terminated = true;
        tracing::info!("processor terminated");
    }

    async fn restore_unfinished(&self) {
        match self.store.restore_unfinished().await {
            Ok(0) => {}
            Ok(moved) => {
                self.telemetry.record_restored(moved as u64);
                tracing::info!(count = moved, "restored unfinished tasks back to their queues");
            }
            Err(err) => {
                self.telemetry.record_store_error();
                tracing::error!(error = %err, "could not restore unfinished tasks");
            }
        }
    }
}

struct DispatchContext {
    store: Arc<dyn TaskStore>,
    selector: QueueSelector,
    slots: Arc<Semaphore>,
    abort: CancellationToken,
    done_rx: watch::Receiver<bool>,
    poll_interval: Duration,
    idle_backoff: Duration,
    telemetry: Arc<Telemetry>,
    worker_ctx: WorkerContext,
}

enum TickOutcome {
    Continue,
    Exit,
}

async fn dispatch_loop(mut ctx: DispatchContext) {
    tracing::debug!("dispatch loop started");
    loop {
        if *ctx.done_rx.borrow() {
            break;
        }
        if let TickOutcome::Exit = tick(&mut ctx).await {
            break;
        }
    }
    tracing::debug!("dispatch loop exited");
}

/// One dispatch iteration: pick queues, pull one task, and either hand it to
/// a worker or put it back if shutdown won the race for a slot.
async fn tick(ctx: &mut DispatchContext) -> TickOutcome {
    let queues = ctx.selector.next();
    let msg = match ctx.store.dequeue(&queues).await {
        Ok(msg) => msg,
        Err(StoreError::NoProcessableTask) => {
            // Empty queues are normal. With several queues there is no atomic
            // multi-queue blocking pop, so poll; with one queue back off just
            // enough to avoid hammering the store.
            let wait = if ctx.selector.queue_count() > 1 {
                ctx.poll_interval
            } else {
                ctx.idle_backoff
            };
            return idle(ctx, wait).await;
        }
        Err(err) => {
            ctx.telemetry.record_store_error();
            tracing::error!(error = %err, "unexpected error while pulling a task out of queue");
            let wait = ctx.idle_backoff;
            return idle(ctx, wait).await;
        }
    };
    ctx.telemetry.record_dequeued();

    let permit = tokio::select! {
        _ = ctx.abort.cancelled() => {
            // Shutdown began while we waited for a slot; put the message back
            // at the head of its queue instead of executing it.
            requeue_unstarted(ctx, &msg).await;
            return TickOutcome::Continue;
        }
        permit = Arc::clone(&ctx.slots).acquire_owned() => match permit {
            Ok(permit) => permit,
            // The slot source closes only during termination.
            Err(_) => {
                requeue_unstarted(ctx, &msg).await;
                return TickOutcome::Exit;
            }
        },
    };

    worker::spawn(ctx.worker_ctx.clone(), msg, permit);
    TickOutcome::Continue
}

async fn requeue_unstarted(ctx: &DispatchContext, msg: &crate::queue::message::TaskMessage) {
    match ctx.store.requeue(msg).await {
        Ok(()) => ctx.telemetry.record_requeued(),
        Err(err) => {
            ctx.telemetry.record_store_error();
            tracing::error!(
                id = %msg.id,
                error = %err,
                "could not move task from in-progress back to its queue"
            );
        }
    }
}

/// Sleeps for `wait` while staying responsive to `done`.
async fn idle(ctx: &mut DispatchContext, wait: Duration) -> TickOutcome {
    tokio::select! {
        _ = sleep(wait) => TickOutcome::Continue,
        changed = ctx.done_rx.changed() => match changed {
            Ok(()) => TickOutcome::Continue,
            // Signal owner dropped without stopping; nothing left to serve.
            Err(_) => TickOutcome::Exit,
        },
    }
}
