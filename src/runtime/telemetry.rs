use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back
/// to `info`. Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Lightweight rolling counters describing processor activity.
#[derive(Default, Debug)]
pub struct Telemetry {
    dequeued: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    killed: AtomicU64,
    requeued: AtomicU64,
    restored: AtomicU64,
    store_errors: AtomicU64,
    handler_panics: AtomicU64,
}

impl Telemetry {
    pub fn record_dequeued(&self) {
        self.dequeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_killed(&self) {
        self.killed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_requeued(&self) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restored(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.restored.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_panic(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dequeued(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn killed(&self) -> u64 {
        self.killed.load(Ordering::Relaxed)
    }

    pub fn requeued(&self) -> u64 {
        self.requeued.load(Ordering::Relaxed)
    }

    pub fn restored(&self) -> u64 {
        self.restored.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            dequeued: self.dequeued.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            killed: self.killed.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            restored: self.restored.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub dequeued: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub killed: u64,
    pub requeued: u64,
    pub restored: u64,
    pub store_errors: u64,
    pub handler_panics: u64,
}

/// Spawns a background task that periodically logs a processing summary.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the first report
        // carries a full interval of activity.
        ticker.tick().await;

        loop {
            select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot = telemetry.snapshot();
                    tracing::info!(
                        dequeued = snapshot.dequeued,
                        succeeded = snapshot.succeeded,
                        retried = snapshot.retried,
                        killed = snapshot.killed,
                        requeued = snapshot.requeued,
                        restored = snapshot.restored,
                        store_errors = snapshot.store_errors,
                        handler_panics = snapshot.handler_panics,
                        "task processing summary"
                    );
                }
            }
        }
    })
}
