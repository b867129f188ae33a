use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use taskmill::{HandlerFuture, Payload, Task, TaskHandler, TaskMessage};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

pub fn message(queue: &str, kind: &str) -> TaskMessage {
    TaskMessage::new(queue, kind, Payload::new())
}

/// Polls `condition` every 10 ms until it holds or `timeout` elapses.
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Handler that sleeps for a fixed duration and records how many invocations
/// overlap, so tests can observe the worker pool's effective parallelism.
#[derive(Clone)]
pub struct SleepingHandler {
    duration: Duration,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    started: Arc<AtomicUsize>,
}

impl SleepingHandler {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            started: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Highest number of handler invocations observed running at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Total handler invocations begun.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

impl TaskHandler for SleepingHandler {
    fn process(&self, _task: Task) -> HandlerFuture {
        let duration = self.duration;
        let running = Arc::clone(&self.running);
        let peak = Arc::clone(&self.peak);
        let started = Arc::clone(&self.started);
        Box::pin(async move {
            started.fetch_add(1, Ordering::SeqCst);
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            sleep(duration).await;
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
    }
}
