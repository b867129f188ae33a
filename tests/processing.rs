mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use chrono::Utc;
use taskmill::{MemoryStore, Processor, ProcessorConfig, Task};
use tokio::time::sleep;

use support::helpers::{init_tracing, message, wait_until, SleepingHandler};

fn quick_config(concurrency: usize) -> ProcessorConfig {
    ProcessorConfig::builder()
        .concurrency(concurrency)
        .idle_backoff(Duration::from_millis(10))
        .build()
        .expect("config should build")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bounded_pool_completes_all_tasks() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    for i in 0..5 {
        store.enqueue(message("default", &format!("sleepy-{i}")));
    }

    let mut processor = Processor::new(quick_config(2), store.clone());
    let handler = SleepingHandler::new(Duration::from_millis(100));
    processor.set_handler(handler.clone());
    let telemetry = processor.telemetry();

    let started = Instant::now();
    processor.start().await.expect("processor should start");
    assert!(
        wait_until(Duration::from_secs(5), || telemetry.succeeded() == 5).await,
        "all five tasks should finish"
    );
    let elapsed = started.elapsed();

    // Five 100 ms tasks two at a time cannot finish in fewer than three waves.
    assert!(
        elapsed >= Duration::from_millis(250),
        "finished implausibly fast: {elapsed:?}"
    );
    assert_eq!(handler.peak(), 2, "worker pool must saturate but never exceed its limit");

    processor.terminate().await;
    assert_eq!(store.in_progress_len(), 0);
    assert_eq!(store.queue_len("default"), 0);
    assert!(store.dead_entries().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_task_retries_until_dead() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    store.enqueue(message("default", "always-fails").with_retry(2));

    let mut processor = Processor::new(quick_config(1), store.clone());
    processor.set_handler(|_task: Task| async move { Err(anyhow!("boom")) });
    processor.set_retry_delay(|_, _, _| Duration::ZERO);
    let telemetry = processor.telemetry();

    processor.start().await.expect("processor should start");

    // The scheduler collaborator normally feeds due retries back into the
    // queue; emulate it here.
    let deadline = Instant::now() + Duration::from_secs(5);
    while store.dead_entries().is_empty() && Instant::now() < deadline {
        store.promote_due_retries(Utc::now());
        sleep(Duration::from_millis(10)).await;
    }

    processor.terminate().await;

    let dead = store.dead_entries();
    assert_eq!(dead.len(), 1, "task should end in the dead bucket");
    assert!(
        dead[0].error.contains("boom"),
        "dead entry should keep the failure text, got {:?}",
        dead[0].error
    );
    assert_eq!(dead[0].message.retried, 2);
    assert_eq!(telemetry.dequeued(), 3, "one initial attempt plus two retries");
    assert_eq!(telemetry.retried(), 2);
    assert_eq!(telemetry.killed(), 1);
    assert_eq!(store.in_progress_len(), 0);
    assert_eq!(store.retry_len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn zero_retry_budget_means_a_single_attempt() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    store.enqueue(message("default", "one-shot").with_retry(0));

    let mut processor = Processor::new(quick_config(1), store.clone());
    processor.set_handler(|_task: Task| async move { Err(anyhow!("nope")) });
    let telemetry = processor.telemetry();

    processor.start().await.expect("processor should start");
    assert!(
        wait_until(Duration::from_secs(5), || !store.dead_entries().is_empty()).await,
        "task should dead-letter without retrying"
    );
    processor.terminate().await;

    assert_eq!(telemetry.dequeued(), 1);
    assert_eq!(telemetry.retried(), 0);
    assert_eq!(store.retry_len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panicking_handler_is_isolated() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    store.enqueue(message("default", "explode").with_retry(0));
    store.enqueue(message("default", "fine"));

    let mut processor = Processor::new(quick_config(1), store.clone());
    processor.set_handler(|task: Task| async move {
        if task.kind() == "explode" {
            panic!("unexpected value 42");
        }
        Ok(())
    });
    let telemetry = processor.telemetry();

    processor.start().await.expect("processor should start");
    assert!(
        wait_until(Duration::from_secs(5), || telemetry.succeeded() == 1
            && !store.dead_entries().is_empty())
        .await,
        "processor should survive the panic and keep serving"
    );
    processor.terminate().await;

    let dead = store.dead_entries();
    assert_eq!(dead.len(), 1);
    assert!(
        dead[0].error.contains("panic") && dead[0].error.contains("42"),
        "dead entry should carry the panic detail, got {:?}",
        dead[0].error
    );
    assert_eq!(dead[0].message.kind, "explode");
    assert_eq!(store.in_progress_len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unset_handler_fails_tasks_with_a_clear_error() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    store.enqueue(message("default", "orphan").with_retry(0));

    let mut processor = Processor::new(quick_config(1), store.clone());
    processor.start().await.expect("processor should start");
    assert!(
        wait_until(Duration::from_secs(5), || !store.dead_entries().is_empty()).await,
        "task should dead-letter"
    );
    processor.terminate().await;

    let dead = store.dead_entries();
    assert!(dead[0].error.contains("handler not set"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn multiple_queues_are_all_served() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    store.enqueue(message("critical", "a"));
    store.enqueue(message("default", "b"));
    store.enqueue(message("low", "c"));

    let config = ProcessorConfig::builder()
        .concurrency(2)
        .queue("critical", 6)
        .queue("default", 3)
        .queue("low", 1)
        .strict_priority(true)
        .poll_interval(Duration::from_millis(20))
        .build()
        .expect("config should build");
    let mut processor = Processor::new(config, store.clone());
    processor.set_handler(|_task: Task| async move { Ok(()) });
    let telemetry = processor.telemetry();

    processor.start().await.expect("processor should start");
    assert!(
        wait_until(Duration::from_secs(5), || telemetry.succeeded() == 3).await,
        "tasks from every queue should complete"
    );
    processor.terminate().await;

    for queue in ["critical", "default", "low"] {
        assert_eq!(store.queue_len(queue), 0, "queue {queue} should drain");
    }
}
