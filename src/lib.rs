//! taskmill: a queue-backed task processor.
//!
//! The processor continuously pulls task messages from a set of persistent,
//! priority-weighted queues, dispatches each one to a user-supplied handler on
//! a bounded pool of concurrent workers, and drives every task to exactly one
//! terminal fate: done, retry, or dead. Delivery is at-least-once: a message
//! being executed sits in an in-progress holding area, and whatever a crash or
//! forced shutdown leaves there is moved back to its source queue on the next
//! startup.
//!
//! ```no_run
//! use std::sync::Arc;
//! use taskmill::{MemoryStore, Processor, ProcessorConfig, Task, TaskMessage};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! store.enqueue(TaskMessage::new("default", "email:welcome", Default::default()));
//!
//! let config = ProcessorConfig::builder().concurrency(4).build()?;
//! let mut processor = Processor::new(config, store);
//! processor.set_handler(|task: Task| async move {
//!     tracing::info!(kind = task.kind(), "processing");
//!     Ok(())
//! });
//!
//! processor.start().await?;
//! // ... later:
//! processor.terminate().await;
//! # Ok(())
//! # }
//! ```

pub mod processor;
pub mod queue;
pub mod runtime;

pub use processor::dispatch::Processor;
pub use processor::retry::{default_retry_delay, RetryDelayFn};
pub use queue::memory::{DeadEntry, MemoryStore, RetryEntry};
pub use queue::message::{Payload, Task, TaskMessage, DEFAULT_MAX_RETRY};
pub use queue::store::{StoreError, TaskStore};
pub use runtime::config::{ProcessorConfig, ProcessorConfigBuilder};
pub use runtime::handler::{HandlerFuture, TaskHandler};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
