//! Task model and the store seam: persisted messages, the atomic store
//! interface the processor consumes, and an in-process implementation.

pub mod memory;
pub mod message;
pub mod store;

pub use memory::{DeadEntry, MemoryStore, RetryEntry};
pub use message::{Payload, Task, TaskMessage, DEFAULT_MAX_RETRY};
pub use store::{StoreError, TaskStore};
