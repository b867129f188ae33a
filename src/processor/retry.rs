use std::sync::Arc;
use std::time::Duration;

use crate::queue::message::Task;

/// Computes the delay before a failed task becomes due again.
///
/// Receives the number of attempts already made, the failure that triggered
/// the retry, and the handler-facing task. Must be pure.
pub type RetryDelayFn = Arc<dyn Fn(u32, &anyhow::Error, &Task) -> Duration + Send + Sync>;

const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(15 * 60);

/// Default retry policy: exponential growth from one second, capped at
/// fifteen minutes.
pub fn default_retry_delay(retried: u32, _err: &anyhow::Error, _task: &Task) -> Duration {
    let exponent = retried.min(16);
    let delay = INITIAL_RETRY_DELAY.saturating_mul(1u32 << exponent);
    delay.min(MAX_RETRY_DELAY)
}

pub(crate) fn default_retry_delay_fn() -> RetryDelayFn {
    Arc::new(default_retry_delay)
}
