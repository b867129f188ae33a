use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};

const DEFAULT_QUEUE: &str = "default";
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 8;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;
const DEFAULT_IDLE_BACKOFF_MS: u64 = 100;
const DEFAULT_METRICS_INTERVAL_SECS: u64 = 30;

/// Processor configuration.
///
/// All instances must be constructed via [`ProcessorConfig::builder`] so
/// invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    concurrency: usize,
    queues: HashMap<String, u32>,
    strict_priority: bool,
    shutdown_grace: Duration,
    poll_interval: Duration,
    idle_backoff: Duration,
    metrics_interval: Duration,
}

impl ProcessorConfig {
    /// Returns a builder to incrementally construct and validate a
    /// configuration.
    pub fn builder() -> ProcessorConfigBuilder {
        ProcessorConfigBuilder::default()
    }

    /// Maximum number of concurrently running handlers.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Queue names mapped to their priority weights.
    pub fn queues(&self) -> &HashMap<String, u32> {
        &self.queues
    }

    /// Whether queues are served in fixed descending-weight order instead of
    /// the weighted-random order.
    pub fn strict_priority(&self) -> bool {
        self.strict_priority
    }

    /// How long `terminate` waits for in-flight handlers before abandoning
    /// them.
    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    /// Sleep between dequeue attempts when several queues are configured and
    /// all of them are empty.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Sleep applied after a transient store failure, and between dequeue
    /// attempts on an empty single queue.
    pub fn idle_backoff(&self) -> Duration {
        self.idle_backoff
    }

    /// Interval between telemetry summary log lines.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("concurrency must be greater than 0");
        }

        if self.queues.is_empty() {
            bail!("at least one queue must be configured");
        }

        for (name, weight) in &self.queues {
            if name.trim().is_empty() {
                bail!("queue names cannot be empty");
            }
            if *weight == 0 {
                bail!("queue {name:?} must have a positive priority weight");
            }
        }

        if self.shutdown_grace.is_zero() {
            bail!("shutdown_grace must be greater than 0");
        }

        if self.poll_interval.is_zero() {
            bail!("poll_interval must be greater than 0");
        }

        if self.idle_backoff.is_zero() {
            bail!("idle_backoff must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct ProcessorConfigBuilder {
    concurrency: Option<usize>,
    queues: HashMap<String, u32>,
    strict_priority: bool,
    shutdown_grace: Option<Duration>,
    poll_interval: Option<Duration>,
    idle_backoff: Option<Duration>,
    metrics_interval: Option<Duration>,
}

impl ProcessorConfigBuilder {
    /// Sets the worker-slot count. Required.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Adds a queue with the given priority weight. May be called repeatedly;
    /// when no queue is added, a single `"default"` queue with weight 1 is
    /// assumed.
    pub fn queue(mut self, name: impl Into<String>, weight: u32) -> Self {
        self.queues.insert(name.into(), weight);
        self
    }

    /// Replaces the whole queue map.
    pub fn queues(mut self, queues: HashMap<String, u32>) -> Self {
        self.queues = queues;
        self
    }

    /// Serves queues strictly by descending weight instead of the
    /// weighted-random order.
    pub fn strict_priority(mut self, strict: bool) -> Self {
        self.strict_priority = strict;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = Some(grace);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = Some(backoff);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<ProcessorConfig> {
        let mut queues = self.queues;
        if queues.is_empty() {
            queues.insert(DEFAULT_QUEUE.to_owned(), 1);
        }

        let config = ProcessorConfig {
            concurrency: self.concurrency.context("concurrency is required")?,
            queues,
            strict_priority: self.strict_priority,
            shutdown_grace: self
                .shutdown_grace
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS)),
            poll_interval: self
                .poll_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)),
            idle_backoff: self
                .idle_backoff
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_IDLE_BACKOFF_MS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_METRICS_INTERVAL_SECS)),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_applies_defaults() {
        let config = ProcessorConfig::builder().concurrency(4).build().unwrap();
        assert_eq!(config.concurrency(), 4);
        assert_eq!(config.queues().len(), 1);
        assert_eq!(config.queues().get(DEFAULT_QUEUE), Some(&1));
        assert!(!config.strict_priority());
        assert_eq!(
            config.shutdown_grace(),
            Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS)
        );
        assert_eq!(
            config.poll_interval(),
            Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)
        );
        assert_eq!(
            config.idle_backoff(),
            Duration::from_millis(DEFAULT_IDLE_BACKOFF_MS)
        );
        assert_eq!(
            config.metrics_interval(),
            Duration::from_secs(DEFAULT_METRICS_INTERVAL_SECS)
        );
    }

    #[test]
    fn queue_entries_accumulate() {
        let config = ProcessorConfig::builder()
            .concurrency(1)
            .queue("critical", 6)
            .queue("default", 3)
            .queue("low", 1)
            .build()
            .unwrap();
        assert_eq!(config.queues().len(), 3);
        assert_eq!(config.queues().get("critical"), Some(&6));
    }

    #[test]
    fn concurrency_is_required() {
        let err = ProcessorConfig::builder().build().unwrap_err();
        assert!(
            format!("{err}").contains("concurrency"),
            "error should mention missing concurrency"
        );
    }

    #[test]
    fn validation_catches_invalid_values() {
        let err = ProcessorConfig::builder().concurrency(0).build().unwrap_err();
        assert!(format!("{err}").contains("concurrency"));

        let err = ProcessorConfig::builder()
            .concurrency(1)
            .queue("default", 0)
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("positive priority weight"));

        let err = ProcessorConfig::builder()
            .concurrency(1)
            .queue("  ", 1)
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("queue names"));

        let err = ProcessorConfig::builder()
            .concurrency(1)
            .shutdown_grace(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("shutdown_grace"));

        let err = ProcessorConfig::builder()
            .concurrency(1)
            .poll_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("poll_interval"));

        let err = ProcessorConfig::builder()
            .concurrency(1)
            .idle_backoff(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("idle_backoff"));

        let err = ProcessorConfig::builder()
            .concurrency(1)
            .metrics_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("metrics_interval"));
    }
}
