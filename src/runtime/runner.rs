use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::processor::Processor;

/// Coordinates the processor lifecycle and handles OS signals for graceful
/// shutdowns.
pub struct Runner {
    processor: Processor,
    shutdown: CancellationToken,
}

impl Runner {
    pub fn new(processor: Processor) -> Self {
        Self {
            processor,
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns a clone of the shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is
    /// cancelled elsewhere, then drives the processor through its two-phase
    /// shutdown. Consumes the runner: a terminated processor cannot be
    /// restarted.
    pub async fn run_until_ctrl_c(mut self) -> Result<()> {
        self.processor.start().await?;
        tracing::info!("runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down runner");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
        }

        self.processor.terminate().await;
        Ok(())
    }
}
