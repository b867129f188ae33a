use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// The three single-purpose shutdown signals shared by the dispatch loop and
/// its workers.
///
/// - `abort` unblocks a slot wait so an already-dequeued task can be put back
///   instead of executed. Level-triggered; observable before `done`.
/// - `done` tells the dispatch loop to exit between ticks. Delivered once.
/// - `quit` force-abandons in-flight handlers once the grace deadline passes.
///   Level-triggered; armed strictly after `stop` has completed.
///
/// Collapsing these into one cancellation token would lose the distinction
/// between "stop accepting" and "kill in-flight".
pub(crate) struct ShutdownSignals {
    abort: CancellationToken,
    quit: CancellationToken,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
    stopped: AtomicBool,
}

impl ShutdownSignals {
    pub(crate) fn new() -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            abort: CancellationToken::new(),
            quit: CancellationToken::new(),
            done_tx,
            done_rx,
            stopped: AtomicBool::new(false),
        }
    }

    pub(crate) fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }

    pub(crate) fn quit_token(&self) -> CancellationToken {
        self.quit.clone()
    }

    pub(crate) fn done_receiver(&self) -> watch::Receiver<bool> {
        self.done_rx.clone()
    }

    /// Raises `abort`, then delivers `done`. Returns `true` on the first call
    /// and `false` on every subsequent one.
    pub(crate) fn raise_stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        // Unblock any slot wait before the dispatch loop is told to exit.
        self.abort.cancel();
        let _ = self.done_tx.send(true);
        true
    }

    /// Schedules `quit` to fire once `grace` has elapsed. The returned handle
    /// can be aborted if every worker drains before the deadline.
    pub(crate) fn arm_quit_after(&self, grace: Duration) -> JoinHandle<()> {
        let quit = self.quit.clone();
        tokio::spawn(async move {
            sleep(grace).await;
            quit.cancel();
        })
    }
}
