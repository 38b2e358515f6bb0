//! Trailing-edge debounce for outbound syncs.
//!
//! Every `arm()` restarts a quiet-period timer; the callback runs once the
//! timer survives a full period without being re-armed. There is no leading
//! call.

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Quiet period used when nothing else is configured.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Callback run when the timer fires.
pub type FireFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Handle to a debounce timer task. Dropping the handle stops the task.
pub struct Debouncer {
    sender: mpsc::UnboundedSender<()>,
    arms: AtomicU64,
    fires: Arc<AtomicU64>,
}

impl Debouncer {
    /// Start the timer task. Must be called inside a Tokio runtime.
    pub fn spawn(delay: Duration, on_fire: FireFn) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let fires = Arc::new(AtomicU64::new(0));

        tokio::spawn(debounce_loop(delay, receiver, on_fire, fires.clone()));

        Self {
            sender,
            arms: AtomicU64::new(0),
            fires,
        }
    }

    /// A debouncer whose firing does nothing.
    pub fn inert(delay: Duration) -> Self {
        Self::spawn(delay, Arc::new(|| Box::pin(async {})))
    }

    /// (Re)start the quiet period.
    pub fn arm(&self) {
        self.arms.fetch_add(1, Ordering::Relaxed);
        let _ = self.sender.send(());
    }

    /// How many times `arm()` has been called.
    pub fn armed_count(&self) -> u64 {
        self.arms.load(Ordering::Relaxed)
    }

    /// How many times the timer has fired.
    pub fn fired_count(&self) -> u64 {
        self.fires.load(Ordering::Relaxed)
    }
}

async fn debounce_loop(
    delay: Duration,
    mut receiver: mpsc::UnboundedReceiver<()>,
    on_fire: FireFn,
    fires: Arc<AtomicU64>,
) {
    // Idle until the first arm.
    while receiver.recv().await.is_some() {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    fires.fetch_add(1, Ordering::Relaxed);
                    debug!("Debounce timer fired after {:?} of quiet", delay);
                    // The callback decides whether a sync is already running.
                    tokio::spawn(on_fire());
                    break;
                }
                armed = receiver.recv() => {
                    if armed.is_none() {
                        return;
                    }
                }
            }
        }
    }
}
