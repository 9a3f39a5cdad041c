//! Cancellable background tasks.
//!
//! Periodic sweeps run as [`ScheduledTask`]s so shutdown can stop them
//! instead of letting timers fire into torn-down state.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle to a spawned background task. Dropping it cancels the task.
#[derive(Debug)]
pub struct ScheduledTask {
    name: String,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    /// Run `tick` every `interval` until cancelled. The first tick fires after one interval.
    pub fn every<F>(name: impl Into<String>, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();
        let child = token.clone();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // interval() completes its first tick immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = child.cancelled() => {
                        debug!(task = %task_name, "Scheduled task cancelled");
                        break;
                    }
                    _ = ticker.tick() => tick(),
                }
            }
        });

        Self {
            name,
            token,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel and wait for the task to wind down
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
