//! # Admission Controller
//!
//! Bounds how many outbound operations run at once so the remote store's
//! connection budget is never exhausted. Excess callers wait in a queue that
//! is re-sorted by priority every time a slot frees up, so a late
//! high-priority request can overtake earlier low-priority ones.
//!
//! Slots are held by an [`AdmissionPermit`]; the permit releases its slot on
//! drop, which covers callers that abandon their future mid-flight.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::AdmissionConfig;
use crate::logging::log_admission_event;

/// Errors produced by [`AdmissionController::execute`]
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError<E> {
    /// The queue was cleared before this operation was admitted
    #[error("Operation cancelled before admission")]
    Cancelled,

    /// A queue depth limit is configured and has been reached
    #[error("Admission queue is full ({depth} operations waiting)")]
    QueueFull { depth: usize },

    /// The operation ran and failed; the error is passed through untouched
    #[error("Operation failed: {0}")]
    Operation(E),
}

impl<E> AdmissionError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AdmissionError::Cancelled)
    }

    /// The operation's own error, if it got far enough to produce one
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            AdmissionError::Operation(e) => Some(e),
            _ => None,
        }
    }
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdmissionStatus {
    pub active: usize,
    pub queued: usize,
    pub max_concurrent: usize,
    pub utilization_percent: f64,
}

struct QueuedOperation {
    priority: i32,
    seq: u64,
    grant: oneshot::Sender<AdmissionPermit>,
}

#[derive(Default)]
struct AdmissionState {
    active: usize,
    queue: Vec<QueuedOperation>,
    next_seq: u64,
}

struct Inner {
    max_concurrent: usize,
    state: Mutex<AdmissionState>,
}

impl Inner {
    /// Called with the lock held: admit queued operations while capacity allows
    fn drain(self: &Arc<Self>, state: &mut AdmissionState) {
        if state.queue.is_empty() || state.active >= self.max_concurrent {
            return;
        }

        // Stable sort keeps submission order among equal priorities
        state.queue.sort_by(|a, b| b.priority.cmp(&a.priority));

        while state.active < self.max_concurrent && !state.queue.is_empty() {
            let next = state.queue.remove(0);
            state.active += 1;
            let permit = AdmissionPermit {
                inner: Some(Arc::clone(self)),
            };

            match next.grant.send(permit) {
                Ok(()) => {
                    log_admission_event(
                        "admitted_from_queue",
                        next.priority,
                        state.active,
                        state.queue.len(),
                        self.max_concurrent,
                    );
                }
                Err(mut returned) => {
                    // Caller gave up while waiting; hand the slot to the next one
                    returned.defuse();
                    state.active -= 1;
                    debug!(seq = next.seq, "Skipping abandoned queued operation");
                }
            }
        }
    }

    fn release(self: &Arc<Self>) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        self.drain(&mut state);
    }
}

/// One admitted slot. Releasing happens on drop.
pub struct AdmissionPermit {
    inner: Option<Arc<Inner>>,
}

impl AdmissionPermit {
    fn defuse(&mut self) {
        self.inner = None;
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.release();
        }
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("armed", &self.inner.is_some())
            .finish()
    }
}

/// Priority-ordered concurrency limiter for outbound operations
#[derive(Clone)]
pub struct AdmissionController {
    name: String,
    max_queue_depth: Option<usize>,
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

impl AdmissionController {
    /// Create a controller that allows `max_concurrent` running operations.
    ///
    /// A limit of zero would never admit anything, so it is raised to one.
    pub fn new(name: impl Into<String>, max_concurrent: usize) -> Self {
        let name = name.into();
        let max_concurrent = if max_concurrent == 0 {
            warn!(component = %name, "max_concurrent of 0 raised to 1");
            1
        } else {
            max_concurrent
        };

        info!(
            component = %name,
            max_concurrent = max_concurrent,
            "Admission controller initialized"
        );

        Self {
            name,
            max_queue_depth: None,
            inner: Arc::new(Inner {
                max_concurrent,
                state: Mutex::new(AdmissionState::default()),
            }),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &AdmissionConfig) -> Self {
        let mut controller = Self::new(name, config.max_concurrent);
        controller.max_queue_depth = config.max_queue_depth;
        controller
    }

    /// Reject new submissions once this many operations are waiting
    pub fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = Some(depth);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `operation` once a slot is available.
    ///
    /// Higher `priority` values are admitted first; ties keep submission
    /// order. The operation's own error comes back as
    /// [`AdmissionError::Operation`] and is never retried.
    pub async fn execute<F, Fut, T, E>(
        &self,
        operation: F,
        priority: i32,
    ) -> Result<T, AdmissionError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.acquire(priority).await?;
        let result = operation().await;
        drop(permit);
        result.map_err(AdmissionError::Operation)
    }

    /// Wait for a slot without running anything yet
    pub async fn acquire<E>(&self, priority: i32) -> Result<AdmissionPermit, AdmissionError<E>> {
        let receiver = {
            let mut state = self.inner.state.lock();

            if state.active < self.inner.max_concurrent {
                state.active += 1;
                log_admission_event(
                    "admitted",
                    priority,
                    state.active,
                    state.queue.len(),
                    self.inner.max_concurrent,
                );
                return Ok(AdmissionPermit {
                    inner: Some(Arc::clone(&self.inner)),
                });
            }

            if let Some(depth) = self.max_queue_depth {
                if state.queue.len() >= depth {
                    warn!(
                        component = %self.name,
                        depth = depth,
                        "Admission queue full, rejecting submission"
                    );
                    return Err(AdmissionError::QueueFull { depth });
                }
            }

            let (grant, receiver) = oneshot::channel();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push(QueuedOperation {
                priority,
                seq,
                grant,
            });
            log_admission_event(
                "queued",
                priority,
                state.active,
                state.queue.len(),
                self.inner.max_concurrent,
            );
            receiver
        };

        receiver.await.map_err(|_| AdmissionError::Cancelled)
    }

    /// Current counts and utilization
    pub fn status(&self) -> AdmissionStatus {
        let state = self.inner.state.lock();
        let max = self.inner.max_concurrent;
        AdmissionStatus {
            active: state.active,
            queued: state.queue.len(),
            max_concurrent: max,
            utilization_percent: state.active as f64 / max as f64 * 100.0,
        }
    }

    /// Cancel every queued operation. Running operations are unaffected.
    ///
    /// Returns how many operations were cancelled.
    pub fn clear_queue(&self) -> usize {
        let cancelled: Vec<QueuedOperation> = {
            let mut state = self.inner.state.lock();
            state.queue.drain(..).collect()
        };
        let count = cancelled.len();
        // Dropping the senders resolves every waiter with Cancelled
        drop(cancelled);

        if count > 0 {
            info!(component = %self.name, cancelled = count, "Admission queue cleared");
        }
        count
    }
}
