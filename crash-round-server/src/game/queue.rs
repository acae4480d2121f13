//! Operation Queue
//!
//! Serializes concurrent requests of one kind into a single FIFO order.
//! Each caller gets a [`QueueTicket`] that resolves with exactly its own
//! result.
//!
//! ```text
//!  submit ──► [ VecDeque ] ──► drain task ──► processor(payload).await
//!    │                             │
//!    └── QueueTicket ◄── oneshot ──┘       outstanding: watch<usize>
//! ```
//!
//! - At most one request is in flight per queue.
//! - `submit` is synchronous, so a caller can check a gate and enqueue
//!   while holding a lock.
//! - `outstanding` counts queued plus in-flight requests; it drops only
//!   after the processor has finished, so `wait_drained` observes every
//!   side effect the processor made.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error};

use crate::error::{GameError, GameResult};

/// Async handler applied to each payload in order.
pub type Processor<P, R> = Arc<dyn Fn(P) -> BoxFuture<'static, GameResult<R>> + Send + Sync>;

struct QueueRequest<P, R> {
    payload: P,
    reply: oneshot::Sender<GameResult<R>>,
}

struct Pending<P, R> {
    requests: VecDeque<QueueRequest<P, R>>,
    draining: bool,
}

struct Inner<P, R> {
    name: &'static str,
    max_backlog: usize,
    processor: Processor<P, R>,
    pending: Mutex<Pending<P, R>>,
    outstanding: watch::Sender<usize>,
}

/// Handle to a submitted request.
#[must_use = "a ticket does nothing unless awaited"]
pub struct QueueTicket<R> {
    rx: oneshot::Receiver<GameResult<R>>,
}

impl<R> QueueTicket<R> {
    /// Wait for this request's result.
    pub async fn wait(self) -> GameResult<R> {
        self.rx
            .await
            .map_err(|_| GameError::Operational("queued request was dropped".into()))?
    }
}

/// FIFO request queue with one in-flight request.
pub struct OperationQueue<P, R> {
    inner: Arc<Inner<P, R>>,
}

impl<P, R> Clone for OperationQueue<P, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P, R> OperationQueue<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    pub fn new(name: &'static str, max_backlog: usize, processor: Processor<P, R>) -> Self {
        let (outstanding, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                name,
                max_backlog,
                processor,
                pending: Mutex::new(Pending {
                    requests: VecDeque::new(),
                    draining: false,
                }),
                outstanding,
            }),
        }
    }

    /// Enqueue a request and start draining if idle.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, payload: P) -> GameResult<QueueTicket<R>> {
        let (reply, rx) = oneshot::channel();

        let start_drain = {
            let mut pending = self.lock()?;
            let backlog = *self.inner.outstanding.borrow();
            if backlog >= self.inner.max_backlog {
                return Err(GameError::CapacityExceeded { backlog });
            }
            pending.requests.push_back(QueueRequest { payload, reply });
            self.inner.outstanding.send_modify(|n| *n += 1);
            !std::mem::replace(&mut pending.draining, true)
        };

        if start_drain {
            tokio::spawn(drain(self.inner.clone()));
        }
        Ok(QueueTicket { rx })
    }

    /// Queued plus in-flight requests.
    pub fn outstanding(&self) -> usize {
        *self.inner.outstanding.borrow()
    }

    /// Resolve once nothing is queued or in flight.
    pub async fn wait_drained(&self) {
        let mut rx = self.inner.outstanding.subscribe();
        // the sender lives in `inner`, which we hold, so this cannot fail
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    fn lock(&self) -> GameResult<std::sync::MutexGuard<'_, Pending<P, R>>> {
        self.inner
            .pending
            .lock()
            .map_err(|_| GameError::Operational(format!("{} queue lock poisoned", self.inner.name)))
    }
}

async fn drain<P, R>(inner: Arc<Inner<P, R>>)
where
    P: Send + 'static,
    R: Send + 'static,
{
    loop {
        let next = match inner.pending.lock() {
            Ok(mut pending) => match pending.requests.pop_front() {
                Some(request) => request,
                None => {
                    pending.draining = false;
                    return;
                }
            },
            Err(_) => {
                error!("{} queue lock poisoned, drain stopped", inner.name);
                return;
            }
        };

        let QueueRequest { payload, reply } = next;
        let result = AssertUnwindSafe((inner.processor)(payload))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!("{} queue processor panicked", inner.name);
                Err(GameError::Operational("request processing failed".into()))
            });

        if reply.send(result).is_err() {
            debug!("{} queue caller went away before its result", inner.name);
        }
        inner.outstanding.send_modify(|n| *n = n.saturating_sub(1));
    }
}
