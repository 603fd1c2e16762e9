//! Bounded concurrency with a bounded FIFO wait queue.
//!
//! Up to `capacity` executions run at once. Up to `queue_depth` more wait in
//! arrival order (tokio's semaphore is fair). Anything beyond that is turned
//! away immediately with `ResourceExhausted`.
//!
//! Both the slot and the queue position are RAII values, so a request that is
//! cancelled while waiting or while running gives its place back on drop.

use crate::error::ExecError;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::debug;

#[derive(Debug)]
struct Inner {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    queue_depth: usize,
    queued: AtomicUsize,
}

#[derive(Debug, Clone)]
pub struct Admission {
    inner: Arc<Inner>,
}

/// Point-in-time view for health reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionSnapshot {
    pub capacity: usize,
    pub active: usize,
    pub queued: usize,
    pub queue_depth: usize,
}

/// Held for the whole lifetime of one execution request
#[derive(Debug)]
pub struct ExecutionSlot {
    _permit: OwnedSemaphorePermit,
}

struct QueueTicket {
    inner: Arc<Inner>,
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        self.inner.queued.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Admission {
    pub fn new(capacity: usize, queue_depth: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity,
                queue_depth,
                queued: AtomicUsize::new(0),
            }),
        }
    }

    pub async fn acquire(&self) -> Result<ExecutionSlot, ExecError> {
        match self.inner.semaphore.clone().try_acquire_owned() {
            Ok(permit) => return Ok(ExecutionSlot { _permit: permit }),
            Err(TryAcquireError::Closed) => return Err(self.exhausted()),
            Err(TryAcquireError::NoPermits) => {}
        }

        let ticket = self.enqueue()?;
        debug!(
            queued = self.inner.queued.load(Ordering::SeqCst),
            "waiting for execution slot"
        );
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| self.exhausted())?;
        drop(ticket);

        Ok(ExecutionSlot { _permit: permit })
    }

    fn enqueue(&self) -> Result<QueueTicket, ExecError> {
        let depth = self.inner.queue_depth;
        self.inner
            .queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |queued| {
                (queued < depth).then_some(queued + 1)
            })
            .map(|_| QueueTicket {
                inner: self.inner.clone(),
            })
            .map_err(|_| self.exhausted())
    }

    fn exhausted(&self) -> ExecError {
        let snapshot = self.snapshot();
        ExecError::ResourceExhausted {
            active: snapshot.active,
            queued: snapshot.queued,
        }
    }

    pub fn snapshot(&self) -> AdmissionSnapshot {
        let available = self.inner.semaphore.available_permits();
        AdmissionSnapshot {
            capacity: self.inner.capacity,
            active: self.inner.capacity.saturating_sub(available),
            queued: self.inner.queued.load(Ordering::SeqCst),
            queue_depth: self.inner.queue_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_immediate_admission_within_capacity() {
        let admission = Admission::new(2, 0);
        let _a = admission.acquire().await.unwrap();
        let _b = admission.acquire().await.unwrap();
        assert_eq!(admission.snapshot().active, 2);
    }

    #[tokio::test]
    async fn test_rejects_beyond_queue_depth() {
        let admission = Admission::new(1, 1);
        let running = admission.acquire().await.unwrap();

        let waiter = {
            let admission = admission.clone();
            tokio::spawn(async move { admission.acquire().await.map(|_| ()) })
        };
        while admission.snapshot().queued == 0 {
            tokio::task::yield_now().await;
        }

        let rejected = admission.acquire().await;
        assert!(matches!(
            rejected,
            Err(ExecError::ResourceExhausted { active: 1, queued: 1 })
        ));

        drop(running);
        waiter.await.unwrap().unwrap();
        assert_eq!(admission.snapshot().queued, 0);
    }

    #[tokio::test]
    async fn test_queue_is_fifo() {
        let admission = Admission::new(1, 8);
        let running = admission.acquire().await.unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        for id in 0..4 {
            let waiter = admission.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let _slot = waiter.acquire().await.unwrap();
                tx.send(id).unwrap();
            });
            // make arrival order deterministic
            while admission.snapshot().queued < id + 1 {
                tokio::task::yield_now().await;
            }
        }

        drop(running);
        let mut order = Vec::new();
        for _ in 0..4 {
            order.push(rx.recv().await.unwrap());
        }
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_releases_queue_position() {
        let admission = Admission::new(1, 1);
        let _running = admission.acquire().await.unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(20), admission.acquire()).await;
        assert!(waited.is_err());
        assert_eq!(admission.snapshot().queued, 0);

        // the freed position can be taken again
        let again = tokio::time::timeout(Duration::from_millis(20), admission.acquire()).await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_dropped_slot_is_returned() {
        let admission = Admission::new(1, 0);
        let slot = admission.acquire().await.unwrap();
        assert!(admission.acquire().await.is_err());
        drop(slot);
        assert!(admission.acquire().await.is_ok());
        assert_eq!(admission.snapshot().active, 0);
    }
}
