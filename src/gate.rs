//! Admission control for inference executions
//!
//! A fixed-capacity semaphore bounds how many forecasts run at once.
//! Requests beyond capacity wait; there is no rejection path and no
//! timeout; callers are expected to set their own request deadlines
//! upstream. Wait time and the active count feed [`QueueMetrics`] so the
//! `/metrics` endpoint can report saturation.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::metrics::QueueMetrics;

/// Bounded-slot gate over the inference routine
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    metrics: Arc<QueueMetrics>,
}

impl ConcurrencyGate {
    /// New gate with `capacity` slots (clamped to at least 1)
    #[must_use]
    pub fn new(capacity: usize, metrics: Arc<QueueMetrics>) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            metrics,
        }
    }

    /// Configured slot count
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a slot, recording the wait duration and active count
    ///
    /// The returned guard releases the slot and decrements the active
    /// count when dropped, on every exit path.
    pub async fn acquire(&self) -> GatePermit {
        let waited = Instant::now();
        // The semaphore is owned by the gate and never closed.
        let permit = Semaphore::acquire_owned(Arc::clone(&self.semaphore))
            .await
            .expect("gate semaphore is never closed");
        let wait = waited.elapsed();
        self.metrics.record_acquired(wait);
        debug!(
            wait_ms = wait.as_millis() as u64,
            available = self.semaphore.available_permits(),
            capacity = self.capacity,
            "gate slot acquired"
        );
        GatePermit {
            _permit: permit,
            metrics: Arc::clone(&self.metrics),
        }
    }
}

/// RAII slot guard returned by [`ConcurrencyGate::acquire`]
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    metrics: Arc<QueueMetrics>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.metrics.record_released();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn permit_release_frees_the_slot() {
        let metrics = Arc::new(QueueMetrics::new());
        let gate = ConcurrencyGate::new(2, Arc::clone(&metrics));
        let a = gate.acquire().await;
        let b = gate.acquire().await;
        assert_eq!(gate.available(), 0);
        assert_eq!(metrics.active(), 2);
        drop(a);
        assert_eq!(gate.available(), 1);
        assert_eq!(metrics.active(), 1);
        drop(b);
        assert_eq!(metrics.active(), 0);
    }

    #[tokio::test]
    async fn capacity_is_clamped_to_one() {
        let gate = ConcurrencyGate::new(0, Arc::new(QueueMetrics::new()));
        assert_eq!(gate.capacity(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_flight_executions_never_exceed_capacity() {
        const CAPACITY: usize = 3;
        const REQUESTS: usize = 12;

        let metrics = Arc::new(QueueMetrics::new());
        let gate = Arc::new(ConcurrencyGate::new(CAPACITY, Arc::clone(&metrics)));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..REQUESTS {
            let gate = Arc::clone(&gate);
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire().await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.expect("task");
        }
        assert!(max_seen.load(Ordering::SeqCst) <= CAPACITY);
        assert_eq!(metrics.active(), 0);
    }

    #[tokio::test]
    async fn permit_released_on_panic_path() {
        let metrics = Arc::new(QueueMetrics::new());
        let gate = Arc::new(ConcurrencyGate::new(1, Arc::clone(&metrics)));
        let g2 = Arc::clone(&gate);
        let handle = tokio::spawn(async move {
            let _permit = g2.acquire().await;
            panic!("boom");
        });
        assert!(handle.await.is_err());
        // Slot must be usable again after the panic.
        let _permit = gate.acquire().await;
        assert_eq!(metrics.active(), 1);
    }
}
