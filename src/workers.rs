//! Per-pod work serializer.
//!
//! `PodWorkers` guarantees that at most one reconciliation runs per pod at
//! any moment while pods proceed in parallel with each other. Updates that
//! arrive while a pod's worker is busy collapse into a single-slot pending
//! cell where the latest update wins; converging to the newest desired state
//! subsumes every intermediate one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

/// Work consumer invoked by the pool, one call at a time per pod.
#[async_trait]
pub trait WorkHandler<W>: Send + Sync {
    async fn handle(&self, full_name: &str, work: W);
}

/// Pool of per-pod workers keyed by pod full name.
///
/// Presence of a key means a worker task is in flight for that pod; the
/// value is its pending cell. The entry is removed when the worker finishes
/// with nothing pending, so an empty map means the pool is idle.
pub struct PodWorkers<W> {
    handler: Arc<dyn WorkHandler<W>>,
    slots: Arc<Mutex<HashMap<String, Option<W>>>>,
}

impl<W: Send + 'static> PodWorkers<W> {
    pub fn new(handler: Arc<dyn WorkHandler<W>>) -> Self {
        Self {
            handler,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Hand `work` to the pod's worker.
    ///
    /// Starts a worker task if none is running for `full_name`; otherwise
    /// overwrites the pod's pending cell. When the running pass completes
    /// the worker consumes the cell and goes again, so the last update
    /// always gets applied.
    pub fn update(&self, full_name: &str, work: W) {
        let mut slots = self.slots.lock().expect("pod workers lock");
        if let Some(pending) = slots.get_mut(full_name) {
            *pending = Some(work);
            return;
        }
        slots.insert(full_name.to_string(), None);

        let handler = Arc::clone(&self.handler);
        let slots = Arc::clone(&self.slots);
        let full_name = full_name.to_string();
        tokio::spawn(async move {
            let mut current = work;
            loop {
                handler.handle(&full_name, current).await;

                let next = {
                    let mut slots = slots.lock().expect("pod workers lock");
                    match slots.get_mut(&full_name).and_then(Option::take) {
                        Some(work) => Some(work),
                        None => {
                            slots.remove(&full_name);
                            None
                        }
                    }
                };
                match next {
                    Some(work) => current = work,
                    None => break,
                }
            }
        });
    }

    /// Number of pods with a worker in flight.
    pub fn active_count(&self) -> usize {
        self.slots.lock().expect("pod workers lock").len()
    }

    pub fn is_idle(&self) -> bool {
        self.active_count() == 0
    }

    /// Wait until every worker has finished. For tests and shutdown.
    pub async fn drain(&self) {
        while !self.is_idle() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every handled value, optionally dawdling to force coalescing.
    struct Recorder {
        seen: Mutex<Vec<(String, u64)>>,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl Recorder {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                delay,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }

        fn seen(&self) -> Vec<(String, u64)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WorkHandler<u64> for Recorder {
        async fn handle(&self, full_name: &str, work: u64) {
            let active = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.seen.lock().unwrap().push((full_name.to_string(), work));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_single_update_runs_once() {
        let recorder = Recorder::new(Duration::ZERO);
        let workers = PodWorkers::new(recorder.clone() as Arc<dyn WorkHandler<u64>>);
        workers.update("foo.test", 1);
        workers.drain().await;
        assert_eq!(recorder.seen(), vec![("foo.test".to_string(), 1)]);
        assert!(workers.is_idle());
    }

    #[tokio::test]
    async fn test_updates_coalesce_to_latest() {
        let recorder = Recorder::new(Duration::from_millis(30));
        let workers = PodWorkers::new(recorder.clone() as Arc<dyn WorkHandler<u64>>);
        workers.update("foo.test", 1);
        workers.update("foo.test", 2);
        workers.update("foo.test", 3);
        workers.drain().await;

        // The first update starts a pass; 2 is overwritten by 3 in the
        // pending cell; the terminal pass reflects the last update.
        let seen = recorder.seen();
        assert_eq!(
            seen,
            vec![("foo.test".to_string(), 1), ("foo.test".to_string(), 3)]
        );
    }

    #[tokio::test]
    async fn test_pods_run_in_parallel_but_serialized_within_a_pod() {
        let recorder = Recorder::new(Duration::from_millis(20));
        let workers = PodWorkers::new(recorder.clone() as Arc<dyn WorkHandler<u64>>);
        for (pod, work) in [("a.test", 1), ("b.test", 2), ("c.test", 3)] {
            workers.update(pod, work);
        }
        assert_eq!(workers.active_count(), 3);
        workers.drain().await;

        assert_eq!(recorder.seen().len(), 3);
        assert!(recorder.max_in_flight.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_entry_removed_after_completion() {
        let recorder = Recorder::new(Duration::ZERO);
        let workers = PodWorkers::new(recorder.clone() as Arc<dyn WorkHandler<u64>>);
        workers.update("foo.test", 1);
        workers.drain().await;
        assert_eq!(workers.active_count(), 0);

        // A later update starts a fresh worker.
        workers.update("foo.test", 2);
        workers.drain().await;
        assert_eq!(recorder.seen().len(), 2);
    }
}
