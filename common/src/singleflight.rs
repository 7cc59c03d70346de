use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};

/// Process-wide `key -> pending result` map (spec §5's single-flight
/// admission guard). The first caller for a key runs the supplied future;
/// concurrent callers for the same key attach to it and receive the same
/// result. The entry is removed once the first caller's future resolves,
/// so a later, distinct admission attempt for the same key starts fresh.
pub struct SingleFlight<T: Clone + Send + Sync + 'static> {
    inflight: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run<F, Fut>(&self, key: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let cell = {
            let mut guard = self.inflight.lock().await;
            guard
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = cell.get_or_init(f).await.clone();

        let mut guard = self.inflight.lock().await;
        if let Some(existing) = guard.get(key) {
            if Arc::ptr_eq(existing, &cell) {
                guard.remove(key);
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_same_key_runs_once() {
        let flight: Arc<SingleFlight<u64>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let flight = flight.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flight
                    .run("same-question", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        42u64
                    })
                    .await
            }));
        }

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }

        assert!(results.iter().all(|r| *r == 42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_run_independently() {
        let flight: SingleFlight<u64> = SingleFlight::new();
        let a = flight.run("a", || async { 1u64 }).await;
        let b = flight.run("b", || async { 2u64 }).await;
        assert_eq!((a, b), (1, 2));
    }

    #[tokio::test]
    async fn key_is_reusable_after_completion() {
        let flight: SingleFlight<u64> = SingleFlight::new();
        let first = flight.run("k", || async { 1u64 }).await;
        let second = flight.run("k", || async { 2u64 }).await;
        assert_eq!((first, second), (1, 2));
    }
}
