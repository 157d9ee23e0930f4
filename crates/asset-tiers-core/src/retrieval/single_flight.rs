//! Per-key request coalescing.

use crate::error::Result;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

type SharedCall<T> = Shared<BoxFuture<'static, Result<T>>>;

/// Lets concurrent callers for one key share a single in-flight call.
///
/// The first caller for a key starts the call; later callers await the same
/// future and receive a clone of its result. The entry is dropped once the
/// call completes, so the next caller starts fresh.
pub struct SingleFlight<T: Clone> {
    calls: Mutex<HashMap<String, SharedCall<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Run `call` for `key` unless one is already in flight.
    pub async fn run<F, Fut>(&self, key: &str, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let shared = {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            match calls.get(key) {
                Some(existing) => existing.clone(),
                None => {
                    let fresh = call().boxed().shared();
                    calls.insert(key.to_string(), fresh.clone());
                    fresh
                }
            }
        };

        let result = shared.clone().await;

        // Whoever finishes first removes the entry, but only if it still
        // belongs to this call.
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        if calls.get(key).is_some_and(|current| current.ptr_eq(&shared)) {
            calls.remove(key);
        }
        result
    }

    /// Keys with a call in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssetError;
    use crate::models::Tier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_call() {
        let flight = Arc::new(SingleFlight::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let flight = flight.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flight
                    .run("imgs/a.png", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(7)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_errors_are_shared_and_not_cached() {
        let flight = SingleFlight::<u32>::new();
        let err = flight
            .run("k", || async {
                Err(AssetError::unavailable(Tier::Remote, "down"))
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let ok = flight.run("k", || async { Ok(1) }).await.unwrap();
        assert_eq!(ok, 1);
    }
}
