//! Completion tracking for parallel asynchronous work
//!
//! A [`CompletionState`] accumulates progress reported by many workers toward
//! a known target. Reaching the target, or cancelling, moves the state to a
//! terminal status exactly once: the completion callback runs once and every
//! waiter is released.
//!
//! ```
//! use filing_coordinator::completion::{CompletionState, CompletionStatus};
//!
//! let state = CompletionState::new(0usize, 3);
//! state.accumulate(1);
//! state.accumulate(2);
//! assert_eq!(state.status(), CompletionStatus::Complete);
//! ```

use serde::Serialize;
use std::ops::Add;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Lifecycle of a tracked operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompletionStatus {
    Ready,
    Processing,
    Canceled,
    Complete,
}

impl CompletionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CompletionStatus::Canceled | CompletionStatus::Complete)
    }
}

type CompletionCallback<T> = Box<dyn FnOnce(CompletionStatus, &T) + Send>;

struct Inner<T> {
    value: T,
    status: CompletionStatus,
    on_complete: Option<CompletionCallback<T>>,
}

/// Accumulated value, target and status of one multi-unit operation
pub struct CompletionState<T> {
    target: T,
    inner: Mutex<Inner<T>>,
    status_tx: watch::Sender<CompletionStatus>,
}

impl<T> std::fmt::Debug for CompletionState<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("CompletionState")
            .field("value", &inner.value)
            .field("target", &self.target)
            .field("status", &inner.status)
            .finish()
    }
}

impl<T> CompletionState<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    pub fn new(initial: T, target: T) -> Self {
        let (status_tx, _) = watch::channel(CompletionStatus::Ready);
        Self {
            target,
            inner: Mutex::new(Inner {
                value: initial,
                status: CompletionStatus::Ready,
                on_complete: None,
            }),
            status_tx,
        }
    }

    /// Create a state whose callback runs once on completion or cancellation
    pub fn with_callback<F>(initial: T, target: T, on_complete: F) -> Self
    where
        F: FnOnce(CompletionStatus, &T) + Send + 'static,
    {
        let state = Self::new(initial, target);
        state.lock().on_complete = Some(Box::new(on_complete));
        state
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn value(&self) -> T {
        self.lock().value.clone()
    }

    pub fn status(&self) -> CompletionStatus {
        self.lock().status
    }

    /// Move Ready to Processing; returns false in any other state
    pub fn start(&self) -> bool {
        let mut inner = self.lock();
        if inner.status != CompletionStatus::Ready {
            return false;
        }
        inner.status = CompletionStatus::Processing;
        drop(inner);
        self.publish_processing();
        true
    }

    /// Replace the accumulated value
    pub fn set_value(&self, value: T) -> CompletionStatus {
        self.update_with(|_| value)
    }

    /// Add a unit of progress to the accumulated value
    pub fn accumulate(&self, delta: T) -> CompletionStatus
    where
        T: Add<Output = T>,
    {
        self.update_with(|current| current.clone() + delta)
    }

    /// Apply an update and complete if the value now equals the target.
    ///
    /// Updates after a terminal state are ignored. An update in Ready
    /// implicitly starts processing.
    fn update_with(&self, update: impl FnOnce(&T) -> T) -> CompletionStatus {
        let fired = {
            let mut inner = self.lock();
            if inner.status.is_terminal() {
                return inner.status;
            }

            inner.status = CompletionStatus::Processing;
            inner.value = update(&inner.value);

            if inner.value == self.target {
                inner.status = CompletionStatus::Complete;
                Some((inner.on_complete.take(), inner.value.clone()))
            } else {
                None
            }
        };

        match fired {
            Some((callback, value)) => {
                self.fire(CompletionStatus::Complete, callback, &value);
                CompletionStatus::Complete
            }
            None => {
                self.publish_processing();
                CompletionStatus::Processing
            }
        }
    }

    // Never overwrites a terminal status published by a racing thread.
    fn publish_processing(&self) {
        self.status_tx.send_if_modified(|status| {
            if *status == CompletionStatus::Ready {
                *status = CompletionStatus::Processing;
                true
            } else {
                false
            }
        });
    }

    /// Force the Canceled status. Returns true only for the call that
    /// performed the transition.
    pub fn cancel(&self) -> bool {
        let (callback, value) = {
            let mut inner = self.lock();
            if inner.status.is_terminal() {
                return false;
            }
            inner.status = CompletionStatus::Canceled;
            (inner.on_complete.take(), inner.value.clone())
        };

        self.fire(CompletionStatus::Canceled, callback, &value);
        true
    }

    fn fire(&self, status: CompletionStatus, callback: Option<CompletionCallback<T>>, value: &T) {
        if let Some(callback) = callback {
            callback(status, value);
        }
        self.status_tx.send_replace(status);
    }

    /// Wait until the operation completes or is canceled
    pub async fn wait(&self) -> CompletionStatus {
        let mut rx = self.status_tx.subscribe();
        let status = match rx.wait_for(CompletionStatus::is_terminal).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        };
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counting_state(target: usize) -> (CompletionState<usize>, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let state = CompletionState::with_callback(0usize, target, move |_, _| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        (state, fired)
    }

    #[test]
    fn test_fires_exactly_when_target_reached() {
        let (state, fired) = counting_state(3);

        assert_eq!(state.accumulate(1), CompletionStatus::Processing);
        assert_eq!(state.accumulate(1), CompletionStatus::Processing);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        assert_eq!(state.accumulate(1), CompletionStatus::Complete);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Further updates are ignored and do not re-fire
        assert_eq!(state.accumulate(1), CompletionStatus::Complete);
        assert_eq!(state.value(), 3);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_fires_once_and_blocks_later_updates() {
        let (state, fired) = counting_state(10);
        state.accumulate(4);

        assert!(state.cancel());
        assert_eq!(state.status(), CompletionStatus::Canceled);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        assert!(!state.cancel());
        assert_eq!(state.accumulate(6), CompletionStatus::Canceled);
        assert_eq!(state.value(), 4);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_after_complete_is_noop() {
        let (state, fired) = counting_state(1);
        state.accumulate(1);
        assert!(!state.cancel());
        assert_eq!(state.status(), CompletionStatus::Complete);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_only_from_ready() {
        let state = CompletionState::new(0usize, 2);
        assert_eq!(state.status(), CompletionStatus::Ready);
        assert!(state.start());
        assert!(!state.start());
        assert_eq!(state.status(), CompletionStatus::Processing);
    }

    #[test]
    fn test_set_value_uses_equality() {
        let (state, fired) = counting_state(5);
        state.set_value(7);
        assert_eq!(state.status(), CompletionStatus::Processing);
        state.set_value(5);
        assert_eq!(state.status(), CompletionStatus::Complete);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_accumulation_fires_once() {
        let workers = 16;
        let per_worker = 50;
        let (state, fired) = counting_state(workers * per_worker);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    for _ in 0..per_worker {
                        state.accumulate(1);
                    }
                });
            }
        });

        assert_eq!(state.status(), CompletionStatus::Complete);
        assert_eq!(state.value(), workers * per_worker);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_racing_cancel_and_completion_fire_once() {
        for _ in 0..50 {
            let (state, fired) = counting_state(100);
            std::thread::scope(|scope| {
                scope.spawn(|| {
                    for _ in 0..100 {
                        state.accumulate(1);
                    }
                });
                scope.spawn(|| {
                    state.cancel();
                });
            });
            assert!(state.status().is_terminal());
            assert_eq!(fired.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_wait_released_by_completion() {
        let state = Arc::new(CompletionState::new(0u32, 2));
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        state.accumulate(1);
        state.accumulate(1);

        let status = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be released")
            .unwrap();
        assert_eq!(status, CompletionStatus::Complete);
    }

    #[tokio::test]
    async fn test_wait_released_by_cancel() {
        let state = Arc::new(CompletionState::new(0u32, 2));
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait().await })
        };

        state.cancel();
        let status = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be released")
            .unwrap();
        assert_eq!(status, CompletionStatus::Canceled);
    }

    #[tokio::test]
    async fn test_wait_after_terminal_returns_immediately() {
        let state = CompletionState::new(0u32, 1);
        state.accumulate(1);
        assert_eq!(state.wait().await, CompletionStatus::Complete);
    }
}
