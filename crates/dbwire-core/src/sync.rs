//! Strictly FIFO async mutual exclusion.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

struct State<T> {
    /// `Some` while nobody holds the lock
    value: Option<T>,
    waiters: VecDeque<oneshot::Sender<T>>,
}

/// An async lock that grants ownership in exactly the order it was requested.
///
/// The protected value is handed directly from the releasing guard to the
/// oldest live waiter, so a late arrival can never overtake a queued one.
pub struct FifoLock<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for FifoLock<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> std::fmt::Debug for FifoLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FifoLock")
            .field("locked", &state.value.is_none())
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

impl<T: Send> FifoLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                value: Some(value),
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Wait for exclusive access.
    pub async fn lock(&self) -> FifoGuard<T> {
        loop {
            let rx = {
                let mut state = self.state.lock();
                if state.waiters.is_empty() {
                    if let Some(value) = state.value.take() {
                        return self.guard(value);
                    }
                }
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                rx
            };

            let mut waiting = Waiting {
                rx: Some(rx),
                state: Arc::clone(&self.state),
            };
            let Some(rx) = waiting.rx.as_mut() else {
                continue;
            };
            if let Ok(value) = rx.await {
                waiting.rx = None;
                return self.guard(value);
            }
        }
    }

    /// Take the lock only if it is free and nobody is queued.
    pub fn try_lock(&self) -> Option<FifoGuard<T>> {
        let mut state = self.state.lock();
        if !state.waiters.is_empty() {
            return None;
        }
        state.value.take().map(|value| self.guard(value))
    }

    /// Number of callers currently waiting.
    pub fn queue_len(&self) -> usize {
        self.state.lock().waiters.len()
    }

    fn guard(&self, value: T) -> FifoGuard<T> {
        FifoGuard {
            value: Some(value),
            state: Arc::clone(&self.state),
        }
    }
}

fn release<T>(state: &Mutex<State<T>>, mut value: T) {
    let mut state = state.lock();
    while let Some(tx) = state.waiters.pop_front() {
        match tx.send(value) {
            Ok(()) => return,
            // Waiter gave up; try the next one.
            Err(returned) => value = returned,
        }
    }
    state.value = Some(value);
}

/// Returns a value that was handed to a waiter whose future was dropped.
struct Waiting<T> {
    rx: Option<oneshot::Receiver<T>>,
    state: Arc<Mutex<State<T>>>,
}

impl<T> Drop for Waiting<T> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if let Ok(value) = rx.try_recv() {
                release(&self.state, value);
            }
        }
    }
}

/// Exclusive access to the value inside a [`FifoLock`]; releases on drop.
pub struct FifoGuard<T> {
    value: Option<T>,
    state: Arc<Mutex<State<T>>>,
}

impl<T> Deref for FifoGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.value {
            Some(value) => value,
            None => unreachable!("guard value is only taken in drop"),
        }
    }
}

impl<T> DerefMut for FifoGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.value {
            Some(value) => value,
            None => unreachable!("guard value is only taken in drop"),
        }
    }
}

impl<T> Drop for FifoGuard<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            release(&self.state, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_exclusive_access() {
        let lock = FifoLock::new(0u32);
        {
            let mut guard = lock.lock().await;
            *guard += 1;
            assert!(lock.try_lock().is_none());
        }
        assert_eq!(*lock.lock().await, 1);
    }

    #[tokio::test]
    async fn test_grants_in_request_order() {
        let lock = FifoLock::new(Vec::<usize>::new());
        let first = lock.lock().await;

        let mut handles = Vec::new();
        for i in 0..5 {
            let task_lock = lock.clone();
            handles.push(tokio::spawn(async move {
                let mut guard = task_lock.lock().await;
                guard.push(i);
            }));
            // Make sure task i is queued before task i + 1 starts.
            while lock.queue_len() < i + 1 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }

        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*lock.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_lose_value() {
        let lock = FifoLock::new(7u8);
        let guard = lock.lock().await;

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move {
                let _g = lock.lock().await;
            })
        };
        while lock.queue_len() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        waiter.abort();
        let _ = waiter.await;

        drop(guard);
        let guard = tokio::time::timeout(Duration::from_secs(1), lock.lock())
            .await
            .expect("lock should be free again");
        assert_eq!(*guard, 7);
    }
}
