//! FIFO pacing of outbound requests.
//!
//! Every side-effecting fetch in a sync run flows through one shared
//! throttle. Dispatch is strictly sequential: the head of the queue runs,
//! a timer arms, and the next entry may only run once the timer fires.
//! Completion order is unconstrained; only dispatch starts are paced.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;

/// A queued operation or its cancellation callback.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// The queue was cancelled before this entry dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "request cancelled before dispatch")
    }
}

impl std::error::Error for Cancelled {}

struct Entry {
    /// Taken when the entry dispatches; a present action means the entry
    /// is still waiting its turn.
    action: Option<Action>,
    on_cancel: Option<Action>,
}

struct Inner {
    queue: VecDeque<Entry>,
    /// Stands in for the single timer handle: `cancel` bumps it, and a
    /// sleeping timer task that wakes with a stale epoch does nothing.
    epoch: u64,
}

/// Paces a sequence of asynchronous side-effecting operations with a
/// minimum delay between the start of consecutive dispatches.
///
/// Invariants: at most one action dispatches per delay interval, dispatch
/// order equals enqueue order, and an action that has dispatched is never
/// cancelled.
#[derive(Clone)]
pub struct RequestThrottle {
    delay: Duration,
    inner: Arc<Mutex<Inner>>,
}

impl RequestThrottle {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: Arc::new(Mutex::new(Inner {
                queue: VecDeque::new(),
                epoch: 0,
            })),
        }
    }

    /// Appends an operation to the queue. If the queue was empty the
    /// action runs synchronously before `enqueue` returns and the pacing
    /// timer is armed; otherwise the entry waits for its turn.
    ///
    /// Must be called from within a tokio runtime (the pacing timer is a
    /// spawned sleep).
    pub fn enqueue(&self, action: impl FnOnce() + Send + 'static, on_cancel: Option<Action>) {
        let (dispatch, epoch) = {
            let mut inner = lock(&self.inner);
            let mut entry = Entry {
                action: Some(Box::new(action)),
                on_cancel,
            };
            let dispatch = if inner.queue.is_empty() {
                entry.action.take()
            } else {
                None
            };
            inner.queue.push_back(entry);
            (dispatch, inner.epoch)
        };
        if let Some(action) = dispatch {
            action();
            arm_timer(&self.inner, self.delay, epoch);
        }
    }

    /// Waits for a pacing slot. Resolves once this caller's queue entry
    /// dispatches; fails if the queue is cancelled first.
    pub async fn pace(&self) -> Result<(), Cancelled> {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let cancel_slot = Arc::clone(&slot);
        self.enqueue(
            move || {
                if let Some(tx) = lock(&slot).take() {
                    let _ = tx.send(true);
                }
            },
            Some(Box::new(move || {
                if let Some(tx) = lock(&cancel_slot).take() {
                    let _ = tx.send(false);
                }
            })),
        );
        match rx.await {
            Ok(true) => Ok(()),
            _ => Err(Cancelled),
        }
    }

    /// Disarms the pacing timer and drains the queue oldest to newest,
    /// invoking the cancellation callback of every entry that never
    /// dispatched. The queue is empty and inert afterwards; an action
    /// already dispatched is unaffected.
    pub fn cancel(&self) {
        let drained: Vec<Entry> = {
            let mut inner = lock(&self.inner);
            inner.epoch = inner.epoch.wrapping_add(1);
            inner.queue.drain(..).collect()
        };
        for entry in drained {
            if entry.action.is_some() {
                if let Some(on_cancel) = entry.on_cancel {
                    on_cancel();
                }
            }
        }
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        lock(&self.inner).queue.len()
    }
}

/// Locks the throttle state, recovering from poisoning: an action that
/// panicked mid-dispatch must not wedge the rest of the run.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Arms the pacing timer for the entry that just dispatched. When it
/// fires with a current epoch, the dispatched head is removed and the
/// next entry (if any) dispatches and re-arms.
fn arm_timer(inner: &Arc<Mutex<Inner>>, delay: Duration, epoch: u64) {
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        consume(&inner, delay, epoch);
    });
}

fn consume(inner: &Arc<Mutex<Inner>>, delay: Duration, epoch: u64) {
    let dispatch = {
        let mut guard = lock(inner);
        if guard.epoch != epoch {
            return;
        }
        guard.queue.pop_front();
        guard
            .queue
            .front_mut()
            .and_then(|entry| entry.action.take())
    };
    if let Some(action) = dispatch {
        action();
        arm_timer(inner, delay, epoch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DELAY: Duration = Duration::from_millis(500);

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> usize) {
        let count = Arc::new(AtomicUsize::new(0));
        let read = {
            let count = Arc::clone(&count);
            move || count.load(Ordering::SeqCst)
        };
        (count, read)
    }

    fn bump(count: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let count = Arc::clone(count);
        move || {
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_enqueue_dispatches_synchronously() {
        let throttle = RequestThrottle::new(DELAY);
        let (count, read) = counter();
        throttle.enqueue(bump(&count), None);
        assert_eq!(read(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_enqueue_waits_for_delay() {
        let throttle = RequestThrottle::new(DELAY);
        let (count, read) = counter();
        throttle.enqueue(bump(&count), None);
        throttle.enqueue(bump(&count), None);
        assert_eq!(read(), 1);

        tokio::time::advance(DELAY - Duration::from_millis(1)).await;
        tokio::task::yield_now().await;
        assert_eq!(read(), 1);

        tokio::time::advance(Duration::from_millis(1)).await;
        tokio::task::yield_now().await;
        assert_eq!(read(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_order_is_fifo() {
        let throttle = RequestThrottle::new(DELAY);
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            throttle.enqueue(
                move || {
                    lock(&order).push(label);
                },
                None,
            );
        }
        for _ in 0..3 {
            tokio::time::advance(DELAY).await;
            tokio::task::yield_now().await;
        }
        assert_eq!(*lock(&order), ["a", "b", "c"]);
        assert_eq!(throttle.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_skips_undispatched_entries() {
        let throttle = RequestThrottle::new(DELAY);
        let (ran, read_ran) = counter();
        let (cancelled, read_cancelled) = counter();

        throttle.enqueue(bump(&ran), None);
        throttle.enqueue(bump(&ran), Some(Box::new(bump(&cancelled))));
        assert_eq!(read_ran(), 1);

        throttle.cancel();
        assert_eq!(read_cancelled(), 1);

        // the second action never runs, even after the delay elapses
        tokio::time::advance(DELAY * 2).await;
        tokio::task::yield_now().await;
        assert_eq!(read_ran(), 1);
        assert_eq!(throttle.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_does_not_invoke_callback_of_dispatched_entry() {
        let throttle = RequestThrottle::new(DELAY);
        let (ran, read_ran) = counter();
        let (cancelled, read_cancelled) = counter();
        throttle.enqueue(bump(&ran), Some(Box::new(bump(&cancelled))));
        assert_eq!(read_ran(), 1);

        throttle.cancel();
        assert_eq!(read_cancelled(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_after_cancel_dispatches_immediately() {
        let throttle = RequestThrottle::new(DELAY);
        let (count, read) = counter();
        throttle.enqueue(bump(&count), None);
        throttle.enqueue(bump(&count), None);
        throttle.cancel();

        throttle.enqueue(bump(&count), None);
        assert_eq!(read(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_does_not_touch_new_entries() {
        let throttle = RequestThrottle::new(DELAY);
        let (count, read) = counter();
        throttle.enqueue(bump(&count), None);
        throttle.cancel();

        // re-populate the queue, then let the cancelled timer fire
        throttle.enqueue(bump(&count), None);
        throttle.enqueue(bump(&count), None);
        tokio::time::advance(DELAY).await;
        tokio::task::yield_now().await;
        assert_eq!(read(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pace_resolves_in_turn() {
        let throttle = RequestThrottle::new(DELAY);
        let first = throttle.pace().await;
        assert_eq!(first, Ok(()));

        let second = tokio::spawn({
            let throttle = throttle.clone();
            async move { throttle.pace().await }
        });
        tokio::time::advance(DELAY).await;
        assert_eq!(second.await.unwrap(), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pace_fails_on_cancel() {
        let throttle = RequestThrottle::new(DELAY);
        let _ = throttle.pace().await;

        let waiting = tokio::spawn({
            let throttle = throttle.clone();
            async move { throttle.pace().await }
        });
        tokio::task::yield_now().await;
        throttle.cancel();
        assert_eq!(waiting.await.unwrap(), Err(Cancelled));
    }
}
