//! Deduplicating, rate limited work queue.
//!
//! The queue is the only synchronisation between event ingestion and the reconcile workers:
//!
//! - an item added while it is already waiting is dropped,
//! - an item added while a worker processes it is parked ("dirty") and handed out again only
//!   after that worker calls [WorkQueue::done],
//!
//! so no two workers ever hold the same item at the same time.

pub mod rate_limit;

use std::collections::HashSet;
use std::collections::VecDeque;
use std::hash::Hash;
use std::pin::pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use tokio::sync::Notify;

use self::rate_limit::RateLimiter;

struct State<T> {
    queue: VecDeque<T>,
    /// Items that need processing: everything in `queue` plus in-flight items added again.
    dirty: HashSet<T>,
    processing: HashSet<T>,
    shutting_down: bool,
}

pub struct WorkQueue<T> {
    state: Mutex<State<T>>,
    notify: Notify,
    limiter: Box<dyn RateLimiter<T>>,
}

impl<T> WorkQueue<T>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new(limiter: impl RateLimiter<T> + 'static) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            limiter: Box::new(limiter),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `item` as needing processing. Ignored after [WorkQueue::shut_down].
    pub fn add(&self, item: T) {
        let mut state = self.lock();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.notify.notify_one();
    }

    /// Adds `item` once `delay` has passed.
    pub fn add_after(self: &Arc<Self>, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        if self.is_shutting_down() {
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Adds `item` after the delay the rate limiter assigns to its next retry.
    pub fn add_rate_limited(self: &Arc<Self>, item: T) {
        let delay = self.limiter.when(&item);
        self.add_after(item, delay);
    }

    /// Clears the retry history of `item`. Call after success or when giving up on an item.
    pub fn forget(&self, item: &T) {
        self.limiter.forget(item);
    }

    pub fn num_requeues(&self, item: &T) -> u32 {
        self.limiter.num_requeues(item)
    }

    /// Waits for the next item and marks it in flight. Returns `None` once the queue is shut
    /// down and every queued item has been handed out.
    pub async fn get(&self) -> Option<T> {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Releases an item obtained from [WorkQueue::get]. If it was added again while in flight it
    /// goes back to the queue now.
    pub fn done(&self, item: &T) {
        let mut state = self.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stops accepting items and wakes every waiting [WorkQueue::get].
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of items waiting to be handed out.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::rate_limit::ItemExponentialFailureRateLimiter;
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    fn queue() -> Arc<WorkQueue<String>> {
        WorkQueue::new(ItemExponentialFailureRateLimiter::new(
            Duration::from_millis(5),
            Duration::from_secs(1),
        ))
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = queue();
        queue.add("a".to_owned());
        queue.add("b".to_owned());

        assert_eq!(queue.get().await.as_deref(), Some("a"));
        assert_eq!(queue.get().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_duplicate_adds_are_collapsed() {
        // Given: The same key added three times
        let queue = queue();
        for _ in 0..3 {
            queue.add("default/hello".to_owned());
        }

        // Then: It is queued once
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_add_while_processing_is_deferred_until_done() {
        // Given: A key in flight
        let queue = queue();
        queue.add("k".to_owned());
        let item = queue.get().await.unwrap();

        // When: It is added again before the worker finished
        queue.add("k".to_owned());

        // Then: It is not handed out while in flight
        assert!(queue.is_empty());

        // When: The worker finishes
        queue.done(&item);

        // Then: It is queued again exactly once
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.as_deref(), Some("k"));
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_returns_none() {
        // Given: A queue with one pending item
        let queue = queue();
        queue.add("a".to_owned());

        // When: It is shut down
        queue.shut_down();
        queue.add("b".to_owned());

        // Then: The pending item is still delivered, new ones are refused
        assert_eq!(queue.get().await.as_deref(), Some("a"));
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_blocked_getters() {
        // Given: Workers blocked on an empty queue
        let queue = queue();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.get().await })
            })
            .collect();
        tokio::task::yield_now().await;

        // When: The queue shuts down
        queue.shut_down();

        // Then: Every worker is released with the shutdown signal
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), None);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_rate_limited_delays_and_counts() {
        // Given: A key that failed once
        let queue = queue();
        queue.add_rate_limited("k".to_owned());
        assert_eq!(queue.num_requeues(&"k".to_owned()), 1);

        // Then: It only shows up after the backoff
        assert!(queue.is_empty());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.len(), 1);

        // When: It is forgotten after success
        queue.forget(&"k".to_owned());

        // Then: The retry history is gone
        assert_eq!(queue.num_requeues(&"k".to_owned()), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_key_never_processed_concurrently() {
        // Given: Four workers and a producer re-adding a small set of keys
        let queue = queue();
        let in_flight = Arc::new(Mutex::new(HashSet::<String>::new()));
        let processed = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let in_flight = Arc::clone(&in_flight);
                let processed = Arc::clone(&processed);
                tokio::spawn(async move {
                    while let Some(key) = queue.get().await {
                        assert!(
                            in_flight.lock().unwrap().insert(key.clone()),
                            "{key} handed to two workers"
                        );
                        tokio::task::yield_now().await;
                        in_flight.lock().unwrap().remove(&key);
                        processed.fetch_add(1, Ordering::SeqCst);
                        queue.done(&key);
                    }
                })
            })
            .collect();

        // When: Keys are added repeatedly while workers run
        for round in 0..200 {
            queue.add(format!("default/func-{}", round % 5));
            if round % 10 == 0 {
                tokio::task::yield_now().await;
            }
        }
        while !queue.is_empty() {
            tokio::task::yield_now().await;
        }
        queue.shut_down();

        // Then: All workers exit cleanly and work got done
        for worker in workers {
            worker.await.unwrap();
        }
        assert!(processed.load(Ordering::SeqCst) >= 5);
    }
}
