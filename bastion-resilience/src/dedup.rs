//! Request deduplication
//!
//! Concurrent calls that share a signature are collapsed into one
//! execution. The first caller spawns the operation, later callers join its
//! shared outcome, and the entry is torn down as soon as the operation
//! settles so that the next call with the same signature starts fresh.

use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::{AbortHandle, JoinHandle};

use crate::singleflight::{spawn_shared_abortable, OperationAborted, SharedOutcome};

type PendingMap<T, E> = Mutex<HashMap<String, PendingCall<T, E>>>;

struct PendingCall<T, E> {
    id: u64,
    future: SharedOutcome<T, E>,
    abort: AbortHandle,
    subscribers: Arc<AtomicUsize>,
    started_at: Instant,
    started_at_utc: DateTime<Utc>,
}

#[derive(Default)]
struct Counters {
    next_id: AtomicU64,
    executions: AtomicU64,
    joined: AtomicU64,
    swept: AtomicU64,
}

/// Deduplication statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DedupStats {
    /// Signatures with an in-flight execution
    pub pending: usize,
    /// Start time of the oldest in-flight execution
    pub oldest_pending_at: Option<DateTime<Utc>>,
    /// Callers currently awaiting an in-flight execution
    pub subscribers: usize,
    pub total_executions: u64,
    pub total_joined: u64,
    /// Entries removed by the stale sweep
    pub swept: u64,
}

/// Coalesces concurrent identical calls into one execution
pub struct RequestDeduplicator<T, E> {
    pending: Arc<PendingMap<T, E>>,
    counters: Arc<Counters>,
    max_age: Duration,
}

impl<T, E> Clone for RequestDeduplicator<T, E> {
    fn clone(&self) -> Self {
        Self {
            pending: self.pending.clone(),
            counters: self.counters.clone(),
            max_age: self.max_age,
        }
    }
}

/// Decrements the subscriber count when the caller stops waiting
struct SubscriberGuard(Arc<AtomicUsize>);

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Removes the owning entry when the spawned operation ends, panics included
struct EntryCleanup<T, E> {
    pending: Arc<PendingMap<T, E>>,
    signature: String,
    id: u64,
}

impl<T, E> Drop for EntryCleanup<T, E> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock();
        if pending.get(&self.signature).map(|call| call.id) == Some(self.id) {
            pending.remove(&self.signature);
        }
    }
}

impl<T, E> RequestDeduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<OperationAborted> + 'static,
{
    /// Create a deduplicator whose entries are considered stale after `max_age`
    pub fn new(max_age: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
            max_age,
        }
    }

    /// Build from configuration
    pub fn from_config(config: &bastion_config::DedupConfig) -> Self {
        Self::new(config.max_age)
    }

    /// Execute `operation` unless an identical call is already in flight, in
    /// which case its outcome is shared.
    ///
    /// Must be called from within a tokio runtime. The operation runs on its
    /// own task, so a caller that stops waiting does not cancel it.
    pub async fn execute<F, Fut>(&self, signature: impl Into<String>, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let signature = signature.into();

        let (future, subscribers) = {
            let mut pending = self.pending.lock();

            if let Some(call) = pending.get(&signature) {
                call.subscribers.fetch_add(1, Ordering::SeqCst);
                self.counters.joined.fetch_add(1, Ordering::Relaxed);
                debug!("Joining in-flight call for {}", signature);
                (call.future.clone(), call.subscribers.clone())
            } else {
                let id = self.counters.next_id.fetch_add(1, Ordering::Relaxed);
                let subscribers = Arc::new(AtomicUsize::new(1));
                let cleanup = EntryCleanup {
                    pending: self.pending.clone(),
                    signature: signature.clone(),
                    id,
                };
                let operation = operation();

                let (future, abort) = spawn_shared_abortable(async move {
                    let _cleanup = cleanup;
                    operation.await
                });

                self.counters.executions.fetch_add(1, Ordering::Relaxed);
                pending.insert(
                    signature,
                    PendingCall {
                        id,
                        future: future.clone(),
                        abort,
                        subscribers: subscribers.clone(),
                        started_at: Instant::now(),
                        started_at_utc: Utc::now(),
                    },
                );
                (future, subscribers)
            }
        };

        let _guard = SubscriberGuard(subscribers);
        future.await
    }

    /// Current statistics
    pub fn stats(&self) -> DedupStats {
        let pending = self.pending.lock();

        DedupStats {
            pending: pending.len(),
            oldest_pending_at: pending.values().map(|call| call.started_at_utc).min(),
            subscribers: pending
                .values()
                .map(|call| call.subscribers.load(Ordering::SeqCst))
                .sum(),
            total_executions: self.counters.executions.load(Ordering::Relaxed),
            total_joined: self.counters.joined.load(Ordering::Relaxed),
            swept: self.counters.swept.load(Ordering::Relaxed),
        }
    }

    /// Number of signatures with an in-flight execution
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Remove entries older than the max age. Returns the number removed.
    ///
    /// A swept operation keeps running for callers already joined to it,
    /// but new callers start a fresh execution. Operations nobody is
    /// waiting on any more are aborted.
    pub fn cleanup_stale(&self) -> usize {
        sweep(&self.pending, &self.counters, self.max_age)
    }

    /// Run `cleanup_stale` every `interval` until the deduplicator is dropped
    pub fn start_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let pending: Weak<PendingMap<T, E>> = Arc::downgrade(&self.pending);
        let counters = self.counters.clone();
        let max_age = self.max_age;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(pending) = pending.upgrade() else {
                    debug!("Deduplicator dropped, stopping sweeper");
                    break;
                };
                sweep(&pending, &counters, max_age);
            }
        })
    }
}

fn sweep<T, E>(pending: &PendingMap<T, E>, counters: &Counters, max_age: Duration) -> usize {
    let mut removed = 0;
    let mut abandoned = Vec::new();
    pending.lock().retain(|signature, call| {
        if call.started_at.elapsed() <= max_age {
            return true;
        }
        removed += 1;
        if call.subscribers.load(Ordering::SeqCst) == 0 {
            debug!("Aborting abandoned call for {}", signature);
            abandoned.push(call.abort.clone());
        }
        false
    });

    // Aborted tasks run their entry cleanup, which takes the map lock
    for abort in abandoned {
        abort.abort();
    }

    if removed > 0 {
        counters.swept.fetch_add(removed as u64, Ordering::Relaxed);
        info!("Swept {} stale pending call(s)", removed);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Failed(String),
        Aborted,
    }

    impl From<OperationAborted> for TestError {
        fn from(_: OperationAborted) -> Self {
            TestError::Aborted
        }
    }

    fn dedup() -> RequestDeduplicator<String, TestError> {
        RequestDeduplicator::new(Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_identical_calls_execute_once() {
        let dedup = dedup();
        let calls = Arc::new(AtomicU32::new(0));

        let run = |calls: Arc<AtomicU32>| {
            dedup.execute("GET:/users:", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok("users".to_string())
            })
        };

        let (a, b) = tokio::join!(run(calls.clone()), run(calls.clone()));

        assert_eq!(a, Ok("users".to_string()));
        assert_eq!(b, Ok("users".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = dedup.stats();
        assert_eq!(stats.total_executions, 1);
        assert_eq!(stats.total_joined, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_distinct_signatures_execute_separately() {
        let dedup = dedup();
        let calls = Arc::new(AtomicU32::new(0));

        let run = |signature: &'static str, calls: Arc<AtomicU32>| {
            dedup.execute(signature, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(signature.to_string())
            })
        };

        let (a, b) = tokio::join!(
            run("POST:/users:{\"name\":\"a\"}", calls.clone()),
            run("POST:/users:{\"name\":\"b\"}", calls.clone())
        );

        assert_ne!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_joined_callers_share_failure() {
        let dedup = dedup();

        let run = || {
            dedup.execute("GET:/fail:", || async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err(TestError::Failed("boom".to_string()))
            })
        };

        let (a, b) = tokio::join!(run(), run());
        assert_eq!(a, Err(TestError::Failed("boom".to_string())));
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_completed_entry_is_not_reused() {
        let dedup = dedup();
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            let result = dedup
                .execute("GET:/items:", move || async move {
                    Ok(calls.fetch_add(1, Ordering::SeqCst).to_string())
                })
                .await;
            assert!(result.is_ok());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(dedup.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_subscriber_does_not_cancel_operation() {
        let dedup = dedup();
        let finished = Arc::new(AtomicU32::new(0));

        let op = |finished: Arc<AtomicU32>| {
            move || async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok("done".to_string())
            }
        };

        let impatient = tokio::time::timeout(
            Duration::from_millis(5),
            dedup.execute("GET:/slow:", op(finished.clone())),
        );
        let patient = async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            dedup.execute("GET:/slow:", op(finished.clone())).await
        };

        let (impatient, patient) = tokio::join!(impatient, patient);

        assert!(impatient.is_err());
        assert_eq!(patient, Ok("done".to_string()));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscriber_count_tracks_waiters() {
        let dedup = dedup();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let first = dedup.clone();
        let waiter = tokio::spawn(async move {
            first
                .execute("GET:/gate:", move || async move {
                    let _ = rx.await;
                    Ok("open".to_string())
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let stats = dedup.stats();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.subscribers, 1);
        assert!(stats.oldest_pending_at.is_some());

        tx.send(()).unwrap();
        assert_eq!(waiter.await.unwrap(), Ok("open".to_string()));
        assert_eq!(dedup.stats().pending, 0);
    }

    #[tokio::test]
    async fn test_stale_entries_are_swept() {
        let dedup: RequestDeduplicator<String, TestError> =
            RequestDeduplicator::new(Duration::from_millis(10));

        let hung = dedup.clone();
        let _ = tokio::time::timeout(
            Duration::from_millis(1),
            hung.execute("GET:/hang:", || std::future::pending()),
        )
        .await;
        assert_eq!(dedup.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(dedup.cleanup_stale(), 1);
        assert_eq!(dedup.pending_count(), 0);
        assert_eq!(dedup.stats().swept, 1);
    }

    #[tokio::test]
    async fn test_sweep_aborts_abandoned_operation() {
        let dedup: RequestDeduplicator<String, TestError> =
            RequestDeduplicator::new(Duration::from_millis(10));
        let finished = Arc::new(AtomicU32::new(0));

        let op = |finished: Arc<AtomicU32>| {
            move || async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok("late".to_string())
            }
        };

        let _ = tokio::time::timeout(
            Duration::from_millis(1),
            dedup.execute("GET:/abandoned:", op(finished.clone())),
        )
        .await;

        let joined = dedup.clone();
        let waiter = {
            let finished = finished.clone();
            tokio::spawn(async move { joined.execute("GET:/watched:", op(finished)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(dedup.stats().subscribers, 1);
        assert_eq!(dedup.cleanup_stale(), 2);

        // The watched call still completes for its waiter
        assert_eq!(waiter.await.unwrap(), Ok("late".to_string()));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sweeper_runs_periodically() {
        let dedup: RequestDeduplicator<String, TestError> =
            RequestDeduplicator::new(Duration::from_millis(5));
        let sweeper = dedup.start_sweeper(Duration::from_millis(10));

        let _ = tokio::time::timeout(
            Duration::from_millis(1),
            dedup.execute("GET:/hang:", || std::future::pending()),
        )
        .await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dedup.pending_count(), 0);
        sweeper.abort();
    }
}
