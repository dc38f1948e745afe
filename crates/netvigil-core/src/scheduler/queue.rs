// ── Bounded-concurrency work queue ──

use std::future::Future;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio_util::sync::CancellationToken;

/// Run `work` over every item with at most `limit` in flight.
///
/// A new item starts each time one finishes; the call returns once the
/// queue and the active set are both empty. Results come back in
/// completion order.
pub async fn run_bounded<I, F, Fut, T>(items: I, limit: usize, mut work: F) -> Vec<T>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = T>,
{
    let limit = limit.max(1);
    let mut queue = items.into_iter();
    let mut active = FuturesUnordered::new();
    let mut results = Vec::new();

    for item in queue.by_ref().take(limit) {
        active.push(work(item));
    }
    while let Some(done) = active.next().await {
        results.push(done);
        if let Some(item) = queue.next() {
            active.push(work(item));
        }
    }
    results
}

/// How a deadline-bounded task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deadline<T> {
    Done(T),
    TimedOut,
    Cancelled,
}

/// Race `work` against a timer and the parent token.
///
/// `work` receives a child token that is cancelled when the timer fires,
/// so nested I/O can stop early even before the future is dropped.
pub async fn with_deadline<T, Fut>(
    timeout: Duration,
    parent: &CancellationToken,
    work: impl FnOnce(CancellationToken) -> Fut,
) -> Deadline<T>
where
    Fut: Future<Output = T>,
{
    let child = parent.child_token();
    let fut = work(child.clone());
    tokio::select! {
        biased;
        () = parent.cancelled() => Deadline::Cancelled,
        res = tokio::time::timeout(timeout, fut) => match res {
            Ok(out) => Deadline::Done(out),
            Err(_) => {
                child.cancel();
                Deadline::TimedOut
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_limit() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let results = run_bounded(0..20u64, 3, |i| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10 * (i % 4 + 1))).await;
                active.fetch_sub(1, Ordering::SeqCst);
                i
            }
        })
        .await;
        assert_eq!(results.len(), 20);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_queue_finishes() {
        let results: Vec<u8> = run_bounded(Vec::<u8>::new(), 4, |i| async move { i }).await;
        assert!(results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_item_does_not_block_others() {
        let started = tokio::time::Instant::now();
        let results = run_bounded([100u64, 1, 1, 1], 2, |ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            ms
        })
        .await;
        assert_eq!(results.last(), Some(&100));
        assert!(started.elapsed() < Duration::from_millis(110));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_child_token() {
        let parent = CancellationToken::new();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let slot = Arc::clone(&seen);
        let out = with_deadline(Duration::from_millis(50), &parent, |child| {
            *slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(child.clone());
            async move {
                child.cancelled().await;
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
        })
        .await;
        assert_eq!(out, Deadline::TimedOut);
        let child = seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        assert!(child.is_some_and(|c| c.is_cancelled()));
    }

    #[tokio::test]
    async fn parent_cancellation_wins() {
        let parent = CancellationToken::new();
        parent.cancel();
        let out = with_deadline(Duration::from_secs(1), &parent, |_| async { 1 }).await;
        assert_eq!(out, Deadline::Cancelled);
    }
}
