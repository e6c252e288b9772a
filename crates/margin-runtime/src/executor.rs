//! Bounded concurrency executor.
//!
//! [`map_bounded`] runs an async operation over a list of items with at most
//! `cap` operations in flight. Workers are plain futures polled together in
//! the caller's task; each one claims the next unclaimed index until the list
//! is exhausted, so results always land in input order.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use futures::future::join_all;
use parking_lot::Mutex;

/// Failure of a single mapped item.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// The operation for this item panicked. Other items are unaffected.
    #[error("item {index} panicked")]
    Panicked {
        /// Input position of the item.
        index: usize,
    },
}

/// Map `f` over `items` with at most `min(cap, items.len())` operations in
/// flight. A `cap` of 0 is treated as 1.
///
/// `f` receives each item's input position. The returned vector has one entry
/// per item, in input order.
pub async fn map_bounded<T, R, F, Fut>(
    items: Vec<T>,
    cap: usize,
    f: F,
) -> Vec<Result<R, ExecutorError>>
where
    F: Fn(usize, T) -> Fut,
    Fut: Future<Output = R>,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }
    let worker_count = cap.max(1).min(total);

    let pending: Vec<Mutex<Option<T>>> = items.into_iter().map(|i| Mutex::new(Some(i))).collect();
    let results: Vec<Mutex<Option<Result<R, ExecutorError>>>> =
        (0..total).map(|_| Mutex::new(None)).collect();
    let next = AtomicUsize::new(0);

    let (pending, results, next, f) = (&pending, &results, &next, &f);
    let workers = (0..worker_count).map(|_| async move {
        loop {
            let index = next.fetch_add(1, Ordering::SeqCst);
            if index >= total {
                break;
            }
            let Some(item) = pending[index].lock().take() else {
                continue;
            };
            let outcome = AssertUnwindSafe(async move { f(index, item).await })
                .catch_unwind()
                .await
                .map_err(|_| {
                    tracing::error!(index, "bounded executor item panicked");
                    ExecutorError::Panicked { index }
                });
            *results[index].lock() = Some(outcome);
        }
    });
    let _ = join_all(workers).await;

    results
        .iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.lock()
                .take()
                .unwrap_or(Err(ExecutorError::Panicked { index }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn empty_input() {
        let out: Vec<Result<u32, _>> =
            map_bounded(Vec::<u32>::new(), 4, |_, x| async move { x }).await;
        assert!(out.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn preserves_order_despite_completion_order() {
        let delays = vec![30u64, 10, 20, 5];
        let out = map_bounded(delays, 4, |i, ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            i * 10
        })
        .await;
        let values: Vec<usize> = out.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, vec![0, 10, 20, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_cap() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let out = map_bounded((0..10).collect::<Vec<_>>(), 3, |_, x: u32| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(u64::from(x % 3) + 1)).await;
                let _ = active.fetch_sub(1, Ordering::SeqCst);
                x
            }
        })
        .await;
        assert_eq!(out.len(), 10);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_cap_runs_serially() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let _ = map_bounded(vec![1, 2, 3], 0, |_, _x: i32| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                let _ = active.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panic_is_isolated_to_its_slot() {
        let out = map_bounded(vec![1, 2, 3], 2, |_, x: i32| async move {
            assert!(x != 2, "boom");
            x
        })
        .await;
        assert_eq!(out[0], Ok(1));
        assert_eq!(out[1], Err(ExecutorError::Panicked { index: 1 }));
        assert_eq!(out[2], Ok(3));
    }

    proptest::proptest! {
        #[test]
        fn results_match_input_order(
            delays in proptest::collection::vec(0u64..20, 0..24),
            cap in 0usize..8,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            let active = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));
            let n = delays.len();
            let out = rt.block_on(map_bounded(delays.clone(), cap, |i, ms| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    let _ = peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    let _ = active.fetch_sub(1, Ordering::SeqCst);
                    (i, ms)
                }
            }));
            let expected: Vec<(usize, u64)> = delays.into_iter().enumerate().collect();
            let got: Vec<(usize, u64)> = out.into_iter().map(Result::unwrap).collect();
            proptest::prop_assert_eq!(got, expected);
            proptest::prop_assert!(peak.load(Ordering::SeqCst) <= cap.max(1).min(n.max(1)));
        }
    }
}
