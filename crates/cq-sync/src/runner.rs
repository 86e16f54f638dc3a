use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;

/// Fixed-size pool of cooperative workers over a slice.
///
/// Each lane claims the next index before awaiting its worker, so every item
/// is handed out exactly once. Results come back grouped by lane, not in
/// input order.
#[derive(Debug, Clone, Copy)]
pub struct BoundedRunner {
    concurrency: usize,
}

impl BoundedRunner {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn run<'a, T, R, F, Fut>(&self, items: &'a [T], worker: F) -> Vec<R>
    where
        F: Fn(&'a T) -> Fut,
        Fut: Future<Output = R>,
    {
        let cursor = AtomicUsize::new(0);
        let lanes = self.concurrency.min(items.len());
        let cursor = &cursor;
        let worker = &worker;

        let lane = move |_lane: usize| async move {
            let mut out = Vec::new();
            loop {
                let index = cursor.fetch_add(1, Ordering::Relaxed);
                let Some(item) = items.get(index) else {
                    break;
                };
                out.push(worker(item).await);
            }
            out
        };

        join_all((0..lanes).map(lane))
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}
