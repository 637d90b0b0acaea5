//! Rate-limited call queue
//!
//! Runs submitted tasks strictly one at a time, in submission order, with a
//! minimum spacing between task starts. Used to keep cover art lookups
//! under the providers' rate limits across every concurrent pipeline.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

type QueuedTask = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The worker has shut down
    #[error("Request queue is closed")]
    Closed,

    #[error("Queued task panicked: {0}")]
    TaskPanicked(String),
}

/// Single-concurrency FIFO queue with start spacing.
///
/// Clones share one worker.
#[derive(Clone)]
pub struct RequestQueue {
    sender: mpsc::UnboundedSender<QueuedTask>,
}

impl RequestQueue {
    /// Create the queue and spawn its worker on the current runtime
    pub fn new(interval: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(receiver, interval));
        Self { sender }
    }

    /// Submit a task and wait for its output.
    ///
    /// The task runs in its own tokio task; a panic there is reported to
    /// this caller only and the queue keeps draining.
    pub async fn enqueue<F, Fut, T>(&self, task: F) -> Result<T, QueueError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();

        let queued: QueuedTask = Box::pin(async move {
            let outcome = tokio::spawn(async move { task().await }).await;
            let _ = result_tx.send(outcome);
        });

        self.sender.send(queued).map_err(|_| QueueError::Closed)?;

        match result_rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(join_error)) => Err(QueueError::TaskPanicked(join_error.to_string())),
            Err(_) => Err(QueueError::Closed),
        }
    }
}

async fn run_worker(mut receiver: mpsc::UnboundedReceiver<QueuedTask>, interval: Duration) {
    let mut last_start: Option<Instant> = None;

    while let Some(task) = receiver.recv().await {
        if let Some(previous) = last_start {
            tokio::time::sleep_until(previous + interval).await;
        }
        last_start = Some(Instant::now());
        task.await;
    }

    tracing::debug!("Request queue worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test(start_paused = true)]
    async fn test_tasks_run_in_order_with_spacing() {
        let queue = RequestQueue::new(Duration::from_millis(500));
        let starts = Arc::new(Mutex::new(Vec::new()));

        let submissions = (0..3).map(|i| {
            let queue = queue.clone();
            let starts = Arc::clone(&starts);
            async move {
                queue
                    .enqueue(move || async move {
                        starts.lock().unwrap().push((i, Instant::now()));
                        i * 10
                    })
                    .await
            }
        });
        let results = futures::future::join_all(submissions).await;

        let values: Vec<i32> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 10, 20]);

        let starts = starts.lock().unwrap();
        let order: Vec<i32> = starts.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![0, 1, 2]);
        for pair in starts.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_task_at_a_time() {
        let queue = RequestQueue::new(Duration::from_millis(10));
        let running = Arc::new(Mutex::new(0usize));
        let peak = Arc::new(Mutex::new(0usize));

        let submissions = (0..4).map(|_| {
            let queue = queue.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                queue
                    .enqueue(move || async move {
                        {
                            let mut r = running.lock().unwrap();
                            *r += 1;
                            let mut p = peak.lock().unwrap();
                            *p = (*p).max(*r);
                        }
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        *running.lock().unwrap() -= 1;
                    })
                    .await
            }
        });
        futures::future::join_all(submissions).await;

        assert_eq!(*peak.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_task_reports_to_its_caller_only() {
        let queue = RequestQueue::new(Duration::from_millis(10));

        let failed = queue
            .enqueue(|| async {
                panic!("provider exploded");
            })
            .await;
        let ok = queue.enqueue(|| async { "still draining" }).await;

        assert!(matches!(failed, Err(QueueError::TaskPanicked(_))));
        assert_eq!(ok.unwrap(), "still draining");
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_error_is_returned_as_value() {
        let queue = RequestQueue::new(Duration::from_millis(10));
        let result: Result<Result<(), String>, QueueError> =
            queue.enqueue(|| async { Err("404".to_string()) }).await;
        assert_eq!(result.unwrap(), Err("404".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumes_after_idle_without_extra_wait() {
        let queue = RequestQueue::new(Duration::from_millis(200));
        queue.enqueue(|| async {}).await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;

        let before = Instant::now();
        queue.enqueue(|| async {}).await.unwrap();
        assert!(Instant::now() - before < Duration::from_millis(200));
    }
}
