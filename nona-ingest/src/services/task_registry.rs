//! Supervision of detached job work

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, info};

use crate::services::JobTracker;

/// Detached job futures keyed by job id.
///
/// A job future that panics fails its job instead of leaving it
/// `processing` forever. Aborted futures are left as they are; the startup
/// recovery sweep marks them `stopped`.
#[derive(Clone)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<String, AbortHandle>>>,
    tracker: Arc<JobTracker>,
}

impl TaskRegistry {
    pub fn new(tracker: Arc<JobTracker>) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            tracker,
        }
    }

    /// Run `work` for `job_id` in the background
    pub fn spawn<F>(&self, job_id: String, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(work);
        self.lock().insert(job_id.clone(), handle.abort_handle());

        let registry = self.clone();
        tokio::spawn(async move {
            registry.supervise(job_id, handle).await;
        });
    }

    async fn supervise(&self, job_id: String, handle: JoinHandle<()>) {
        match handle.await {
            Ok(()) => {}
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                error!(job_id = %job_id, panic = %message, "Job task panicked");
                self.tracker
                    .fail_job(&job_id, vec![format!("Job task panicked: {}", message)])
                    .await;
            }
            Err(_) => {
                info!(job_id = %job_id, "Job task aborted");
            }
        }

        self.lock().remove(&job_id);
    }

    /// Number of job futures still running
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.lock().contains_key(job_id)
    }

    /// Abort every running job future
    pub fn abort_all(&self) {
        let tasks = self.lock();
        if !tasks.is_empty() {
            info!(count = tasks.len(), "Aborting running job tasks");
        }
        for handle in tasks.values() {
            handle.abort();
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, AbortHandle>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
