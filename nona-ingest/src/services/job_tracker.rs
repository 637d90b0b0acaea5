//! Job lifecycle tracking
//!
//! Owns the in-memory working set of jobs and mirrors every mutation into
//! the `jobs_cache` table. Each mutation, its persistence and the capacity
//! sweep happen under a single async mutex.

use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::db::ResponseCache;
use crate::models::{BatchProgress, Job, JobKind, JobOutcome};

pub struct JobTracker {
    jobs: Mutex<HashMap<String, Job>>,
    cache: ResponseCache,
    capacity: usize,
}

impl JobTracker {
    /// Build a tracker hydrated from the persisted job table.
    ///
    /// A load failure starts the tracker empty.
    pub async fn load(cache: ResponseCache, capacity: usize) -> Self {
        let persisted = match cache.load_all_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "Failed to load persisted jobs; starting empty");
                Vec::new()
            }
        };

        let count = persisted.len();
        let mut jobs: HashMap<String, Job> =
            persisted.into_iter().map(|job| (job.id.clone(), job)).collect();

        let tracker_capacity = capacity.max(1);
        evict_oldest(&mut jobs, tracker_capacity, &cache).await;
        info!(loaded = count, retained = jobs.len(), "Job tracker hydrated");

        Self {
            jobs: Mutex::new(jobs),
            cache,
            capacity: tracker_capacity,
        }
    }

    /// Register a new `processing` job and return its id
    pub async fn create_job(&self, kind: JobKind, reference: Option<String>) -> String {
        let job = Job::new(kind, reference);
        let id = job.id.clone();

        let mut jobs = self.jobs.lock().await;
        if let Err(e) = self.cache.save_job(&job).await {
            warn!(job_id = %id, error = %e, "Failed to persist new job");
        }
        jobs.insert(id.clone(), job);
        evict_oldest(&mut jobs, self.capacity, &self.cache).await;

        info!(job_id = %id, kind = %kind, "Job created");
        id
    }

    pub async fn update_progress(&self, id: &str, progress: BatchProgress) {
        self.mutate(id, "update_progress", |job| {
            job.progress = Some(progress);
            true
        })
        .await;
    }

    /// Attach the collection title as soon as it is known
    pub async fn set_collection_title(&self, id: &str, title: String) {
        self.mutate(id, "set_collection_title", |job| {
            job.collection_title = Some(title);
            true
        })
        .await;
    }

    /// Finish a job successfully.
    ///
    /// An outcome that does not fit the job kind is rejected.
    pub async fn complete_job(&self, id: &str, outcome: JobOutcome) {
        self.mutate(id, "complete_job", |job| {
            let kind = job.kind;
            let accepted = job.complete(outcome);
            if !accepted {
                warn!(job_id = %job.id, kind = %kind, "Completion outcome does not match job kind");
            }
            accepted
        })
        .await;
    }

    pub async fn fail_job(&self, id: &str, errors: Vec<String>) {
        self.mutate(id, "fail_job", |job| job.fail(errors)).await;
    }

    pub async fn get_job(&self, id: &str) -> Option<Job> {
        self.jobs.lock().await.get(id).cloned()
    }

    /// Every tracked job, newest first
    pub async fn all_jobs(&self) -> Vec<Job> {
        let jobs = self.jobs.lock().await;
        let mut all: Vec<Job> = jobs.values().cloned().collect();
        all.sort_by(|a, b| b.start_time.cmp(&a.start_time).then_with(|| b.id.cmp(&a.id)));
        all
    }

    /// Apply `change` to a non-terminal job and persist it.
    ///
    /// `change` returns false when it declined to modify the job.
    async fn mutate<F>(&self, id: &str, operation: &str, change: F)
    where
        F: FnOnce(&mut Job) -> bool,
    {
        let mut jobs = self.jobs.lock().await;

        let Some(job) = jobs.get_mut(id) else {
            debug!(job_id = %id, operation, "Ignoring mutation of unknown job");
            return;
        };

        if job.is_terminal() {
            warn!(job_id = %id, status = %job.status, operation, "Ignoring mutation of finished job");
            return;
        }

        if !change(job) {
            return;
        }

        match self.cache.update_job(job).await {
            Ok(true) => {}
            Ok(false) => {
                // Row removed by a cache cleanup while the job ran
                if let Err(e) = self.cache.save_job(job).await {
                    warn!(job_id = %id, operation, error = %e, "Failed to persist job");
                }
            }
            Err(e) => warn!(job_id = %id, operation, error = %e, "Failed to persist job"),
        }
    }
}

/// Drop the oldest jobs (by start time) beyond `capacity`, in memory and on disk
async fn evict_oldest(jobs: &mut HashMap<String, Job>, capacity: usize, cache: &ResponseCache) {
    if jobs.len() <= capacity {
        return;
    }

    let mut by_age: Vec<(chrono::DateTime<chrono::Utc>, String)> = jobs
        .values()
        .map(|job| (job.start_time, job.id.clone()))
        .collect();
    by_age.sort();

    let excess = jobs.len() - capacity;
    for (_, id) in by_age.into_iter().take(excess) {
        jobs.remove(&id);
        if let Err(e) = cache.delete_job(&id).await {
            warn!(job_id = %id, error = %e, "Failed to delete evicted job row");
        }
        debug!(job_id = %id, "Evicted job");
    }
}
