//! Processing job lifecycle
//!
//! A job starts `processing` and ends `completed` or `failed`. Jobs that were
//! still running when the process stopped are moved to `stopped` by the
//! startup recovery sweep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::TrackMetadata;

/// What a job processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// One source reference
    Single,
    /// A playlist or album of source references
    Collection,
    /// Library housekeeping (cover art backfill)
    Maintenance,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Single => "single",
            JobKind::Collection => "collection",
            JobKind::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(JobKind::Single),
            "collection" => Ok(JobKind::Collection),
            "maintenance" => Ok(JobKind::Maintenance),
            other => Err(format!("unknown job kind: {}", other)),
        }
    }
}

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
    /// Abandoned by a previous process run
    Stopped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "stopped" => Ok(JobStatus::Stopped),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Per-item counters for collection and maintenance jobs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

impl BatchProgress {
    pub fn new(total: usize, completed: usize, failed: usize) -> Self {
        Self {
            total,
            completed,
            failed,
        }
    }

    /// Items not yet accounted for
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.completed + self.failed)
    }
}

/// Result counters of a cover art backfill run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtBackfillSummary {
    pub processed: usize,
    pub fetched: usize,
    pub existed: usize,
    pub errors: usize,
}

/// How a job finished successfully.
///
/// `Results` belongs to single and collection jobs, `Summary` to
/// maintenance jobs.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Results {
        results: Vec<TrackMetadata>,
        collection_title: Option<String>,
        /// Member failures of a partially successful collection
        errors: Vec<String>,
    },
    Summary(ArtBackfillSummary),
}

impl JobOutcome {
    /// Whether this outcome is valid for the given job kind
    pub fn fits(&self, kind: JobKind) -> bool {
        match self {
            JobOutcome::Results { .. } => matches!(kind, JobKind::Single | JobKind::Collection),
            JobOutcome::Summary(_) => kind == JobKind::Maintenance,
        }
    }
}

/// Lifecycle record of one processing request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: JobKind,

    /// Normalized source reference, absent for maintenance jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    pub status: JobStatus,

    pub start_time: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<BatchProgress>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<TrackMetadata>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ArtBackfillSummary>,
}

impl Job {
    /// Create a new `processing` job with a fresh id
    pub fn new(kind: JobKind, url: Option<String>) -> Self {
        let start_time = Utc::now();
        Self {
            id: generate_job_id(start_time),
            kind,
            url,
            status: JobStatus::Processing,
            start_time,
            end_time: None,
            progress: None,
            collection_title: None,
            results: None,
            errors: None,
            summary: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mark completed with the given outcome.
    ///
    /// Returns false (and leaves the job untouched) when the outcome does
    /// not fit the job kind or the job already finished.
    pub fn complete(&mut self, outcome: JobOutcome) -> bool {
        if self.is_terminal() || !outcome.fits(self.kind) {
            return false;
        }

        match outcome {
            JobOutcome::Results {
                results,
                collection_title,
                errors,
            } => {
                self.results = Some(results);
                if collection_title.is_some() {
                    self.collection_title = collection_title;
                }
                if !errors.is_empty() {
                    self.errors = Some(errors);
                }
            }
            JobOutcome::Summary(summary) => {
                self.summary = Some(summary);
            }
        }

        self.status = JobStatus::Completed;
        self.end_time = Some(Utc::now());
        true
    }

    /// Mark failed with the given errors. Returns false if already terminal.
    pub fn fail(&mut self, errors: Vec<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = JobStatus::Failed;
        self.end_time = Some(Utc::now());
        self.errors = Some(errors);
        true
    }
}

/// `job_<unix millis>_<9 random chars>`
fn generate_job_id(now: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("job_{}_{}", now.timestamp_millis(), &random[..9])
}
