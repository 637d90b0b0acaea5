//! Job-level drivers for single references and collections

use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::models::{BatchProgress, JobOutcome, TrackMetadata};
use crate::services::enrichment::EnrichError;
use crate::services::pipeline::{PipelineError, ProcessingPipeline};
use crate::services::source::{CollectionMember, SourceError};
use crate::services::JobTracker;

/// Markers of a connection that dropped or stalled mid-request
const NETWORK_TIMEOUT_MARKERS: &[&str] = &[
    "socket connection was closed",
    "handshake operation timed out",
    "timed out",
    "timeout",
];

/// Short label for an item failure, used in job error messages.
///
/// Timeout markers are only honoured for errors that come off the wire;
/// a malformed response may echo arbitrary text.
pub fn error_kind(err: &PipelineError) -> &'static str {
    let transport = matches!(
        err,
        PipelineError::Source(_)
            | PipelineError::Enrich(EnrichError::Request(_))
            | PipelineError::Enrich(EnrichError::Timeout(_))
    );
    if transport {
        let message = err.to_string().to_lowercase();
        if NETWORK_TIMEOUT_MARKERS.iter().any(|m| message.contains(m)) {
            return "NETWORK_TIMEOUT";
        }
    }

    match err {
        PipelineError::Source(SourceError::Download(_)) => "DOWNLOAD_ERROR",
        PipelineError::Source(_) => "SOURCE_INFO_ERROR",
        PipelineError::Enrich(_) => "ENRICHMENT_ERROR",
        PipelineError::Tag(_) => "TAGGING_ERROR",
        PipelineError::Io(_) => "UNKNOWN_ERROR",
    }
}

fn member_label(member: &CollectionMember) -> &str {
    member
        .title
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(&member.reference)
}

/// Runs pipelines on behalf of jobs and records their outcome
pub struct BatchOrchestrator {
    pipeline: Arc<ProcessingPipeline>,
    tracker: Arc<JobTracker>,
    batch_size: usize,
}

impl BatchOrchestrator {
    pub fn new(pipeline: Arc<ProcessingPipeline>, tracker: Arc<JobTracker>, batch_size: usize) -> Self {
        Self {
            pipeline,
            tracker,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Process one reference as job `job_id`
    pub async fn run_single(&self, job_id: &str, reference: &str) {
        match self.pipeline.process(reference, None).await {
            Ok(metadata) => {
                self.tracker
                    .complete_job(
                        job_id,
                        JobOutcome::Results {
                            results: vec![metadata],
                            collection_title: None,
                            errors: Vec::new(),
                        },
                    )
                    .await;
            }
            Err(e) => {
                let message = format!("Failed to process item [{}]: {}", error_kind(&e), e);
                self.tracker.fail_job(job_id, vec![message]).await;
            }
        }
    }

    /// Process every member of a collection in fixed-size concurrent batches
    pub async fn run_collection(&self, job_id: &str, reference: &str) {
        let collection = match self.pipeline.resolve_collection(reference).await {
            Ok(collection) => collection,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Collection could not be resolved");
                self.tracker.fail_job(job_id, vec![e.to_string()]).await;
                return;
            }
        };

        if let Some(title) = &collection.title {
            self.tracker.set_collection_title(job_id, title.clone()).await;
        }

        let members = collection.members;
        if members.is_empty() {
            self.tracker
                .fail_job(job_id, vec!["No items found in collection".to_string()])
                .await;
            return;
        }

        let total = members.len();
        let batch_count = total.div_ceil(self.batch_size);
        let mut progress = BatchProgress::new(total, 0, 0);
        self.tracker.update_progress(job_id, progress).await;
        info!(job_id = %job_id, total, batches = batch_count, "Processing collection");

        let mut successes: Vec<(usize, TrackMetadata)> = Vec::new();
        let mut errors: Vec<String> = Vec::new();

        for (batch_index, batch) in members.chunks(self.batch_size).enumerate() {
            let first_index = batch_index * self.batch_size;
            let outcomes = join_all(batch.iter().enumerate().map(|(offset, member)| {
                let index = first_index + offset;
                async move {
                    let outcome = self.pipeline.process(&member.reference, Some(index)).await;
                    (index, member, outcome)
                }
            }))
            .await;

            for (index, member, outcome) in outcomes {
                match outcome {
                    Ok(metadata) => {
                        progress.completed += 1;
                        successes.push((index, metadata));
                    }
                    Err(e) => {
                        progress.failed += 1;
                        errors.push(format!(
                            "Failed to process item {} ({}) [{}]: {}",
                            index + 1,
                            member_label(member),
                            error_kind(&e),
                            e
                        ));
                    }
                }
            }

            self.tracker.update_progress(job_id, progress).await;
            info!(
                job_id = %job_id,
                batch = batch_index + 1,
                batches = batch_count,
                completed = progress.completed,
                failed = progress.failed,
                "Batch finished"
            );
        }

        if successes.is_empty() {
            warn!(job_id = %job_id, failed = errors.len(), "Every collection item failed");
            self.tracker.fail_job(job_id, errors).await;
            return;
        }

        successes.sort_by_key(|(index, _)| *index);
        let mut results: Vec<TrackMetadata> = successes.into_iter().map(|(_, m)| m).collect();

        if let Some(title) = &collection.title {
            for result in results.iter_mut().filter(|r| r.has_unknown_album()) {
                result.album = Some(title.clone());
            }
        }

        self.tracker
            .complete_job(
                job_id,
                JobOutcome::Results {
                    results,
                    collection_title: collection.title,
                    errors,
                },
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::tagger::TagError;

    #[test]
    fn test_error_kind_classification() {
        let download = PipelineError::Source(SourceError::Download("HTTP Error 403".into()));
        assert_eq!(error_kind(&download), "DOWNLOAD_ERROR");

        let stalled = PipelineError::Source(SourceError::Download(
            "The handshake operation timed out".into(),
        ));
        assert_eq!(error_kind(&stalled), "NETWORK_TIMEOUT");

        let enrich = PipelineError::Enrich(EnrichError::MalformedResponse("nope".into()));
        assert_eq!(error_kind(&enrich), "ENRICHMENT_ERROR");

        let deadline = PipelineError::Enrich(EnrichError::Timeout(30));
        assert_eq!(error_kind(&deadline), "NETWORK_TIMEOUT");

        let echoed = PipelineError::Enrich(EnrichError::MalformedResponse(
            "expected JSON, got: request timeout while loading".into(),
        ));
        assert_eq!(error_kind(&echoed), "ENRICHMENT_ERROR");

        let dropped = PipelineError::Enrich(EnrichError::Request("operation timed out".into()));
        assert_eq!(error_kind(&dropped), "NETWORK_TIMEOUT");

        let info = PipelineError::Source(SourceError::Inspect("Video unavailable".into()));
        assert_eq!(error_kind(&info), "SOURCE_INFO_ERROR");

        let tag = PipelineError::Tag(TagError::Task("join error".into()));
        assert_eq!(error_kind(&tag), "TAGGING_ERROR");

        let io = PipelineError::Io(std::io::Error::other("disk full"));
        assert_eq!(error_kind(&io), "UNKNOWN_ERROR");
    }

    #[test]
    fn test_member_label_falls_back_to_reference() {
        let untitled = CollectionMember {
            reference: "https://example.com/watch?v=x".into(),
            title: None,
        };
        assert_eq!(member_label(&untitled), "https://example.com/watch?v=x");

        let titled = CollectionMember {
            reference: "r".into(),
            title: Some("Song".into()),
        };
        assert_eq!(member_label(&titled), "Song");
    }
}
