//! Library-wide cover art backfill (maintenance job)

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::models::{ArtBackfillSummary, BatchProgress, JobOutcome, UNKNOWN_ALBUM};
use crate::services::cover_art::{ArtAcquisition, CoverArtService};
use crate::services::library::Library;
use crate::services::tagger::Tagger;
use crate::services::JobTracker;

pub struct CoverArtBackfill {
    library: Library,
    tagger: Arc<dyn Tagger>,
    cover_art: CoverArtService,
    tracker: Arc<JobTracker>,
}

impl CoverArtBackfill {
    pub fn new(
        library: Library,
        tagger: Arc<dyn Tagger>,
        cover_art: CoverArtService,
        tracker: Arc<JobTracker>,
    ) -> Self {
        Self {
            library,
            tagger,
            cover_art,
            tracker,
        }
    }

    /// Walk every audio file and make sure its album directory has a cover.
    ///
    /// Files without an artist tag or on the unknown album are counted as
    /// processed and skipped.
    pub async fn run(&self, job_id: &str) {
        let library = self.library.clone();
        let files = match tokio::task::spawn_blocking(move || library.audio_files()).await {
            Ok(files) => files,
            Err(e) => {
                self.tracker
                    .fail_job(job_id, vec![format!("Failed to scan library: {}", e)])
                    .await;
                return;
            }
        };

        info!(job_id = %job_id, files = files.len(), "Starting cover art backfill");
        let mut summary = ArtBackfillSummary::default();
        let mut progress = BatchProgress::new(files.len(), 0, 0);
        self.tracker.update_progress(job_id, progress).await;

        for path in &files {
            summary.processed += 1;

            let tags = match self.tagger.read_tags(path).await {
                Ok(tags) => tags,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not read tags");
                    summary.errors += 1;
                    progress.failed += 1;
                    self.tracker.update_progress(job_id, progress).await;
                    continue;
                }
            };

            let artist = tags.artist.filter(|a| !a.trim().is_empty());
            let album = tags.album.filter(|a| !a.trim().is_empty() && a != UNKNOWN_ALBUM);
            let (Some(artist), Some(album), Some(album_dir)) = (artist, album, path.parent()) else {
                debug!(path = %path.display(), "No artist/album tags, skipping");
                progress.completed += 1;
                self.tracker.update_progress(job_id, progress).await;
                continue;
            };

            match self.cover_art.ensure(album_dir, &artist, &album).await {
                ArtAcquisition::Existing(_) => {
                    summary.existed += 1;
                    progress.completed += 1;
                }
                ArtAcquisition::Fetched(_) => {
                    summary.fetched += 1;
                    progress.completed += 1;
                }
                ArtAcquisition::NotFound => {
                    progress.completed += 1;
                }
                ArtAcquisition::Failed(message) => {
                    warn!(artist = %artist, album = %album, error = %message, "Cover art backfill failed");
                    summary.errors += 1;
                    progress.failed += 1;
                }
            }
            self.tracker.update_progress(job_id, progress).await;
        }

        info!(
            job_id = %job_id,
            processed = summary.processed,
            fetched = summary.fetched,
            existed = summary.existed,
            errors = summary.errors,
            "Cover art backfill finished"
        );
        self.tracker
            .complete_job(job_id, JobOutcome::Summary(summary))
            .await;
    }
}
