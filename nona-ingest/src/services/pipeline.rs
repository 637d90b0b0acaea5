//! Single-reference processing pipeline
//!
//! cache lookup → (miss) concurrent enrichment + download → cache write →
//! normalization → genre consistency → cover art → tag → place. Temporary
//! files are removed on every exit path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_ENRICH_TIMEOUT_SECS;
use crate::db::ResponseCache;
use crate::models::TrackMetadata;
use crate::services::cover_art::{ArtAcquisition, CoverArtService};
use crate::services::enrichment::{build_prompt, parse_enrichment_response, EnrichError, Enricher};
use crate::services::library::{remove_temp_files, Library};
use crate::services::source::{
    normalize_reference, CollectionInfo, ContentRetriever, SourceError, SourceInfo, SourceResolver,
};
use crate::services::tagger::{TagError, Tagger};
use crate::utils::retry::RetryPolicy;

/// Why one item could not be processed
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Enrich(#[from] EnrichError),

    #[error(transparent)]
    Tag(#[from] TagError),

    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),
}

/// External collaborators the pipeline drives
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn SourceResolver>,
    pub retriever: Arc<dyn ContentRetriever>,
    pub enricher: Arc<dyn Enricher>,
    pub tagger: Arc<dyn Tagger>,
}

pub struct ProcessingPipeline {
    cache: ResponseCache,
    library: Library,
    collaborators: Collaborators,
    cover_art: CoverArtService,
    network_retry: RetryPolicy,
    tooling_retry: RetryPolicy,
    enrich_timeout: Duration,
}

impl ProcessingPipeline {
    pub fn new(
        cache: ResponseCache,
        library: Library,
        collaborators: Collaborators,
        cover_art: CoverArtService,
    ) -> Self {
        Self {
            cache,
            library,
            collaborators,
            cover_art,
            network_retry: RetryPolicy::network(),
            tooling_retry: RetryPolicy::tooling(),
            enrich_timeout: Duration::from_secs(DEFAULT_ENRICH_TIMEOUT_SECS),
        }
    }

    /// Replace the retry policies for API calls and media tooling
    pub fn with_retry_policies(mut self, network: RetryPolicy, tooling: RetryPolicy) -> Self {
        self.network_retry = network;
        self.tooling_retry = tooling;
        self
    }

    /// Hard deadline for one enrichment attempt
    pub fn with_enrich_timeout(mut self, timeout: Duration) -> Self {
        self.enrich_timeout = timeout;
        self
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn cover_art(&self) -> &CoverArtService {
        &self.cover_art
    }

    /// Title and members of a collection, with tooling retries
    pub async fn resolve_collection(&self, reference: &str) -> Result<CollectionInfo, PipelineError> {
        let reference = normalize_reference(reference);
        let resolver = &self.collaborators.resolver;
        let reference = reference.as_str();

        let collection = self
            .tooling_retry
            .run("collection listing", move || async move {
                resolver.resolve_collection(reference).await
            })
            .await?;
        Ok(collection)
    }

    /// Process one reference. `position` is the 0-based index within a
    /// collection, when the item belongs to one.
    pub async fn process(
        &self,
        reference: &str,
        position: Option<usize>,
    ) -> Result<TrackMetadata, PipelineError> {
        let key = normalize_reference(reference);
        let mut temp_files: Vec<PathBuf> = Vec::new();

        let result = self.run(&key, position, &mut temp_files).await;

        remove_temp_files(&temp_files).await;
        if let Err(e) = &result {
            warn!(reference = %key, error = %e, "Item processing failed");
        }
        result
    }

    async fn run(
        &self,
        key: &str,
        position: Option<usize>,
        temp_files: &mut Vec<PathBuf>,
    ) -> Result<TrackMetadata, PipelineError> {
        if let Some(cached) = self.cache.get(key).await {
            let destination = self.library.destination_path(&cached).await;
            if tokio::fs::try_exists(&destination).await.unwrap_or(false) {
                info!(reference = %key, path = %destination.display(), "Already materialized, skipping");
                return Ok(cached);
            }

            debug!(reference = %key, "Cache hit without artifact; downloading");
            let info = self.inspect(key).await?;
            let download = self.library.download_temp_path(&info.title);
            temp_files.push(download.clone());
            self.fetch(key, &download).await?;

            return self.materialize(cached, &info, position, &download, temp_files).await;
        }

        let info = self.inspect(key).await?;
        let download = self.library.download_temp_path(&info.title);
        temp_files.push(download.clone());

        let prompt = build_prompt(key, &info);
        let (response, ()) = tokio::try_join!(self.enrich(&prompt), self.fetch(key, &download))?;

        let metadata = parse_enrichment_response(&response)?;
        self.cache.set(key, &metadata).await;

        self.materialize(metadata, &info, position, &download, temp_files).await
    }

    async fn inspect(&self, key: &str) -> Result<SourceInfo, PipelineError> {
        let resolver = &self.collaborators.resolver;
        let info = self
            .tooling_retry
            .run("source inspection", move || async move { resolver.inspect(key).await })
            .await?;
        Ok(info)
    }

    async fn fetch(&self, key: &str, destination: &Path) -> Result<(), PipelineError> {
        let retriever = &self.collaborators.retriever;
        self.tooling_retry
            .run("content download", move || async move {
                retriever.fetch(key, destination).await
            })
            .await?;
        Ok(())
    }

    async fn enrich(&self, prompt: &str) -> Result<String, PipelineError> {
        let enricher = &self.collaborators.enricher;
        let deadline = self.enrich_timeout;

        let response = self
            .network_retry
            .run("enrichment", move || async move {
                match tokio::time::timeout(deadline, enricher.enrich(prompt, deadline)).await {
                    Ok(result) => result,
                    Err(_) => Err(EnrichError::Timeout(deadline.as_secs())),
                }
            })
            .await?;
        Ok(response)
    }

    /// Steps after attributes and content are both available
    async fn materialize(
        &self,
        mut metadata: TrackMetadata,
        info: &SourceInfo,
        position: Option<usize>,
        download: &Path,
        temp_files: &mut Vec<PathBuf>,
    ) -> Result<TrackMetadata, PipelineError> {
        metadata.duration = info.duration;
        if let Some(position) = position {
            metadata.track_number = u32::try_from(position + 1).ok();
        }
        metadata.normalize_album();

        let album = metadata.album_or_unknown().to_string();
        let album_dir = self.library.album_dir(&metadata.artist, Some(&album)).await;

        if !metadata.has_unknown_album() {
            if let Some(genre) = self.sibling_genre(&metadata.artist, &album).await {
                if metadata.genre.as_deref() != Some(genre.as_str()) {
                    info!(
                        album = %album,
                        enriched = ?metadata.genre,
                        existing = %genre,
                        "Using existing album genre"
                    );
                    metadata.genre = Some(genre);
                }
            }

            match self.cover_art.ensure(&album_dir, &metadata.artist, &album).await {
                ArtAcquisition::Existing(path) | ArtAcquisition::Fetched(path) => {
                    metadata.album_art_path = Some(path.to_string_lossy().into_owned());
                }
                ArtAcquisition::NotFound => debug!(album = %album, "No cover art available"),
                ArtAcquisition::Failed(message) => {
                    warn!(album = %album, error = %message, "Cover art acquisition failed");
                }
            }
        }

        let destination = self.library.destination_path(&metadata).await;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tagging = Library::tagging_temp_path(&destination);
        temp_files.push(tagging.clone());
        self.collaborators
            .tagger
            .apply_tags(download, &metadata, &tagging)
            .await?;
        tokio::fs::rename(&tagging, &destination).await?;

        info!(
            title = %metadata.title,
            artist = %metadata.artist,
            path = %destination.display(),
            "Track materialized"
        );
        Ok(metadata)
    }

    /// First non-empty genre among files already in the album directory
    async fn sibling_genre(&self, artist: &str, album: &str) -> Option<String> {
        for path in self.library.album_audio_files(artist, album).await {
            match self.collaborators.tagger.read_tags(&path).await {
                Ok(tags) => {
                    if let Some(genre) = tags.genre.filter(|g| !g.trim().is_empty()) {
                        return Some(genre);
                    }
                }
                Err(e) => debug!(path = %path.display(), error = %e, "Skipping unreadable sibling"),
            }
        }
        None
    }
}
