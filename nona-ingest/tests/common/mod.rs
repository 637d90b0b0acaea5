//! In-memory collaborators and a pipeline harness for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use nona_ingest::db::ResponseCache;
use nona_ingest::models::{BatchProgress, TrackMetadata};
use nona_ingest::services::{
    ArtError, BatchOrchestrator, Collaborators, CollectionInfo, CollectionMember, ContentRetriever,
    CoverArt, CoverArtProvider, CoverArtService, EnrichError, Enricher, FileTags, JobTracker,
    Library, ProcessingPipeline, RequestQueue, SourceError, SourceInfo, SourceResolver, TagError,
    Tagger,
};
use nona_ingest::utils::RetryPolicy;
use nona_ingest::AppState;

pub fn item_url(n: usize) -> String {
    format!("https://www.youtube.com/watch?v=item{}", n)
}

pub fn collection_url(name: &str) -> String {
    format!("https://www.youtube.com/playlist?list={}", name)
}

/// Source resolver and retriever backed by maps
#[derive(Default)]
pub struct FakeSource {
    pub collections: Mutex<HashMap<String, CollectionInfo>>,
    /// References whose download fails permanently
    pub broken: Mutex<HashSet<String>>,
    /// References whose download fails transiently this many times first
    pub flaky: Mutex<HashMap<String, usize>>,
    pub inspect_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    /// How long each successful download takes
    pub fetch_delay: Mutex<Option<Duration>>,
    pub in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
    /// Job whose progress is sampled whenever a download starts
    pub watched_job: Mutex<Option<(Arc<JobTracker>, String)>>,
    /// `(reference, progress)` seen at the start of each download
    pub progress_at_fetch: Mutex<Vec<(String, Option<BatchProgress>)>>,
}

impl FakeSource {
    pub fn add_collection(&self, reference: &str, title: &str, members: usize) {
        let info = CollectionInfo {
            title: Some(title.to_string()),
            members: (1..=members)
                .map(|n| CollectionMember {
                    reference: item_url(n),
                    title: Some(format!("Song {}", n)),
                })
                .collect(),
        };
        self.collections.lock().unwrap().insert(reference.to_string(), info);
    }

    pub fn break_download(&self, reference: &str) {
        self.broken.lock().unwrap().insert(reference.to_string());
    }

    pub fn watch_job(&self, tracker: &Arc<JobTracker>, job_id: &str) {
        *self.watched_job.lock().unwrap() = Some((Arc::clone(tracker), job_id.to_string()));
    }

    pub fn external_calls(&self) -> usize {
        self.inspect_calls.load(Ordering::SeqCst) + self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceResolver for FakeSource {
    async fn inspect(&self, reference: &str) -> Result<SourceInfo, SourceError> {
        self.inspect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(SourceInfo {
            title: format!("Raw title for {}", reference),
            duration: Some(200.0),
            ..Default::default()
        })
    }

    async fn resolve_collection(&self, reference: &str) -> Result<CollectionInfo, SourceError> {
        self.collections
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| SourceError::Collection(format!("ERROR: no such playlist {}", reference)))
    }
}

#[async_trait]
impl ContentRetriever for FakeSource {
    async fn fetch(&self, reference: &str, destination: &Path) -> Result<(), SourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        if self.broken.lock().unwrap().contains(reference) {
            return Err(SourceError::Download("ERROR: Video unavailable".to_string()));
        }
        {
            let mut flaky = self.flaky.lock().unwrap();
            if let Some(remaining) = flaky.get_mut(reference) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SourceError::Download("connection reset by peer".to_string()));
                }
            }
        }

        let watched = self.watched_job.lock().unwrap().clone();
        if let Some((tracker, job_id)) = watched {
            let progress = tracker.get_job(&job_id).await.and_then(|job| job.progress);
            self.progress_at_fetch
                .lock()
                .unwrap()
                .push((reference.to_string(), progress));
        }

        let active = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(active, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let written = tokio::fs::write(destination, b"raw audio").await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        written.map_err(|e| SourceError::Download(e.to_string()))
    }
}

/// Enricher answering with canned metadata keyed by reference
#[derive(Default)]
pub struct FakeEnricher {
    pub responses: Mutex<HashMap<String, TrackMetadata>>,
    pub calls: AtomicUsize,
    /// References whose enrichment never answers
    pub stalled: Mutex<HashSet<String>>,
}

impl FakeEnricher {
    pub fn respond(&self, reference: &str, metadata: TrackMetadata) {
        self.responses.lock().unwrap().insert(reference.to_string(), metadata);
    }
}

#[async_trait]
impl Enricher for FakeEnricher {
    async fn enrich(&self, prompt: &str, _deadline: Duration) -> Result<String, EnrichError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let stalled = self
            .stalled
            .lock()
            .unwrap()
            .iter()
            .any(|reference| prompt.contains(&format!("Source URL: {}\n", reference)));
        if stalled {
            std::future::pending::<()>().await;
        }
        let responses = self.responses.lock().unwrap();
        let metadata = responses
            .iter()
            .find(|(reference, _)| prompt.contains(&format!("Source URL: {}\n", reference)))
            .map(|(_, metadata)| metadata.clone())
            .ok_or_else(|| EnrichError::MalformedResponse("no canned response".to_string()))?;

        serde_json::to_string(&metadata).map_err(|e| EnrichError::MalformedResponse(e.to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredTags {
    title: String,
    artist: String,
    album: Option<String>,
    genre: Option<String>,
}

/// Tagger that stores tags as JSON in place of audio
#[derive(Default)]
pub struct JsonTagger;

#[async_trait]
impl Tagger for JsonTagger {
    async fn apply_tags(
        &self,
        source: &Path,
        metadata: &TrackMetadata,
        output: &Path,
    ) -> Result<(), TagError> {
        tokio::fs::metadata(source).await?;
        let tags = StoredTags {
            title: metadata.title.clone(),
            artist: metadata.artist.clone(),
            album: metadata.album.clone(),
            genre: metadata.genre.clone(),
        };
        let json = serde_json::to_vec(&tags).map_err(|e| TagError::Task(e.to_string()))?;
        tokio::fs::write(output, json).await?;
        Ok(())
    }

    async fn read_tags(&self, path: &Path) -> Result<FileTags, TagError> {
        let bytes = tokio::fs::read(path).await?;
        let tags: StoredTags = serde_json::from_slice(&bytes).map_err(|e| TagError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(FileTags {
            title: Some(tags.title),
            artist: Some(tags.artist),
            album: tags.album,
            genre: tags.genre,
        })
    }

    async fn update_tags(&self, path: &Path, edit: &FileTags) -> Result<(), TagError> {
        let bytes = tokio::fs::read(path).await?;
        let mut tags: StoredTags = serde_json::from_slice(&bytes).map_err(|e| TagError::Write {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(title) = &edit.title {
            tags.title = title.clone();
        }
        if let Some(artist) = &edit.artist {
            tags.artist = artist.clone();
        }
        if edit.album.is_some() {
            tags.album = edit.album.clone();
        }
        if edit.genre.is_some() {
            tags.genre = edit.genre.clone();
        }
        let json = serde_json::to_vec(&tags).map_err(|e| TagError::Task(e.to_string()))?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

/// Cover art provider that always has a PNG
#[derive(Default)]
pub struct FakeArt {
    pub calls: AtomicUsize,
}

#[async_trait]
impl CoverArtProvider for FakeArt {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn find_art(&self, _artist: &str, _album: &str) -> Result<Option<CoverArt>, ArtError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(CoverArt {
            bytes: vec![0x89, b'P', b'N', b'G'],
            content_type: "image/png".to_string(),
        }))
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub cache: ResponseCache,
    pub tracker: Arc<JobTracker>,
    pub pipeline: Arc<ProcessingPipeline>,
    pub orchestrator: BatchOrchestrator,
    pub source: Arc<FakeSource>,
    pub enricher: Arc<FakeEnricher>,
    pub art: Arc<FakeArt>,
}

impl Harness {
    pub async fn new(batch_size: usize) -> Self {
        Self::with_enrich_timeout(batch_size, Duration::from_secs(5)).await
    }

    pub async fn with_enrich_timeout(batch_size: usize, enrich_timeout: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let cache = ResponseCache::in_memory().await.unwrap();
        let tracker = Arc::new(JobTracker::load(cache.clone(), 100).await);

        let source = Arc::new(FakeSource::default());
        let enricher = Arc::new(FakeEnricher::default());
        let art = Arc::new(FakeArt::default());

        let collaborators = Collaborators {
            resolver: source.clone(),
            retriever: source.clone(),
            enricher: enricher.clone(),
            tagger: Arc::new(JsonTagger),
        };
        let cover_art = CoverArtService::new(
            vec![art.clone() as Arc<dyn CoverArtProvider>],
            RequestQueue::new(Duration::from_millis(1)),
        );

        let fast = Duration::from_millis(1);
        let pipeline = Arc::new(
            ProcessingPipeline::new(cache.clone(), Library::new(dir.path()), collaborators, cover_art)
                .with_retry_policies(
                    RetryPolicy::network().with_base_delay(fast),
                    RetryPolicy::tooling().with_base_delay(fast),
                )
                .with_enrich_timeout(enrich_timeout),
        );
        let orchestrator = BatchOrchestrator::new(Arc::clone(&pipeline), Arc::clone(&tracker), batch_size);

        Self {
            dir,
            cache,
            tracker,
            pipeline,
            orchestrator,
            source,
            enricher,
            art,
        }
    }

    pub fn base(&self) -> &Path {
        self.dir.path()
    }

    pub fn app_state(&self, batch_size: usize) -> AppState {
        AppState::new(
            self.cache.clone(),
            Arc::clone(&self.tracker),
            Arc::clone(&self.pipeline),
            batch_size,
        )
    }
}

pub fn track(title: &str, artist: &str, album: Option<&str>, genre: Option<&str>) -> TrackMetadata {
    let mut metadata = TrackMetadata::new(title, artist);
    metadata.album = album.map(str::to_string);
    metadata.genre = genre.map(str::to_string);
    metadata
}

/// Names of download or tagging temp files anywhere under `base`
pub fn leftover_temp_files(base: &Path) -> Vec<String> {
    walk(base)
        .into_iter()
        .filter(|name| name.starts_with("temp_") || name.contains("_tagging_temp"))
        .collect()
}

pub fn walk(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            names.extend(walk(&path));
        } else {
            names.push(path.file_name().unwrap().to_string_lossy().into_owned());
        }
    }
    names
}
