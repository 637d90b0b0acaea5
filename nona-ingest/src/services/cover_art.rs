//! Album cover art acquisition
//!
//! Providers are tried in order (MusicBrainz + Cover Art Archive, then
//! Discogs when a token is configured). Every lookup runs through the
//! shared [`RequestQueue`] so concurrent pipelines never burst the
//! providers, and the on-disk check is repeated inside the queued task in
//! case another pipeline saved the same cover while this one waited.

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::UNKNOWN_ALBUM;
use crate::services::library::Library;
use crate::services::request_queue::RequestQueue;

const USER_AGENT: &str = concat!("nona-ingest/", env!("CARGO_PKG_VERSION"), " (contact@example.com)");
const MUSICBRAINZ_RELEASE_URL: &str = "https://musicbrainz.org/ws/2/release/";
const COVER_ART_ARCHIVE_URL: &str = "https://coverartarchive.org/release-group";
const DISCOGS_API_URL: &str = "https://api.discogs.com";
const DEFAULT_IMAGE_TYPE: &str = "image/jpeg";

/// Image bytes plus their MIME type
#[derive(Debug, Clone, PartialEq)]
pub struct CoverArt {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Error)]
pub enum ArtError {
    #[error("Cover art request failed: {0}")]
    Http(String),

    #[error("Cover art request to {url} returned {status}")]
    Status { status: u16, url: String },

    #[error("Failed to save cover art: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ArtError {
    fn from(err: reqwest::Error) -> Self {
        ArtError::Http(err.to_string())
    }
}

#[async_trait]
pub trait CoverArtProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Find a front cover for `album` by `artist`
    async fn find_art(&self, artist: &str, album: &str) -> Result<Option<CoverArt>, ArtError>;
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_default()
}

/// GET an image; 404 means "no image"
async fn fetch_image(client: &reqwest::Client, url: &str) -> Result<Option<CoverArt>, ArtError> {
    let response = client.get(url).send().await?;
    let status = response.status();

    if status == reqwest::StatusCode::NOT_FOUND {
        debug!(url, "No image at URL");
        return Ok(None);
    }
    if !status.is_success() {
        return Err(ArtError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_IMAGE_TYPE)
        .to_string();
    let bytes = response.bytes().await?.to_vec();

    Ok(Some(CoverArt {
        bytes,
        content_type,
    }))
}

/// Lowercase, punctuation to spaces, whitespace collapsed
fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Significant words (longer than two characters)
fn significant_words(text: &str) -> Vec<&str> {
    text.split_whitespace().filter(|w| w.chars().count() > 2).collect()
}

/// Count of `wanted` words that overlap (substring either way) a word in `candidate`
fn overlapping_words(wanted: &[&str], candidate: &str) -> usize {
    let candidate_words: Vec<&str> = candidate.split_whitespace().collect();
    wanted
        .iter()
        .filter(|w| {
            candidate_words
                .iter()
                .any(|c| c.contains(*w) || w.contains(c))
        })
        .count()
}

/// Whether a release title plausibly names the wanted album
fn album_title_matches(wanted_album: &str, release_title: &str) -> bool {
    let wanted = normalize_title(wanted_album);
    let release = normalize_title(release_title);
    if wanted.is_empty() || release.is_empty() {
        return false;
    }
    if wanted == release || release.contains(&wanted) || wanted.contains(&release) {
        return true;
    }
    if strsim::jaro_winkler(&wanted, &release) >= 0.92 {
        return true;
    }

    let words = significant_words(&wanted);
    !words.is_empty() && overlapping_words(&words, &release) >= words.len().min(2)
}

/// Whether both artist and album loosely match (combined-term search)
fn release_loosely_matches(artist: &str, album: &str, release_artist: &str, release_title: &str) -> bool {
    let artist_words = significant_words(artist);
    let album_words = significant_words(album);

    let artist_ok = overlapping_words(&artist_words, release_artist) >= artist_words.len().min(1);
    let album_ok = overlapping_words(&album_words, release_title) >= album_words.len().min(1);
    artist_ok && album_ok
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReleaseSearch {
    releases: Vec<Release>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Release {
    title: String,
    #[serde(rename = "artist-credit")]
    artist_credit: Vec<ArtistCredit>,
    #[serde(rename = "release-group")]
    release_group: Option<ReleaseGroup>,
}

impl Release {
    fn release_group_id(&self) -> Option<&str> {
        self.release_group
            .as_ref()
            .map(|g| g.id.as_str())
            .filter(|id| !id.is_empty())
    }

    fn primary_artist(&self) -> &str {
        self.artist_credit
            .first()
            .map(|c| c.artist.name.as_str())
            .unwrap_or("")
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ArtistCredit {
    artist: CreditedArtist,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CreditedArtist {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReleaseGroup {
    id: String,
}

/// Release-group lookup on MusicBrainz, image from the Cover Art Archive
pub struct MusicBrainzProvider {
    client: reqwest::Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl Default for MusicBrainzProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MusicBrainzProvider {
    pub fn new() -> Self {
        // MusicBrainz asks for no more than one search every two seconds
        let quota = Quota::with_period(Duration::from_secs(2))
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::MIN);

        Self {
            client: http_client(),
            rate_limiter: RateLimiter::direct(quota),
        }
    }

    async fn search(&self, query: &str, limit: u32) -> Result<Vec<Release>, ArtError> {
        self.rate_limiter.until_ready().await;
        debug!(query, "MusicBrainz release search");

        let response = self
            .client
            .get(MUSICBRAINZ_RELEASE_URL)
            .query(&[("query", query), ("fmt", "json"), ("limit", &limit.to_string())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArtError::Status {
                status: status.as_u16(),
                url: MUSICBRAINZ_RELEASE_URL.to_string(),
            });
        }

        Ok(response.json::<ReleaseSearch>().await?.releases)
    }

    /// Release-group id via progressively looser searches
    async fn find_release_group(&self, artist: &str, album: &str) -> Result<Option<String>, ArtError> {
        let strict = format!("artist:\"{}\" AND release:\"{}\"", artist, album);
        let loose = format!("artist:{} AND release:{}", artist, album);
        for query in [strict, loose] {
            let releases = self.search(&query, 25).await?;
            if let Some(id) = releases.iter().find_map(Release::release_group_id) {
                return Ok(Some(id.to_string()));
            }
        }

        let by_artist = self.search(&format!("artist:\"{}\"", artist), 100).await?;
        if let Some(release) = by_artist
            .iter()
            .filter(|r| r.release_group_id().is_some())
            .find(|r| album_title_matches(album, &r.title))
        {
            debug!(release = %release.title, "MusicBrainz match via artist releases");
            return Ok(release.release_group_id().map(str::to_string));
        }

        let combined = self.search(&format!("{} {}", artist, album), 25).await?;
        Ok(combined
            .iter()
            .filter(|r| r.release_group_id().is_some())
            .find(|r| release_loosely_matches(artist, album, r.primary_artist(), &r.title))
            .and_then(|r| r.release_group_id().map(str::to_string)))
    }
}

#[async_trait]
impl CoverArtProvider for MusicBrainzProvider {
    fn name(&self) -> &'static str {
        "musicbrainz"
    }

    async fn find_art(&self, artist: &str, album: &str) -> Result<Option<CoverArt>, ArtError> {
        let Some(mbid) = self.find_release_group(artist, album).await? else {
            debug!(artist, album, "No MusicBrainz release group found");
            return Ok(None);
        };

        let url = format!("{}/{}/front", COVER_ART_ARCHIVE_URL, mbid);
        fetch_image(&self.client, &url).await
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DiscogsSearch {
    results: Vec<DiscogsResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DiscogsResult {
    id: u64,
    thumb: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DiscogsRelease {
    images: Vec<DiscogsImage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DiscogsImage {
    #[serde(rename = "type")]
    kind: String,
    uri: String,
}

/// Discogs database search; needs a personal access token
pub struct DiscogsProvider {
    client: reqwest::Client,
    token: String,
}

impl DiscogsProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            token: token.into(),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ArtError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .header(reqwest::header::AUTHORIZATION, format!("Discogs token={}", self.token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArtError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl CoverArtProvider for DiscogsProvider {
    fn name(&self) -> &'static str {
        "discogs"
    }

    async fn find_art(&self, artist: &str, album: &str) -> Result<Option<CoverArt>, ArtError> {
        let search: DiscogsSearch = self
            .get_json(
                &format!("{}/database/search", DISCOGS_API_URL),
                &[
                    ("artist", artist),
                    ("release_title", album),
                    ("type", "release"),
                    ("per_page", "5"),
                ],
            )
            .await?;

        for result in search.results.iter().filter(|r| !r.thumb.is_empty()) {
            let release: Result<DiscogsRelease, ArtError> = self
                .get_json(&format!("{}/releases/{}", DISCOGS_API_URL, result.id), &[])
                .await;

            if let Ok(release) = release {
                let image = release
                    .images
                    .iter()
                    .find(|i| i.kind == "primary")
                    .or_else(|| release.images.first());
                if let Some(image) = image {
                    if let Some(art) = fetch_image(&self.client, &image.uri).await? {
                        return Ok(Some(art));
                    }
                }
            }

            if let Some(art) = fetch_image(&self.client, &result.thumb).await? {
                return Ok(Some(art));
            }
        }

        Ok(None)
    }
}

/// How a cover art request was satisfied
#[derive(Debug, Clone, PartialEq)]
pub enum ArtAcquisition {
    /// A cover already existed on disk
    Existing(PathBuf),
    /// A provider supplied a cover, now saved at this path
    Fetched(PathBuf),
    /// No provider had a cover
    NotFound,
    /// Lookup or save failed
    Failed(String),
}

impl ArtAcquisition {
    /// Path of the cover on disk, if there is one
    pub fn path(&self) -> Option<&Path> {
        match self {
            ArtAcquisition::Existing(path) | ArtAcquisition::Fetched(path) => Some(path),
            _ => None,
        }
    }
}

/// Queue-backed cover art lookup over an ordered provider list
#[derive(Clone)]
pub struct CoverArtService {
    providers: Arc<Vec<Arc<dyn CoverArtProvider>>>,
    queue: RequestQueue,
}

impl CoverArtService {
    pub fn new(providers: Vec<Arc<dyn CoverArtProvider>>, queue: RequestQueue) -> Self {
        Self {
            providers: Arc::new(providers),
            queue,
        }
    }

    /// MusicBrainz first, Discogs as fallback when a token is present
    pub fn with_default_providers(discogs_token: Option<String>, queue: RequestQueue) -> Self {
        let mut providers: Vec<Arc<dyn CoverArtProvider>> = vec![Arc::new(MusicBrainzProvider::new())];
        if let Some(token) = discogs_token {
            providers.push(Arc::new(DiscogsProvider::new(token)));
        }
        Self::new(providers, queue)
    }

    /// Make sure `album_dir` has a cover image.
    ///
    /// The sentinel album never gets one.
    pub async fn ensure(&self, album_dir: &Path, artist: &str, album: &str) -> ArtAcquisition {
        if album.trim().is_empty() || album == UNKNOWN_ALBUM {
            debug!(artist, "Skipping cover art for unknown album");
            return ArtAcquisition::NotFound;
        }

        if let Some(existing) = Library::find_cover_art(album_dir).await {
            return ArtAcquisition::Existing(existing);
        }

        let providers = Arc::clone(&self.providers);
        let album_dir = album_dir.to_path_buf();
        let artist = artist.to_string();
        let album = album.to_string();

        let queued = self
            .queue
            .enqueue(move || async move { acquire(&providers, &album_dir, &artist, &album).await })
            .await;

        match queued {
            Ok(outcome) => outcome,
            Err(e) => ArtAcquisition::Failed(e.to_string()),
        }
    }
}

async fn acquire(
    providers: &[Arc<dyn CoverArtProvider>],
    album_dir: &Path,
    artist: &str,
    album: &str,
) -> ArtAcquisition {
    if let Some(existing) = Library::find_cover_art(album_dir).await {
        debug!(path = %existing.display(), "Cover art appeared while queued");
        return ArtAcquisition::Existing(existing);
    }

    let mut last_error: Option<String> = None;

    for provider in providers {
        match provider.find_art(artist, album).await {
            Ok(Some(art)) => {
                return match Library::save_cover_art(album_dir, &art.bytes, &art.content_type).await {
                    Ok(path) => {
                        info!(provider = provider.name(), artist, album, path = %path.display(), "Saved cover art");
                        ArtAcquisition::Fetched(path)
                    }
                    Err(e) => ArtAcquisition::Failed(ArtError::from(e).to_string()),
                };
            }
            Ok(None) => debug!(provider = provider.name(), artist, album, "Provider has no cover"),
            Err(e) => {
                warn!(provider = provider.name(), artist, album, error = %e, "Cover art provider failed");
                last_error = Some(e.to_string());
            }
        }
    }

    match last_error {
        Some(message) => ArtAcquisition::Failed(message),
        None => ArtAcquisition::NotFound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct StaticProvider {
        art: Option<CoverArt>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CoverArtProvider for StaticProvider {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn find_art(&self, _artist: &str, _album: &str) -> Result<Option<CoverArt>, ArtError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.art.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl CoverArtProvider for FailingProvider {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn find_art(&self, _artist: &str, _album: &str) -> Result<Option<CoverArt>, ArtError> {
            Err(ArtError::Http("connection refused".to_string()))
        }
    }

    fn png() -> Option<CoverArt> {
        Some(CoverArt {
            bytes: vec![1, 2, 3],
            content_type: "image/png".to_string(),
        })
    }

    #[test]
    fn test_album_title_matching() {
        assert!(album_title_matches("Tha Carter V", "Tha Carter V (Deluxe)"));
        assert!(album_title_matches("A Head Full of Dreams", "a head full of dreams"));
        assert!(album_title_matches("Random Access Memories", "Random Access Memories: 10th Anniversary"));
        assert!(!album_title_matches("Discovery", "Homework"));
    }

    #[test]
    fn test_loose_release_matching() {
        assert!(release_loosely_matches("Daft Punk", "Discovery", "Daft Punk", "Discovery"));
        assert!(!release_loosely_matches("Daft Punk", "Discovery", "Justice", "Cross"));
    }

    #[tokio::test]
    async fn test_falls_through_to_next_provider() {
        let dir = TempDir::new().unwrap();
        let album_dir = dir.path().join("Artist").join("Album");
        let service = CoverArtService::new(
            vec![
                Arc::new(FailingProvider) as Arc<dyn CoverArtProvider>,
                Arc::new(StaticProvider {
                    art: png(),
                    calls: AtomicUsize::new(0),
                }),
            ],
            RequestQueue::new(Duration::from_millis(1)),
        );

        let outcome = service.ensure(&album_dir, "Artist", "Album").await;
        assert_eq!(outcome, ArtAcquisition::Fetched(album_dir.join("cover.png")));
        assert!(album_dir.join("cover.png").exists());
    }

    #[tokio::test]
    async fn test_existing_cover_skips_providers() {
        let dir = TempDir::new().unwrap();
        let album_dir = dir.path().join("Album");
        std::fs::create_dir_all(&album_dir).unwrap();
        std::fs::write(album_dir.join("cover.webp"), b"x").unwrap();

        let provider = Arc::new(StaticProvider {
            art: png(),
            calls: AtomicUsize::new(0),
        });
        let service = CoverArtService::new(
            vec![provider.clone() as Arc<dyn CoverArtProvider>],
            RequestQueue::new(Duration::from_millis(1)),
        );

        let outcome = service.ensure(&album_dir, "Artist", "Album").await;
        assert_eq!(outcome, ArtAcquisition::Existing(album_dir.join("cover.webp")));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_album_is_skipped() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(StaticProvider {
            art: png(),
            calls: AtomicUsize::new(0),
        });
        let service = CoverArtService::new(
            vec![provider.clone() as Arc<dyn CoverArtProvider>],
            RequestQueue::new(Duration::from_millis(1)),
        );

        let outcome = service.ensure(dir.path(), "Artist", UNKNOWN_ALBUM).await;
        assert_eq!(outcome, ArtAcquisition::NotFound);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_providers_failing_reports_failure() {
        let dir = TempDir::new().unwrap();
        let service = CoverArtService::new(
            vec![Arc::new(FailingProvider) as Arc<dyn CoverArtProvider>],
            RequestQueue::new(Duration::from_millis(1)),
        );

        let outcome = service.ensure(dir.path(), "Artist", "Album").await;
        assert!(matches!(outcome, ArtAcquisition::Failed(m) if m.contains("connection refused")));
    }
}
