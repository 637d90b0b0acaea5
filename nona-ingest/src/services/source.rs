//! Source inspection and content retrieval
//!
//! The core talks to [`SourceResolver`] and [`ContentRetriever`]; [`YtDlp`]
//! implements both by shelling out to the `yt-dlp` command line tool.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Descriptive hints about one source item
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceInfo {
    pub title: String,
    pub artist: Option<String>,
    pub track: Option<String>,
    pub uploader: Option<String>,
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub release_year: Option<i32>,
    /// Seconds
    pub duration: Option<f64>,
}

/// One member of a collection
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionMember {
    pub reference: String,
    pub title: Option<String>,
}

/// Resolved collection: optional label plus ordered members
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionInfo {
    pub title: Option<String>,
    pub members: Vec<CollectionMember>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to get source info: {0}")]
    Inspect(String),

    #[error("Failed to list collection: {0}")]
    Collection(String),

    #[error("Collection listing timed out after {0} seconds")]
    CollectionTimeout(u64),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Failed to parse yt-dlp JSON output: {0}")]
    Parse(String),
}

#[async_trait]
pub trait SourceResolver: Send + Sync {
    /// Descriptive hints for a single item
    async fn inspect(&self, reference: &str) -> Result<SourceInfo, SourceError>;

    /// Title and ordered members of a collection
    async fn resolve_collection(&self, reference: &str) -> Result<CollectionInfo, SourceError>;
}

#[async_trait]
pub trait ContentRetriever: Send + Sync {
    /// Download the item's audio to `destination`
    async fn fetch(&self, reference: &str, destination: &Path) -> Result<(), SourceError>;
}

/// Strip radio-mode parameters that make the same item look different
pub fn normalize_reference(reference: &str) -> String {
    reference
        .trim()
        .replace("&start_radio=1", "")
        .replace("?start_radio=1", "")
}

/// Whether a reference names a collection rather than a single item
pub fn is_collection_reference(reference: &str) -> bool {
    reference.contains("list=") || reference.contains("playlist")
}

const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";
const COLLECTION_LIMIT: &str = "100";
const COLLECTION_TIMEOUT_SECS: u64 = 30;
const DOWNLOAD_FORMAT: &str = "bestaudio[ext=m4a]/bestaudio[ext=mp3]/bestaudio[acodec=aac]/bestaudio";

/// yt-dlp's per-item JSON, only the fields we read
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ItemJson {
    #[serde(rename = "_type")]
    kind: Option<String>,
    ie_key: Option<String>,
    id: Option<String>,
    url: Option<String>,
    title: Option<String>,
    artist: Option<String>,
    track: Option<String>,
    uploader: Option<String>,
    tags: Option<Vec<String>>,
    description: Option<String>,
    release_year: Option<i32>,
    duration: Option<f64>,
    playlist_title: Option<String>,
    playlist: Option<String>,
    entries: Option<Vec<ItemJson>>,
}

impl ItemJson {
    fn into_source_info(self) -> SourceInfo {
        SourceInfo {
            title: self.title.unwrap_or_default(),
            artist: self.artist,
            track: self.track,
            uploader: self.uploader,
            tags: self.tags.unwrap_or_default(),
            description: self.description,
            release_year: self.release_year,
            duration: self.duration,
        }
    }

    fn member_reference(&self) -> Option<String> {
        match (&self.url, &self.id) {
            (Some(url), _) if url.starts_with("http") => Some(url.clone()),
            (_, Some(id)) => Some(format!("{}{}", WATCH_URL_PREFIX, id)),
            (Some(url), None) => Some(format!("{}{}", WATCH_URL_PREFIX, url)),
            (None, None) => None,
        }
    }

    fn into_member(self) -> Option<CollectionMember> {
        let reference = self.member_reference()?;
        Some(CollectionMember {
            reference,
            title: self.title,
        })
    }
}

/// Parse `--flat-playlist --dump-json` output (one JSON object per line)
fn parse_collection_listing(stdout: &str) -> Result<CollectionInfo, SourceError> {
    let mut header: Option<ItemJson> = None;
    let mut entries: Vec<ItemJson> = Vec::new();

    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<ItemJson>(line) {
            Ok(item) if item.kind.as_deref() == Some("playlist") => header = Some(item),
            Ok(item) if item.kind.as_deref() == Some("url") => {
                if item.ie_key.as_deref().map_or(true, |k| k == "Youtube") {
                    entries.push(item);
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Skipping unparsable collection line"),
        }
    }

    match header {
        Some(mut header) => {
            let nested = header.entries.take().unwrap_or_default();
            let members = if entries.is_empty() { nested } else { entries };
            let title = header.title.or(header.playlist_title);
            Ok(CollectionInfo {
                title,
                members: members.into_iter().filter_map(ItemJson::into_member).collect(),
            })
        }
        None if !entries.is_empty() => {
            let title = entries[0]
                .playlist_title
                .clone()
                .or_else(|| entries[0].playlist.clone());
            Ok(CollectionInfo {
                title,
                members: entries.into_iter().filter_map(ItemJson::into_member).collect(),
            })
        }
        None => Err(SourceError::Parse(
            "No playlist data or entries found".to_string(),
        )),
    }
}

/// `yt-dlp` command line adapter
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: String,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl YtDlp {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run the tool, returning stdout or the trimmed stderr on failure
    async fn run(&self, args: &[&str]) -> Result<String, String> {
        debug!(program = %self.program, ?args, "Running media tool");

        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("Failed to execute {}: {}", self.program, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("{} exited with {}: {}", self.program, output.status, stderr.trim()));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!(stderr = %stderr.trim(), "Media tool diagnostics");
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl SourceResolver for YtDlp {
    async fn inspect(&self, reference: &str) -> Result<SourceInfo, SourceError> {
        let stdout = self
            .run(&[
                "--dump-json",
                "--no-warnings",
                "--socket-timeout",
                "30",
                "--retries",
                "3",
                "--no-playlist",
                reference,
            ])
            .await
            .map_err(SourceError::Inspect)?;

        let item: ItemJson =
            serde_json::from_str(stdout.trim()).map_err(|e| SourceError::Parse(e.to_string()))?;
        Ok(item.into_source_info())
    }

    async fn resolve_collection(&self, reference: &str) -> Result<CollectionInfo, SourceError> {
        let args = [
            "--flat-playlist",
            "--dump-json",
            "--no-warnings",
            "--socket-timeout",
            "10",
            "--playlist-end",
            COLLECTION_LIMIT,
            reference,
        ];
        let listing = self.run(&args);

        let stdout = tokio::time::timeout(Duration::from_secs(COLLECTION_TIMEOUT_SECS), listing)
            .await
            .map_err(|_| SourceError::CollectionTimeout(COLLECTION_TIMEOUT_SECS))?
            .map_err(SourceError::Collection)?;

        parse_collection_listing(&stdout)
    }
}

#[async_trait]
impl ContentRetriever for YtDlp {
    async fn fetch(&self, reference: &str, destination: &Path) -> Result<(), SourceError> {
        let destination = destination.to_string_lossy();
        self.run(&[
            "-4",
            "-f",
            DOWNLOAD_FORMAT,
            "-x",
            "--audio-format",
            "best",
            "--socket-timeout",
            "30",
            "--retries",
            "3",
            "--no-playlist",
            "-o",
            &destination,
            reference,
        ])
        .await
        .map(|_| ())
        .map_err(SourceError::Download)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_radio_parameter() {
        assert_eq!(
            normalize_reference("https://www.youtube.com/watch?v=abc&start_radio=1"),
            "https://www.youtube.com/watch?v=abc"
        );
        assert_eq!(
            normalize_reference("https://youtu.be/abc?start_radio=1"),
            "https://youtu.be/abc"
        );
    }

    #[test]
    fn test_collection_detection() {
        assert!(is_collection_reference("https://www.youtube.com/playlist?list=PL1"));
        assert!(is_collection_reference("https://www.youtube.com/watch?v=a&list=RD1"));
        assert!(!is_collection_reference("https://www.youtube.com/watch?v=a"));
    }

    #[test]
    fn test_parse_listing_with_header() {
        let stdout = r#"
{"_type": "url", "ie_key": "Youtube", "id": "aaa", "url": "https://www.youtube.com/watch?v=aaa", "title": "First"}
{"_type": "url", "ie_key": "Youtube", "id": "bbb", "url": "bbb", "title": "Second"}
{"_type": "playlist", "title": "Road Trip"}
"#;
        let info = parse_collection_listing(stdout).unwrap();
        assert_eq!(info.title.as_deref(), Some("Road Trip"));
        assert_eq!(info.members.len(), 2);
        assert_eq!(info.members[1].reference, "https://www.youtube.com/watch?v=bbb");
        assert_eq!(info.members[0].title.as_deref(), Some("First"));
    }

    #[test]
    fn test_parse_listing_title_from_entries() {
        let stdout = r#"{"_type": "url", "ie_key": "Youtube", "id": "x", "playlist_title": "Mix"}"#;
        let info = parse_collection_listing(stdout).unwrap();
        assert_eq!(info.title.as_deref(), Some("Mix"));
        assert_eq!(info.members[0].reference, "https://www.youtube.com/watch?v=x");
    }

    #[test]
    fn test_parse_empty_listing_is_error() {
        assert!(parse_collection_listing("not json\n").is_err());
    }

    #[test]
    fn test_item_json_tolerates_missing_fields() {
        let item: ItemJson = serde_json::from_str(r#"{"title": "Song", "duration": 201.0}"#).unwrap();
        let info = item.into_source_info();
        assert_eq!(info.title, "Song");
        assert_eq!(info.duration, Some(201.0));
        assert!(info.tags.is_empty());
    }
}
