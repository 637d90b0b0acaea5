//! Enrichment attributes for one track

use serde::{Deserialize, Serialize};

/// Album placeholder used whenever no album is known.
///
/// Directory placement and cover art lookup key off this value, so it is
/// applied instead of leaving the album empty.
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

/// Descriptive attributes for one track.
///
/// `duration` and `album_art_path` are specific to a processing run and are
/// never written to the response cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackMetadata {
    pub title: String,

    /// Primary artist only, no featured artists
    pub artist: String,

    #[serde(default)]
    pub album: Option<String>,

    /// 1-based position within the album or playlist
    #[serde(default)]
    pub track_number: Option<u32>,

    #[serde(default)]
    pub disc_number: Option<u32>,

    #[serde(default)]
    pub bpm: Option<f64>,

    #[serde(default)]
    pub mood: Option<String>,

    #[serde(default)]
    pub genre: Option<String>,

    #[serde(default)]
    pub tags: Option<Vec<String>>,

    /// ISO 639-1 code
    #[serde(default)]
    pub language: Option<String>,

    /// Source duration in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_art_path: Option<String>,
}

impl TrackMetadata {
    /// Create attributes with only the required fields set
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            album: None,
            track_number: None,
            disc_number: None,
            bpm: None,
            mood: None,
            genre: None,
            tags: None,
            language: None,
            duration: None,
            album_art_path: None,
        }
    }

    /// Copy with the run-specific fields removed, as stored in the cache
    pub fn without_run_fields(&self) -> Self {
        Self {
            duration: None,
            album_art_path: None,
            ..self.clone()
        }
    }

    /// Album name with the sentinel applied
    pub fn album_or_unknown(&self) -> &str {
        match self.album.as_deref() {
            Some(album) if !album.trim().is_empty() => album,
            _ => UNKNOWN_ALBUM,
        }
    }

    /// Replace a missing or blank album with the sentinel
    pub fn normalize_album(&mut self) {
        let album = self.album_or_unknown().to_string();
        self.album = Some(album);
    }

    /// True when the album is missing or the sentinel
    pub fn has_unknown_album(&self) -> bool {
        self.album_or_unknown() == UNKNOWN_ALBUM
    }
}
