//! Audio tag reading and writing via lofty

use async_trait::async_trait;
use lofty::config::WriteOptions;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, Tag};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::TrackMetadata;

#[derive(Debug, Error)]
pub enum TagError {
    #[error("Failed to read tags from {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to write tags to {path}: {message}")]
    Write { path: String, message: String },

    #[error("Tagging I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tagging task failed: {0}")]
    Task(String),
}

/// Tags read back from a materialized file, or a partial edit of them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileTags {
    #[serde(alias = "TITLE")]
    pub title: Option<String>,
    #[serde(alias = "ARTIST")]
    pub artist: Option<String>,
    #[serde(alias = "ALBUM")]
    pub album: Option<String>,
    #[serde(alias = "GENRE")]
    pub genre: Option<String>,
}

#[async_trait]
pub trait Tagger: Send + Sync {
    /// Write `metadata` into a copy of `source` at `output`
    async fn apply_tags(
        &self,
        source: &Path,
        metadata: &TrackMetadata,
        output: &Path,
    ) -> Result<(), TagError>;

    async fn read_tags(&self, path: &Path) -> Result<FileTags, TagError>;

    /// Overwrite, in place, only the fields present in `edit`
    async fn update_tags(&self, path: &Path, edit: &FileTags) -> Result<(), TagError>;
}

/// lofty-backed tagger
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyTagger;

impl LoftyTagger {
    pub fn new() -> Self {
        Self
    }
}

fn non_blank(value: Option<std::borrow::Cow<'_, str>>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_tags_blocking(path: &Path) -> Result<FileTags, TagError> {
    let read_error = |e: lofty::error::LoftyError| TagError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    };

    let tagged_file = Probe::open(path).map_err(read_error)?.read().map_err(read_error)?;

    let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
        return Ok(FileTags::default());
    };

    Ok(FileTags {
        title: non_blank(tag.title()),
        artist: non_blank(tag.artist()),
        album: non_blank(tag.album()),
        genre: non_blank(tag.genre()),
    })
}

/// Open `path`, hand its primary tag (created if missing) to `edit`, save
fn edit_tag_blocking(path: &Path, edit: impl FnOnce(&mut Tag)) -> Result<(), TagError> {
    let write_error = |message: String| TagError::Write {
        path: path.display().to_string(),
        message,
    };

    let mut tagged_file = Probe::open(path)
        .map_err(|e| write_error(e.to_string()))?
        .read()
        .map_err(|e| write_error(e.to_string()))?;

    let tag_type = tagged_file.primary_tag_type();
    if tagged_file.tag(tag_type).is_none() {
        tagged_file.insert_tag(Tag::new(tag_type));
    }
    let tag = tagged_file
        .tag_mut(tag_type)
        .ok_or_else(|| write_error(format!("No writable tag available for {:?}", tag_type)))?;
    edit(tag);

    tagged_file
        .save_to_path(path, WriteOptions::default())
        .map_err(|e| write_error(e.to_string()))
}

fn write_tags_blocking(path: &Path, metadata: &TrackMetadata) -> Result<(), TagError> {
    edit_tag_blocking(path, |tag| {
        tag.set_title(metadata.title.clone());
        tag.set_artist(metadata.artist.clone());
        tag.set_album(metadata.album_or_unknown().to_string());
        if let Some(track) = metadata.track_number {
            tag.set_track(track);
        }
        tag.set_disk(metadata.disc_number.unwrap_or(1));
        if let Some(genre) = &metadata.genre {
            tag.set_genre(genre.clone());
        }
        if let Some(bpm) = metadata.bpm {
            tag.insert_text(ItemKey::Bpm, format!("{}", bpm.round() as i64));
        }
        if let Some(mood) = &metadata.mood {
            tag.insert_text(ItemKey::Mood, mood.clone());
        }
        if let Some(language) = &metadata.language {
            tag.insert_text(ItemKey::Language, language.clone());
        }
    })
}

fn update_tags_blocking(path: &Path, edit: &FileTags) -> Result<(), TagError> {
    edit_tag_blocking(path, |tag| {
        if let Some(title) = &edit.title {
            tag.set_title(title.clone());
        }
        if let Some(artist) = &edit.artist {
            tag.set_artist(artist.clone());
        }
        if let Some(album) = &edit.album {
            tag.set_album(album.clone());
        }
        if let Some(genre) = &edit.genre {
            tag.set_genre(genre.clone());
        }
    })
}

#[async_trait]
impl Tagger for LoftyTagger {
    async fn apply_tags(
        &self,
        source: &Path,
        metadata: &TrackMetadata,
        output: &Path,
    ) -> Result<(), TagError> {
        tokio::fs::copy(source, output).await?;

        let output: PathBuf = output.to_path_buf();
        let metadata = metadata.clone();
        tokio::task::spawn_blocking(move || write_tags_blocking(&output, &metadata))
            .await
            .map_err(|e| TagError::Task(e.to_string()))?
    }

    async fn read_tags(&self, path: &Path) -> Result<FileTags, TagError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || read_tags_blocking(&path))
            .await
            .map_err(|e| TagError::Task(e.to_string()))?
    }

    async fn update_tags(&self, path: &Path, edit: &FileTags) -> Result<(), TagError> {
        let path = path.to_path_buf();
        let edit = edit.clone();
        tokio::task::spawn_blocking(move || update_tags_blocking(&path, &edit))
            .await
            .map_err(|e| TagError::Task(e.to_string()))?
    }
}
