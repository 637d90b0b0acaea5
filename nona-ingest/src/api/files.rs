//! Library file listing, deletion and tag editing

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ApiError, ApiResult};
use crate::services::library::{remove_temp_files, Library};
use crate::services::{FileTags, TagError};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesResponse {
    pub base_directory: String,
    pub total_files: usize,
    pub files: Vec<String>,
}

/// GET /files
///
/// Every file under the library root, relative and sorted.
pub async fn list_files(State(state): State<AppState>) -> ApiResult<Json<FilesResponse>> {
    let library = state.pipeline.library().clone();
    let base_directory = library.base_dir().to_string_lossy().into_owned();

    let files = tokio::task::spawn_blocking(move || library.list_files())
        .await
        .map_err(|e| ApiError::Internal(format!("File listing failed: {}", e)))?;

    Ok(Json(FilesResponse {
        base_directory,
        total_files: files.len(),
        files,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileQuery {
    pub file: Option<String>,
}

/// Validate a library-relative `file` parameter and resolve it
fn library_path(library: &Library, file: Option<&str>) -> ApiResult<(String, PathBuf)> {
    let relative = file
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing required parameter: file".to_string()))?;
    let path = library.resolve_relative(relative).ok_or_else(|| {
        ApiError::Forbidden("File path must be within the base directory".to_string())
    })?;
    Ok((relative.to_string(), path))
}

async fn ensure_file(path: &Path, relative: &str) -> ApiResult<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(ApiError::NotFound(format!("The file '{}' does not exist", relative))),
    }
}

fn tag_failure(e: TagError) -> ApiError {
    ApiError::Internal(e.to_string())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFileResponse {
    pub success: bool,
    pub message: String,
    pub deleted_file: String,
}

/// DELETE /files?file=
///
/// Directories emptied by the deletion are removed up to the library root.
pub async fn delete_file(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> ApiResult<Json<DeleteFileResponse>> {
    let library = state.pipeline.library();
    let (relative, path) = library_path(library, query.file.as_deref())?;
    ensure_file(&path, &relative).await?;

    library.delete_file(&path).await?;

    Ok(Json(DeleteFileResponse {
        success: true,
        message: "File deleted successfully".to_string(),
        deleted_file: relative,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadataResponse {
    pub file_path: String,
    pub tags: FileTags,
}

/// GET /metadata?file=
pub async fn get_metadata(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> ApiResult<Json<FileMetadataResponse>> {
    let (relative, path) = library_path(state.pipeline.library(), query.file.as_deref())?;
    ensure_file(&path, &relative).await?;

    let tags = state
        .pipeline
        .collaborators()
        .tagger
        .read_tags(&path)
        .await
        .map_err(tag_failure)?;

    Ok(Json(FileMetadataResponse {
        file_path: relative,
        tags,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateMetadataRequest {
    pub file: Option<String>,
    pub tags: Option<FileTags>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMetadataResponse {
    pub success: bool,
    pub file_path: String,
    pub updated_tags: FileTags,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moved_from: Option<String>,
}

/// New value present and different from the current one
fn changes(new: &Option<String>, current: &Option<String>) -> bool {
    new.as_ref().is_some_and(|n| Some(n) != current.as_ref())
}

/// PATCH /metadata {file, tags}
///
/// Tags are written to a sibling copy that replaces the file. A changed
/// artist, album or title then moves the file into the matching
/// `<artist>/<album>/<title>` location; a failed move leaves it in place.
pub async fn update_metadata(
    State(state): State<AppState>,
    Json(request): Json<UpdateMetadataRequest>,
) -> ApiResult<Json<UpdateMetadataResponse>> {
    let library = state.pipeline.library();
    let tagger = &state.pipeline.collaborators().tagger;

    let (relative, path) = library_path(library, request.file.as_deref())?;
    let edit = request.tags.ok_or_else(|| {
        ApiError::BadRequest("Missing or invalid 'tags' field in request body".to_string())
    })?;
    ensure_file(&path, &relative).await?;

    let current = tagger.read_tags(&path).await.map_err(tag_failure)?;

    let staged = Library::tagging_temp_path(&path);
    tokio::fs::copy(&path, &staged).await?;
    let swapped = match tagger.update_tags(&staged, &edit).await {
        Ok(()) => tokio::fs::rename(&staged, &path).await.map_err(ApiError::from),
        Err(e) => Err(tag_failure(e)),
    };
    if let Err(e) = swapped {
        remove_temp_files(&[staged]).await;
        return Err(e);
    }

    let mut final_path = path.clone();
    if changes(&edit.artist, &current.artist)
        || changes(&edit.album, &current.album)
        || changes(&edit.title, &current.title)
    {
        let artist = edit.artist.as_deref().or(current.artist.as_deref()).unwrap_or("");
        let album = edit.album.as_deref().or(current.album.as_deref());
        match library.relocate(&path, artist, album, edit.title.as_deref()).await {
            Ok(moved) => final_path = moved,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to move file after tag edit")
            }
        }
    }

    let updated_tags = tagger.read_tags(&final_path).await.map_err(tag_failure)?;
    let moved_from = (final_path != path).then(|| library.relative_path(&path));

    Ok(Json(UpdateMetadataResponse {
        success: true,
        file_path: library.relative_path(&final_path),
        updated_tags,
        message: "File metadata updated successfully".to_string(),
        moved_from,
    }))
}

pub fn file_routes() -> Router<AppState> {
    Router::new()
        .route("/files", get(list_files).delete(delete_file))
        .route("/metadata", get(get_metadata).patch(update_metadata))
}
