//! Music library layout on disk
//!
//! Files live at `<base>/<artist>/<album>/<title>.m4a`. Existing artist and
//! album directories are reused when they match case-insensitively so the
//! same album never splits across differently-cased folders.

use chrono::Utc;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::models::{TrackMetadata, UNKNOWN_ALBUM};

const UNSAFE_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const MAX_NAME_CHARS: usize = 100;

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_TITLE: &str = "Unknown Title";

/// Extensions checked for an existing album cover, in order
pub const COVER_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];

/// Extensions treated as library audio files
pub const AUDIO_EXTENSIONS: &[&str] = &["m4a", "mp3", "flac", "wav"];

const DOWNLOAD_TEMP_PREFIX: &str = "temp_";
const TAGGING_TEMP_SUFFIX: &str = "_tagging_temp";

/// Make a string safe as a single path component.
///
/// Strips `<>:"/\|?*`, collapses whitespace, trims and caps the length.
/// May return an empty string.
pub fn sanitize_file_name(name: &str) -> String {
    let stripped: String = name.chars().filter(|c| !UNSAFE_CHARS.contains(c)).collect();
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_NAME_CHARS).collect::<String>().trim_end().to_string()
}

/// Sanitized component, or `fallback` when nothing usable remains.
///
/// Dot-only names (`.`, `..`) would resolve outside the intended directory.
fn sanitize_or(name: &str, fallback: &str) -> String {
    let sanitized = sanitize_file_name(name);
    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        fallback.to_string()
    } else {
        sanitized
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Image file extension for a content type, `jpg` when unrecognised
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    let content_type = content_type.to_ascii_lowercase();
    if content_type.contains("image/png") {
        "png"
    } else if content_type.contains("image/gif") {
        "gif"
    } else if content_type.contains("image/webp") {
        "webp"
    } else if content_type.contains("image/bmp") {
        "bmp"
    } else {
        "jpg"
    }
}

/// Remove temporary files, ignoring ones that are already gone
pub async fn remove_temp_files(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "Removed temporary file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temporary file"),
        }
    }
}

/// Library rooted at a base directory
#[derive(Debug, Clone)]
pub struct Library {
    base_dir: PathBuf,
}

impl Library {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Existing child directory of `parent` matching `wanted` exactly, then
    /// case-insensitively; otherwise `wanted` itself
    async fn match_dir_name(parent: &Path, wanted: String) -> String {
        let Ok(mut entries) = tokio::fs::read_dir(parent).await else {
            return wanted;
        };

        let mut folded_match: Option<String> = None;
        let wanted_folded = wanted.to_lowercase();

        while let Ok(Some(entry)) = entries.next_entry().await {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name == wanted {
                return name;
            }
            if folded_match.is_none() && name.to_lowercase() == wanted_folded {
                folded_match = Some(name);
            }
        }

        if let Some(name) = folded_match {
            debug!(wanted = %wanted, found = %name, "Case-insensitive directory match");
            return name;
        }
        wanted
    }

    /// Directory holding an artist's albums
    pub async fn artist_dir(&self, artist: &str) -> PathBuf {
        let name = Self::match_dir_name(&self.base_dir, sanitize_or(artist, UNKNOWN_ARTIST)).await;
        self.base_dir.join(name)
    }

    /// Directory holding an album's tracks; `None` album maps to the sentinel
    pub async fn album_dir(&self, artist: &str, album: Option<&str>) -> PathBuf {
        let artist_dir = self.artist_dir(artist).await;
        let album = album.filter(|a| !a.trim().is_empty()).unwrap_or(UNKNOWN_ALBUM);
        let name = Self::match_dir_name(&artist_dir, sanitize_or(album, UNKNOWN_ALBUM)).await;
        artist_dir.join(name)
    }

    /// Final location of a track
    pub async fn destination_path(&self, metadata: &TrackMetadata) -> PathBuf {
        let album_dir = self
            .album_dir(&metadata.artist, metadata.album.as_deref())
            .await;
        album_dir.join(format!("{}.m4a", sanitize_or(&metadata.title, UNKNOWN_TITLE)))
    }

    /// Absolute path for a library-relative path.
    ///
    /// `None` for empty, absolute or `..`-bearing paths.
    pub fn resolve_relative(&self, relative: &str) -> Option<PathBuf> {
        let mut resolved = self.base_dir.clone();
        for component in Path::new(relative.trim()).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        (resolved != self.base_dir).then_some(resolved)
    }

    /// `path` relative to the base directory, `/`-separated
    pub fn relative_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.base_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Remove `dir` and its ancestors while they are empty, stopping at the base
    pub async fn prune_empty_dirs(&self, dir: &Path) {
        let mut current = dir.to_path_buf();
        while current.starts_with(&self.base_dir) && current != self.base_dir {
            let empty = match tokio::fs::read_dir(&current).await {
                Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
                Err(_) => false,
            };
            if !empty {
                break;
            }
            if let Err(e) = tokio::fs::remove_dir(&current).await {
                warn!(path = %current.display(), error = %e, "Failed to remove empty directory");
                break;
            }
            debug!(path = %current.display(), "Removed empty directory");

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            }
        }
    }

    /// Delete a library file and any directories it leaves empty
    pub async fn delete_file(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::remove_file(path).await?;
        info!(path = %path.display(), "Deleted library file");
        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    /// Move a file to `<artist>/<album>/<name>`, reusing directories
    /// case-insensitively.
    ///
    /// The file keeps its name unless `title` is given; the extension is
    /// always kept. Refuses to overwrite a different existing file.
    pub async fn relocate(
        &self,
        current: &Path,
        artist: &str,
        album: Option<&str>,
        title: Option<&str>,
    ) -> std::io::Result<PathBuf> {
        let album_dir = self.album_dir(artist, album).await;
        let file_name = match title {
            Some(title) => {
                let extension = current
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "m4a".to_string());
                format!("{}.{}", sanitize_or(title, UNKNOWN_TITLE), extension)
            }
            None => current
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{}.m4a", UNKNOWN_TITLE)),
        };

        let target = album_dir.join(file_name);
        if target == current {
            return Ok(target);
        }
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", target.display()),
            ));
        }

        tokio::fs::create_dir_all(&album_dir).await?;
        tokio::fs::rename(current, &target).await?;
        info!(from = %current.display(), to = %target.display(), "Moved library file");

        if let Some(parent) = current.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(target)
    }

    /// Path for a raw download in the base directory
    pub fn download_temp_path(&self, title_hint: &str) -> PathBuf {
        let unique = Uuid::new_v4().simple().to_string();
        self.base_dir.join(format!(
            "{}{}_{}_{}.m4a",
            DOWNLOAD_TEMP_PREFIX,
            Utc::now().timestamp_millis(),
            &unique[..8],
            sanitize_or(title_hint, UNKNOWN_TITLE)
        ))
    }

    /// Sibling path used while tagging a copy of the destination.
    ///
    /// Unique per call; duplicate members of one batch share a destination.
    pub fn tagging_temp_path(destination: &Path) -> PathBuf {
        let stem = destination
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = destination
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "m4a".to_string());
        let unique = Uuid::new_v4().simple().to_string();
        destination.with_file_name(format!(
            "{}{}_{}.{}",
            stem,
            TAGGING_TEMP_SUFFIX,
            &unique[..8],
            extension
        ))
    }

    /// `<album dir>/cover`, without extension
    pub fn cover_art_base(album_dir: &Path) -> PathBuf {
        album_dir.join("cover")
    }

    /// Existing cover image in `album_dir`, if any
    pub async fn find_cover_art(album_dir: &Path) -> Option<PathBuf> {
        let base = Self::cover_art_base(album_dir);
        for ext in COVER_EXTENSIONS {
            let candidate = base.with_extension(ext);
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return Some(candidate);
            }
        }
        None
    }

    /// Write cover bytes next to the album's tracks; returns the saved path
    pub async fn save_cover_art(
        album_dir: &Path,
        bytes: &[u8],
        content_type: &str,
    ) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(album_dir).await?;
        let path = Self::cover_art_base(album_dir).with_extension(extension_for_content_type(content_type));
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Audio files directly inside an album directory, sorted by name
    pub async fn album_audio_files(&self, artist: &str, album: &str) -> Vec<PathBuf> {
        let album_dir = self.album_dir(artist, Some(album)).await;
        let Ok(mut entries) = tokio::fs::read_dir(&album_dir).await else {
            return Vec::new();
        };

        let mut files = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_temp = path
                .file_stem()
                .map(|s| s.to_string_lossy().contains(TAGGING_TEMP_SUFFIX))
                .unwrap_or(false);
            if has_extension(&path, AUDIO_EXTENSIONS) && !is_temp {
                files.push(path);
            }
        }
        files.sort();
        files
    }

    /// Every audio file in the library (blocking walk)
    pub fn audio_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(&self.base_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| has_extension(path, AUDIO_EXTENSIONS) && !is_temp_artifact(self, path))
            .collect();
        files.sort();
        files
    }

    /// Every file under the base directory, relative and sorted (blocking walk)
    pub fn list_files(&self) -> Vec<String> {
        let mut files: Vec<String> = WalkDir::new(&self.base_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(&self.base_dir)
                    .ok()
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
            })
            .collect();
        files.sort();
        files
    }

    /// Delete temporary artifacts left behind by an interrupted run.
    ///
    /// Returns the number of files removed.
    pub async fn cleanup_orphaned_temp_files(&self) -> usize {
        let library = self.clone();
        let orphans = tokio::task::spawn_blocking(move || {
            WalkDir::new(&library.base_dir)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| is_temp_artifact(&library, path))
                .collect::<Vec<_>>()
        })
        .await
        .unwrap_or_default();

        if !orphans.is_empty() {
            info!(count = orphans.len(), "Removing orphaned temporary files");
            remove_temp_files(&orphans).await;
        }
        orphans.len()
    }
}

/// Raw download in the base directory, or a tagging copy anywhere
fn is_temp_artifact(library: &Library, path: &Path) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    let in_base = path.parent() == Some(library.base_dir.as_path());
    (in_base && name.starts_with(DOWNLOAD_TEMP_PREFIX) && name.ends_with(".m4a"))
        || name.contains(TAGGING_TEMP_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_file_name("AC/DC: Live?"), "ACDC Live");
        assert_eq!(sanitize_file_name("  a \t  b\n c "), "a b c");
        assert_eq!(sanitize_file_name("???"), "");
        assert_eq!(sanitize_file_name(&"x".repeat(150)).chars().count(), 100);
    }

    #[test]
    fn test_extension_for_content_type() {
        assert_eq!(extension_for_content_type("image/PNG"), "png");
        assert_eq!(extension_for_content_type("image/jpeg; charset=binary"), "jpg");
        assert_eq!(extension_for_content_type("application/octet-stream"), "jpg");
    }

    #[tokio::test]
    async fn test_destination_reuses_existing_dirs_case_insensitively() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("Coldplay").join("A Head Full of Dreams")).unwrap();
        let library = Library::new(dir.path());

        let mut meta = TrackMetadata::new("Hymn for the Weekend", "COLDPLAY");
        meta.album = Some("a head full of dreams".to_string());
        let path = library.destination_path(&meta).await;

        assert_eq!(
            path,
            dir.path()
                .join("Coldplay")
                .join("A Head Full of Dreams")
                .join("Hymn for the Weekend.m4a")
        );
    }

    #[tokio::test]
    async fn test_destination_fallbacks() {
        let dir = TempDir::new().unwrap();
        let library = Library::new(dir.path());
        let meta = TrackMetadata::new("***", "");

        let path = library.destination_path(&meta).await;
        assert_eq!(
            path,
            dir.path().join(UNKNOWN_ARTIST).join(UNKNOWN_ALBUM).join("Unknown Title.m4a")
        );
    }

    #[tokio::test]
    async fn test_dot_components_stay_inside_library() {
        let dir = TempDir::new().unwrap();
        let library = Library::new(dir.path());
        let mut meta = TrackMetadata::new("..", "..");
        meta.album = Some(".".to_string());

        let path = library.destination_path(&meta).await;
        assert_eq!(
            path,
            dir.path().join(UNKNOWN_ARTIST).join(UNKNOWN_ALBUM).join("Unknown Title.m4a")
        );

        meta.artist = "...".to_string();
        meta.album = Some("..".to_string());
        let path = library.destination_path(&meta).await;
        assert!(path.starts_with(dir.path().join(UNKNOWN_ARTIST).join(UNKNOWN_ALBUM)));
    }

    #[test]
    fn test_tagging_temp_paths_are_unique() {
        let destination = Path::new("/music/Artist/Album/Song.m4a");
        let first = Library::tagging_temp_path(destination);
        let second = Library::tagging_temp_path(destination);

        assert_ne!(first, second);
        assert_eq!(first.parent(), destination.parent());
        let name = first.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("Song_tagging_temp_"));
        assert!(name.ends_with(".m4a"));
    }

    #[test]
    fn test_resolve_relative_stays_inside_base() {
        let library = Library::new("/music");
        assert_eq!(
            library.resolve_relative("Artist/Album/Song.m4a"),
            Some(PathBuf::from("/music/Artist/Album/Song.m4a"))
        );
        assert_eq!(
            library.resolve_relative("./Artist/Song.m4a"),
            Some(PathBuf::from("/music/Artist/Song.m4a"))
        );
        assert_eq!(library.resolve_relative("../etc/passwd"), None);
        assert_eq!(library.resolve_relative("Artist/../../x"), None);
        assert_eq!(library.resolve_relative("/etc/passwd"), None);
        assert_eq!(library.resolve_relative("  "), None);
    }

    #[tokio::test]
    async fn test_delete_file_prunes_empty_directories_only() {
        let dir = TempDir::new().unwrap();
        let lonely = dir.path().join("Solo").join("Single");
        let shared = dir.path().join("Band").join("Record");
        std::fs::create_dir_all(&lonely).unwrap();
        std::fs::create_dir_all(&shared).unwrap();
        std::fs::write(lonely.join("only.m4a"), b"").unwrap();
        std::fs::write(shared.join("one.m4a"), b"").unwrap();
        std::fs::write(shared.join("two.m4a"), b"").unwrap();

        let library = Library::new(dir.path());
        library.delete_file(&lonely.join("only.m4a")).await.unwrap();
        library.delete_file(&shared.join("one.m4a")).await.unwrap();

        assert!(!dir.path().join("Solo").exists());
        assert!(shared.join("two.m4a").exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_relocate_moves_into_matching_dirs() {
        let dir = TempDir::new().unwrap();
        let old_dir = dir.path().join("Unknown Artist").join(UNKNOWN_ALBUM);
        std::fs::create_dir_all(&old_dir).unwrap();
        std::fs::create_dir_all(dir.path().join("Coldplay").join("Parachutes")).unwrap();
        std::fs::write(old_dir.join("track.m4a"), b"audio").unwrap();

        let library = Library::new(dir.path());
        let moved = library
            .relocate(&old_dir.join("track.m4a"), "coldplay", Some("PARACHUTES"), Some("Yellow"))
            .await
            .unwrap();

        assert_eq!(moved, dir.path().join("Coldplay").join("Parachutes").join("Yellow.m4a"));
        assert_eq!(std::fs::read(&moved).unwrap(), b"audio");
        assert!(!dir.path().join("Unknown Artist").exists());
        assert_eq!(library.relative_path(&moved), "Coldplay/Parachutes/Yellow.m4a");
    }

    #[tokio::test]
    async fn test_relocate_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let album = dir.path().join("A").join("B");
        std::fs::create_dir_all(&album).unwrap();
        std::fs::write(album.join("one.m4a"), b"1").unwrap();
        std::fs::write(album.join("two.m4a"), b"2").unwrap();

        let library = Library::new(dir.path());
        let err = library
            .relocate(&album.join("one.m4a"), "A", Some("B"), Some("two"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(album.join("two.m4a")).unwrap(), b"2");
    }

    #[tokio::test]
    async fn test_cover_art_save_and_find() {
        let dir = TempDir::new().unwrap();
        let album_dir = dir.path().join("Artist").join("Album");

        assert!(Library::find_cover_art(&album_dir).await.is_none());
        let saved = Library::save_cover_art(&album_dir, b"png", "image/png").await.unwrap();
        assert_eq!(saved, album_dir.join("cover.png"));
        assert_eq!(Library::find_cover_art(&album_dir).await, Some(saved));
    }

    #[tokio::test]
    async fn test_orphan_cleanup_only_removes_temp_artifacts() {
        let dir = TempDir::new().unwrap();
        let album = dir.path().join("Artist").join("Album");
        std::fs::create_dir_all(&album).unwrap();
        std::fs::write(dir.path().join("temp_1_abc_Song.m4a"), b"").unwrap();
        std::fs::write(album.join("Song_tagging_temp.m4a"), b"").unwrap();
        std::fs::write(album.join("Song.m4a"), b"").unwrap();
        std::fs::write(album.join("temp_notes.m4a"), b"").unwrap();

        let library = Library::new(dir.path());
        assert_eq!(library.cleanup_orphaned_temp_files().await, 2);
        assert!(album.join("Song.m4a").exists());
        assert!(album.join("temp_notes.m4a").exists());

        let files = library.list_files();
        assert_eq!(files, vec!["Artist/Album/Song.m4a", "Artist/Album/temp_notes.m4a"]);
    }

    #[tokio::test]
    async fn test_album_audio_files_skips_non_audio_and_temps() {
        let dir = TempDir::new().unwrap();
        let album = dir.path().join("Artist").join("Album");
        std::fs::create_dir_all(&album).unwrap();
        std::fs::write(album.join("b.m4a"), b"").unwrap();
        std::fs::write(album.join("a.mp3"), b"").unwrap();
        std::fs::write(album.join("cover.jpg"), b"").unwrap();
        std::fs::write(album.join("b_tagging_temp.m4a"), b"").unwrap();

        let library = Library::new(dir.path());
        let files = library.album_audio_files("artist", "ALBUM").await;
        assert_eq!(files, vec![album.join("a.mp3"), album.join("b.m4a")]);
    }
}
