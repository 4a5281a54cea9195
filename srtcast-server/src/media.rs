//! Media library access: enumeration of playable files under the configured
//! videos directory.

use std::path::{Path, PathBuf};

use log::warn;
use serde::Serialize;

/// Extensions accepted as playable video files, lowercase.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mkv", "mov", "wmv", "flv"];

/// One playable file, as reported to clients.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaFile {
    /// File name without directory components.
    pub name: String,
    /// Absolute or root-relative path usable in a play request.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
}

/// Whether a path looks like a playable video file.
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            VIDEO_EXTENSIONS.iter().any(|v| *v == ext)
        })
        .unwrap_or(false)
}

/// List playable files under the videos directory, recursively, sorted by
/// name. Unreadable entries are skipped with a warning; a missing directory
/// yields an empty list rather than an error.
pub fn list_video_files(dir: &Path) -> Vec<MediaFile> {
    let mut files = Vec::new();
    collect(dir, &mut files);
    files.sort_by(|a, b| a.name.cmp(&b.name));
    files
}

fn collect(dir: &Path, out: &mut Vec<MediaFile>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            if dir.exists() {
                warn!("Failed to read media directory {:?}: {}", dir, e);
            }
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Failed to read media directory entry: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if path.is_dir() {
            collect(&path, out);
        } else if is_video_file(&path) {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            out.push(MediaFile {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: path.to_string_lossy().into_owned(),
                size,
            });
        }
    }
}

/// Resolve a client-supplied file path against the videos directory. Absolute
/// paths are used as-is; relative paths are joined under the directory.
pub fn resolve_media_path(videos_dir: &Path, file_path: &str) -> PathBuf {
    let path = Path::new(file_path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        videos_dir.join(path)
    }
}
