use crate::annotation::persistence::sidecar_path;
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoEntry {
    pub path: PathBuf,
    pub sidecar: PathBuf,
    pub annotated: bool,
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| VIDEO_EXTENSIONS.contains(&s.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Every video under `root`, sorted by path, with whether its CSV sidecar exists.
pub fn list_videos(root: &Path) -> Vec<VideoEntry> {
    let mut entries: Vec<VideoEntry> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| is_video(e.path()))
        .map(|e| {
            let path = e.path().to_path_buf();
            let sidecar = sidecar_path(&path);
            let annotated = sidecar.exists();
            VideoEntry {
                path,
                sidecar,
                annotated,
            }
        })
        .collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    entries
}

/// The first video after `current` (in path order) that has no sidecar yet.
pub fn next_unannotated(root: &Path, current: Option<&Path>) -> Option<VideoEntry> {
    list_videos(root)
        .into_iter()
        .filter(|e| current.map(|c| e.path.as_path() > c).unwrap_or(true))
        .find(|e| !e.annotated)
}
