use super::store::AnnotationStore;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Loads and saves an annotation store for one video.
pub trait AnnotationPersistence {
    /// Returns an empty store when nothing has been saved yet.
    fn load(&self, behaviors: &[String], total_frames: usize) -> Result<AnnotationStore>;
    fn save(&self, store: &AnnotationStore, behaviors: &[String], total_frames: usize) -> Result<()>;
}

/// `<dir>/<stem>.csv` next to the video.
pub fn sidecar_path(video: &Path) -> PathBuf {
    video.with_extension("csv")
}

/// CSV file with a `Frames` column of 1-based frame numbers followed by one
/// 0/1 column per behavior.
pub struct CsvSidecar {
    path: PathBuf,
}

impl CsvSidecar {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_video(video: &Path) -> Self {
        Self::new(sidecar_path(video))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Behavior columns present in the file header.
    pub fn header_behaviors(&self) -> Result<Vec<String>> {
        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("Failed to open {:?}", self.path))?;
        let headers = reader.headers()?;
        Ok(headers.iter().skip(1).map(str::to_string).collect())
    }
}

impl AnnotationPersistence for CsvSidecar {
    fn load(&self, behaviors: &[String], total_frames: usize) -> Result<AnnotationStore> {
        let mut store = AnnotationStore::new(total_frames);
        if !self.path.exists() {
            return Ok(store);
        }

        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("Failed to open {:?}", self.path))?;
        let headers = reader.headers()?.clone();
        if headers.get(0) != Some("Frames") {
            anyhow::bail!("{:?}: first column must be 'Frames'", self.path);
        }

        // Columns outside the configured list are ignored.
        let columns: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, name)| behaviors.iter().any(|b| b == name))
            .map(|(i, name)| (i, name.to_string()))
            .collect();
        let ignored = headers.len().saturating_sub(1) - columns.len();
        if ignored > 0 {
            tracing::warn!("{:?}: ignoring {} unknown behavior column(s)", self.path, ignored);
        }

        for (row, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("{:?}: bad row {}", self.path, row + 2))?;
            let frame_number: usize = record
                .get(0)
                .unwrap_or_default()
                .trim()
                .parse()
                .with_context(|| format!("{:?}: bad frame number on row {}", self.path, row + 2))?;
            let Some(frame) = frame_number.checked_sub(1) else {
                continue;
            };

            let labels: BTreeSet<String> = columns
                .iter()
                .filter(|(i, _)| {
                    record
                        .get(*i)
                        .map(|v| v.trim() == "1")
                        .unwrap_or(false)
                })
                .map(|(_, name)| name.clone())
                .collect();
            store.set_labels(frame, labels);
        }

        tracing::info!(
            "Loaded {} labeled frames from {:?}",
            store.len(),
            self.path
        );
        Ok(store)
    }

    fn save(&self, store: &AnnotationStore, behaviors: &[String], total_frames: usize) -> Result<()> {
        let mut writer = csv::Writer::from_path(&self.path)
            .with_context(|| format!("Failed to create {:?}", self.path))?;

        let mut header = Vec::with_capacity(behaviors.len() + 1);
        header.push("Frames".to_string());
        header.extend(behaviors.iter().cloned());
        writer.write_record(&header)?;

        for frame in 0..total_frames {
            let labels = store.labels(frame);
            let mut row = Vec::with_capacity(behaviors.len() + 1);
            row.push((frame + 1).to_string());
            for b in behaviors {
                let on = labels.map(|set| set.contains(b)).unwrap_or(false);
                row.push(if on { "1" } else { "0" }.to_string());
            }
            writer.write_record(&row)?;
        }
        writer.flush()?;

        tracing::info!("Annotations saved to {:?}", self.path);
        Ok(())
    }
}
