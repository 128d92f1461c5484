use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use image::{GrayImage, ImageFormat, RgbImage};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use common::Result;

/// Maximum templates kept per outcome class.
pub const CORPUS_CAP: usize = 30;

/// Result of [`TemplateCorpus::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insert {
    Saved(PathBuf),
    /// An identical image is already stored.
    Duplicate,
}

/// Bounded, content-addressed directory of template PNGs for one class.
///
/// Files are named by the SHA-256 of their pixels, so saving the same ROI
/// twice is a no-op. When the directory grows past the cap the oldest files
/// by modification time are evicted. Writes go through a temp file and a
/// rename, so readers never see a partial PNG. Two concurrent saves of the
/// same image both rename onto the same name, which is harmless.
#[derive(Debug, Clone)]
pub struct TemplateCorpus {
    dir: PathBuf,
    cap: usize,
}

impl TemplateCorpus {
    pub fn new(dir: impl Into<PathBuf>, cap: usize) -> Self {
        Self {
            dir: dir.into(),
            cap: cap.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Hex SHA-256 over the image dimensions and raw RGB bytes.
    pub fn content_hash(image: &RgbImage) -> String {
        let mut hasher = Sha256::new();
        hasher.update(image.width().to_le_bytes());
        hasher.update(image.height().to_le_bytes());
        hasher.update(image.as_raw());
        hex::encode(hasher.finalize())
    }

    pub fn insert(&self, image: &RgbImage) -> Result<Insert> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.png", Self::content_hash(image)));
        if path.exists() {
            debug!(path = %path.display(), "Template already stored");
            return Ok(Insert::Duplicate);
        }

        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&png)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        info!(path = %path.display(), "Template saved");

        let evicted = self.evict()?;
        if evicted > 0 {
            info!(dir = %self.dir.display(), evicted, "Evicted oldest templates");
        }
        Ok(Insert::Saved(path))
    }

    /// All stored templates as grayscale. Unreadable files are skipped.
    pub fn load(&self) -> Result<Vec<GrayImage>> {
        let mut templates = Vec::new();
        for (path, _) in self.entries()? {
            match image::open(&path) {
                Ok(img) => templates.push(img.to_luma8()),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable template"),
            }
        }
        Ok(templates)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// PNG files, oldest first. A missing directory is an empty corpus.
    fn entries(&self) -> Result<Vec<(PathBuf, SystemTime)>> {
        let dir = match fs::read_dir(&self.dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for entry in dir {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("png") {
                continue;
            }
            // Another writer may have evicted it since read_dir.
            let Ok(meta) = entry.metadata() else { continue };
            if meta.is_file() {
                entries.push((path, meta.modified()?));
            }
        }
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(entries)
    }

    fn evict(&self) -> Result<usize> {
        let entries = self.entries()?;
        let excess = entries.len().saturating_sub(self.cap);
        for (path, _) in entries.iter().take(excess) {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(excess)
    }
}
