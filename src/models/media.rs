use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// File extensions recognized as HDR images (lowercase, without the dot).
pub const HDR_EXTENSIONS: &[&str] = &["exr", "hdr"];

/// Check a path against a list of recognized extensions, case-insensitively.
pub fn is_hdr_image(path: &Path, recognized: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let ext = ext.to_lowercase();
    recognized.iter().any(|r| r.eq_ignore_ascii_case(&ext))
}

/// Identity of a source image on disk.
///
/// The composite of path, modification time and byte size is the cache key,
/// so an overwritten or re-rendered file never reuses a stale thumbnail.
/// Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageFileRef {
    pub path: PathBuf,
    pub modified_at: DateTime<Utc>,
    pub file_size: u64,
}

impl ImageFileRef {
    /// Build a reference by stat-ing the file.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        let modified = metadata.modified()?;
        Ok(Self {
            path: path.to_path_buf(),
            modified_at: DateTime::<Utc>::from(modified),
            file_size: metadata.len(),
        })
    }

    /// Full-resolution source path, for the host integration to load.
    pub fn source_path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Channel layout of a decoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLayout {
    Gray,
    Rgb,
    Rgba,
}

impl ChannelLayout {
    pub fn count(self) -> usize {
        match self {
            ChannelLayout::Gray => 1,
            ChannelLayout::Rgb => 3,
            ChannelLayout::Rgba => 4,
        }
    }
}

/// Linear floating-point pixels straight out of the decoder, interleaved
/// according to the channel layout. Owned by the worker that decoded it and
/// dropped as soon as the thumbnail is generated; only the small preview is
/// ever retained.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub channels: ChannelLayout,
    pub pixels: Vec<f32>,
}

impl DecodedImage {
    /// Display string shown under each card, e.g. `"2048×1024 · 3ch"`.
    pub fn channel_summary(&self) -> String {
        format!(
            "{}×{} · {}ch",
            self.width,
            self.height,
            self.channels.count()
        )
    }
}

/// A small display-ready preview of one HDR image.
///
/// `pixels` is always a square RGBA bitmap of the configured target size;
/// sources that do not cover it are centered on a neutral background.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub pixels: RgbaImage,
    pub source_width: u32,
    pub source_height: u32,
    pub channel_summary: String,
}
