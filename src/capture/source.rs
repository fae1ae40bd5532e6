//! Frame sources.
//!
//! A [`FrameSource`] yields the current live frame on demand. Sampling never
//! queues: a source hands back whatever frame is current at the time of the
//! call, or `None` if it has nothing yet.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{ImageFormat, Rgb, RgbImage};

use crate::datauri;

/// Message shown when a still is not PNG, JPEG or GIF.
pub const INVALID_FILE_TYPE: &str = "Invalid file type. Please upload a PNG, JPEG, or GIF image.";

/// Live frame provider used by the capture loop.
pub trait FrameSource: Send + std::fmt::Debug {
    /// Sample the current frame.
    fn capture(&mut self) -> Result<Option<RgbImage>>;

    /// Release the underlying device or process. Idempotent.
    fn release(&mut self);
}

/// A still rejected because of its file type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedImageType(pub String);

impl std::fmt::Display for UnsupportedImageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{INVALID_FILE_TYPE} ({})", self.0)
    }
}

impl std::error::Error for UnsupportedImageType {}

/// Map a sniffed format to the MIME types accepted for stills.
fn accepted_mime(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Gif => Some("image/gif"),
        _ => None,
    }
}

/// Encode raw still bytes as a data URI after checking the type.
///
/// # Errors
///
/// Fails with [`UnsupportedImageType`] unless the bytes are PNG, JPEG or GIF.
pub fn encode_still(bytes: &[u8]) -> Result<String> {
    let mime = image::guess_format(bytes)
        .ok()
        .and_then(accepted_mime)
        .ok_or_else(|| UnsupportedImageType("unrecognised image data".to_string()))?;
    Ok(datauri::encode(mime, bytes))
}

/// Read a still image file into the data URI used by job requests.
///
/// # Errors
///
/// Fails if the file cannot be read or is not PNG, JPEG or GIF.
pub fn load_still(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    encode_still(&bytes).with_context(|| format!("Rejected {}", path.display()))
}

/// Synthetic moving gradient for running without a camera.
#[derive(Debug)]
pub struct TestPatternSource {
    width: u32,
    height: u32,
    tick: u32,
    released: bool,
}

impl TestPatternSource {
    /// Pattern of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            tick: 0,
            released: false,
        }
    }
}

impl FrameSource for TestPatternSource {
    fn capture(&mut self) -> Result<Option<RgbImage>> {
        if self.released {
            return Ok(None);
        }
        let offset = self.tick;
        self.tick = self.tick.wrapping_add(4);
        let (w, h) = (self.width, self.height);
        Ok(Some(RgbImage::from_fn(w, h, |x, y| {
            let r = (x.wrapping_add(offset) % w * 255 / w) as u8;
            let g = (y * 255 / h) as u8;
            let b = (((x + y) / 8 + offset / 4) % 2 * 255) as u8;
            Rgb([r, g, b])
        })))
    }

    fn release(&mut self) {
        self.released = true;
    }
}

/// Cycles through still image files, one per sample.
#[derive(Debug)]
pub struct ImageLoopSource {
    frames: Vec<RgbImage>,
    next: usize,
    released: bool,
}

impl ImageLoopSource {
    /// Load every file in `paths`.
    ///
    /// # Errors
    ///
    /// Fails if no paths are given or any file cannot be decoded.
    pub fn from_paths(paths: &[PathBuf]) -> Result<Self> {
        anyhow::ensure!(!paths.is_empty(), "no frame images given");
        let frames = paths
            .iter()
            .map(|path| {
                image::open(path)
                    .map(|img| img.to_rgb8())
                    .with_context(|| format!("Failed to decode {}", path.display()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_frames(frames))
    }

    /// Load every PNG/JPEG/GIF file in `dir`, sorted by name.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be read or holds no images.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                ImageFormat::from_path(path)
                    .ok()
                    .and_then(accepted_mime)
                    .is_some()
            })
            .collect();
        paths.sort();
        Self::from_paths(&paths)
    }

    /// Wrap already-decoded frames.
    pub fn from_frames(frames: Vec<RgbImage>) -> Self {
        Self {
            frames,
            next: 0,
            released: false,
        }
    }
}

impl FrameSource for ImageLoopSource {
    fn capture(&mut self) -> Result<Option<RgbImage>> {
        if self.released || self.frames.is_empty() {
            return Ok(None);
        }
        let frame = self.frames[self.next % self.frames.len()].clone();
        self.next = (self.next + 1) % self.frames.len();
        Ok(Some(frame))
    }

    fn release(&mut self) {
        self.released = true;
        self.frames.clear();
    }
}
