//! Rendering backend seam and its `image` crate implementation.

use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use tracing::info;

use crate::error::EngineError;
use crate::profile::constrain_dimensions;

/// A derivative file produced by the rendering backend.
#[derive(Debug, Clone)]
pub struct RenderedFile {
    pub path: PathBuf,
    pub mime_type: String,
    pub byte_size: u64,
}

/// Pixel-level backend that turns a source image into a derivative file.
pub trait ImageRenderer: Send + Sync {
    /// Produce a derivative of `source` for the given target box.
    ///
    /// Fit mode derives the output dimensions from the box with the same
    /// arithmetic the profile matcher uses, so a matched request always
    /// lands at the filename it asked for. Crop mode fills the box exactly.
    fn render(
        &self,
        source: &Path,
        target_w: u32,
        target_h: u32,
        crop: bool,
    ) -> Result<RenderedFile, EngineError>;
}

/// Backend over the `image` crate.
///
/// Writes `<stem>-<W>x<H>.<ext>` next to the source with the computed
/// dimensions, overwriting any previous output for that name.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResizeBackend;

impl ResizeBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ImageRenderer for ResizeBackend {
    fn render(
        &self,
        source: &Path,
        target_w: u32,
        target_h: u32,
        crop: bool,
    ) -> Result<RenderedFile, EngineError> {
        if crop && (target_w == 0 || target_h == 0) {
            return Err(EngineError::Internal(format!(
                "crop render with zero target: {target_w}x{target_h}"
            )));
        }

        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| EngineError::Internal(format!("Invalid source filename: {source:?}")))?;
        let ext = source
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| EngineError::Internal(format!("Source has no extension: {source:?}")))?;
        let format = image::ImageFormat::from_extension(ext).ok_or_else(|| {
            EngineError::Internal(format!("No image format for extension '{ext}'"))
        })?;

        let img = image::open(source).map_err(|e| EngineError::Render {
            path: source.to_path_buf(),
            source: e,
        })?;

        let (out_w, out_h) = if crop {
            (target_w, target_h)
        } else {
            constrain_dimensions(img.width(), img.height(), target_w, target_h)
        };

        let resized = if crop {
            img.resize_to_fill(out_w, out_h, FilterType::Lanczos3)
        } else {
            img.resize_exact(out_w, out_h, FilterType::Lanczos3)
        };

        let out_path = source.with_file_name(format!("{stem}-{out_w}x{out_h}.{ext}"));
        resized
            .save_with_format(&out_path, format)
            .map_err(|e| EngineError::Render {
                path: out_path.clone(),
                source: e,
            })?;

        let byte_size = fs::metadata(&out_path)
            .map_err(|e| EngineError::UploadsNotWritable {
                path: out_path.clone(),
                source: e,
            })?
            .len();

        info!(
            source = %source.display(),
            output = %out_path.display(),
            width = out_w,
            height = out_h,
            crop,
            "rendered derivative"
        );

        Ok(RenderedFile {
            path: out_path,
            mime_type: format.to_mime_type().to_string(),
            byte_size,
        })
    }
}

/// Pixel dimensions of an image file, from the header only.
pub fn read_dimensions(path: &Path) -> Result<(u32, u32), EngineError> {
    image::ImageReader::open(path)
        .map_err(|_| EngineError::SourceUnreadable {
            path: path.to_path_buf(),
        })?
        .into_dimensions()
        .map_err(|_| EngineError::SourceUnreadable {
            path: path.to_path_buf(),
        })
}

/// Sniff a file's image mime type from its content, not its extension.
pub fn detect_mime(path: &Path) -> Result<String, EngineError> {
    let reader = image::ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|_| EngineError::SourceUnreadable {
            path: path.to_path_buf(),
        })?;

    match reader.format() {
        Some(format) => Ok(format.to_mime_type().to_string()),
        None => Err(EngineError::SourceUnreadable {
            path: path.to_path_buf(),
        }),
    }
}
