// THEORY:
// The normalizer is the first stage to touch pixels. It guarantees two things
// to everything downstream: the file really is one of the supported formats,
// and neither side exceeds the configured maximum, which bounds upload size,
// latency and cost of the remote call.
//
// The original file is never modified. Oversized images are decoded, scaled
// with a Lanczos3 filter so the longer side equals the maximum, and written to
// the scratch directory as a `TransientFile`; images already within bounds are
// passed through by path without being re-encoded.

use crate::error::AnalysisError;
use crate::transient::{TransientFile, unique_name};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_MAX_DIMENSION: u32 = 1024;
pub const SUPPORTED_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "webp", "bmp"];
const JPEG_QUALITY: u8 = 85;

/// Maps a path's extension to the image format it promises.
///
/// Fails with `UnsupportedFormat` without touching the file.
pub fn ensure_supported_extension(path: &Path) -> Result<ImageFormat, AnalysisError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "png" => Ok(ImageFormat::Png),
        "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
        "webp" => Ok(ImageFormat::WebP),
        "bmp" => Ok(ImageFormat::Bmp),
        _ => Err(AnalysisError::UnsupportedFormat {
            path: path.to_path_buf(),
            found: if extension.is_empty() {
                "<none>".to_string()
            } else {
                extension
            },
        }),
    }
}

pub fn is_supported_format(format: ImageFormat) -> bool {
    matches!(
        format,
        ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP | ImageFormat::Bmp
    )
}

/// Size an image must be scaled to, or `None` if it already fits.
///
/// The longer side becomes `max_dimension`; the shorter side is rounded to the
/// nearest pixel and never drops below one.
pub fn target_dimensions(width: u32, height: u32, max_dimension: u32) -> Option<(u32, u32)> {
    if width <= max_dimension && height <= max_dimension {
        return None;
    }
    let (long, short) = if width >= height { (width, height) } else { (height, width) };
    let scaled = (f64::from(short) * f64::from(max_dimension) / f64::from(long)).round() as u32;
    let scaled = scaled.max(1);
    if width >= height {
        Some((max_dimension, scaled))
    } else {
        Some((scaled, max_dimension))
    }
}

/// The image that continues down the pipeline.
#[derive(Debug)]
pub enum NormalizedImage {
    /// Already within bounds; the caller's file is used as is.
    PassThrough {
        path: PathBuf,
        format: ImageFormat,
        dimensions: (u32, u32),
    },
    /// A downscaled copy owned by this value and removed when it is dropped.
    Resized {
        artifact: TransientFile,
        format: ImageFormat,
        original: (u32, u32),
        dimensions: (u32, u32),
    },
}

impl NormalizedImage {
    pub fn path(&self) -> &Path {
        match self {
            NormalizedImage::PassThrough { path, .. } => path,
            NormalizedImage::Resized { artifact, .. } => artifact.path(),
        }
    }

    pub fn format(&self) -> ImageFormat {
        match self {
            NormalizedImage::PassThrough { format, .. } | NormalizedImage::Resized { format, .. } => {
                *format
            }
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            NormalizedImage::PassThrough { dimensions, .. }
            | NormalizedImage::Resized { dimensions, .. } => *dimensions,
        }
    }

    pub fn is_resized(&self) -> bool {
        matches!(self, NormalizedImage::Resized { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    max_dimension: u32,
    scratch_dir: PathBuf,
}

impl Normalizer {
    pub fn new(max_dimension: u32, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// Validates and, if needed, downsamples the image at `path`.
    ///
    /// Blocking: decodes and encodes on the calling thread.
    pub fn normalize(&self, path: &Path) -> Result<NormalizedImage, AnalysisError> {
        let declared = ensure_supported_extension(path)?;
        let read_error = |source: image::ImageError| AnalysisError::ImageRead {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = ImageReader::open(path)
            .and_then(ImageReader::with_guessed_format)
            .map_err(|e| read_error(e.into()))?;
        let format = match reader.format() {
            Some(detected) if is_supported_format(detected) => detected,
            Some(detected) => {
                return Err(AnalysisError::UnsupportedFormat {
                    path: path.to_path_buf(),
                    found: detected.extensions_str().first().copied().unwrap_or("unknown").to_string(),
                });
            }
            None => {
                reader.set_format(declared);
                declared
            }
        };
        let image = reader.decode().map_err(read_error)?;
        let (width, height) = (image.width(), image.height());

        let Some((new_width, new_height)) = target_dimensions(width, height, self.max_dimension)
        else {
            debug!(path = %path.display(), width, height, "image within bounds; passing through");
            return Ok(NormalizedImage::PassThrough {
                path: path.to_path_buf(),
                format,
                dimensions: (width, height),
            });
        };

        std::fs::create_dir_all(&self.scratch_dir).map_err(|e| {
            AnalysisError::io(
                format!("failed to create scratch directory {}", self.scratch_dir.display()),
                e,
            )
        })?;
        let base_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let output = self
            .scratch_dir
            .join(unique_name(&format!("resized_{base_name}")));
        let artifact = TransientFile::adopt(&output);

        let resized = image.resize_exact(new_width, new_height, FilterType::Lanczos3);
        encode(&resized, format, &output).map_err(|source| AnalysisError::ImageWrite {
            path: output.clone(),
            source,
        })?;
        debug!(
            path = %path.display(),
            from = ?(width, height),
            to = ?(new_width, new_height),
            "downscaled oversized image"
        );

        Ok(NormalizedImage::Resized {
            artifact,
            format,
            original: (width, height),
            dimensions: (new_width, new_height),
        })
    }
}

fn encode(image: &DynamicImage, format: ImageFormat, path: &Path) -> image::ImageResult<()> {
    match format {
        ImageFormat::Jpeg => {
            let mut writer = BufWriter::new(File::create(path)?);
            DynamicImage::ImageRgb8(image.to_rgb8())
                .write_with_encoder(JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY))?;
            writer.flush()?;
            Ok(())
        }
        other => image.save_with_format(path, other),
    }
}
