use aging_vision::AnalysisError;
use aging_vision::normalizer::{DEFAULT_MAX_DIMENSION, NormalizedImage, Normalizer};
use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn gradient(path: &Path, width: u32, height: u32) {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    img.save(path).expect("write fixture image");
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.map(|e| e.expect("dir entry").path()).collect(),
        Err(_) => Vec::new(),
    }
}

#[test]
fn oversized_jpeg_is_downscaled_preserving_aspect() {
    let src = tempdir().expect("tempdir");
    let scratch = tempdir().expect("tempdir");
    let input = src.path().join("facade.jpg");
    gradient(&input, 2048, 1536);

    let normalizer = Normalizer::new(DEFAULT_MAX_DIMENSION, scratch.path());
    let normalized = normalizer.normalize(&input).expect("normalize");
    assert!(normalized.is_resized());
    assert_eq!(normalized.dimensions(), (1024, 768));
    assert_eq!(normalized.format(), ImageFormat::Jpeg);

    let written = image::open(normalized.path()).expect("decode resized copy");
    assert_eq!((written.width(), written.height()), (1024, 768));
    assert!(normalized.path().starts_with(scratch.path()));

    let resized_path = normalized.path().to_path_buf();
    drop(normalized);
    assert!(!resized_path.exists());
    assert!(files_in(scratch.path()).is_empty());
    assert!(input.exists(), "the source image is never removed");
}

#[test]
fn portrait_images_are_bounded_on_height() {
    let src = tempdir().expect("tempdir");
    let scratch = tempdir().expect("tempdir");
    let input = src.path().join("column.png");
    gradient(&input, 900, 1800);

    let normalized = Normalizer::new(1024, scratch.path())
        .normalize(&input)
        .expect("normalize");
    assert_eq!(normalized.dimensions(), (512, 1024));
    assert_eq!(normalized.format(), ImageFormat::Png);
}

#[test]
fn small_images_pass_through_untouched() {
    let src = tempdir().expect("tempdir");
    let scratch = tempdir().expect("tempdir");
    let input = src.path().join("window.png");
    gradient(&input, 1024, 600);

    let normalized = Normalizer::new(1024, scratch.path())
        .normalize(&input)
        .expect("normalize");
    match &normalized {
        NormalizedImage::PassThrough { path, dimensions, .. } => {
            assert_eq!(path, &input);
            assert_eq!(*dimensions, (1024, 600));
        }
        other => panic!("expected pass-through, got {other:?}"),
    }
    drop(normalized);
    assert!(input.exists());
    assert!(files_in(scratch.path()).is_empty());
}

#[test]
fn gif_extension_is_rejected_without_reading_the_file() {
    let scratch = tempdir().expect("tempdir");
    let err = Normalizer::new(1024, scratch.path())
        .normalize(Path::new("/does/not/exist/bad.gif"))
        .expect_err("gif must be rejected");
    assert!(matches!(err, AnalysisError::UnsupportedFormat { ref found, .. } if found == "gif"));
}

#[test]
fn gif_content_behind_a_png_name_is_rejected() {
    let src = tempdir().expect("tempdir");
    let scratch = tempdir().expect("tempdir");
    let input = src.path().join("disguised.png");
    let mut bytes = b"GIF89a".to_vec();
    bytes.extend_from_slice(&[0u8; 32]);
    std::fs::write(&input, bytes).expect("write fixture");

    let err = Normalizer::new(1024, scratch.path())
        .normalize(&input)
        .expect_err("gif content must be rejected");
    assert_eq!(err.code(), "UnsupportedFormat");
    assert!(files_in(scratch.path()).is_empty());
}

#[test]
fn undecodable_bytes_are_an_image_read_error() {
    let src = tempdir().expect("tempdir");
    let scratch = tempdir().expect("tempdir");
    let input = src.path().join("broken.jpg");
    std::fs::write(&input, b"this is not a photograph").expect("write fixture");

    let err = Normalizer::new(1024, scratch.path())
        .normalize(&input)
        .expect_err("garbage must not decode");
    assert!(matches!(err, AnalysisError::ImageRead { .. }));
    assert_eq!(err.stage().to_string(), "normalization");
}
