//! Resize a staged image into a JPEG thumbnail.

use std::{
    io::{BufWriter, Write},
    num::NonZeroU32,
    path::{Path, PathBuf},
};

use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, ColorType};

use crate::{
    primitive::{tracing::instrument, PipelineError, Result},
    sniff::ImageKind,
    staging::TRANSFORM_MARKER,
};

/// Quality of every thumbnail written
pub const JPEG_QUALITY: u8 = 70;

/// MIME type of every thumbnail written
pub const OUTPUT_MIME_TYPE: &str = "image/jpeg";

/// Largest thumbnail, in pixels, that is ever produced (4096x4096). The
/// resampler's scratch buffers grow with the output, so anything larger is
/// refused before they are allocated.
pub const MAX_OUTPUT_PIXELS: u64 = 4096 * 4096;

/// Where the thumbnail of `source` is written: same directory, file name
/// prefixed with [`TRANSFORM_MARKER`].
pub fn transformed_path(source: &Path) -> Result<PathBuf> {
    let name = source.file_name().ok_or_else(|| {
        PipelineError::LocalIo(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("staged path {source:?} has no file name"),
        ))
    })?;
    let mut marked = std::ffi::OsString::from(TRANSFORM_MARKER);
    marked.push(name);
    Ok(source.with_file_name(marked))
}

/// Output size for a source of `src_w`x`src_h` scaled to `width`.
///
/// The height follows the source aspect ratio, rounded to the nearest
/// pixel and never below one. Upscaling is allowed.
pub fn target_dimensions(src_w: u32, src_h: u32, width: NonZeroU32) -> (u32, u32) {
    let width = width.get();
    let height = (src_h as f64 * width as f64 / src_w as f64).round();
    (width, (height as u32).max(1))
}

/// Refuse output dimensions above [`MAX_OUTPUT_PIXELS`].
fn check_budget(width: u32, height: u32) -> Result<()> {
    if width as u64 * height as u64 > MAX_OUTPUT_PIXELS {
        return Err(PipelineError::TooLarge {
            width,
            height,
            budget: MAX_OUTPUT_PIXELS,
        });
    }
    Ok(())
}

/// Resize the staged image at `source` to `width` and write it as a JPEG
/// next to it. Returns the path written.
///
/// A leftover file at the destination is removed first; failing to remove
/// it fails the run.
///
/// Decoding and encoding are CPU bound, so they run on a blocking thread.
#[instrument(err, level = "debug")]
pub async fn resize(
    source: &Path,
    kind: ImageKind,
    width: NonZeroU32,
) -> Result<PathBuf> {
    let dest = transformed_path(source)?;
    match tokio::fs::remove_file(&dest).await {
        Ok(()) => tracing::debug!("Removed leftover {dest:?}"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let (src, dst) = (source.to_path_buf(), dest.clone());
    let join = tokio::task::spawn_blocking(move || {
        resize_blocking(&src, kind, width, &dst)
    });
    let (w, h) = join.await.map_err(std::io::Error::from)??;
    tracing::debug!("Wrote {w}x{h} thumbnail to {dest:?}");
    Ok(dest)
}

/// Sync block of [`resize`].
fn resize_blocking(
    source: &Path,
    kind: ImageKind,
    width: NonZeroU32,
    dest: &Path,
) -> Result<(u32, u32)> {
    let mut reader = image::io::Reader::open(source)?;
    reader.set_format(kind.format());
    let img = reader.decode().map_err(PipelineError::Decode)?;

    let (w, h) = target_dimensions(img.width(), img.height(), width);
    check_budget(w, h)?;
    // JPEG has no alpha; it is dropped here.
    let thumb = img.resize_exact(w, h, FilterType::Lanczos3).to_rgb8();

    let mut out = BufWriter::new(std::fs::File::create(dest)?);
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode(thumb.as_raw(), w, h, ColorType::Rgb8)
        .map_err(PipelineError::Encode)?;
    out.flush()?;
    Ok((w, h))
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};

    use super::*;

    fn width(w: u32) -> NonZeroU32 {
        NonZeroU32::new(w).unwrap()
    }

    #[test]
    fn height_follows_aspect_ratio() {
        assert_eq!(target_dimensions(1000, 500, width(200)), (200, 100));
        assert_eq!(target_dimensions(1920, 1080, width(800)), (800, 450));
        // 500 * 100 / 333 = 150.15
        assert_eq!(target_dimensions(333, 500, width(100)), (100, 150));
        // 2 * 1 / 3 = 0.67 rounds up
        assert_eq!(target_dimensions(3, 2, width(1)), (1, 1));
    }

    #[test]
    fn height_never_collapses_to_zero() {
        assert_eq!(target_dimensions(1000, 1, width(10)), (10, 1));
    }

    #[test]
    fn upscaling_is_allowed() {
        assert_eq!(target_dimensions(100, 50, width(400)), (400, 200));
    }

    #[test]
    fn pixel_budget() {
        assert!(check_budget(4096, 4096).is_ok());
        assert!(check_budget(1, 1).is_ok());
        assert!(matches!(
            check_budget(4097, 4096),
            Err(PipelineError::TooLarge {
                width: 4097,
                height: 4096,
                ..
            })
        ));
        // A saturated height must not wrap around.
        assert!(check_budget(u32::MAX, u32::MAX).is_err());
    }

    #[test]
    fn marker_goes_on_the_file_name() {
        assert_eq!(
            transformed_path(Path::new("/stage/run/in/a/b.jpg")).unwrap(),
            PathBuf::from("/stage/run/in/a/tmp_prew_b.jpg")
        );
        assert!(transformed_path(Path::new("/")).is_err());
    }

    fn write_image(path: &Path, img: DynamicImage, format: ImageOutputFormat) {
        let mut file = std::fs::File::create(path).unwrap();
        img.write_to(&mut file, format).unwrap();
    }

    #[tokio::test]
    async fn jpeg_is_resized_and_reencoded() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("b.jpg");
        write_image(
            &source,
            DynamicImage::new_rgb8(1000, 500),
            ImageOutputFormat::Jpeg(90),
        );

        let dest = resize(&source, ImageKind::Jpeg, width(200)).await.unwrap();
        assert_eq!(dest, dir.path().join("tmp_prew_b.jpg"));

        let bytes = std::fs::read(&dest).unwrap();
        assert_eq!(&bytes[..3], &[0xFF, 0xD8, 0xFF]);
        let thumb = image::load_from_memory(&bytes).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (200, 100));
        // The source is left alone.
        assert!(source.is_file());
    }

    #[tokio::test]
    async fn png_with_alpha_becomes_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("logo.png");
        let img = RgbaImage::from_pixel(300, 600, Rgba([10, 200, 30, 128]));
        write_image(&source, DynamicImage::ImageRgba8(img), ImageOutputFormat::Png);

        let dest = resize(&source, ImageKind::Png, width(50)).await.unwrap();
        let bytes = std::fs::read(&dest).unwrap();
        assert_eq!(
            image::guess_format(&bytes).unwrap(),
            image::ImageFormat::Jpeg
        );
        let thumb = image::load_from_memory(&bytes).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (50, 100));
    }

    #[tokio::test]
    async fn leftover_output_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("b.png");
        write_image(&source, DynamicImage::new_rgb8(40, 20), ImageOutputFormat::Png);
        std::fs::write(dir.path().join("tmp_prew_b.png"), b"stale").unwrap();

        let dest = resize(&source, ImageKind::Png, width(20)).await.unwrap();
        let thumb = image::open(&dest).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (20, 10));
    }

    #[tokio::test]
    async fn unremovable_leftover_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("b.png");
        write_image(&source, DynamicImage::new_rgb8(40, 20), ImageOutputFormat::Png);
        // A non-empty directory cannot be removed as a file.
        let blocker = dir.path().join("tmp_prew_b.png");
        std::fs::create_dir(&blocker).unwrap();
        std::fs::write(blocker.join("inner"), b"x").unwrap();

        let err = resize(&source, ImageKind::Png, width(20)).await.unwrap_err();
        assert!(matches!(err, PipelineError::LocalIo(_)), "{err:?}");
    }

    #[tokio::test]
    async fn oversized_output_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("dot.png");
        write_image(&source, DynamicImage::new_rgb8(2, 1), ImageOutputFormat::Png);

        let err = resize(&source, ImageKind::Png, width(200_000))
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                PipelineError::TooLarge {
                    width: 200_000,
                    height: 100_000,
                    ..
                }
            ),
            "{err:?}"
        );
        assert!(!dir.path().join("tmp_prew_dot.png").exists());
    }

    #[tokio::test]
    async fn corrupt_image_is_a_decode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.jpg");
        // Passes sniffing, but there is no image behind the signature.
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
        bytes.extend_from_slice(&[0x13; 64]);
        std::fs::write(&source, bytes).unwrap();

        let err = resize(&source, ImageKind::Jpeg, width(20)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)), "{err:?}");
    }
}
