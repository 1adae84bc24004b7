//! Poster image rendering.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use std::path::Path;
use tracing::warn;

use crate::error::MediaResult;
use vpipe_models::encoding::{IMAGE_JPEG_QUALITY, THUMBNAIL_SMALL_HEIGHT, THUMBNAIL_SMALL_WIDTH};

/// Fill colour of the fallback poster.
const BLANK_COLOR: Rgb<u8> = Rgb([16, 16, 16]);

/// Encoded small and large posters.
///
/// Always produced as a pair.
#[derive(Debug, Clone)]
pub struct Thumbnails {
    pub small: Vec<u8>,
    pub large: Vec<u8>,
    /// True when the fallback image was used
    pub is_fallback: bool,
}

/// Solid placeholder at the small poster size.
pub fn blank_image() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(
        THUMBNAIL_SMALL_WIDTH,
        THUMBNAIL_SMALL_HEIGHT,
        BLANK_COLOR,
    ))
}

/// Render posters from the selected frame, or from the blank image when no
/// frame was selected or it cannot be decoded.
pub fn render_thumbnails(frame: Option<&Path>) -> MediaResult<Thumbnails> {
    let (source, is_fallback) = match frame.map(image::open) {
        Some(Ok(img)) => (img, false),
        Some(Err(e)) => {
            warn!("selected frame unreadable, using blank poster: {}", e);
            (blank_image(), true)
        }
        None => (blank_image(), true),
    };

    render_from_image(&source, is_fallback)
}

fn render_from_image(source: &DynamicImage, is_fallback: bool) -> MediaResult<Thumbnails> {
    let small = source.resize_to_fill(
        THUMBNAIL_SMALL_WIDTH,
        THUMBNAIL_SMALL_HEIGHT,
        FilterType::Lanczos3,
    );

    // Encode both before returning so a failure publishes neither.
    let small = encode_jpeg(&small)?;
    let large = encode_jpeg(source)?;

    Ok(Thumbnails {
        small,
        large,
        is_fallback,
    })
}

/// Encode as baseline JPEG at the poster quality.
pub fn encode_jpeg(img: &DynamicImage) -> MediaResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, IMAGE_JPEG_QUALITY);
    encoder.encode_image(&img.to_rgb8())?;
    Ok(out)
}
