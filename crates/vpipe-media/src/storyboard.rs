//! Storyboard sprite composition.

use image::{imageops, GenericImageView, RgbImage};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{MediaError, MediaResult};
use crate::thumbnail::encode_jpeg;
use vpipe_models::encoding::STORYBOARD_MAX_SPRITE_HEIGHT;
use vpipe_models::Storyboard;

/// Encoded sprite plus its manifest.
#[derive(Debug, Clone)]
pub struct StoryboardSprite {
    pub image: Vec<u8>,
    pub manifest: Storyboard,
}

/// Stack sampled frames top to bottom into one JPEG sprite.
///
/// `frames` were sampled one every `interval_secs`. Tile size comes from the
/// first frame; every frame must decode, otherwise the manifest would not line
/// up with the sampled sequence. When the stack would exceed the JPEG height
/// limit, every n-th frame is kept and the manifest interval widens to match.
pub fn compose_storyboard(
    video: &Path,
    frames: &[PathBuf],
    interval_secs: u32,
) -> MediaResult<StoryboardSprite> {
    let Some(first) = frames.first() else {
        return Err(MediaError::NoFrames(video.to_path_buf()));
    };

    let (tile_width, tile_height) = image::open(first)?.dimensions();
    if tile_width == 0 || tile_height == 0 {
        return Err(MediaError::invalid_video("storyboard tile has zero size"));
    }
    if tile_height > STORYBOARD_MAX_SPRITE_HEIGHT {
        return Err(MediaError::invalid_video("storyboard tile taller than a sprite"));
    }

    let max_tiles = (STORYBOARD_MAX_SPRITE_HEIGHT / tile_height) as usize;
    let stride = frames.len().div_ceil(max_tiles).max(1);
    let frames: Vec<&PathBuf> = frames.iter().step_by(stride).collect();
    if stride > 1 {
        debug!(
            video = %video.display(),
            stride,
            tiles = frames.len(),
            "thinned storyboard to fit sprite height"
        );
    }

    let mut sprite = RgbImage::new(tile_width, tile_height * frames.len() as u32);
    for (i, path) in frames.iter().enumerate() {
        let mut tile = image::open(path)?.to_rgb8();
        if tile.dimensions() != (tile_width, tile_height) {
            tile = imageops::resize(&tile, tile_width, tile_height, imageops::FilterType::Triangle);
        }
        imageops::replace(&mut sprite, &tile, 0, i as i64 * tile_height as i64);
    }

    let manifest = Storyboard::vertical(
        tile_width,
        tile_height,
        frames.len(),
        interval_secs.max(1) as f64 * stride as f64,
    );
    let image = encode_jpeg(&image::DynamicImage::ImageRgb8(sprite))?;

    Ok(StoryboardSprite { image, manifest })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb};

    fn write_tile(dir: &Path, name: &str, w: u32, h: u32, v: u8) -> PathBuf {
        let path = dir.join(name);
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([v, v, v])))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_compose_vertical_sprite() {
        let dir = tempfile::tempdir().unwrap();
        let frames: Vec<_> = (0..3)
            .map(|i| write_tile(dir.path(), &format!("storyboard-{i:05}.png"), 160, 90, i * 80))
            .collect();

        let sprite = compose_storyboard(Path::new("v.mp4"), &frames, 1).unwrap();
        assert_eq!(sprite.manifest.tiles.len(), 3);
        assert_eq!(sprite.manifest.tile_width, 160);
        assert_eq!(sprite.manifest.tile_height, 90);
        assert_eq!(sprite.manifest.tiles[2].y, 180);
        assert_eq!(sprite.manifest.tiles[2].start_time_secs, 2.0);

        let decoded = image::load_from_memory(&sprite.image).unwrap();
        assert_eq!(decoded.dimensions(), (160, 270));
    }

    #[test]
    fn test_thirteen_minute_storyboard_fits_one_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let tile = write_tile(dir.path(), "tile.png", 160, 90, 120);
        let frames = vec![tile; 780];

        let sprite = compose_storyboard(Path::new("v.mp4"), &frames, 1).unwrap();
        assert_eq!(sprite.manifest.tiles.len(), 390);
        assert_eq!(sprite.manifest.tiles[1].start_time_secs, 2.0);
        assert_eq!(sprite.manifest.tiles[389].y, 389 * 90);

        let decoded = image::load_from_memory(&sprite.image).unwrap();
        assert_eq!(decoded.dimensions(), (160, 390 * 90));
        assert!(decoded.height() <= u16::MAX as u32);
    }

    #[test]
    fn test_widened_interval_reaches_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let tile = write_tile(dir.path(), "tile.png", 160, 90, 40);

        let sprite = compose_storyboard(Path::new("v.mp4"), &[tile.clone(), tile], 4).unwrap();
        assert_eq!(sprite.manifest.tiles[1].start_time_secs, 4.0);
    }

    #[test]
    fn test_zero_frames_fails() {
        let err = compose_storyboard(Path::new("v.mp4"), &[], 1).unwrap_err();
        assert!(matches!(err, MediaError::NoFrames(_)));
    }
}
