//! Poster candidate scoring by perceptual luminance.

use image::{DynamicImage, GenericImageView};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The winning poster candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct BrightestFrame {
    /// Position in the sampled sequence
    pub index: usize,
    pub path: PathBuf,
    /// Mean luma in 0..=255
    pub luma: f64,
}

/// Mean of `0.299R + 0.587G + 0.114B` over every pixel.
pub fn mean_luma(img: &DynamicImage) -> f64 {
    let (width, height) = img.dimensions();
    let pixels = width as u64 * height as u64;
    if pixels == 0 {
        return 0.0;
    }

    let rgb = img.to_rgb8();
    let total: f64 = rgb
        .pixels()
        .map(|p| 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64)
        .sum();

    total / pixels as f64
}

/// Score one frame file. Unreadable frames score `None`.
pub fn score_frame(path: &Path) -> Option<f64> {
    match image::open(path) {
        Ok(img) => Some(mean_luma(&img)),
        Err(e) => {
            warn!(frame = %path.display(), "failed to decode frame: {}", e);
            None
        }
    }
}

/// Pick the frame with the highest mean luma.
///
/// Ties go to the earliest frame so the choice is stable across runs.
/// Returns `None` when there are no frames or none could be scored.
pub fn select_brightest(frames: &[PathBuf]) -> Option<BrightestFrame> {
    let mut best: Option<BrightestFrame> = None;

    for (index, path) in frames.iter().enumerate() {
        let Some(luma) = score_frame(path) else {
            continue;
        };
        if best.as_ref().map_or(true, |b| luma > b.luma) {
            best = Some(BrightestFrame {
                index,
                path: path.clone(),
                luma,
            });
        }
    }

    if let Some(b) = &best {
        debug!(index = b.index, luma = b.luma, "selected poster frame");
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(r: u8, g: u8, b: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 4, Rgb([r, g, b])))
    }

    fn write_frame(dir: &Path, name: &str, img: &DynamicImage) -> PathBuf {
        let path = dir.join(name);
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_mean_luma_weights() {
        assert!((mean_luma(&solid(255, 255, 255)) - 255.0).abs() < 1e-6);
        assert!((mean_luma(&solid(0, 0, 0))).abs() < 1e-6);
        assert!((mean_luma(&solid(255, 0, 0)) - 0.299 * 255.0).abs() < 1e-6);
        assert!((mean_luma(&solid(0, 255, 0)) - 0.587 * 255.0).abs() < 1e-6);
        assert!((mean_luma(&solid(0, 0, 255)) - 0.114 * 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_select_brightest() {
        let dir = tempfile::tempdir().unwrap();
        let frames = vec![
            write_frame(dir.path(), "a.png", &solid(10, 10, 10)),
            write_frame(dir.path(), "b.png", &solid(200, 200, 200)),
            write_frame(dir.path(), "c.png", &solid(0, 0, 255)),
        ];

        let best = select_brightest(&frames).unwrap();
        assert_eq!(best.index, 1);
        assert_eq!(best.path, frames[1]);
    }

    #[test]
    fn test_ties_and_determinism() {
        let dir = tempfile::tempdir().unwrap();
        let frames = vec![
            write_frame(dir.path(), "a.png", &solid(50, 50, 50)),
            write_frame(dir.path(), "b.png", &solid(90, 90, 90)),
            write_frame(dir.path(), "c.png", &solid(90, 90, 90)),
        ];

        let first = select_brightest(&frames).unwrap();
        for _ in 0..3 {
            assert_eq!(select_brightest(&frames).unwrap().index, first.index);
        }
        assert_eq!(first.index, 1);
    }

    #[test]
    fn test_unscorable_frames_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.png");
        std::fs::write(&broken, b"not an image").unwrap();
        let good = write_frame(dir.path(), "good.png", &solid(1, 1, 1));

        let best = select_brightest(&[broken.clone(), good]).unwrap();
        assert_eq!(best.index, 1);

        assert!(select_brightest(&[broken]).is_none());
        assert!(select_brightest(&[]).is_none());
    }
}
