//! Frame sampling for posters and storyboards.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use vpipe_models::encoding::{
    POSTER_MAX_SAMPLES, POSTER_SAMPLE_INTERVAL_SECS, POSTER_SAMPLE_WINDOW_SECS,
    STORYBOARD_INTERVAL_SECS, STORYBOARD_MAX_TILES, STORYBOARD_TILE_HEIGHT,
};

/// How frames are sampled from a video.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSampling {
    /// File name prefix inside the output directory
    pub prefix: &'static str,
    /// One frame every N seconds
    pub interval_secs: u32,
    /// Only read this much of the input
    pub window_secs: Option<u32>,
    /// Hard cap on the number of frames
    pub max_frames: Option<u32>,
    /// Output tile height, width follows the aspect ratio
    pub scale_height: Option<u32>,
}

impl FrameSampling {
    /// Poster candidates: sparse samples from the first minute.
    pub fn poster() -> Self {
        Self {
            prefix: "poster",
            interval_secs: POSTER_SAMPLE_INTERVAL_SECS,
            window_secs: Some(POSTER_SAMPLE_WINDOW_SECS),
            max_frames: Some(POSTER_MAX_SAMPLES),
            scale_height: None,
        }
    }

    /// Storyboard tiles: small and aspect-preserving, one per second until
    /// the sprite would outgrow a JPEG, then spread evenly over `duration_secs`.
    pub fn storyboard(duration_secs: Option<f64>) -> Self {
        Self {
            prefix: "storyboard",
            interval_secs: storyboard_interval(duration_secs),
            window_secs: None,
            max_frames: Some(STORYBOARD_MAX_TILES),
            scale_height: Some(STORYBOARD_TILE_HEIGHT),
        }
    }

    /// The ffmpeg `-vf` chain for this sampling.
    pub fn filter(&self) -> String {
        let mut filter = format!("fps=1/{}", self.interval_secs);
        if let Some(height) = self.scale_height {
            filter.push_str(&format!(",scale=-2:{height}"));
        }
        filter
    }

    fn build_command(&self, video: &Path, out_dir: &Path) -> FfmpegCommand {
        let pattern = out_dir.join(format!("{}-%05d.png", self.prefix));
        let mut cmd = FfmpegCommand::new(video, pattern);
        if let Some(window) = self.window_secs {
            cmd = cmd.duration(window as f64);
        }
        cmd = cmd.video_filter(self.filter()).no_audio();
        if let Some(max) = self.max_frames {
            cmd = cmd.max_frames(max);
        }
        cmd
    }
}

/// Sample frames as PNG files into `out_dir`, returned in playback order.
///
/// Zero frames is not an error here; callers decide what an empty sample means.
pub async fn extract_frames(
    video: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
    sampling: &FrameSampling,
) -> MediaResult<Vec<PathBuf>> {
    let video = video.as_ref();
    let out_dir = out_dir.as_ref();

    tokio::fs::create_dir_all(out_dir).await?;

    let cmd = sampling.build_command(video, out_dir);
    FfmpegRunner::new().run(&cmd).await?;

    let frames = list_frames(out_dir, sampling.prefix).await?;
    debug!(
        video = %video.display(),
        frames = frames.len(),
        prefix = sampling.prefix,
        "extracted frames"
    );
    Ok(frames)
}

fn storyboard_interval(duration_secs: Option<f64>) -> u32 {
    match duration_secs {
        Some(d) if d.is_finite() && d > 0.0 => {
            let needed = (d / STORYBOARD_MAX_TILES as f64).ceil() as u32;
            needed.max(STORYBOARD_INTERVAL_SECS)
        }
        _ => STORYBOARD_INTERVAL_SECS,
    }
}

async fn list_frames(dir: &Path, prefix: &str) -> MediaResult<Vec<PathBuf>> {
    let mut frames = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(prefix) && name.ends_with(".png") {
            frames.push(entry.path());
        }
    }
    // Zero-padded sequence numbers sort lexically in playback order.
    frames.sort();
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poster_sampling_command() {
        let args = FrameSampling::poster()
            .build_command(Path::new("in.mp4"), Path::new("/w"))
            .build_args();

        assert!(args.contains(&"fps=1/6".to_string()));
        assert!(args.contains(&"60.000".to_string()));
        let pos = args.iter().position(|a| a == "-frames:v").unwrap();
        assert_eq!(args[pos + 1], "10");
        assert_eq!(args.last().unwrap(), "/w/poster-%05d.png");
    }

    #[test]
    fn test_storyboard_filter() {
        let sampling = FrameSampling::storyboard(Some(42.0));
        assert_eq!(sampling.filter(), "fps=1/1,scale=-2:90");
        let args = sampling
            .build_command(Path::new("in.mp4"), Path::new("/w"))
            .build_args();
        assert!(!args.contains(&"-t".to_string()));
        let pos = args.iter().position(|a| a == "-frames:v").unwrap();
        assert_eq!(args[pos + 1], STORYBOARD_MAX_TILES.to_string());
    }

    #[test]
    fn test_long_video_widens_storyboard_interval() {
        assert_eq!(FrameSampling::storyboard(None).interval_secs, 1);
        assert_eq!(FrameSampling::storyboard(Some(728.0)).interval_secs, 1);
        assert_eq!(FrameSampling::storyboard(Some(780.0)).interval_secs, 2);

        let two_hours = 7_200.0;
        let sampling = FrameSampling::storyboard(Some(two_hours));
        let tiles = (two_hours / sampling.interval_secs as f64).ceil() as u32;
        assert!(tiles <= STORYBOARD_MAX_TILES);
        assert!(tiles * STORYBOARD_TILE_HEIGHT <= u16::MAX as u32);
    }

    #[tokio::test]
    async fn test_list_frames_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["poster-00002.png", "poster-00001.png", "other.png", "poster-00010.png"] {
            tokio::fs::write(dir.path().join(name), b"x").await.unwrap();
        }

        let frames = list_frames(dir.path(), "poster").await.unwrap();
        let names: Vec<_> = frames
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["poster-00001.png", "poster-00002.png", "poster-00010.png"]
        );
    }
}
