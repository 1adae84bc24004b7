//! Media toolkit port.
//!
//! The orchestrator only sees this trait; `FfmpegToolkit` wires it to the
//! ffmpeg/ffprobe based implementations in `vpipe-media`. Raster work runs
//! on the blocking pool so it never stalls the runtime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use vpipe_media::{
    compose_storyboard, extract_frames, measure_bitrate, probe_media, render_thumbnails,
    select_brightest, transcode_rung, FrameSampling, MediaError, MediaProbe, MediaResult, Rung,
    StoryboardSprite, Thumbnails,
};
use vpipe_models::EncodingConfig;

#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Inspect a local file; fields that cannot be read are left unset.
    async fn probe(&self, video: &Path) -> MediaResult<MediaProbe>;

    /// Pick the brightest sampled frame and render both posters from it,
    /// falling back to the blank image.
    async fn render_posters(&self, video: &Path, scratch: &Path) -> MediaResult<Thumbnails>;

    /// Sample tiles and compose the storyboard sprite. `duration_secs`
    /// spreads the tiles over long videos.
    async fn build_storyboard(
        &self,
        video: &Path,
        scratch: &Path,
        duration_secs: Option<f64>,
    ) -> MediaResult<StoryboardSprite>;

    /// Produce one rung at `output` and return its measured bitrate.
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        rung: Rung,
        encoding: &EncodingConfig,
    ) -> MediaResult<Option<u64>>;
}

/// Toolkit backed by the ffmpeg CLI tools.
#[derive(Debug, Clone, Default)]
pub struct FfmpegToolkit {
    transcode_timeout: Option<Duration>,
}

impl FfmpegToolkit {
    pub fn new(transcode_timeout: Option<Duration>) -> Self {
        Self { transcode_timeout }
    }
}

async fn blocking<T, F>(f: F) -> MediaResult<T>
where
    F: FnOnce() -> MediaResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MediaError::internal(format!("image task panicked: {}", e)))?
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn probe(&self, video: &Path) -> MediaResult<MediaProbe> {
        probe_media(video).await
    }

    async fn render_posters(&self, video: &Path, scratch: &Path) -> MediaResult<Thumbnails> {
        let frames: Vec<PathBuf> =
            match extract_frames(video, scratch, &FrameSampling::poster()).await {
                Ok(frames) => frames,
                Err(e) if e.is_resource_exhausted() => return Err(e),
                Err(e) => {
                    warn!("poster sampling failed, using blank poster: {}", e);
                    Vec::new()
                }
            };

        blocking(move || {
            let selected = select_brightest(&frames);
            render_thumbnails(selected.as_ref().map(|f| f.path.as_path()))
        })
        .await
    }

    async fn build_storyboard(
        &self,
        video: &Path,
        scratch: &Path,
        duration_secs: Option<f64>,
    ) -> MediaResult<StoryboardSprite> {
        let sampling = FrameSampling::storyboard(duration_secs);
        let frames = extract_frames(video, scratch, &sampling).await?;
        let video = video.to_path_buf();
        let interval = sampling.interval_secs;
        blocking(move || compose_storyboard(&video, &frames, interval)).await
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        rung: Rung,
        encoding: &EncodingConfig,
    ) -> MediaResult<Option<u64>> {
        transcode_rung(
            input,
            output,
            rung,
            encoding,
            self.transcode_timeout.map(|d| d.as_secs()),
        )
        .await?;

        match measure_bitrate(output).await {
            Ok(bitrate) => Ok(bitrate),
            Err(e) => {
                warn!(output = %output.display(), "could not measure rung bitrate: {}", e);
                Ok(None)
            }
        }
    }
}
