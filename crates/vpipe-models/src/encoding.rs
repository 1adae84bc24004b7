//! Transcode quality policy and media constants.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::plan::PlanTier;

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";

/// Candidate rung heights, tallest first.
pub const LADDER_HEIGHTS: [u32; 3] = [1080, 720, 480];
/// A rung at or below this bitrate ends the ladder.
pub const MIN_USEFUL_BITRATE_BPS: u64 = 500_000;
/// Rungs at or below this height get a worse CRF.
pub const LOW_RES_CUTOFF: u32 = 480;
/// CRF penalty applied at or below the low-resolution cutoff.
pub const LOW_RES_CRF_PENALTY: u8 = 4;

/// Container for transcoded rungs.
pub const RUNG_EXTENSION: &str = "mp4";
pub const RUNG_MIME_TYPE: &str = "video/mp4";

/// Poster and storyboard image format.
pub const IMAGE_EXTENSION: &str = "jpg";
pub const IMAGE_MIME_TYPE: &str = "image/jpeg";

/// Small poster target size (cover-fit).
pub const THUMBNAIL_SMALL_WIDTH: u32 = 1280;
pub const THUMBNAIL_SMALL_HEIGHT: u32 = 720;
/// JPEG quality for posters and sprites.
pub const IMAGE_JPEG_QUALITY: u8 = 82;

/// Poster sampling: one frame every N seconds over the first window.
pub const POSTER_SAMPLE_INTERVAL_SECS: u32 = 6;
pub const POSTER_SAMPLE_WINDOW_SECS: u32 = 60;
pub const POSTER_MAX_SAMPLES: u32 = 10;

/// Storyboard cadence and tile height.
pub const STORYBOARD_INTERVAL_SECS: u32 = 1;
pub const STORYBOARD_TILE_HEIGHT: u32 = 90;
/// Tallest sprite a JPEG can hold.
pub const STORYBOARD_MAX_SPRITE_HEIGHT: u32 = u16::MAX as u32;
/// Most tiles one sprite can stack at the standard tile height.
pub const STORYBOARD_MAX_TILES: u32 = STORYBOARD_MAX_SPRITE_HEIGHT / STORYBOARD_TILE_HEIGHT;

/// Encoder settings for one ladder rung.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EncodingConfig {
    /// Video codec (e.g., "libx264")
    pub codec: String,

    /// Encoding preset (e.g., "veryfast", "medium", "slow")
    pub preset: String,

    /// Constant Rate Factor (0-51, lower is better)
    pub crf: u8,

    pub audio_codec: String,
    pub audio_bitrate: String,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: DEFAULT_VIDEO_CODEC.to_string(),
            preset: "medium".to_string(),
            crf: 23,
            audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            audio_bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
        }
    }
}

impl EncodingConfig {
    /// Settings for a rung of the given height on the given tier.
    ///
    /// Higher tiers get a slower preset and a lower CRF; small rungs are
    /// penalised to save space.
    pub fn for_rung(tier: PlanTier, height: u32) -> Self {
        let (preset, crf) = match tier {
            PlanTier::Premium => ("slow", 21),
            PlanTier::Pro => ("medium", 23),
            PlanTier::Free => ("veryfast", 26),
        };

        let crf = if height <= LOW_RES_CUTOFF {
            crf + LOW_RES_CRF_PENALTY
        } else {
            crf
        };

        Self {
            preset: preset.to_string(),
            crf,
            ..Default::default()
        }
    }

    /// Convert to FFmpeg output arguments.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        vec![
            "-c:v".to_string(),
            self.codec.clone(),
            "-preset".to_string(),
            self.preset.clone(),
            "-crf".to_string(),
            self.crf.to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-b:a".to_string(),
            self.audio_bitrate.clone(),
            "-movflags".to_string(),
            "+faststart".to_string(),
        ]
    }
}
