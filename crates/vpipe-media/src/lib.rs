//! FFmpeg CLI wrapper for video processing.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with timeouts and OOM detection
//! - Media probing (mime type, resolution, frame rate, duration, bitrate)
//! - Frame sampling, poster selection by brightness and poster rendering
//! - Storyboard sprite composition
//! - Resolution ladder planning and per-rung transcoding

pub mod brightness;
pub mod command;
pub mod error;
pub mod frames;
pub mod ladder;
pub mod probe;
pub mod storyboard;
pub mod thumbnail;
pub mod transcode;

pub use brightness::{mean_luma, select_brightest, BrightestFrame};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use frames::{extract_frames, FrameSampling};
pub use ladder::{plan_ladder, should_continue, Rung};
pub use probe::{measure_bitrate, probe_media, MediaProbe};
pub use storyboard::{compose_storyboard, StoryboardSprite};
pub use thumbnail::{blank_image, render_thumbnails, Thumbnails};
pub use transcode::transcode_rung;
