//! Media probing via `file` and `ffprobe`.
//!
//! Every field is extracted independently. A missing tool, a non-zero exit or
//! malformed output leaves the affected fields unset instead of failing the
//! whole probe.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// What could be learned about a local media file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaProbe {
    pub mime_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_secs: Option<f64>,
    pub frame_rate: Option<f64>,
    /// Bits per second
    pub bitrate: Option<u64>,
}

impl MediaProbe {
    /// Width and height, when both are known.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Default, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    bit_rate: Option<String>,
    duration: Option<String>,
}

/// Probe a local file.
///
/// Only a missing input file is an error; everything else degrades to
/// unset fields.
pub async fn probe_media(path: impl AsRef<Path>) -> MediaResult<MediaProbe> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let mime_type = match detect_mime_type(path).await {
        Ok(mime) => mime,
        Err(e) => {
            warn!(path = %path.display(), "mime type detection failed: {}", e);
            None
        }
    };

    let mut probe = match run_ffprobe(path).await {
        Ok(stdout) => parse_ffprobe_output(&stdout),
        Err(e) => {
            warn!(path = %path.display(), "ffprobe failed: {}", e);
            MediaProbe::default()
        }
    };
    probe.mime_type = mime_type;

    if probe.bitrate.is_none() {
        probe.bitrate = estimate_bitrate(path, probe.duration_secs).await;
    }

    debug!(path = %path.display(), ?probe, "probed media");
    Ok(probe)
}

/// Measured bitrate of a produced file, in bits per second.
pub async fn measure_bitrate(path: impl AsRef<Path>) -> MediaResult<Option<u64>> {
    Ok(probe_media(path).await?.bitrate)
}

async fn detect_mime_type(path: &Path) -> MediaResult<Option<String>> {
    if which::which("file").is_err() {
        return Ok(None);
    }

    let output = Command::new("file")
        .args(["--brief", "--mime-type"])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await?;

    if !output.status.success() {
        return Ok(None);
    }

    Ok(parse_mime_output(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_mime_output(stdout: &str) -> Option<String> {
    let mime = stdout.trim();
    if mime.contains('/') {
        Some(mime.to_string())
    } else {
        None
    }
}

async fn run_ffprobe(path: &Path) -> MediaResult<Vec<u8>> {
    check_ffprobe()?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::ffprobe_failed(
            "FFprobe failed",
            Some(String::from_utf8_lossy(&output.stderr).to_string()),
        ));
    }

    Ok(output.stdout)
}

/// Extract fields from ffprobe JSON. Malformed JSON yields an empty probe.
fn parse_ffprobe_output(stdout: &[u8]) -> MediaProbe {
    let parsed: FfprobeOutput = match serde_json::from_slice(stdout) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("malformed ffprobe output: {}", e);
            return MediaProbe::default();
        }
    };

    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let format = parsed.format.as_ref();

    let duration_secs = format
        .and_then(|f| parse_positive_f64(f.duration.as_deref()))
        .or_else(|| video.and_then(|s| parse_positive_f64(s.duration.as_deref())));

    let frame_rate = video.and_then(|s| {
        s.avg_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .or_else(|| s.r_frame_rate.as_deref().and_then(parse_frame_rate))
    });

    let bitrate = format
        .and_then(|f| parse_u64(f.bit_rate.as_deref()))
        .or_else(|| video.and_then(|s| parse_u64(s.bit_rate.as_deref())))
        .or_else(|| {
            let size = format.and_then(|f| parse_u64(f.size.as_deref()))?;
            bitrate_from_size(size, duration_secs?)
        });

    MediaProbe {
        mime_type: None,
        width: video.and_then(|s| s.width).filter(|w| *w > 0),
        height: video.and_then(|s| s.height).filter(|h| *h > 0),
        duration_secs,
        frame_rate,
        bitrate,
    }
}

async fn estimate_bitrate(path: &Path, duration_secs: Option<f64>) -> Option<u64> {
    let size = tokio::fs::metadata(path).await.ok()?.len();
    bitrate_from_size(size, duration_secs?)
}

fn bitrate_from_size(size_bytes: u64, duration_secs: f64) -> Option<u64> {
    if duration_secs <= 0.0 || size_bytes == 0 {
        return None;
    }
    Some((size_bytes as f64 * 8.0 / duration_secs).round() as u64)
}

fn parse_u64(value: Option<&str>) -> Option<u64> {
    value?.trim().parse::<u64>().ok().filter(|v| *v > 0)
}

fn parse_positive_f64(value: Option<&str>) -> Option<f64> {
    value?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 && num > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok().filter(|v: &f64| *v > 0.0)
}
