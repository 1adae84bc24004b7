//! Single-rung transcoding.

use std::path::Path;
use tracing::info;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::ladder::Rung;
use vpipe_models::EncodingConfig;

fn build_transcode_command(
    input: &Path,
    output: &Path,
    rung: Rung,
    encoding: &EncodingConfig,
) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .video_filter(format!("scale={}:{}", rung.width, rung.height))
        .output_args(encoding.to_ffmpeg_args())
}

/// Produce one rung file at `output`.
///
/// OOM kills surface as `MediaError::ResourceExhausted`.
pub async fn transcode_rung(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    rung: Rung,
    encoding: &EncodingConfig,
    timeout_secs: Option<u64>,
) -> MediaResult<()> {
    let input = input.as_ref();
    let output = output.as_ref();

    info!(
        width = rung.width,
        height = rung.height,
        preset = %encoding.preset,
        crf = encoding.crf,
        "transcoding rung"
    );

    let cmd = build_transcode_command(input, output, rung, encoding);
    let mut runner = FfmpegRunner::new();
    if let Some(secs) = timeout_secs {
        runner = runner.with_timeout(secs);
    }
    runner.run(&cmd).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpipe_models::PlanTier;

    #[test]
    fn test_transcode_args() {
        let encoding = EncodingConfig::for_rung(PlanTier::Premium, 480);
        let rung = Rung {
            width: 854,
            height: 480,
        };
        let args =
            build_transcode_command(Path::new("in.mov"), Path::new("out.mp4"), rung, &encoding)
                .build_args();

        assert!(args.contains(&"scale=854:480".to_string()));
        assert!(args.contains(&"slow".to_string()));
        assert!(args.contains(&"25".to_string()));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }
}
