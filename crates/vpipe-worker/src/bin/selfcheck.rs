//! Pre-flight check for worker hosts: scratch space, media tools, required env.

use std::path::Path;

use vpipe_media::{check_ffmpeg, check_ffprobe};
use vpipe_worker::WorkerConfig;

const REQUIRED_ENV: &[&str] = &["REDIS_URL", "S3_VIDEO_BUCKET", "S3_THUMBNAIL_BUCKET"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "vpipe-selfcheck: starting with work_dir={} profile={}",
        config.work_dir.display(),
        config.profile
    );
    ensure_workdir(&config.work_dir).await?;

    let ffmpeg = check_ffmpeg().map_err(|e| anyhow::anyhow!("{}", e))?;
    let ffprobe = check_ffprobe().map_err(|e| anyhow::anyhow!("{}", e))?;
    println!(
        "vpipe-selfcheck: ffmpeg={} ffprobe={}",
        ffmpeg.display(),
        ffprobe.display()
    );

    ensure_env_present(REQUIRED_ENV)?;
    if std::env::var("GCP_PROJECT_ID").is_err() && std::env::var("FIREBASE_PROJECT_ID").is_err() {
        anyhow::bail!("missing required env var GCP_PROJECT_ID or FIREBASE_PROJECT_ID");
    }

    println!("vpipe-selfcheck: ok");
    Ok(())
}

/// The work dir must exist and accept writes.
async fn ensure_workdir(path: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path).await?;
    let probe = tempfile::NamedTempFile::new_in(path)
        .map_err(|e| anyhow::anyhow!("work dir {} not writable: {}", path.display(), e))?;
    drop(probe);
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    let missing: Vec<&str> = vars
        .iter()
        .copied()
        .filter(|var| std::env::var(var).is_err())
        .collect();

    if !missing.is_empty() {
        return Err(anyhow::anyhow!(
            "missing required env vars: {}",
            missing.join(", ")
        ));
    }
    Ok(())
}
