//! Per-attempt working directories.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::WorkerResult;

/// Scratch directory owned by exactly one job attempt.
///
/// Everything inside, including partial tool outputs, is removed when the
/// value is dropped, on success and failure alike.
#[derive(Debug)]
pub struct WorkDir {
    dir: TempDir,
}

impl WorkDir {
    /// Create a fresh directory under `root`, named after the job.
    pub async fn acquire(root: &Path, job_id: &str) -> WorkerResult<Self> {
        tokio::fs::create_dir_all(root).await?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", job_id))
            .tempdir_in(root)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where the downloaded native file lives.
    pub fn native_path(&self) -> PathBuf {
        self.path().join("native")
    }

    /// Output path of one ladder rung.
    pub fn rung_path(&self, height: u32) -> PathBuf {
        self.path().join(format!("rung-{}p.mp4", height))
    }

    /// A subdirectory for one step's intermediate files.
    pub async fn subdir(&self, name: &str) -> WorkerResult<PathBuf> {
        let path = self.path().join(name);
        tokio::fs::create_dir_all(&path).await?;
        Ok(path)
    }
}
