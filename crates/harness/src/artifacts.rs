use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use walkdir::WalkDir;

/// Extension of raw decoded outputs
const ARTIFACT_EXTENSION: &str = "yuv";

/// Where decoded outputs live and how they are cleaned up
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    keep: bool,
}

impl ArtifactStore {
    pub fn new(dir: PathBuf, keep: bool) -> Self {
        ArtifactStore { dir, keep }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for a new artifact called `name`, creating the directory if needed
    pub fn test_artifact(&self, name: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create artifact directory: {}", self.dir.display()))?;
        Ok(self.dir.join(name))
    }

    /// Delete an artifact that is no longer needed. No-op when artifacts are kept.
    pub fn purge(&self, path: &Path) -> Result<()> {
        if self.keep {
            debug!("Keeping artifact {}", path.display());
            return Ok(());
        }
        match fs::remove_file(path) {
            Ok(()) => {
                debug!("Purged artifact {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Artifact already gone: {}", path.display());
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to purge artifact: {}", path.display())),
        }
    }

    /// Remove raw outputs left behind by earlier runs. Returns how many were deleted.
    pub fn sweep(&self) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in WalkDir::new(&self.dir).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Error reading artifact directory entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|s| s.to_str()) != Some(ARTIFACT_EXTENSION) {
                continue;
            }
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove stale artifact: {}", path.display()))?;
            removed += 1;
        }

        info!("Swept {} stale artifact(s) from {}", removed, self.dir.display());
        Ok(removed)
    }
}
