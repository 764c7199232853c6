use crate::error::Result;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use ulid::Ulid;

/// Mode applied to every published file: owner read/write only.
pub const FILE_PERMISSIONS: u32 = 0o600;

/// Directory layout of a data root:
///
/// ```text
/// {root}/
/// ├── raw/    # payloads, one file per digest
/// ├── meta/   # {digest}.json descriptors
/// └── tmp/    # staging area for atomic publish
/// ```
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("raw")
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.root.join("meta")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Create the directory structure if it doesn't exist.
    pub fn ensure(&self) -> Result<()> {
        for dir in [self.raw_dir(), self.meta_dir(), self.staging_dir()] {
            std::fs::create_dir_all(&dir)?;
        }
        tracing::info!("Ensured directory structure exists at {:?}", self.root);
        Ok(())
    }

    /// Remove staging files left behind by an interrupted process.
    ///
    /// Must only run before the store starts serving writes.
    pub async fn clear_staging(&self) -> Result<usize> {
        let staging_dir = self.staging_dir();
        if !fs::try_exists(&staging_dir).await? {
            return Ok(0);
        }

        let mut removed = 0usize;
        let mut entries = fs::read_dir(&staging_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!("Removed {} stale staging files", removed);
        }
        Ok(removed)
    }
}

/// Write `data` to `target` so that readers see either nothing or the full
/// contents: the bytes go to a uniquely named file in `staging_dir`, are
/// synced, then renamed over `target`.
///
/// `staging_dir` must be on the same filesystem as `target`.
pub async fn write_atomic(staging_dir: &Path, target: &Path, data: &[u8]) -> Result<()> {
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = staging_dir.join(format!("{}.{}.tmp", name, Ulid::new()));

    match write_then_rename(&temp_path, target, data).await {
        Ok(()) => {
            tracing::debug!("Published {:?} ({} bytes)", target, data.len());
            Ok(())
        }
        Err(error) => {
            let _ = fs::remove_file(&temp_path).await;
            Err(error)
        }
    }
}

async fn write_then_rename(temp_path: &Path, target: &Path, data: &[u8]) -> Result<()> {
    let mut file = fs::File::create(temp_path).await?;
    restrict_permissions(temp_path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(temp_path, target).await?;
    Ok(())
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(FILE_PERMISSIONS)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
