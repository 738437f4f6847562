//! Per-execution scratch directory
//!
//! Created empty under the configured root, named after the execution id,
//! and removed by `cleanup` or, failing that, on drop.

use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    removed: bool,
}

impl ScratchDir {
    /// Fails if the directory already exists; a scratch dir is never shared
    pub async fn create(root: &Path, execution_id: &str) -> io::Result<Self> {
        tokio::fs::create_dir_all(root).await?;
        let path = root.join(execution_id);
        tokio::fs::create_dir(&path).await?;
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&self, name: &str, contents: &str) -> io::Result<PathBuf> {
        let file = self.path.join(name);
        tokio::fs::write(&file, contents).await?;
        Ok(file)
    }

    pub async fn cleanup(mut self) -> io::Result<()> {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove scratch directory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cleanup_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::create(root.path(), "exec-1").await.unwrap();
        scratch.write("main.py", "print(1)").await.unwrap();
        let path = scratch.path().to_path_buf();
        assert!(path.join("main.py").exists());

        scratch.cleanup().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_drop_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let scratch = ScratchDir::create(root.path(), "exec-2").await.unwrap();
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_never_shared() {
        let root = tempfile::tempdir().unwrap();
        let _first = ScratchDir::create(root.path(), "same").await.unwrap();
        assert!(ScratchDir::create(root.path(), "same").await.is_err());
    }
}
