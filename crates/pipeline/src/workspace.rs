use async_trait::async_trait;
use common::errors::{RemedyError, RemedyResult};
use std::path::{Path, PathBuf};

/// File access boundary for the pipeline. Application and rollback go
/// through this trait so tests can run against a scratch tree and a
/// version-control-backed implementation can slot in later.
#[async_trait]
pub trait WorkspaceFiles: Send + Sync {
    async fn read(&self, path: &Path) -> RemedyResult<String>;
    async fn write(&self, path: &Path, content: &str) -> RemedyResult<()>;
}

/// Plain filesystem workspace rooted at a directory. Relative paths are
/// resolved against the root; absolute paths are used as-is.
pub struct LocalWorkspace {
    root: PathBuf,
}

impl LocalWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

#[async_trait]
impl WorkspaceFiles for LocalWorkspace {
    async fn read(&self, path: &Path) -> RemedyResult<String> {
        let full = self.resolve(path);
        tokio::fs::read_to_string(&full).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RemedyError::NotFound(full.display().to_string())
            } else {
                RemedyError::TransientIo(format!("read {}: {e}", full.display()))
            }
        })
    }

    async fn write(&self, path: &Path, content: &str) -> RemedyResult<()> {
        let full = self.resolve(path);
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| RemedyError::TransientIo(format!("write {}: {e}", full.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_relative_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ws = LocalWorkspace::new(dir.path());
        ws.write(Path::new("a.rs"), "fn main() {}\n")
            .await
            .expect("write");
        let read = ws.read(Path::new("a.rs")).await.expect("read");
        assert_eq!(read, "fn main() {}\n");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ws = LocalWorkspace::new(dir.path());
        let err = ws.read(Path::new("ghost.rs")).await.expect_err("missing");
        assert!(matches!(err, RemedyError::NotFound(_)));
    }
}
