//! Local filesystem operations used by the job pipeline.
//!
//! [`FileService`] is the seam the pipeline talks to; [`TokioFileService`]
//! is the real implementation on `tokio::fs`. Deleting a missing file and
//! cleaning a missing directory both succeed, so every cleanup action can
//! be repeated safely.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::storage::ObjectReader;

/// An I/O failure with the operation and path it concerns.
#[derive(Debug, thiserror::Error)]
#[error("Failed to {op} {}: {source}", path.display())]
pub struct FileSystemError {
    pub op: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl FileSystemError {
    pub fn new(op: &'static str, path: &Path, source: io::Error) -> Self {
        Self {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

#[async_trait]
pub trait FileService: Send + Sync {
    /// Copy `reader` into a new file at `path`, returning the bytes written.
    async fn write_stream(&self, path: &Path, reader: ObjectReader) -> Result<u64, FileSystemError>;

    /// Remove a file. A missing file is not an error.
    async fn delete_file(&self, path: &Path) -> Result<(), FileSystemError>;

    /// Files directly inside `dir` whose extension matches `extension`
    /// (case-insensitive), sorted by path.
    async fn list_files(&self, dir: &Path, extension: &str) -> Result<Vec<PathBuf>, FileSystemError>;

    /// Remove `dir` with everything in it and recreate it empty.
    async fn clean_directory(&self, dir: &Path) -> Result<(), FileSystemError>;
}

/// [`FileService`] backed by `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileService;

#[async_trait]
impl FileService for TokioFileService {
    async fn write_stream(&self, path: &Path, mut reader: ObjectReader) -> Result<u64, FileSystemError> {
        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| FileSystemError::new("create", path, e))?;
        let written = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|e| FileSystemError::new("write", path, e))?;
        file.flush()
            .await
            .map_err(|e| FileSystemError::new("flush", path, e))?;
        Ok(written)
    }

    async fn delete_file(&self, path: &Path) -> Result<(), FileSystemError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FileSystemError::new("delete", path, e)),
        }
    }

    async fn list_files(&self, dir: &Path, extension: &str) -> Result<Vec<PathBuf>, FileSystemError> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| FileSystemError::new("list", dir, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FileSystemError::new("list", dir, e))?
        {
            let path = entry.path();
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
            if !matches {
                continue;
            }
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| FileSystemError::new("inspect", &path, e))?;
            if file_type.is_file() {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }

    async fn clean_directory(&self, dir: &Path) -> Result<(), FileSystemError> {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(FileSystemError::new("remove", dir, e)),
        }
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| FileSystemError::new("create", dir, e))
    }
}
