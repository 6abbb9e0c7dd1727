//! Remote client that mirrors destinations into a local directory.
//!
//! Useful when no lab controller is reachable, or to keep a browsable copy
//! of what a run reported. The layout is:
//!
//! ```text
//! <root>/
//! ├── task/
//! │   ├── testout.log       appended log text
//! │   ├── results.log       posted results, one per line
//! │   └── logs/<name>       uploaded files
//! └── subtasks/<id>/
//!     ├── path              result path given at creation
//!     └── ...               same layout as task/
//! ```

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use super::{
    Destination, DestinationId, RemoteClient, RemoteError, RemoteResult, ResultEntry, ResultHandle,
};

/// Remote client writing into a directory tree.
pub struct DirectoryClient {
    root: PathBuf,
    log_name: String,
    next_subtask: AtomicU64,
}

impl DirectoryClient {
    /// Creates a client rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            log_name: "testout.log".to_string(),
            next_subtask: AtomicU64::new(0),
        }
    }

    /// Sets the file name appended log text goes to.
    pub fn with_log_name(mut self, name: impl Into<String>) -> Self {
        self.log_name = name.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory backing a destination.
    pub fn destination_dir(&self, destination: &Destination) -> PathBuf {
        match destination {
            Destination::Task => self.root.join("task"),
            Destination::Subtask(id) => self.root.join("subtasks").join(id.as_str()),
        }
    }

    async fn append(&self, path: &Path, text: &[u8]) -> RemoteResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(io_error)?;
        file.write_all(text).await.map_err(io_error)?;
        file.flush().await.map_err(io_error)
    }
}

/// Accepts only a bare file name, so uploads stay inside `logs/`.
fn plain_file_name(name: &str) -> RemoteResult<&Path> {
    let path = Path::new(name);
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(path),
        _ => Err(RemoteError::Permanent(format!(
            "invalid upload name {:?}",
            name
        ))),
    }
}

fn io_error(e: std::io::Error) -> RemoteError {
    match e.kind() {
        ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
            RemoteError::Transient(e.to_string())
        }
        _ => RemoteError::Permanent(e.to_string()),
    }
}

#[async_trait]
impl RemoteClient for DirectoryClient {
    async fn create_subtask(&self, path: Option<&str>) -> RemoteResult<DestinationId> {
        let n = self.next_subtask.fetch_add(1, Ordering::SeqCst) + 1;
        let id = DestinationId::new(n.to_string());
        let dir = self.destination_dir(&Destination::Subtask(id.clone()));
        tokio::fs::create_dir_all(&dir).await.map_err(io_error)?;
        if let Some(path) = path {
            tokio::fs::write(dir.join("path"), path)
                .await
                .map_err(io_error)?;
        }
        Ok(id)
    }

    async fn create_result(
        &self,
        destination: &Destination,
        entry: &ResultEntry,
    ) -> RemoteResult<ResultHandle> {
        let mut line = entry.remote_result().to_string();
        if let Some(score) = entry.score {
            line.push_str(&format!(" score={}", score));
        }
        line.push_str(&format!(" {}\n", entry.message));

        let path = self.destination_dir(destination).join("results.log");
        self.append(&path, line.as_bytes()).await?;
        Ok(ResultHandle(path.display().to_string()))
    }

    async fn append_log(&self, destination: &Destination, text: &str) -> RemoteResult<()> {
        let path = self.destination_dir(destination).join(&self.log_name);
        self.append(&path, text.as_bytes()).await
    }

    async fn upload_file(
        &self,
        destination: &Destination,
        name: &str,
        offset: u64,
        data: &[u8],
    ) -> RemoteResult<()> {
        let name = plain_file_name(name)?;
        let dir = self.destination_dir(destination).join("logs");
        tokio::fs::create_dir_all(&dir).await.map_err(io_error)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(offset == 0)
            .open(dir.join(name))
            .await
            .map_err(io_error)?;
        file.set_len(offset).await.map_err(io_error)?;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(io_error)?;
        file.write_all(data).await.map_err(io_error)?;
        file.flush().await.map_err(io_error)
    }
}
