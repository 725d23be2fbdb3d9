use log::{debug, info};
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;

use crate::utils::{P2PError, Result};

/// Local filesystem side of resource sharing: reads files that are being
/// shared and persists bytes fetched from other peers.
#[derive(Debug, Clone)]
pub struct FileManager {
    download_dir: PathBuf,
}

impl FileManager {
    pub fn new(download_dir: PathBuf) -> Self {
        Self { download_dir }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Reads a file and names the resource after its base name.
    pub async fn read_resource(path: &Path) -> Result<(String, Vec<u8>)> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| P2PError::InvalidResourceName(path.display().to_string()))?;
        let name = Self::sanitize_name(name)?;

        let data = async_fs::read(path)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to read {:?}: {}", path, e)))?;

        debug!("Read {} bytes from {:?}", data.len(), path);
        Ok((name, data))
    }

    /// Writes downloaded content to `download_dir/<name>`, replacing any
    /// earlier download of the same name.
    pub async fn save_download(&self, name: &str, data: &[u8]) -> Result<PathBuf> {
        let file_name = Self::sanitize_name(name)?;

        async_fs::create_dir_all(&self.download_dir)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to create directory: {}", e)))?;

        let path = self.download_dir.join(file_name);
        let mut file = async_fs::File::create(&path)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to create {:?}: {}", path, e)))?;
        file.write_all(data)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to write {:?}: {}", path, e)))?;
        file.flush().await?;

        info!("Saved {} bytes to {:?}", data.len(), path);
        Ok(path)
    }

    /// Resource names come off the network; keep only the final path
    /// component so a remote name can never escape the download directory.
    pub fn sanitize_name(name: &str) -> Result<String> {
        let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
        match base {
            "" | "." | ".." => Err(P2PError::InvalidResourceName(name.to_string())),
            _ => Ok(base.to_string()),
        }
    }
}
