use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::TxChainError;
use crate::record::TransactionChainRecord;

/// A record written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedArtifact {
    pub path: PathBuf,
    pub bytes: usize,
}

/// Writes chain records as pretty-printed JSON under a data directory.
///
/// Each file is written to a temporary sibling and renamed into place, so a
/// reader never sees a partial record.
#[derive(Debug, Clone)]
pub struct Recorder {
    data_dir: PathBuf,
}

impl Recorder {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.data_dir.join(file_name)
    }

    pub async fn record(
        &self,
        file_name: &str,
        record: &TransactionChainRecord,
    ) -> Result<PersistedArtifact, TxChainError> {
        let path = self.path_for(file_name);
        let json = serde_json::to_vec_pretty(record)?;

        let dir = path.parent().unwrap_or(self.data_dir.as_path()).to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| TxChainError::Record {
                path: dir.clone(),
                source,
            })?;

        let tmp = TempSibling::beside(&path);
        write_synced(tmp.path(), &json)
            .await
            .map_err(|source| TxChainError::Record {
                path: tmp.path().to_path_buf(),
                source,
            })?;
        tokio::fs::rename(tmp.path(), &path)
            .await
            .map_err(|source| TxChainError::Record {
                path: path.clone(),
                source,
            })?;
        tmp.persisted();

        info!(path = %path.display(), bytes = json.len(), hops = record.hops.len(), "chain recorded");
        Ok(PersistedArtifact {
            path,
            bytes: json.len(),
        })
    }

    /// Read back a record written by [`Recorder::record`].
    pub async fn load(path: impl AsRef<Path>) -> Result<TransactionChainRecord, TxChainError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| TxChainError::Record {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Hidden temporary file next to a record's final path. Removed on drop
/// unless the rename into place succeeded, including when the write is
/// abandoned mid-flight.
struct TempSibling {
    path: PathBuf,
    persisted: bool,
}

impl TempSibling {
    fn beside(target: &Path) -> Self {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path: target.with_file_name(format!(".{name}.tmp")),
            persisted: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn persisted(mut self) {
        self.persisted = true;
    }
}

impl Drop for TempSibling {
    fn drop(&mut self) {
        if !self.persisted {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}
