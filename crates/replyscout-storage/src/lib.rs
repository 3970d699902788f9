//! Durable engagement log + hash-addressed failure artifact storage for replyscout.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "replyscout-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reading dedup log {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("appending to dedup log {path}: {source}")]
    Append {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("refusing to record an empty or multi-line id {0:?}")]
    InvalidId(String),
}

/// Append-only log of engaged post ids, one per line, mirrored in memory.
///
/// Lifecycle: `open` once at process start, `record` flushes and syncs every
/// write, `close` at process end. Single writer only.
#[derive(Debug)]
pub struct DedupStore {
    path: PathBuf,
    ids: HashSet<String>,
    log: Option<fs::File>,
}

impl DedupStore {
    /// Reads every id from `path`. A missing file is an empty store.
    pub async fn load(path: impl AsRef<Path>) -> Result<HashSet<String>, StoreError> {
        let path = path.as_ref();
        match fs::read_to_string(path).await {
            Ok(text) => Ok(text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashSet::new()),
            Err(source) => Err(StoreError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let ids = Self::load(&path).await?;
        info!(path = %path.display(), known_ids = ids.len(), "dedup store loaded");
        Ok(Self {
            path,
            ids,
            log: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Inserts `id` and durably appends it before returning. Returns `false`
    /// without touching the log when the id was already known.
    pub async fn record(&mut self, id: &str) -> Result<bool, StoreError> {
        let id = id.trim();
        if id.is_empty() || id.contains('\n') || id.contains('\r') {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        if self.ids.contains(id) {
            return Ok(false);
        }

        let append_err = |source: std::io::Error| StoreError::Append {
            path: self.path.display().to_string(),
            source,
        };
        // A handle that failed mid-write is dropped and reopened on the next record.
        let mut file = match self.log.take() {
            Some(file) => file,
            None => Self::open_log(&self.path).await.map_err(append_err)?,
        };

        let line = format!("{id}\n");
        file.write_all(line.as_bytes()).await.map_err(append_err)?;
        file.flush().await.map_err(append_err)?;
        file.sync_data().await.map_err(append_err)?;
        self.log = Some(file);

        self.ids.insert(id.to_string());
        debug!(id, "recorded engaged id");
        Ok(true)
    }

    pub async fn close(mut self) -> Result<(), StoreError> {
        if let Some(mut file) = self.log.take() {
            let path = self.path.display().to_string();
            file.flush().await.map_err(|source| StoreError::Append {
                path: path.clone(),
                source,
            })?;
            file.sync_all()
                .await
                .map_err(|source| StoreError::Append { path, source })?;
        }
        Ok(())
    }

    async fn open_log(path: &Path) -> std::io::Result<fs::File> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Diagnostics artifacts (page captures, error context) stored immutably by content hash.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// `<YYYYmmdd_HHMMSS>/<label>/<hash>.<ext>` with `label` reduced to a path-safe slug.
    pub fn artifact_relative_path(
        captured_at: DateTime<Utc>,
        label: &str,
        content_hash: &str,
        extension: &str,
    ) -> PathBuf {
        let ext = match extension.trim().trim_start_matches('.') {
            "" => "bin",
            ext => ext,
        };
        PathBuf::from(captured_at.format("%Y%m%d_%H%M%S").to_string())
            .join(slug(label))
            .join(format!("{content_hash}.{ext}"))
    }

    /// Writes through a temp file + rename so a reader never sees a partial artifact.
    pub async fn store_failure_artifact(
        &self,
        captured_at: DateTime<Utc>,
        label: &str,
        extension: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredArtifact> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = Self::artifact_relative_path(captured_at, label, &content_hash, extension);
        let absolute_path = self.root.join(&relative_path);
        let dir = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating artifact directory {}", dir.display()))?;

        let stored = |deduplicated| StoredArtifact {
            content_hash: content_hash.clone(),
            relative_path: relative_path.clone(),
            absolute_path: absolute_path.clone(),
            byte_size: bytes.len(),
            deduplicated,
        };

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking artifact path {}", absolute_path.display()))?
        {
            return Ok(stored(true));
        }

        let temp_path = dir.join(format!(".{}.tmp", Uuid::new_v4()));
        let write_result = async {
            let mut file = fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&temp_path)
                .await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            fs::rename(&temp_path, &absolute_path).await
        }
        .await;

        match write_result {
            Ok(()) => Ok(stored(false)),
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                if err.kind() == std::io::ErrorKind::AlreadyExists {
                    return Ok(stored(true));
                }
                Err(err).with_context(|| format!("writing artifact {}", absolute_path.display()))
            }
        }
    }
}

fn slug(label: &str) -> String {
    let slug: String = label
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if slug.is_empty() {
        "unlabeled".to_string()
    } else {
        slug
    }
}
