// crates/grapevine-store/src/shard_dir.rs
//
// Directory-backed relationship snapshot.
//
// Layout: one JSON file per rater, `<root>/<rater>.json`, holding
// `{ "<rater>": { ... } }` in the Follow/Mute or Report shape.
// Files are read on demand, so only the shards currently being compared
// are ever in memory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use grapevine_core::error::GrapevineError;
use grapevine_core::relationship::{Pubkey, RaterShard, RelationshipKind};
use grapevine_core::traits::RelationshipSource;

const SHARD_EXTENSION: &str = "json";

/// A relationship snapshot stored as a directory of per-rater shard files.
#[derive(Debug, Clone)]
pub struct ShardDirectory {
    root: PathBuf,
    kind: RelationshipKind,
}

impl ShardDirectory {
    pub fn new(root: impl Into<PathBuf>, kind: RelationshipKind) -> Self {
        Self {
            root: root.into(),
            kind,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn shard_path(&self, rater: &str) -> PathBuf {
        self.root.join(format!("{}.{}", rater, SHARD_EXTENSION))
    }

    /// Write (replace) one rater's shard, creating the directory if needed.
    pub async fn write_shard(&self, rater: &str, shard: &RaterShard) -> Result<(), GrapevineError> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            GrapevineError::Sink(format!("Failed to create {}: {}", self.root.display(), e))
        })?;
        let body = serde_json::to_vec(&shard.to_json(rater)?)?;
        let path = self.shard_path(rater);
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| GrapevineError::Sink(format!("Failed to write {}: {}", path.display(), e)))
    }
}

#[async_trait]
impl RelationshipSource for ShardDirectory {
    fn kind(&self) -> RelationshipKind {
        self.kind
    }

    async fn list_raters(&self) -> Result<Vec<Pubkey>, GrapevineError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            // A snapshot that was never written has no raters.
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("Shard directory {} does not exist", self.root.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(GrapevineError::Storage(format!(
                    "Failed to list {}: {}",
                    self.root.display(),
                    e
                )))
            }
        };

        let mut raters = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SHARD_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                raters.push(stem.to_string());
            }
        }
        raters.sort();
        Ok(raters)
    }

    async fn read_shard(&self, rater: &str) -> Result<Option<RaterShard>, GrapevineError> {
        let path = self.shard_path(rater);
        match tokio::fs::read(&path).await {
            Ok(body) => RaterShard::parse(self.kind, rater, &body).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GrapevineError::Storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}
