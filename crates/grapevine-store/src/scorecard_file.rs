// crates/grapevine-store/src/scorecard_file.rs
//
// JSON-file scorecard store.
//
// Scorecards: `{ "<pubkey>": [influence, average, confidence, input], ... }`
// Run metadata: the most recent `CalculationRun` as a JSON object.
//
// Both files are written to a sibling `.tmp` path and renamed into place so a
// failed write never leaves a truncated store behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use grapevine_core::error::GrapevineError;
use grapevine_core::scorecard::{CalculationRun, ScorecardMap};
use grapevine_core::traits::ScorecardSink;

/// Scorecard store backed by two JSON files.
#[derive(Debug, Clone)]
pub struct JsonScorecardStore {
    scorecards_path: PathBuf,
    metadata_path: PathBuf,
}

impl JsonScorecardStore {
    pub fn new(scorecards_path: impl Into<PathBuf>, metadata_path: impl Into<PathBuf>) -> Self {
        Self {
            scorecards_path: scorecards_path.into(),
            metadata_path: metadata_path.into(),
        }
    }

    pub fn scorecards_path(&self) -> &Path {
        &self.scorecards_path
    }

    /// Read the last written run metadata, if any.
    pub async fn load_run(&self) -> Result<Option<CalculationRun>, GrapevineError> {
        match tokio::fs::read(&self.metadata_path).await {
            Ok(body) => Ok(Some(serde_json::from_slice(&body)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GrapevineError::Storage(format!(
                "Failed to read {}: {}",
                self.metadata_path.display(),
                e
            ))),
        }
    }
}

/// Write `body` to `path` via a temporary file and rename.
async fn write_replace(path: &Path, body: &[u8]) -> Result<(), GrapevineError> {
    let sink_err = |e: std::io::Error| {
        GrapevineError::Sink(format!("Failed to write {}: {}", path.display(), e))
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(sink_err)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, body).await.map_err(sink_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(sink_err)
}

#[async_trait]
impl ScorecardSink for JsonScorecardStore {
    async fn load_scorecards(&self) -> Result<Option<ScorecardMap>, GrapevineError> {
        match tokio::fs::read(&self.scorecards_path).await {
            Ok(body) => {
                let map: ScorecardMap = serde_json::from_slice(&body)?;
                tracing::debug!(
                    "Loaded {} scorecards from {}",
                    map.len(),
                    self.scorecards_path.display()
                );
                Ok(Some(map))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GrapevineError::Storage(format!(
                "Failed to read {}: {}",
                self.scorecards_path.display(),
                e
            ))),
        }
    }

    async fn save_scorecards(&self, scorecards: &ScorecardMap) -> Result<(), GrapevineError> {
        let body = serde_json::to_vec(scorecards)?;
        write_replace(&self.scorecards_path, &body).await?;
        tracing::info!(
            "Wrote {} scorecards to {}",
            scorecards.len(),
            self.scorecards_path.display()
        );
        Ok(())
    }

    async fn save_run(&self, run: &CalculationRun) -> Result<(), GrapevineError> {
        let body = serde_json::to_vec_pretty(run)?;
        write_replace(&self.metadata_path, &body).await
    }
}
