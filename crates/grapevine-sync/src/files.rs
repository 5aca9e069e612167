// crates/grapevine-sync/src/files.rs
//
// File layout for delta streams: `<out_dir>/<kind>_to_add.jsonl` and
// `<out_dir>/<kind>_to_delete.jsonl`, truncated at the start of each run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::AsyncBufReadExt;

use grapevine_core::error::GrapevineError;
use grapevine_core::relationship::{DeltaLine, RelationshipKind};
use grapevine_core::shutdown::ShutdownSignal;
use grapevine_core::traits::RelationshipSource;

use crate::reconcile::{ReconcileReport, Reconciler};

/// Paths of the add and delete streams for `kind` under `out_dir`.
pub fn delta_paths(out_dir: &Path, kind: RelationshipKind) -> (PathBuf, PathBuf) {
    (
        out_dir.join(format!("{}_to_add.jsonl", kind)),
        out_dir.join(format!("{}_to_delete.jsonl", kind)),
    )
}

async fn create(path: &Path) -> Result<File, GrapevineError> {
    File::create(path)
        .await
        .map_err(|e| GrapevineError::Sink(format!("Failed to create {}: {}", path.display(), e)))
}

/// Reconcile one kind and write both delta streams under `out_dir`.
pub async fn reconcile_to_dir(
    reconciler: &Reconciler,
    source: Arc<dyn RelationshipSource>,
    mirror: Arc<dyn RelationshipSource>,
    out_dir: &Path,
    shutdown: &ShutdownSignal,
) -> Result<ReconcileReport, GrapevineError> {
    tokio::fs::create_dir_all(out_dir).await.map_err(|e| {
        GrapevineError::Sink(format!("Failed to create {}: {}", out_dir.display(), e))
    })?;
    let (add_path, delete_path) = delta_paths(out_dir, source.kind());
    let adds = create(&add_path).await?;
    let deletes = create(&delete_path).await?;

    let (report, adds, deletes) = reconciler
        .reconcile_to_writers(source, mirror, adds, deletes, shutdown)
        .await?;
    for (file, path) in [(adds, &add_path), (deletes, &delete_path)] {
        file.sync_all().await.map_err(|e| {
            GrapevineError::Sink(format!("Failed to sync {}: {}", path.display(), e))
        })?;
    }
    Ok(report)
}

/// Reconcile several kinds in sequence into the same `out_dir`, one
/// `(source, mirror)` pair per kind. Kinds after a cancelled run are skipped.
pub async fn reconcile_all(
    reconciler: &Reconciler,
    snapshots: Vec<(Arc<dyn RelationshipSource>, Arc<dyn RelationshipSource>)>,
    out_dir: &Path,
    shutdown: &ShutdownSignal,
) -> Result<Vec<ReconcileReport>, GrapevineError> {
    let mut reports = Vec::with_capacity(snapshots.len());
    for (source, mirror) in snapshots {
        let report = reconcile_to_dir(reconciler, source, mirror, out_dir, shutdown).await?;
        let cancelled = report.cancelled;
        reports.push(report);
        if cancelled {
            tracing::info!("Reconciliation cancelled; remaining kinds skipped");
            break;
        }
    }
    Ok(reports)
}

/// Read a delta stream back. Blank lines are ignored.
pub async fn read_delta_file(path: &Path) -> Result<Vec<DeltaLine>, GrapevineError> {
    let file = File::open(path).await.map_err(|e| {
        GrapevineError::Storage(format!("Failed to open {}: {}", path.display(), e))
    })?;
    let mut lines = tokio::io::BufReader::new(file).lines();
    let mut out = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line)?);
    }
    Ok(out)
}
