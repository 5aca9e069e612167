// crates/grapevine-sync/src/lib.rs
//
// grapevine-sync: Relationship snapshot reconciliation for the Grapevine
// trust pipeline.
//
// Compares a relay-derived Source snapshot with a graph-derived Mirror
// snapshot rater by rater, and streams the edges to add and delete through a
// single backpressured writer.

pub mod files;
pub mod reconcile;
pub mod sink;

pub use files::{delta_paths, read_delta_file, reconcile_all, reconcile_to_dir};
pub use reconcile::{diff_shards, ReconcileConfig, ReconcileReport, Reconciler};
pub use sink::{DeltaSender, DeltaSink, SinkTotals};
