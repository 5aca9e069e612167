// crates/grapevine-store/src/lib.rs
//
// grapevine-store: Storage collaborators for the Grapevine trust pipeline.
//
// Provides directory-backed relationship snapshots (one JSON shard per
// rater), a JSON-file scorecard store with run metadata, and in-memory
// implementations of both traits for tests and small graphs.

pub mod memory;
pub mod scorecard_file;
pub mod shard_dir;

// Re-export key types for ergonomic access from downstream crates.
pub use memory::{MemoryScorecardSink, MemorySnapshot};
pub use scorecard_file::JsonScorecardStore;
pub use shard_dir::ShardDirectory;
