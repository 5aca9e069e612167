// crates/grapevine-daemon/src/config.rs
//
// Runtime configuration for the grapevine binary.
// Loaded from a TOML file or populated with defaults, then converted into
// the validated values each component takes.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use grapevine_core::config::{validate_pubkey, GrapeRankParams, RatingCurve};
use grapevine_core::error::GrapevineError;
use grapevine_core::relationship::RelationshipKind;
use grapevine_publish::{EndpointConfig, PublishConfig};
use grapevine_reputation::DEFAULT_CONTEXT;
use grapevine_sync::ReconcileConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct GrapevineConfig {
    /// Log level used when RUST_LOG is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Root of the on-disk layout:
    ///   <data_dir>/source/<kind>/<rater>.json   current relationships
    ///   <data_dir>/mirror/<kind>/<rater>.json   derived store's copy
    ///   <data_dir>/deltas/<kind>_to_{add,delete}.jsonl
    ///   <data_dir>/scorecards.json, scorecards_metadata.json
    ///   <data_dir>/events.jsonl                 outbound events
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Observer pubkey the trust computation is anchored at. Required.
    #[serde(default)]
    pub root_pubkey: Option<String>,

    /// Context label stamped on every rating.
    #[serde(default = "default_context")]
    pub context: String,

    #[serde(default = "default_rigor")]
    pub rigor: f64,

    #[serde(default = "default_attenuation_factor")]
    pub attenuation_factor: f64,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_convergence_threshold")]
    pub convergence_threshold: f64,

    /// Ratees scored per chunk within one propagation sweep.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default)]
    pub rating_curve: RatingCurve,

    /// Shards compared concurrently during reconciliation.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Rater batches queued for the delta writer before producers wait.
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,

    /// Log reconciliation progress every this many raters.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,

    /// Wait for a relay verdict this long before counting a publish as tentative.
    #[serde(default = "default_processing_window_ms")]
    pub processing_window_ms: u64,

    /// First retry delay; doubles per retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Cap on publish tasks in flight. Defaults to the sum of endpoint caps.
    #[serde(default)]
    pub max_in_flight: Option<usize>,

    /// Relay endpoints, primary first.
    #[serde(default)]
    pub endpoints: Vec<EndpointEntry>,
}

/// One `[[endpoints]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointEntry {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> String {
    "~/.grapevine/data".to_string()
}

fn default_context() -> String {
    DEFAULT_CONTEXT.to_string()
}

fn default_rigor() -> f64 {
    GrapeRankParams::default().rigor
}

fn default_attenuation_factor() -> f64 {
    GrapeRankParams::default().attenuation_factor
}

fn default_max_iterations() -> u32 {
    GrapeRankParams::default().max_iterations
}

fn default_convergence_threshold() -> f64 {
    GrapeRankParams::default().convergence_threshold
}

fn default_chunk_size() -> usize {
    GrapeRankParams::default().chunk_size
}

fn default_concurrency() -> usize {
    ReconcileConfig::default().concurrency
}

fn default_sink_capacity() -> usize {
    ReconcileConfig::default().sink_capacity
}

fn default_progress_interval() -> usize {
    ReconcileConfig::default().progress_interval
}

fn default_processing_window_ms() -> u64 {
    10_000
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_max_connections() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for GrapevineConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            root_pubkey: None,
            context: default_context(),
            rigor: default_rigor(),
            attenuation_factor: default_attenuation_factor(),
            max_iterations: default_max_iterations(),
            convergence_threshold: default_convergence_threshold(),
            chunk_size: default_chunk_size(),
            rating_curve: RatingCurve::default(),
            concurrency: default_concurrency(),
            sink_capacity: default_sink_capacity(),
            progress_interval: default_progress_interval(),
            processing_window_ms: default_processing_window_ms(),
            base_delay_ms: default_base_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_in_flight: None,
            endpoints: Vec::new(),
        }
    }
}

impl GrapevineConfig {
    /// Load configuration from a TOML file at the given path.
    pub fn load(path: &str) -> Result<Self, GrapevineError> {
        let contents = fs::read_to_string(expand_tilde(path)).map_err(|e| {
            GrapevineError::Configuration(format!("cannot read {}: {}", path, e))
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, GrapevineError> {
        toml::from_str(contents).map_err(|e| GrapevineError::Configuration(e.to_string()))
    }

    /// Check everything the reconcile and calculate stages need.
    /// Publishing is validated separately since it needs endpoints.
    pub fn validate(&self) -> Result<(), GrapevineError> {
        self.root_pubkey()?;
        self.graperank_params()?;
        self.rating_curve.validate()?;
        self.reconcile_config()?;
        if self.context.is_empty() {
            return Err(GrapevineError::Configuration(
                "context must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn root_pubkey(&self) -> Result<&str, GrapevineError> {
        let root = self.root_pubkey.as_deref().ok_or_else(|| {
            GrapevineError::Configuration("root_pubkey is required".to_string())
        })?;
        validate_pubkey(root)?;
        Ok(root)
    }

    pub fn graperank_params(&self) -> Result<GrapeRankParams, GrapevineError> {
        let params = GrapeRankParams {
            rigor: self.rigor,
            attenuation_factor: self.attenuation_factor,
            max_iterations: self.max_iterations,
            convergence_threshold: self.convergence_threshold,
            chunk_size: self.chunk_size,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn reconcile_config(&self) -> Result<ReconcileConfig, GrapevineError> {
        let config = ReconcileConfig {
            concurrency: self.concurrency,
            sink_capacity: self.sink_capacity,
            progress_interval: self.progress_interval,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn publish_config(&self) -> Result<PublishConfig, GrapevineError> {
        let config = PublishConfig {
            endpoints: self
                .endpoints
                .iter()
                .map(|ep| EndpointConfig {
                    url: ep.url.clone(),
                    max_connections: ep.max_connections,
                    max_attempts: ep.max_attempts,
                })
                .collect(),
            processing_window: Duration::from_millis(self.processing_window_ms),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_in_flight: self.max_in_flight,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(expand_tilde(&self.data_dir))
    }

    pub fn source_dir(&self, kind: RelationshipKind) -> PathBuf {
        self.data_dir().join("source").join(kind.as_str())
    }

    pub fn mirror_dir(&self, kind: RelationshipKind) -> PathBuf {
        self.data_dir().join("mirror").join(kind.as_str())
    }

    pub fn deltas_dir(&self) -> PathBuf {
        self.data_dir().join("deltas")
    }

    pub fn scorecards_path(&self) -> PathBuf {
        self.data_dir().join("scorecards.json")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir().join("scorecards_metadata.json")
    }

    pub fn events_path(&self) -> PathBuf {
        self.data_dir().join("events.jsonl")
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().to_string();
        }
    }
    path.to_string()
}
