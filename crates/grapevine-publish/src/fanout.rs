// crates/grapevine-publish/src/fanout.rs
//
// Fan-out of outbound events to every configured endpoint.
//
// Each (event, endpoint) pair is an independent task with its own retry
// budget. Outcomes per attempt:
//   - explicit acceptance          -> Accepted, done
//   - no verdict within the window -> Tentative, done (counted as success)
//   - rejection or transport error -> retried after base_delay * 2^(n-1)
// Exhausting the budget records a permanent failure for that pair only.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};

use grapevine_core::error::GrapevineError;
use grapevine_core::shutdown::ShutdownSignal;

use crate::events::OutboundEvent;
use crate::pool::ConnectionPool;
use crate::transport::{RelayTransport, Verdict};

/// One publication endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub url: String,
    /// Cap on simultaneous connections to this endpoint.
    pub max_connections: usize,
    /// Attempts per event before giving up, including the first.
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishConfig {
    pub endpoints: Vec<EndpointConfig>,
    /// How long an attempt waits for a verdict before counting as tentative.
    pub processing_window: Duration,
    /// Delay before the first retry; doubles with each further retry.
    pub base_delay: Duration,
    /// Cap on publish tasks in flight. Defaults to the sum of endpoint caps.
    pub max_in_flight: Option<usize>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            processing_window: Duration::from_secs(10),
            base_delay: Duration::from_millis(500),
            max_in_flight: None,
        }
    }
}

impl PublishConfig {
    pub fn validate(&self) -> Result<(), GrapevineError> {
        if self.endpoints.is_empty() {
            return Err(GrapevineError::Configuration(
                "at least one publish endpoint is required".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for ep in &self.endpoints {
            if !(ep.url.starts_with("ws://") || ep.url.starts_with("wss://")) {
                return Err(GrapevineError::Configuration(format!(
                    "endpoint {:?} must be a ws:// or wss:// URL",
                    ep.url
                )));
            }
            if !seen.insert(ep.url.as_str()) {
                return Err(GrapevineError::Configuration(format!(
                    "endpoint {} is listed twice",
                    ep.url
                )));
            }
            if ep.max_connections == 0 {
                return Err(GrapevineError::Configuration(format!(
                    "endpoint {}: max_connections must be at least 1",
                    ep.url
                )));
            }
            if ep.max_attempts == 0 {
                return Err(GrapevineError::Configuration(format!(
                    "endpoint {}: max_attempts must be at least 1",
                    ep.url
                )));
            }
        }
        if self.processing_window.is_zero() {
            return Err(GrapevineError::Configuration(
                "processing_window must be greater than zero".to_string(),
            ));
        }
        if self.max_in_flight == Some(0) {
            return Err(GrapevineError::Configuration(
                "max_in_flight must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn in_flight_limit(&self) -> usize {
        self.max_in_flight
            .unwrap_or_else(|| self.endpoints.iter().map(|ep| ep.max_connections).sum())
            .max(1)
    }
}

/// Delay before retrying after the `failed_attempt`-th attempt (1-based).
pub fn retry_delay(base: Duration, failed_attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(failed_attempt.saturating_sub(1)))
}

/// Final outcome for one (event, endpoint) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    Accepted,
    Tentative,
    Failed,
    /// Shutdown fired before a retry could run.
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EndpointReport {
    pub url: String,
    pub accepted: u64,
    pub tentative: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Attempts made, including retries.
    pub attempts: u64,
}

impl EndpointReport {
    /// Pairs counted as successful (accepted or tentative).
    pub fn delivered(&self) -> u64 {
        self.accepted + self.tentative
    }
}

/// A pair that exhausted its retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishFailure {
    pub event_id: String,
    pub endpoint: String,
    pub attempts: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishReport {
    pub events: usize,
    pub endpoints: Vec<EndpointReport>,
    pub failures: Vec<PublishFailure>,
    /// Shutdown stopped the run before every pair was dispatched.
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl PublishReport {
    pub fn endpoint(&self, url: &str) -> Option<&EndpointReport> {
        self.endpoints.iter().find(|ep| ep.url == url)
    }

    /// Count one settled pair. A task that died without a result is counted
    /// as a failure of the pair it was spawned for.
    fn record(&mut self, joined: Result<(Id, PairResult), JoinError>, pending: &mut PendingPairs) {
        let pair = match joined {
            Ok((id, pair)) => {
                pending.remove(&id);
                pair
            }
            Err(e) => {
                tracing::error!("Publish task failed: {}", e);
                let Some((endpoint, event_id)) = pending.remove(&e.id()) else {
                    return;
                };
                PairResult {
                    endpoint,
                    event_id,
                    delivery: Delivery::Failed,
                    attempts: 0,
                    last_error: Some(e.to_string()),
                }
            }
        };
        let ep = &mut self.endpoints[pair.endpoint];
        ep.attempts += u64::from(pair.attempts);
        match pair.delivery {
            Delivery::Accepted => ep.accepted += 1,
            Delivery::Tentative => ep.tentative += 1,
            Delivery::Cancelled => ep.cancelled += 1,
            Delivery::Failed => {
                ep.failed += 1;
                self.failures.push(PublishFailure {
                    event_id: pair.event_id,
                    endpoint: ep.url.clone(),
                    attempts: pair.attempts,
                    reason: pair.last_error.unwrap_or_default(),
                });
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_attempts: u32,
    processing_window: Duration,
    base_delay: Duration,
}

/// Endpoint index and event id of each spawned pair, by task.
type PendingPairs = HashMap<Id, (usize, String)>;

struct PairResult {
    endpoint: usize,
    event_id: String,
    delivery: Delivery,
    attempts: u32,
    last_error: Option<String>,
}

enum Attempt {
    Accepted,
    Tentative,
    Failed(String),
}

/// Delivers events to a fixed set of endpoints.
pub struct Publisher {
    config: PublishConfig,
    pools: Vec<Arc<ConnectionPool>>,
}

impl Publisher {
    pub fn new(
        config: PublishConfig,
        transport: Arc<dyn RelayTransport>,
    ) -> Result<Self, GrapevineError> {
        config.validate()?;
        let pools = config
            .endpoints
            .iter()
            .map(|ep| {
                Arc::new(ConnectionPool::new(
                    ep.url.clone(),
                    ep.max_connections,
                    Arc::clone(&transport),
                ))
            })
            .collect();
        Ok(Self { config, pools })
    }

    pub fn config(&self) -> &PublishConfig {
        &self.config
    }

    pub fn pools(&self) -> &[Arc<ConnectionPool>] {
        &self.pools
    }

    /// Publish every event to every endpoint and wait for all pairs to
    /// settle. Shutdown stops new pairs from being dispatched; pairs already
    /// running finish their current attempt.
    pub async fn publish_all(
        &self,
        events: Vec<OutboundEvent>,
        shutdown: &ShutdownSignal,
    ) -> PublishReport {
        let started = Instant::now();
        let mut report = PublishReport {
            events: events.len(),
            endpoints: self
                .config
                .endpoints
                .iter()
                .map(|ep| EndpointReport {
                    url: ep.url.clone(),
                    ..EndpointReport::default()
                })
                .collect(),
            ..PublishReport::default()
        };

        tracing::info!(
            "Publishing {} events to {} endpoints",
            events.len(),
            self.pools.len()
        );

        let in_flight = Arc::new(Semaphore::new(self.config.in_flight_limit()));
        let mut tasks = JoinSet::new();
        let mut pending = PendingPairs::new();

        'events: for event in events {
            let event = Arc::new(event);
            for (idx, pool) in self.pools.iter().enumerate() {
                if shutdown.is_triggered() {
                    tracing::info!("Shutdown requested, no further events will be dispatched");
                    report.cancelled = true;
                    break 'events;
                }
                let Ok(permit) = Arc::clone(&in_flight).acquire_owned().await else {
                    break 'events;
                };
                let pool = Arc::clone(pool);
                let event = Arc::clone(&event);
                let policy = self.policy(idx);
                let shutdown = shutdown.clone();
                let event_id = event.id().to_string();
                let handle = tasks.spawn(async move {
                    let result = deliver(idx, &pool, &event, policy, shutdown).await;
                    drop(permit);
                    result
                });
                pending.insert(handle.id(), (idx, event_id));
                while let Some(joined) = tasks.try_join_next_with_id() {
                    report.record(joined, &mut pending);
                }
            }
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            report.record(joined, &mut pending);
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        for ep in &report.endpoints {
            tracing::info!(
                "{}: {} accepted, {} tentative, {} failed, {} cancelled ({} attempts)",
                ep.url,
                ep.accepted,
                ep.tentative,
                ep.failed,
                ep.cancelled,
                ep.attempts
            );
        }
        report
    }

    fn policy(&self, idx: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.config.endpoints[idx].max_attempts,
            processing_window: self.config.processing_window,
            base_delay: self.config.base_delay,
        }
    }
}

async fn deliver(
    endpoint: usize,
    pool: &Arc<ConnectionPool>,
    event: &OutboundEvent,
    policy: RetryPolicy,
    mut shutdown: ShutdownSignal,
) -> PairResult {
    let mut result = PairResult {
        endpoint,
        event_id: event.id().to_string(),
        delivery: Delivery::Failed,
        attempts: 0,
        last_error: None,
    };

    for attempt in 1..=policy.max_attempts {
        if attempt > 1 {
            let delay = retry_delay(policy.base_delay, attempt - 1);
            tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    result.delivery = Delivery::Cancelled;
                    return result;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        result.attempts = attempt;
        match attempt_once(pool, event, policy.processing_window).await {
            Attempt::Accepted => {
                tracing::debug!("Event {} accepted by {}", event.id(), pool.url());
                result.delivery = Delivery::Accepted;
                result.last_error = None;
                return result;
            }
            Attempt::Tentative => {
                tracing::debug!(
                    "Event {}: no verdict from {} within {:?}, treating as delivered",
                    event.id(),
                    pool.url(),
                    policy.processing_window
                );
                result.delivery = Delivery::Tentative;
                result.last_error = None;
                return result;
            }
            Attempt::Failed(reason) => {
                tracing::debug!(
                    "Event {} attempt {}/{} to {} failed: {}",
                    event.id(),
                    attempt,
                    policy.max_attempts,
                    pool.url(),
                    reason
                );
                result.last_error = Some(reason);
            }
        }
    }

    tracing::warn!(
        "Giving up on event {} at {} after {} attempts: {}",
        event.id(),
        pool.url(),
        result.attempts,
        result.last_error.as_deref().unwrap_or("unknown error")
    );
    result
}

async fn attempt_once(
    pool: &Arc<ConnectionPool>,
    event: &OutboundEvent,
    window: Duration,
) -> Attempt {
    let mut conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(e) => return Attempt::Failed(e.to_string()),
    };

    match tokio::time::timeout(window, conn.publish(event)).await {
        Ok(Ok(Verdict::Accepted)) => {
            conn.release().await;
            Attempt::Accepted
        }
        Ok(Ok(Verdict::Rejected(reason))) => {
            conn.release().await;
            Attempt::Failed(
                GrapevineError::Rejected {
                    endpoint: pool.url().to_string(),
                    reason,
                }
                .to_string(),
            )
        }
        Ok(Err(e)) => {
            conn.discard();
            Attempt::Failed(e.to_string())
        }
        Err(_) => {
            // A late verdict would be read by the next publish on this
            // connection, so it is not reused.
            conn.discard();
            Attempt::Tentative
        }
    }
}
