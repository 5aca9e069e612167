// crates/grapevine-publish/src/testing.rs
//
// Scriptable in-memory relay transport for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use grapevine_core::error::GrapevineError;

use crate::events::OutboundEvent;
use crate::transport::{RelayConnection, RelayTransport, Verdict};

/// What a fake endpoint does with one published event.
#[derive(Debug, Clone)]
pub enum Step {
    Accept,
    Reject(&'static str),
    /// Never answer.
    Hang,
    /// Fail the connection mid-publish.
    Break,
    /// Panic inside the publish call.
    Panic,
}

#[derive(Default)]
struct Shared {
    plans: Mutex<HashMap<String, VecDeque<Step>>>,
    publishes: Mutex<HashMap<String, usize>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

pub struct FakeTransport {
    fallback: Step,
    latency: Duration,
    unreachable: HashSet<String>,
    shared: Arc<Shared>,
}

impl FakeTransport {
    /// Every endpoint answers with `fallback` unless a plan says otherwise.
    pub fn new(fallback: Step) -> Self {
        Self {
            fallback,
            latency: Duration::ZERO,
            unreachable: HashSet::new(),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Steps consumed in order by publishes to `url` before the fallback.
    pub fn plan(self, url: &str, steps: Vec<Step>) -> Self {
        self.shared
            .plans
            .lock()
            .unwrap()
            .insert(url.to_string(), steps.into());
        self
    }

    pub fn unreachable(mut self, url: &str) -> Self {
        self.unreachable.insert(url.to_string());
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Publish calls made against `url`.
    pub fn publishes(&self, url: &str) -> usize {
        self.shared
            .publishes
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of publishes in progress at once, across endpoints.
    pub fn peak_active(&self) -> usize {
        self.shared.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayTransport for FakeTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn RelayConnection>, GrapevineError> {
        if self.unreachable.contains(url) {
            return Err(GrapevineError::Transport(format!("{} refused connection", url)));
        }
        Ok(Box::new(FakeConnection {
            url: url.to_string(),
            fallback: self.fallback.clone(),
            latency: self.latency,
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct FakeConnection {
    url: String,
    fallback: Step,
    latency: Duration,
    shared: Arc<Shared>,
}

struct ActiveGuard(Arc<Shared>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RelayConnection for FakeConnection {
    async fn publish(&mut self, _event: &OutboundEvent) -> Result<Verdict, GrapevineError> {
        *self
            .shared
            .publishes
            .lock()
            .unwrap()
            .entry(self.url.clone())
            .or_insert(0) += 1;
        let now = self.shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(Arc::clone(&self.shared));

        let step = self
            .shared
            .plans
            .lock()
            .unwrap()
            .get_mut(&self.url)
            .and_then(|plan| plan.pop_front())
            .unwrap_or_else(|| self.fallback.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match step {
            Step::Accept => Ok(Verdict::Accepted),
            Step::Reject(reason) => Ok(Verdict::Rejected(reason.to_string())),
            Step::Hang => std::future::pending().await,
            Step::Break => Err(GrapevineError::Transport("connection reset".to_string())),
            Step::Panic => panic!("relay connection panicked"),
        }
    }
}
