// crates/grapevine-publish/src/pool.rs
//
// Per-endpoint connection pool.
//
// A semaphore caps the number of connections checked out at once; tokio's
// semaphore is FIFO, so waiters are served in arrival order. Healthy
// connections go back on an idle list for reuse. A connection that is not
// explicitly released is dropped, which closes it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use grapevine_core::error::GrapevineError;

use crate::events::OutboundEvent;
use crate::transport::{RelayConnection, RelayTransport, Verdict};

pub struct ConnectionPool {
    url: String,
    max_connections: usize,
    transport: Arc<dyn RelayTransport>,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Box<dyn RelayConnection>>>,
    opened: AtomicUsize,
}

impl ConnectionPool {
    pub fn new(
        url: impl Into<String>,
        max_connections: usize,
        transport: Arc<dyn RelayTransport>,
    ) -> Self {
        let max_connections = max_connections.max(1);
        Self {
            url: url.into(),
            max_connections,
            transport,
            permits: Arc::new(Semaphore::new(max_connections)),
            idle: Mutex::new(Vec::new()),
            opened: AtomicUsize::new(0),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Connections currently checked out.
    pub fn in_use(&self) -> usize {
        self.max_connections - self.permits.available_permits()
    }

    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    /// Total connections opened over the pool's lifetime.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }

    /// Check out a connection, waiting for a free slot when the pool is at
    /// its cap. Reuses an idle connection when one is available.
    ///
    /// A failed connect gives the slot back before returning the error.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection, GrapevineError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GrapevineError::Transport(format!("pool for {} is closed", self.url)))?;

        let reused = self.idle.lock().await.pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                let conn = self.transport.connect(&self.url).await?;
                self.opened.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Opened connection to {}", self.url);
                conn
            }
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }
}

/// A checked-out connection. Holds its pool slot until dropped.
pub struct PooledConnection {
    conn: Option<Box<dyn RelayConnection>>,
    pool: Arc<ConnectionPool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub async fn publish(&mut self, event: &OutboundEvent) -> Result<Verdict, GrapevineError> {
        match self.conn.as_mut() {
            Some(conn) => conn.publish(event).await,
            None => Err(GrapevineError::Transport(
                "connection already returned to the pool".to_string(),
            )),
        }
    }

    /// Return a healthy connection to the idle list. The slot is freed
    /// after the connection is back, so the next waiter can reuse it.
    pub async fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.idle.lock().await.push(conn);
        }
    }

    /// Close the connection and free the slot.
    pub fn discard(self) {
        tracing::trace!("Discarding connection to {}", self.pool.url);
    }
}
