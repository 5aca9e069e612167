// crates/grapevine-sync/src/sink.rs
//
// Serializing delta sink.
//
// A single writer task owns both output streams (adds and deletes). Shard
// workers hand off one batch per rater through a bounded channel, so a slow
// disk makes producers wait instead of buffering deltas without limit.

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use grapevine_core::error::GrapevineError;
use grapevine_core::relationship::{DeltaLine, DeltaOperation, RelationshipDelta};

/// Number of deltas written to each stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkTotals {
    pub adds: u64,
    pub deletes: u64,
}

/// Producer handle for the delta sink. Cheap to clone into workers.
#[derive(Debug, Clone)]
pub struct DeltaSender {
    tx: mpsc::Sender<Vec<RelationshipDelta>>,
}

impl DeltaSender {
    /// Hand a batch to the writer, waiting while the channel is full.
    pub async fn send(&self, batch: Vec<RelationshipDelta>) -> Result<(), GrapevineError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.tx
            .send(batch)
            .await
            .map_err(|_| GrapevineError::Sink("delta sink writer has stopped".to_string()))
    }
}

/// The writer task plus the channel feeding it.
pub struct DeltaSink<A, D> {
    sender: DeltaSender,
    handle: JoinHandle<Result<(SinkTotals, A, D), GrapevineError>>,
}

impl<A, D> DeltaSink<A, D>
where
    A: AsyncWrite + Unpin + Send + 'static,
    D: AsyncWrite + Unpin + Send + 'static,
{
    /// Spawn the writer task. `capacity` is the number of rater batches that
    /// may be queued before producers block.
    pub fn spawn(adds: A, deletes: D, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(write_loop(rx, adds, deletes));
        Self {
            sender: DeltaSender { tx },
            handle,
        }
    }

    pub fn sender(&self) -> DeltaSender {
        self.sender.clone()
    }

    /// Close the channel, wait for every queued batch to be written and
    /// flushed, and hand back the underlying writers.
    ///
    /// All cloned senders must be dropped first or this waits forever.
    pub async fn finish(self) -> Result<(SinkTotals, A, D), GrapevineError> {
        drop(self.sender);
        self.handle
            .await
            .map_err(|e| GrapevineError::Sink(format!("delta sink writer panicked: {}", e)))?
    }
}

async fn write_loop<A, D>(
    mut rx: mpsc::Receiver<Vec<RelationshipDelta>>,
    adds: A,
    deletes: D,
) -> Result<(SinkTotals, A, D), GrapevineError>
where
    A: AsyncWrite + Unpin + Send,
    D: AsyncWrite + Unpin + Send,
{
    let mut adds = BufWriter::new(adds);
    let mut deletes = BufWriter::new(deletes);
    let mut totals = SinkTotals::default();
    let mut line = Vec::with_capacity(256);

    while let Some(batch) = rx.recv().await {
        for delta in &batch {
            line.clear();
            serde_json::to_writer(&mut line, &DeltaLine::from(delta))?;
            line.push(b'\n');
            match delta.operation {
                DeltaOperation::Add => {
                    adds.write_all(&line).await.map_err(sink_io)?;
                    totals.adds += 1;
                }
                DeltaOperation::Delete => {
                    deletes.write_all(&line).await.map_err(sink_io)?;
                    totals.deletes += 1;
                }
            }
        }
    }

    adds.flush().await.map_err(sink_io)?;
    deletes.flush().await.map_err(sink_io)?;
    tracing::debug!(
        "Delta sink drained: {} adds, {} deletes",
        totals.adds,
        totals.deletes
    );
    Ok((totals, adds.into_inner(), deletes.into_inner()))
}

fn sink_io(e: std::io::Error) -> GrapevineError {
    GrapevineError::Sink(format!("delta write failed: {}", e))
}
