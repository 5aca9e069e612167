// crates/grapevine-publish/src/transport.rs

use async_trait::async_trait;

use grapevine_core::error::GrapevineError;

use crate::events::OutboundEvent;

/// An endpoint's explicit answer to one published event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    /// Rejected, with the endpoint's reason.
    Rejected(String),
}

/// One open connection to an endpoint.
///
/// `publish` sends the event and waits for the matching verdict. It does not
/// apply its own deadline; the caller bounds it with the processing window.
/// An `Err` means the connection is broken and must not be reused.
#[async_trait]
pub trait RelayConnection: Send {
    async fn publish(&mut self, event: &OutboundEvent) -> Result<Verdict, GrapevineError>;
}

/// Opens connections to endpoints.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn RelayConnection>, GrapevineError>;
}
