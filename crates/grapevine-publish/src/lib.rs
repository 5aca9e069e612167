// crates/grapevine-publish/src/lib.rs
//
// grapevine-publish: Fan-out of finalized events to a set of relay endpoints.
//
// Each endpoint gets its own bounded connection pool. Every (event, endpoint)
// pair is delivered independently with retries and exponential backoff, so a
// failing mirror never holds back the primary or other events.

pub mod events;
pub mod fanout;
pub mod pool;
pub mod relay;
pub mod transport;

#[cfg(test)]
mod testing;

pub use events::{read_events, OutboundEvent};
pub use fanout::{
    retry_delay, Delivery, EndpointConfig, EndpointReport, PublishConfig, PublishFailure,
    PublishReport, Publisher,
};
pub use pool::{ConnectionPool, PooledConnection};
pub use relay::{parse_ok_frame, WebSocketTransport};
pub use transport::{RelayConnection, RelayTransport, Verdict};
