//! Push-channel connection: transport seam, backoff, lifecycle manager.

mod backoff;
mod manager;
mod transport;

pub use backoff::{ReconnectBackoff, ReconnectPolicy};
pub use manager::{ConnectionManager, ConnectionSnapshot, ConnectionState};
pub use transport::{PushConnector, PushStream, WsConnector};
