//! Connection manager for one logical WebSocket connection.
//!
//! Accepts outbound frames in any connection state (parking them in a
//! bounded queue while disconnected), reconnects with exponential
//! backoff after abnormal closures, sends periodic liveness pings, and
//! matches correlated replies to waiting callers.

mod batch;
pub mod manager;
mod pending;
mod pumps;
mod queue;
pub(crate) mod reconnection;
pub mod stats;
pub mod transport;
pub mod types;

pub use manager::ConnectionManager;
pub use stats::{ConnectionStats, StatsSnapshot};
pub use transport::ConnectionError;
pub use types::{
    ConnectionEvent, ConnectionState, ManagerConfig, ReconnectConfig, SendStatus,
};
