//! panelcast-broker: signaling broker for capture and viewer peers.
//!
//! Accepts WebSocket connections, assigns peer ids, keeps the peer
//! directory and routes signaling messages between peers. The broker never
//! inspects negotiation payloads or media.

pub mod broker;
pub mod connection;
pub mod error;
pub mod registry;
pub mod router;
pub mod server;
pub mod tls;

pub use broker::{BrokerHandle, BrokerStats};
pub use error::BrokerError;
pub use registry::{Registry, RegistryError, RoleChange};
pub use router::{Delivery, Router, RouterStats};
pub use server::BrokerServer;
