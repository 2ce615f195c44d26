//! The peerlink rendezvous server.
//!
//! Clients connect over TCP, register a nickname plus the UDP port their
//! rendezvous listener is bound to, and from then on receive directory
//! updates (USER_LIST / USER_JOINED / USER_LEFT) and relayed broadcasts.
//! The server never participates in peer-to-peer chat traffic; it only
//! introduces peers to each other.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use peerlink_server::{Broker, BrokerServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let broker = Arc::new(Broker::new(config.host.clone()));
//!     let server = BrokerServer::bind(config).await?;
//!     server.run(broker).await?;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod handler;
mod registry;
mod socket;

pub use config::ServerConfig;
pub use error::{RegistryError, ServerError, ServerResult};
pub use handler::{Broker, Outbox, SharedBroker};
pub use registry::{ClientId, ClientRecord, Registry, SharedRegistry};
pub use socket::BrokerServer;
