//! The peerlink client.
//!
//! A client registers with the rendezvous server over TCP, keeps a local
//! directory of peers from the server's notifications, and upgrades
//! directory entries into direct peer-to-peer chat sessions via a UDP
//! signaling handshake followed by a TCP connection between the peers,
//! independent of the server once established.
//!
//! The library is frontend-agnostic: [`ChatClient`] exposes the operations
//! and everything user-visible arrives as [`Event`]s on a channel. The
//! bundled [`cli`] module is one thin frontend over it.

mod chat;
mod client;
mod directory;
mod error;
mod event;
mod server_link;
mod session;

pub mod cli;

pub use client::{ChatClient, ClientConfig};
pub use directory::{Directory, PeerDescriptor};
pub use error::{ClientError, ClientResult};
pub use event::{Event, EventReceiver, EventSender};
pub use server_link::ServerLink;
pub use session::{AcceptPolicy, DEFAULT_REQUEST_TIMEOUT, Identity, SessionManager};
