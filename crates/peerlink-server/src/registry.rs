//! The client registry: the authoritative set of currently connected, named
//! clients.
//!
//! The registry is shared across every per-connection task and must be
//! reached through a single guard ([`SharedRegistry`]) so that each
//! add/remove and each broadcast snapshot is atomic relative to the others.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;

use peerlink_protocol::{Frame, PeerEntry};

use crate::error::RegistryError;

/// Opaque identity for one client connection, assigned at accept time.
///
/// Identity is deliberately decoupled from the transport object so records
/// can be addressed (and tested) without a live socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// One registered client: its advertised rendezvous endpoint and the outbox
/// feeding its connection's writer task.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub nickname: String,
    pub ip: String,
    pub udp_port: u16,
    outbox: mpsc::UnboundedSender<Frame>,
}

impl ClientRecord {
    /// Creates a record for a client reachable through the given outbox.
    pub fn new(
        nickname: impl Into<String>,
        ip: impl Into<String>,
        udp_port: u16,
        outbox: mpsc::UnboundedSender<Frame>,
    ) -> Self {
        Self {
            nickname: nickname.into(),
            ip: ip.into(),
            udp_port,
            outbox,
        }
    }

    /// Returns this record as a directory entry.
    pub fn entry(&self) -> PeerEntry {
        PeerEntry {
            nickname: self.nickname.clone(),
            ip: self.ip.clone(),
            udp_port: self.udp_port,
        }
    }

    /// Queues a frame for this client's writer task.
    pub fn send(&self, frame: Frame) -> bool {
        self.outbox.send(frame).is_ok()
    }
}

/// The set of currently registered clients, keyed by [`ClientId`].
#[derive(Debug, Default)]
pub struct Registry {
    clients: HashMap<ClientId, ClientRecord>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client.
    ///
    /// Fails without mutating the registry if any existing record (including
    /// the caller's own previous one) holds the nickname. On success the
    /// caller's previous record, if any, is replaced.
    pub fn register(&mut self, id: ClientId, record: ClientRecord) -> Result<(), RegistryError> {
        if self
            .clients
            .values()
            .any(|existing| existing.nickname == record.nickname)
        {
            return Err(RegistryError::DuplicateNickname {
                nickname: record.nickname,
            });
        }
        self.clients.insert(id, record);
        Ok(())
    }

    /// Removes and returns a client's record, if registered.
    pub fn unregister(&mut self, id: ClientId) -> Option<ClientRecord> {
        self.clients.remove(&id)
    }

    /// Returns a client's record, if registered.
    pub fn get(&self, id: ClientId) -> Option<&ClientRecord> {
        self.clients.get(&id)
    }

    /// Returns the number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are registered.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Returns directory entries for every client except `exclude`.
    pub fn user_list(&self, exclude: ClientId) -> Vec<PeerEntry> {
        self.clients
            .iter()
            .filter(|(id, _)| **id != exclude)
            .map(|(_, record)| record.entry())
            .collect()
    }

    /// Queues a frame to every client except `exclude`.
    ///
    /// A failed send to one recipient (its writer task is gone) is logged and
    /// never aborts delivery to the rest.
    pub fn fan_out(&self, exclude: ClientId, frame: &Frame) {
        for (id, record) in &self.clients {
            if *id == exclude {
                continue;
            }
            if !record.send(frame.clone()) {
                debug!(%id, nickname = %record.nickname, "dropping frame for dead recipient");
            }
        }
    }
}

/// The registry behind its single exclusive-access guard.
pub type SharedRegistry = Arc<RwLock<Registry>>;
