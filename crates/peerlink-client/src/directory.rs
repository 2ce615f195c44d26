//! The local cache of other known peers' rendezvous endpoints.

use std::collections::HashMap;

use peerlink_protocol::PeerEntry;

/// One known peer: where to send a chat request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDescriptor {
    pub nickname: String,
    pub ip: String,
    pub udp_port: u16,
}

impl From<PeerEntry> for PeerDescriptor {
    fn from(entry: PeerEntry) -> Self {
        Self {
            nickname: entry.nickname,
            ip: entry.ip,
            udp_port: entry.udp_port,
        }
    }
}

/// Directory of known peers, keyed by nickname.
///
/// Replaced wholesale on USER_LIST and edited incrementally on
/// USER_JOINED/USER_LEFT. Entries are pure directory data; no chat session
/// owns them.
#[derive(Debug, Default)]
pub struct Directory {
    peers: HashMap<String, PeerDescriptor>,
}

impl Directory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole directory with the given snapshot.
    pub fn replace_all(&mut self, entries: Vec<PeerEntry>) {
        self.peers = entries
            .into_iter()
            .map(|entry| (entry.nickname.clone(), entry.into()))
            .collect();
    }

    /// Inserts or updates a single peer.
    pub fn insert(&mut self, descriptor: PeerDescriptor) {
        self.peers.insert(descriptor.nickname.clone(), descriptor);
    }

    /// Removes a peer, returning its descriptor if it was known.
    pub fn remove(&mut self, nickname: &str) -> Option<PeerDescriptor> {
        self.peers.remove(nickname)
    }

    /// Looks up a peer by nickname.
    pub fn get(&self, nickname: &str) -> Option<&PeerDescriptor> {
        self.peers.get(nickname)
    }

    /// Returns all known nicknames, sorted.
    pub fn nicknames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.peers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of known peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns true if no peers are known.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
