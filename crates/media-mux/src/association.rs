//! Peer associations
//!
//! An association is the logical identity of one remote peer. Its identifier
//! is derived one-way from the peer's transport address, so the same address
//! always maps to the same [`AssociationId`]. Identifiers are not guaranteed
//! to be collision-free; the width of the truncated digest is configurable.
//!
//! The [`AssociationRegistry`] maps identifiers back to addresses and keeps
//! the SRTP profile/keys negotiated for each association.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::srtp::{ProtectionProfile, SrtpKeys};

/// Number of digest bytes kept for a narrow identifier
const NARROW_ID_BYTES: usize = 2;

/// How many bits of the address digest make up an association identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssociationIdWidth {
    /// 128-bit identifier (first 16 bytes of the SHA-256 digest)
    #[default]
    Wide,
    /// 16-bit identifier (first 2 bytes of the digest, rest zero)
    Narrow,
}

/// Opaque identifier of a peer association
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AssociationId([u8; AssociationId::LEN]);

impl AssociationId {
    /// Size of an identifier in bytes
    pub const LEN: usize = 16;

    /// Build an identifier from raw bytes
    pub const fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// Raw identifier bytes
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// Derive the identifier of a transport address
    ///
    /// SHA-256 over the textual form of the address (`ip:port`, IPv6 in
    /// brackets), truncated to the requested width.
    pub fn derive(addr: &SocketAddr, width: AssociationIdWidth) -> Self {
        let digest = Sha256::digest(addr.to_string().as_bytes());

        let keep = match width {
            AssociationIdWidth::Wide => Self::LEN,
            AssociationIdWidth::Narrow => NARROW_ID_BYTES,
        };

        let mut id = [0u8; Self::LEN];
        id[..keep].copy_from_slice(&digest[..keep]);
        Self(id)
    }

    /// Lowercase hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<u128> for AssociationId {
    fn from(value: u128) -> Self {
        Self(value.to_be_bytes())
    }
}

impl fmt::Display for AssociationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for AssociationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssociationId({})", self.to_hex())
    }
}

impl FromStr for AssociationId {
    type Err = hex::FromHexError;

    /// Parse the hex form. Shorter input fills the leading bytes and leaves
    /// the rest zero.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = hex::decode(s)?;
        if decoded.len() > Self::LEN {
            return Err(hex::FromHexError::InvalidStringLength);
        }

        let mut id = [0u8; Self::LEN];
        id[..decoded.len()].copy_from_slice(&decoded);
        Ok(Self(id))
    }
}

/// SRTP parameters negotiated for one association
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedKeys {
    /// Selected protection profile
    pub profile: ProtectionProfile,
    /// Exported key material
    pub keys: SrtpKeys,
}

/// What the registry knows about one peer
#[derive(Debug, Clone)]
pub struct PeerEntry {
    /// Address the association was first seen from
    pub address: SocketAddr,
    /// Keys delivered through `send_with_keys`, if any
    pub keys: Option<NegotiatedKeys>,
    /// When the first datagram arrived
    pub first_seen: Instant,
    /// When the latest datagram arrived
    pub last_seen: Instant,
}

/// Association id ⇄ address map
///
/// Entries are created from inbound traffic and never replaced: the first
/// address seen for an identifier stays authoritative.
#[derive(Debug)]
pub struct AssociationRegistry {
    width: AssociationIdWidth,
    peers: HashMap<AssociationId, PeerEntry>,
}

impl AssociationRegistry {
    /// Create an empty registry deriving identifiers at `width`
    pub fn new(width: AssociationIdWidth) -> Self {
        Self {
            width,
            peers: HashMap::new(),
        }
    }

    /// Identifier width used by this registry
    pub fn width(&self) -> AssociationIdWidth {
        self.width
    }

    /// Derive the identifier of an address without touching any state
    pub fn resolve(&self, addr: &SocketAddr) -> AssociationId {
        AssociationId::derive(addr, self.width)
    }

    /// Resolve an address and register it if the identifier is new
    ///
    /// An existing entry keeps its address even if `addr` differs.
    pub fn lookup_or_register(&mut self, addr: SocketAddr) -> AssociationId {
        let id = self.resolve(&addr);
        let now = Instant::now();

        self.peers
            .entry(id)
            .and_modify(|entry| entry.last_seen = now)
            .or_insert_with(|| {
                debug!("Registered new association {} for {}", id, addr);
                PeerEntry {
                    address: addr,
                    keys: None,
                    first_seen: now,
                    last_seen: now,
                }
            });

        id
    }

    /// Address registered for an association
    pub fn address_of(&self, id: &AssociationId) -> Option<SocketAddr> {
        self.peers.get(id).map(|entry| entry.address)
    }

    /// Every known address except the one of `id`
    pub fn addresses_excluding<'a>(
        &'a self,
        id: &'a AssociationId,
    ) -> impl Iterator<Item = SocketAddr> + 'a {
        self.peers
            .iter()
            .filter(move |(peer_id, _)| *peer_id != id)
            .map(|(_, entry)| entry.address)
    }

    /// Whether the association has been seen
    pub fn contains(&self, id: &AssociationId) -> bool {
        self.peers.contains_key(id)
    }

    /// Full entry of an association
    pub fn get(&self, id: &AssociationId) -> Option<&PeerEntry> {
        self.peers.get(id)
    }

    /// Store the negotiated profile and keys of an association
    ///
    /// Returns false, storing nothing, if the association is unknown.
    pub fn set_keys(&mut self, id: &AssociationId, profile: ProtectionProfile, keys: SrtpKeys) -> bool {
        match self.peers.get_mut(id) {
            Some(entry) => {
                entry.keys = Some(NegotiatedKeys { profile, keys });
                true
            }
            None => false,
        }
    }

    /// Negotiated profile and keys of an association
    pub fn keys_of(&self, id: &AssociationId) -> Option<&NegotiatedKeys> {
        self.peers.get(id).and_then(|entry| entry.keys.as_ref())
    }

    /// Drop every association that has not been seen within `max_idle`
    ///
    /// Returns the number of removed entries.
    pub fn prune_idle(&mut self, max_idle: Duration) -> usize {
        let before = self.peers.len();
        let now = Instant::now();
        self.peers
            .retain(|_, entry| now.duration_since(entry.last_seen) < max_idle);
        before - self.peers.len()
    }

    /// Every known association with its address, sorted by id
    pub fn snapshot(&self) -> Vec<(AssociationId, SocketAddr)> {
        let mut peers: Vec<_> = self
            .peers
            .iter()
            .map(|(id, entry)| (*id, entry.address))
            .collect();
        peers.sort_unstable_by_key(|(id, _)| *id);
        peers
    }

    /// Number of known associations
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no association is known
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl Default for AssociationRegistry {
    fn default() -> Self {
        Self::new(AssociationIdWidth::default())
    }
}
