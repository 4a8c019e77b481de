//! Key-management tunnel interfaces
//!
//! The dispatcher does not run DTLS itself. Handshake records are handed to a
//! [`KeyManagementTunnel`], and whatever the key-management side wants to send
//! back to a peer comes in through a [`MediaDistributor`].
//!
//! ```text
//!   peer --DTLS--> MediaDispatcher --KeyManagementTunnel--> key server
//!   peer <--DTLS-- MediaDispatcher <--MediaDistributor----- key server
//! ```

pub mod udp;

use async_trait::async_trait;
use bytes::Bytes;

use crate::association::AssociationId;
use crate::error::Result;
use crate::srtp::{ProtectionProfile, SrtpKeys};

pub use udp::UdpForwarder;

/// Outbound side: where the dispatcher sends DTLS records
#[async_trait]
pub trait KeyManagementTunnel: Send + Sync {
    /// Forward a DTLS record from a peer
    async fn send(&self, association: AssociationId, record: Bytes) -> Result<()>;

    /// Forward a ClientHello together with the SRTP profiles on offer
    async fn send_with_profiles(
        &self,
        association: AssociationId,
        record: Bytes,
        profiles: &[ProtectionProfile],
    ) -> Result<()>;

    /// Install hop-by-hop keys for an association
    async fn set_keys(&self, association: AssociationId, keys: SrtpKeys) -> Result<()>;
}

/// Inbound side: how the key-management side reaches peers
#[async_trait]
pub trait MediaDistributor: Send + Sync {
    /// Deliver a DTLS record to a peer
    async fn send(&self, association: AssociationId, record: Bytes) -> Result<()>;

    /// Deliver a DTLS record and record the keys negotiated for the peer
    async fn send_with_keys(
        &self,
        association: AssociationId,
        record: Bytes,
        profile: ProtectionProfile,
        keys: SrtpKeys,
    ) -> Result<()>;
}
