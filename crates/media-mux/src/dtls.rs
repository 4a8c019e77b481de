//! DTLS record routing
//!
//! Handshake records are never terminated locally; they are passed to the
//! key-management tunnel. A ClientHello additionally carries the SRTP
//! protection profiles the dispatcher is configured to offer.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::association::AssociationId;
use crate::srtp::ProtectionProfile;
use crate::tunnel::KeyManagementTunnel;

/// DTLS content type for handshake records
const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;

/// Handshake type of a ClientHello
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;

/// Offset of the handshake type: 13-byte DTLS record header precedes it
const HANDSHAKE_TYPE_OFFSET: usize = 13;

/// Whether a record is a DTLS ClientHello
pub fn is_client_hello(data: &[u8]) -> bool {
    data.len() > HANDSHAKE_TYPE_OFFSET
        && data[0] == CONTENT_TYPE_HANDSHAKE
        && data[HANDSHAKE_TYPE_OFFSET] == HANDSHAKE_CLIENT_HELLO
}

/// Hands DTLS records to a key-management tunnel
#[derive(Clone)]
pub struct DtlsRouter {
    tunnel: Arc<dyn KeyManagementTunnel>,
    profiles: Vec<ProtectionProfile>,
}

impl DtlsRouter {
    /// Create a router offering `profiles` on every ClientHello
    pub fn new(tunnel: Arc<dyn KeyManagementTunnel>, profiles: Vec<ProtectionProfile>) -> Self {
        Self { tunnel, profiles }
    }

    /// Tunnel records are routed to
    pub fn tunnel(&self) -> &Arc<dyn KeyManagementTunnel> {
        &self.tunnel
    }

    /// Profiles offered on ClientHello
    pub fn profiles(&self) -> &[ProtectionProfile] {
        &self.profiles
    }

    /// Route one record; tunnel failures are logged and the record dropped
    pub async fn route(&self, association: AssociationId, record: Bytes) {
        let len = record.len();
        let result = if is_client_hello(&record) {
            debug!("ClientHello from {}, offering {} profile(s)", association, self.profiles.len());
            self.tunnel
                .send_with_profiles(association, record, &self.profiles)
                .await
        } else {
            self.tunnel.send(association, record).await
        };

        if let Err(e) = result {
            warn!("Dropping {} byte DTLS record from {}: {}", len, association, e);
        }
    }
}

impl std::fmt::Debug for DtlsRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DtlsRouter")
            .field("profiles", &self.profiles)
            .finish_non_exhaustive()
    }
}
