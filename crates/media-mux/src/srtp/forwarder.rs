//! SRTP forwarding policies
//!
//! Media is relayed as-is. Two policies exist:
//!
//! - [`SrtpPolicy::BroadcastExclusion`] fans a packet out to every known peer
//!   except the sender. Write failures to one peer do not stop delivery to the
//!   others.
//! - [`SrtpPolicy::Unicast`] sends a packet to the address registered for its
//!   association only, and fails for an unregistered association.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tracing::{trace, warn};

use crate::association::{AssociationId, AssociationRegistry};
use crate::error::{Error, Result};

/// How SRTP packets are relayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SrtpPolicy {
    /// Send to every known peer except the sender
    #[default]
    BroadcastExclusion,
    /// Send to the registered address of the packet's association
    Unicast,
}

/// Applies an [`SrtpPolicy`] to received SRTP packets
#[derive(Debug, Clone, Copy, Default)]
pub struct SrtpForwarder {
    policy: SrtpPolicy,
}

impl SrtpForwarder {
    /// Create a forwarder for a policy
    pub fn new(policy: SrtpPolicy) -> Self {
        Self { policy }
    }

    /// Active policy
    pub fn policy(&self) -> SrtpPolicy {
        self.policy
    }

    /// Relay a packet received from `sender`
    ///
    /// Returns the number of peers the packet was written to.
    pub async fn forward(
        &self,
        socket: &UdpSocket,
        registry: &RwLock<AssociationRegistry>,
        sender: AssociationId,
        payload: &[u8],
    ) -> Result<usize> {
        // Targets are collected first so no lock is held across a send
        let (targets, keyed) = {
            let registry = registry.read();
            let targets: Vec<_> = match self.policy {
                SrtpPolicy::BroadcastExclusion => registry.addresses_excluding(&sender).collect(),
                SrtpPolicy::Unicast => {
                    let addr = registry
                        .address_of(&sender)
                        .ok_or(Error::UnknownClient(sender))?;
                    vec![addr]
                }
            };
            (targets, registry.keys_of(&sender).is_some())
        };

        if keyed {
            trace!("SRTP from {} has negotiated keys; relaying without transform", sender);
        }

        let mut delivered = 0;
        for addr in targets {
            match socket.send_to(payload, addr).await {
                Ok(_) => delivered += 1,
                Err(e) => warn!("Error forwarding SRTP packet from {} to {}: {}", sender, addr, e),
            }
        }

        trace!(
            "Forwarded {} byte SRTP packet from {} to {} peer(s)",
            payload.len(),
            sender,
            delivered
        );

        Ok(delivered)
    }
}
