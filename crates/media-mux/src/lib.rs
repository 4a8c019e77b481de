//! Single-socket media dispatcher for DTLS-SRTP peers.
//!
//! One UDP port carries STUN connectivity checks, DTLS handshakes and SRTP
//! media for every peer. Datagrams are told apart by their first byte
//! (RFC 5764 section 5.1.2) and attributed to an association derived from the
//! sender's address. STUN Binding requests are answered locally, DTLS is
//! tunnelled to a key-management component, and SRTP is relayed between peers
//! without being decrypted.
//!
//! ```no_run
//! use std::sync::Arc;
//! use rvoip_media_mux::prelude::*;
//!
//! # async fn run() -> Result<()> {
//! let forwarder = UdpForwarder::connect("127.0.0.1:4433").await?;
//! let dispatcher = MediaDispatcher::new(DispatcherConfig::default(), Arc::new(forwarder.clone()))?;
//! forwarder.set_distributor(Arc::new(dispatcher.clone()));
//!
//! dispatcher.listen(5004).await?;
//! // ...
//! dispatcher.stop().await;
//! forwarder.stop().await;
//! # Ok(())
//! # }
//! ```

// Error handling
pub mod error;

// Configuration and logging setup
pub mod config;
pub mod logging;

// Wire classification and peer identity
pub mod association;
pub mod packet;

// Protocol handlers
pub mod dtls;
pub mod srtp;
pub mod stun;

// Key-management interfaces
pub mod tunnel;

// Socket owner
pub mod dispatcher;

mod shutdown;

// Public exports
pub use association::{AssociationId, AssociationIdWidth, AssociationRegistry};
pub use config::DispatcherConfig;
pub use dispatcher::{DispatcherState, IdlePruner, MaintenanceHook, MediaDispatcher, NoopMaintenance};
pub use error::{Error, Result};
pub use packet::{classify, Packet, PacketClass};
pub use srtp::{ProtectionProfile, SrtpKeys, SrtpPolicy};
pub use stun::{StunMessage, StunResponder};
pub use tunnel::{KeyManagementTunnel, MediaDistributor, UdpForwarder};

/// Re-export of common types
pub mod prelude {
    pub use super::{
        AssociationId, AssociationIdWidth,
        DispatcherConfig, DispatcherState, MediaDispatcher,
        Error, Result,
        KeyManagementTunnel, MediaDistributor, UdpForwarder,
        PacketClass, ProtectionProfile, SrtpKeys, SrtpPolicy,
    };
}
