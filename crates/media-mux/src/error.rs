//! Error types for the media dispatcher
//!
//! Runtime failures on inbound traffic never surface here: they are logged and
//! the datagram is dropped. What remains are the startup failure (`Bind`) and
//! the caller-facing contract violations of the send path.

use std::io;

use thiserror::Error;

use crate::association::AssociationId;
use crate::packet::PacketClass;
use crate::stun::StunError;

/// Result type alias for dispatcher operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the media dispatcher and its collaborators
#[derive(Debug, Error)]
pub enum Error {
    /// The UDP socket could not be bound
    #[error("Failed to bind UDP socket on port {port}: {source}")]
    Bind {
        /// Requested port
        port: u16,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// No peer has ever been observed for this association
    #[error("Unknown client [{0}]")]
    UnknownClient(AssociationId),

    /// The send path only accepts DTLS records
    #[error("Send called with non-DTLS packet (classified as {0})")]
    NonDtlsPacket(PacketClass),

    /// The dispatcher has no open socket
    #[error("Dispatcher is not listening")]
    NotListening,

    /// `listen` was called on a dispatcher that was already started
    #[error("Dispatcher is already listening")]
    AlreadyListening,

    /// Socket I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// STUN encoding or decoding failure
    #[error("STUN error: {0}")]
    Stun(#[from] StunError),

    /// Failure reported by a key-management tunnel
    #[error("Tunnel error: {0}")]
    Tunnel(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error is one of the caller-visible send contract violations
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Error::UnknownClient(_) | Error::NonDtlsPacket(_))
    }
}
