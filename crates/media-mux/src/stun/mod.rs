//! STUN (RFC 5389) codec and Binding responder
//!
//! Only what a media dispatcher needs to answer ICE connectivity checks:
//! message parsing and serialization, MESSAGE-INTEGRITY and FINGERPRINT
//! computation, and a stateless responder for Binding requests.

pub mod message;
pub mod responder;

use thiserror::Error;

pub use message::{
    verify_fingerprint, verify_message_integrity, StunAttribute, StunAttributeType, StunClass,
    StunMessage, StunMethod, STUN_HEADER_SIZE, STUN_MAGIC_COOKIE,
};
pub use responder::StunResponder;

/// STUN codec errors
#[derive(Debug, Error)]
pub enum StunError {
    #[error("Packet too small for STUN header ({0} bytes)")]
    TooShort(usize),

    #[error("Invalid STUN message: leading bits not zero")]
    NotStun,

    #[error("Invalid STUN magic cookie: {0:#010x}")]
    InvalidMagicCookie(u32),

    #[error("STUN length field {declared} does not match {actual} attribute bytes")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("STUN attribute at offset {offset} overruns the message")]
    AttributeOverrun { offset: usize },

    #[error("STUN attribute {attr_type:#06x} value of {len} bytes exceeds the length field")]
    AttributeTooLong { attr_type: u16, len: usize },

    #[error("STUN message body of {0} bytes exceeds the length field")]
    MessageTooLong(usize),

    #[error("SOFTWARE value of {0} bytes exceeds 763 bytes")]
    SoftwareTooLong(usize),

    #[error("Unsupported address family: {0}")]
    UnsupportedFamily(u8),

    #[error("Invalid STUN attribute: {0}")]
    InvalidAttribute(String),

    #[error("FINGERPRINT does not match message contents")]
    FingerprintMismatch,

    #[error("Invalid MESSAGE-INTEGRITY key")]
    InvalidKey,

    #[error("ICE password must be 22 to 256 characters, got {0}")]
    InvalidPassword(usize),
}
