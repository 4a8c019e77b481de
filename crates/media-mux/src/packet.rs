//! Datagram classification
//!
//! Demultiplexes DTLS, SRTP/SRTCP and STUN sharing one port using only the
//! first octet, as laid out in RFC 5764 section 5.1.2:
//!
//! ```text
//!                  +----------------+
//!                  | 127 < B < 192 -+--> forward to RTP
//!                  |                |
//!      packet -->  |  19 < B < 64  -+--> forward to DTLS
//!                  |                |
//!                  |       B < 2   -+--> forward to STUN
//!                  +----------------+
//! ```
//!
//! Nothing beyond the first byte is inspected. A malformed payload that lands
//! in a range is still handed to that handler, which must reject it itself.

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;

/// Demultiplexing class of a received datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketClass {
    /// DTLS record (handshake, alert, change cipher spec, application data)
    Dtls,
    /// SRTP or SRTCP packet
    Srtp,
    /// STUN message
    Stun,
    /// Anything else
    Unknown,
}

impl fmt::Display for PacketClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dtls => write!(f, "DTLS"),
            Self::Srtp => write!(f, "SRTP"),
            Self::Stun => write!(f, "STUN"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Classify a datagram by its first octet
pub fn classify(data: &[u8]) -> PacketClass {
    let Some(&first) = data.first() else {
        return PacketClass::Unknown;
    };

    match first {
        128..=191 => PacketClass::Srtp,
        20..=63 => PacketClass::Dtls,
        0..=1 => PacketClass::Stun,
        _ => PacketClass::Unknown,
    }
}

/// A datagram together with the address it was received from
#[derive(Debug, Clone)]
pub struct Packet {
    /// Observed source address
    pub source: SocketAddr,
    /// Raw datagram
    pub payload: Bytes,
}

impl Packet {
    /// Create a new packet
    pub fn new(source: SocketAddr, payload: Bytes) -> Self {
        Self { source, payload }
    }

    /// Demultiplexing class of the payload
    pub fn class(&self) -> PacketClass {
        classify(&self.payload)
    }
}
