//! Negotiated SRTP parameters
//!
//! The dispatcher never runs the SRTP transform itself. It only carries the
//! profile and key material the key-management side hands to it.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// SRTP protection profile identifiers (RFC 5764 section 4.1.2, RFC 7714)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum ProtectionProfile {
    /// SRTP_AES128_CM_HMAC_SHA1_80
    Aes128CmSha1_80,

    /// SRTP_AES128_CM_HMAC_SHA1_32
    Aes128CmSha1_32,

    /// SRTP_AEAD_AES_128_GCM
    AeadAes128Gcm,

    /// SRTP_AEAD_AES_256_GCM
    AeadAes256Gcm,

    /// Unknown profile
    Unknown(u16),
}

impl From<u16> for ProtectionProfile {
    fn from(value: u16) -> Self {
        match value {
            0x0001 => ProtectionProfile::Aes128CmSha1_80,
            0x0002 => ProtectionProfile::Aes128CmSha1_32,
            0x0007 => ProtectionProfile::AeadAes128Gcm,
            0x0008 => ProtectionProfile::AeadAes256Gcm,
            _ => ProtectionProfile::Unknown(value),
        }
    }
}

impl From<ProtectionProfile> for u16 {
    fn from(value: ProtectionProfile) -> Self {
        match value {
            ProtectionProfile::Aes128CmSha1_80 => 0x0001,
            ProtectionProfile::Aes128CmSha1_32 => 0x0002,
            ProtectionProfile::AeadAes128Gcm => 0x0007,
            ProtectionProfile::AeadAes256Gcm => 0x0008,
            ProtectionProfile::Unknown(value) => value,
        }
    }
}

impl fmt::Display for ProtectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aes128CmSha1_80 => write!(f, "SRTP_AES128_CM_HMAC_SHA1_80"),
            Self::Aes128CmSha1_32 => write!(f, "SRTP_AES128_CM_HMAC_SHA1_32"),
            Self::AeadAes128Gcm => write!(f, "SRTP_AEAD_AES_128_GCM"),
            Self::AeadAes256Gcm => write!(f, "SRTP_AEAD_AES_256_GCM"),
            Self::Unknown(value) => write!(f, "unknown({:#06x})", value),
        }
    }
}

/// Key material exported from a DTLS-SRTP handshake (RFC 5764 section 4.2)
#[derive(Clone, PartialEq, Eq)]
pub struct SrtpKeys {
    /// client_write_SRTP_master_key
    pub client_write_key: Bytes,
    /// server_write_SRTP_master_key
    pub server_write_key: Bytes,
    /// client_write_SRTP_master_salt
    pub client_write_salt: Bytes,
    /// server_write_SRTP_master_salt
    pub server_write_salt: Bytes,
}

impl SrtpKeys {
    /// Bundle exported key material
    pub fn new(
        client_write_key: Bytes,
        server_write_key: Bytes,
        client_write_salt: Bytes,
        server_write_salt: Bytes,
    ) -> Self {
        Self {
            client_write_key,
            server_write_key,
            client_write_salt,
            server_write_salt,
        }
    }
}

// Key bytes stay out of logs.
impl fmt::Debug for SrtpKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SrtpKeys")
            .field("client_write_key", &format_args!("<{} bytes>", self.client_write_key.len()))
            .field("server_write_key", &format_args!("<{} bytes>", self.server_write_key.len()))
            .field("client_write_salt", &format_args!("<{} bytes>", self.client_write_salt.len()))
            .field("server_write_salt", &format_args!("<{} bytes>", self.server_write_salt.len()))
            .finish()
    }
}
