//! Binding responder
//!
//! Answers connectivity checks from peers. Decisions depend only on the
//! parsed request:
//!
//! | class / method       | reply                                   |
//! |----------------------|-----------------------------------------|
//! | Request / Binding    | Success, XOR-MAPPED-ADDRESS of sender   |
//! | Request / other      | Error, ERROR-CODE 500 "Unimplemented"   |
//! | Indication, Response | none                                    |
//!
//! Every reply ends with MESSAGE-INTEGRITY keyed by the responder's ICE
//! password, followed by FINGERPRINT.

use std::net::SocketAddr;

use bytes::Bytes;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, trace};

use super::message::{verify_fingerprint, StunAttribute, StunAttributeType, StunClass, StunMessage, StunMethod};
use super::StunError;

/// Shortest ICE password allowed (RFC 8839 section 5.4)
pub const MIN_PASSWORD_LEN: usize = 22;

/// Longest ICE password allowed
pub const MAX_PASSWORD_LEN: usize = 256;

/// Longest SOFTWARE value, in bytes (RFC 5389 section 15.10)
pub const MAX_SOFTWARE_LEN: usize = 763;

/// Stateless STUN Binding responder
///
/// The short-term credential is the responder's ICE password. It keys the
/// MESSAGE-INTEGRITY of every reply but is never carried in a reply itself;
/// peers learn it out of band, through signalling, from
/// [`password`](Self::password).
#[derive(Clone)]
pub struct StunResponder {
    password: String,
    software: Option<String>,
}

impl StunResponder {
    /// Create a responder with a freshly generated ICE password
    pub fn new() -> Self {
        let password = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(MIN_PASSWORD_LEN)
            .map(char::from)
            .collect();

        Self {
            password,
            software: None,
        }
    }

    /// Create a responder with a given ICE password
    pub fn with_password(password: impl Into<String>) -> Result<Self, StunError> {
        let password = password.into();
        let len = password.chars().count();
        if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
            return Err(StunError::InvalidPassword(len));
        }

        Ok(Self {
            password,
            software: None,
        })
    }

    /// Add a SOFTWARE attribute to every reply
    pub fn with_software(mut self, software: impl Into<String>) -> Result<Self, StunError> {
        let software = software.into();
        if software.len() > MAX_SOFTWARE_LEN {
            return Err(StunError::SoftwareTooLong(software.len()));
        }

        self.software = Some(software);
        Ok(self)
    }

    /// ICE password used to sign replies, to be signalled to peers
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Parse a raw datagram and build the reply, if any
    ///
    /// A request that carries a FINGERPRINT must carry a valid one.
    pub fn handle(&self, raw: &[u8], source: SocketAddr) -> Result<Option<Bytes>, StunError> {
        let request = StunMessage::decode(raw)?;

        if request.get_attribute(StunAttributeType::Fingerprint).is_some() && !verify_fingerprint(raw) {
            return Err(StunError::FingerprintMismatch);
        }

        self.respond(&request, source)
    }

    /// Build the reply to a parsed message, if any
    pub fn respond(&self, request: &StunMessage, source: SocketAddr) -> Result<Option<Bytes>, StunError> {
        let mut reply = match (request.class, request.method) {
            (StunClass::Request, StunMethod::Binding) => {
                let mut reply = request.reply(StunClass::SuccessResponse);
                reply.add_attribute(StunAttribute::xor_mapped_address(source, &request.transaction_id));
                reply
            }
            (StunClass::Request, method) => {
                debug!("Unsupported STUN method {:?} from {}", method, source);
                let mut reply = request.reply(StunClass::ErrorResponse);
                reply.add_attribute(StunAttribute::error_code(500, "Unimplemented"));
                reply
            }
            (class, method) => {
                // Indications and responses are not acted on yet
                trace!("Ignoring STUN {:?} {:?} from {}", class, method, source);
                return Ok(None);
            }
        };

        if let Some(software) = &self.software {
            reply.add_attribute(StunAttribute::software(software));
        }

        reply.encode_signed(self.password.as_bytes()).map(Some)
    }
}

impl Default for StunResponder {
    fn default() -> Self {
        Self::new()
    }
}

// The password stays out of logs.
impl std::fmt::Debug for StunResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StunResponder")
            .field("software", &self.software)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stun::message::verify_message_integrity;

    fn source() -> SocketAddr {
        "203.0.113.5:50000".parse().unwrap()
    }

    #[test]
    fn test_generated_password_length() {
        let responder = StunResponder::new();
        assert_eq!(responder.password().len(), MIN_PASSWORD_LEN);
        assert!(responder.password().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_password_bounds() {
        assert!(matches!(StunResponder::with_password("short"), Err(StunError::InvalidPassword(5))));
        assert!(StunResponder::with_password("a".repeat(22)).is_ok());
        assert!(StunResponder::with_password("a".repeat(256)).is_ok());
        assert!(StunResponder::with_password("a".repeat(257)).is_err());
    }

    #[test]
    fn test_binding_success_is_signed() {
        let responder = StunResponder::new().with_software("rvoip-media-mux").unwrap();
        let request = StunMessage::binding_request();

        let raw = responder.handle(&request.encode().unwrap(), source()).unwrap().expect("reply expected");
        let reply = StunMessage::decode(&raw).unwrap();

        assert_eq!(reply.class, StunClass::SuccessResponse);
        assert_eq!(reply.method, StunMethod::Binding);
        assert_eq!(reply.transaction_id, request.transaction_id);

        let mapped = reply.get_attribute(StunAttributeType::XorMappedAddress).unwrap();
        assert_eq!(mapped.get_xor_mapped_address(&reply.transaction_id).unwrap(), source());
        assert!(reply.get_attribute(StunAttributeType::Software).is_some());

        assert!(verify_fingerprint(&raw));
        assert!(verify_message_integrity(&raw, responder.password().as_bytes()));
    }

    #[test]
    fn test_other_request_gets_500() {
        let responder = StunResponder::new();
        let request = StunMessage::new(StunClass::Request, StunMethod::Other(0x003));

        let raw = responder.respond(&request, source()).unwrap().expect("reply expected");
        let reply = StunMessage::decode(&raw).unwrap();

        assert_eq!(reply.class, StunClass::ErrorResponse);
        assert_eq!(reply.method, StunMethod::Other(0x003));
        let (code, reason) = reply
            .get_attribute(StunAttributeType::ErrorCode)
            .unwrap()
            .get_error_code()
            .unwrap();
        assert_eq!(code, 500);
        assert_eq!(reason, "Unimplemented");
        assert!(verify_fingerprint(&raw));
    }

    #[test]
    fn test_non_requests_get_no_reply() {
        let responder = StunResponder::new();
        for class in [StunClass::Indication, StunClass::SuccessResponse, StunClass::ErrorResponse] {
            let msg = StunMessage::new(class, StunMethod::Binding);
            assert!(responder.handle(&msg.encode().unwrap(), source()).unwrap().is_none());
        }
    }

    #[test]
    fn test_bad_fingerprint_is_rejected() {
        let responder = StunResponder::new();
        let mut raw = StunMessage::binding_request().encode_signed(b"peer-password").unwrap().to_vec();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;

        assert!(matches!(responder.handle(&raw, source()), Err(StunError::FingerprintMismatch)));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let responder = StunResponder::new();
        assert!(responder.handle(&[0x00, 0x01, 0x00], source()).is_err());
    }

    #[test]
    fn test_software_length_cap() {
        assert!(StunResponder::new().with_software("s".repeat(MAX_SOFTWARE_LEN)).is_ok());
        assert!(matches!(
            StunResponder::new().with_software("s".repeat(70_000)),
            Err(StunError::SoftwareTooLong(70_000))
        ));
    }

    #[test]
    fn test_longest_software_reply_verifies() {
        let responder = StunResponder::new().with_software("s".repeat(MAX_SOFTWARE_LEN)).unwrap();
        let request = StunMessage::binding_request();

        let raw = responder.handle(&request.encode().unwrap(), source()).unwrap().unwrap();
        assert!(StunMessage::decode(&raw).is_ok());
        assert!(verify_fingerprint(&raw));
        assert!(verify_message_integrity(&raw, responder.password().as_bytes()));
    }

    #[test]
    fn test_password_never_leaves_in_reply() {
        let password = "Q7hJ2mXr9kLp4TnV8sWz3b";
        let responder = StunResponder::with_password(password).unwrap();
        let request = StunMessage::binding_request();

        let raw = responder.handle(&request.encode().unwrap(), source()).unwrap().unwrap();
        assert!(!raw.windows(password.len()).any(|w| w == password.as_bytes()));
        assert!(verify_message_integrity(&raw, password.as_bytes()));
        assert!(!verify_message_integrity(&raw, b"some-other-ice-password"));
    }
}
