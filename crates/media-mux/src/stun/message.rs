use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{BufMut, Bytes, BytesMut};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha1::Sha1;

use super::StunError;

type HmacSha1 = Hmac<Sha1>;

/// STUN message header size (20 bytes)
pub const STUN_HEADER_SIZE: usize = 20;

/// STUN magic cookie value (RFC 5389)
pub const STUN_MAGIC_COOKIE: u32 = 0x2112A442;

/// Value XORed into the CRC-32 of a FINGERPRINT attribute
pub const FINGERPRINT_XOR: u32 = 0x5354_554E;

/// Size of the HMAC-SHA1 carried by MESSAGE-INTEGRITY
const MESSAGE_INTEGRITY_SIZE: usize = 20;

/// Size of the CRC-32 carried by FINGERPRINT
const FINGERPRINT_SIZE: usize = 4;

/// Attribute type + length
const ATTRIBUTE_HEADER_SIZE: usize = 4;

/// STUN message class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StunClass {
    /// Request (0b00)
    Request,
    /// Indication (0b01)
    Indication,
    /// Success response (0b10)
    SuccessResponse,
    /// Error response (0b11)
    ErrorResponse,
}

impl StunClass {
    fn bits(self) -> u16 {
        match self {
            Self::Request => 0b00,
            Self::Indication => 0b01,
            Self::SuccessResponse => 0b10,
            Self::ErrorResponse => 0b11,
        }
    }

    fn from_bits(bits: u16) -> Self {
        match bits & 0b11 {
            0b00 => Self::Request,
            0b01 => Self::Indication,
            0b10 => Self::SuccessResponse,
            _ => Self::ErrorResponse,
        }
    }
}

/// STUN method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StunMethod {
    /// Binding (0x001)
    Binding,
    /// Any other 12-bit method
    Other(u16),
}

impl From<u16> for StunMethod {
    fn from(value: u16) -> Self {
        match value & 0x0FFF {
            0x001 => Self::Binding,
            other => Self::Other(other),
        }
    }
}

impl From<StunMethod> for u16 {
    fn from(method: StunMethod) -> Self {
        match method {
            StunMethod::Binding => 0x001,
            StunMethod::Other(value) => value & 0x0FFF,
        }
    }
}

/// Pack class and method into the 14-bit message type (RFC 5389 section 6)
///
/// ```text
///  0                 1
///  2  3  4 5 6 7 8 9 0 1 2 3 4 5
/// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
/// |M |M |M|M|M|C|M|M|M|C|M|M|M|M|
/// |11|10|9|8|7|1|6|5|4|0|3|2|1|0|
/// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
pub fn encode_message_type(class: StunClass, method: StunMethod) -> u16 {
    let method: u16 = method.into();
    let class = class.bits();

    let m0 = method & 0x000F;
    let m1 = (method & 0x0070) << 1;
    let m2 = (method & 0x0F80) << 2;
    let c0 = (class & 0x01) << 4;
    let c1 = (class & 0x02) << 7;

    m2 | c1 | m1 | c0 | m0
}

/// Split a message type into class and method
pub fn decode_message_type(value: u16) -> (StunClass, StunMethod) {
    let c0 = (value & 0x0010) >> 4;
    let c1 = (value & 0x0100) >> 7;

    let m0 = value & 0x000F;
    let m1 = (value & 0x00E0) >> 1;
    let m2 = (value & 0x3E00) >> 2;

    (StunClass::from_bits(c1 | c0), StunMethod::from(m2 | m1 | m0))
}

/// STUN attribute types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StunAttributeType {
    MappedAddress,
    Username,
    MessageIntegrity,
    ErrorCode,
    UnknownAttributes,
    Realm,
    Nonce,
    XorMappedAddress,
    Priority,
    UseCandidate,
    Software,
    Fingerprint,
    IceControlled,
    IceControlling,
    Other(u16),
}

impl From<u16> for StunAttributeType {
    fn from(value: u16) -> Self {
        match value {
            0x0001 => Self::MappedAddress,
            0x0006 => Self::Username,
            0x0008 => Self::MessageIntegrity,
            0x0009 => Self::ErrorCode,
            0x000A => Self::UnknownAttributes,
            0x0014 => Self::Realm,
            0x0015 => Self::Nonce,
            0x0020 => Self::XorMappedAddress,
            0x0024 => Self::Priority,
            0x0025 => Self::UseCandidate,
            0x8022 => Self::Software,
            0x8028 => Self::Fingerprint,
            0x8029 => Self::IceControlled,
            0x802A => Self::IceControlling,
            _ => Self::Other(value),
        }
    }
}

impl From<StunAttributeType> for u16 {
    fn from(attr_type: StunAttributeType) -> Self {
        match attr_type {
            StunAttributeType::MappedAddress => 0x0001,
            StunAttributeType::Username => 0x0006,
            StunAttributeType::MessageIntegrity => 0x0008,
            StunAttributeType::ErrorCode => 0x0009,
            StunAttributeType::UnknownAttributes => 0x000A,
            StunAttributeType::Realm => 0x0014,
            StunAttributeType::Nonce => 0x0015,
            StunAttributeType::XorMappedAddress => 0x0020,
            StunAttributeType::Priority => 0x0024,
            StunAttributeType::UseCandidate => 0x0025,
            StunAttributeType::Software => 0x8022,
            StunAttributeType::Fingerprint => 0x8028,
            StunAttributeType::IceControlled => 0x8029,
            StunAttributeType::IceControlling => 0x802A,
            StunAttributeType::Other(value) => value,
        }
    }
}

/// STUN attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunAttribute {
    /// Attribute type
    pub attr_type: StunAttributeType,
    /// Attribute value, without padding
    pub value: Bytes,
}

impl StunAttribute {
    /// Create a new attribute
    pub fn new(attr_type: StunAttributeType, value: Bytes) -> Self {
        Self { attr_type, value }
    }

    /// Create a XOR-MAPPED-ADDRESS attribute
    pub fn xor_mapped_address(addr: SocketAddr, transaction_id: &[u8; 12]) -> Self {
        let mut value = BytesMut::with_capacity(20);

        value.put_u8(0);
        value.put_u8(match addr.ip() {
            IpAddr::V4(_) => 0x01,
            IpAddr::V6(_) => 0x02,
        });
        value.put_u16(addr.port() ^ (STUN_MAGIC_COOKIE >> 16) as u16);

        match addr.ip() {
            IpAddr::V4(ipv4) => {
                value.put_u32(u32::from(ipv4) ^ STUN_MAGIC_COOKIE);
            }
            IpAddr::V6(ipv6) => {
                let mask = xor_mask(transaction_id);
                let octets = ipv6.octets();
                for i in 0..16 {
                    value.put_u8(octets[i] ^ mask[i]);
                }
            }
        }

        Self::new(StunAttributeType::XorMappedAddress, value.freeze())
    }

    /// Create a USERNAME attribute
    pub fn username(username: &str) -> Self {
        Self::new(StunAttributeType::Username, Bytes::copy_from_slice(username.as_bytes()))
    }

    /// Create a SOFTWARE attribute
    pub fn software(software: &str) -> Self {
        Self::new(StunAttributeType::Software, Bytes::copy_from_slice(software.as_bytes()))
    }

    /// Create an ERROR-CODE attribute (RFC 5389 section 15.6)
    pub fn error_code(code: u16, reason: &str) -> Self {
        let mut value = BytesMut::with_capacity(4 + reason.len());
        value.put_u16(0);
        value.put_u8(((code / 100) & 0x07) as u8);
        value.put_u8((code % 100) as u8);
        value.put_slice(reason.as_bytes());
        Self::new(StunAttributeType::ErrorCode, value.freeze())
    }

    /// Decode a XOR-MAPPED-ADDRESS value
    pub fn get_xor_mapped_address(&self, transaction_id: &[u8; 12]) -> Result<SocketAddr, StunError> {
        if self.attr_type != StunAttributeType::XorMappedAddress {
            return Err(StunError::InvalidAttribute("not a XOR-MAPPED-ADDRESS attribute".to_string()));
        }

        let value = &self.value;
        if value.len() < 4 {
            return Err(StunError::InvalidAttribute("XOR-MAPPED-ADDRESS too short".to_string()));
        }

        let family = value[1];
        let port = u16::from_be_bytes([value[2], value[3]]) ^ (STUN_MAGIC_COOKIE >> 16) as u16;

        let ip = match family {
            0x01 => {
                if value.len() != 8 {
                    return Err(StunError::InvalidAttribute("bad IPv4 XOR-MAPPED-ADDRESS length".to_string()));
                }
                let xored = u32::from_be_bytes([value[4], value[5], value[6], value[7]]);
                IpAddr::V4(Ipv4Addr::from(xored ^ STUN_MAGIC_COOKIE))
            }
            0x02 => {
                if value.len() != 20 {
                    return Err(StunError::InvalidAttribute("bad IPv6 XOR-MAPPED-ADDRESS length".to_string()));
                }
                let mask = xor_mask(transaction_id);
                let mut octets = [0u8; 16];
                for i in 0..16 {
                    octets[i] = value[4 + i] ^ mask[i];
                }
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            other => return Err(StunError::UnsupportedFamily(other)),
        };

        Ok(SocketAddr::new(ip, port))
    }

    /// Decode an ERROR-CODE value into `(code, reason)`
    pub fn get_error_code(&self) -> Result<(u16, String), StunError> {
        if self.attr_type != StunAttributeType::ErrorCode || self.value.len() < 4 {
            return Err(StunError::InvalidAttribute("not an ERROR-CODE attribute".to_string()));
        }

        let code = (self.value[2] & 0x07) as u16 * 100 + self.value[3] as u16;
        let reason = String::from_utf8_lossy(&self.value[4..]).into_owned();
        Ok((code, reason))
    }
}

/// Magic cookie followed by the transaction id, used to XOR IPv6 addresses
fn xor_mask(transaction_id: &[u8; 12]) -> [u8; 16] {
    let mut mask = [0u8; 16];
    mask[..4].copy_from_slice(&STUN_MAGIC_COOKIE.to_be_bytes());
    mask[4..].copy_from_slice(transaction_id);
    mask
}

fn padded(len: usize) -> usize {
    (len + 3) & !3
}

/// STUN message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunMessage {
    /// Message class
    pub class: StunClass,
    /// Message method
    pub method: StunMethod,
    /// Transaction ID
    pub transaction_id: [u8; 12],
    /// Attributes in wire order
    pub attributes: Vec<StunAttribute>,
}

impl StunMessage {
    /// Create a new message with a random transaction id
    pub fn new(class: StunClass, method: StunMethod) -> Self {
        let mut transaction_id = [0u8; 12];
        rand::thread_rng().fill(&mut transaction_id);

        Self {
            class,
            method,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    /// Create a new binding request
    pub fn binding_request() -> Self {
        Self::new(StunClass::Request, StunMethod::Binding)
    }

    /// Start a reply: same method and transaction id, no attributes
    pub fn reply(&self, class: StunClass) -> Self {
        Self {
            class,
            method: self.method,
            transaction_id: self.transaction_id,
            attributes: Vec::new(),
        }
    }

    /// Add an attribute
    pub fn add_attribute(&mut self, attr: StunAttribute) -> &mut Self {
        self.attributes.push(attr);
        self
    }

    /// Get the first attribute of a type
    pub fn get_attribute(&self, attr_type: StunAttributeType) -> Option<&StunAttribute> {
        self.attributes.iter().find(|attr| attr.attr_type == attr_type)
    }

    /// Encode the message with its attributes as they are
    ///
    /// Fails if an attribute value or the whole body does not fit the
    /// 16-bit length fields.
    pub fn encode(&self) -> Result<Bytes, StunError> {
        let mut buf = self.encode_header_and(self.attributes.iter())?;
        let len = buf.len();
        set_length(&mut buf, len - STUN_HEADER_SIZE)?;
        Ok(buf.freeze())
    }

    /// Encode the message followed by MESSAGE-INTEGRITY and FINGERPRINT
    ///
    /// Any integrity or fingerprint attribute already present is replaced.
    /// Each trailing attribute covers every byte before it, with the header
    /// length counting up to and including that attribute.
    pub fn encode_signed(&self, key: &[u8]) -> Result<Bytes, StunError> {
        let mut buf = self.encode_header_and(self.attributes.iter().filter(|attr| {
            !matches!(
                attr.attr_type,
                StunAttributeType::MessageIntegrity | StunAttributeType::Fingerprint
            )
        }))?;

        let len = buf.len();
        set_length(&mut buf, len - STUN_HEADER_SIZE + ATTRIBUTE_HEADER_SIZE + MESSAGE_INTEGRITY_SIZE)?;
        let mut mac = HmacSha1::new_from_slice(key).map_err(|_| StunError::InvalidKey)?;
        mac.update(&buf);
        let integrity = mac.finalize().into_bytes();
        buf.put_u16(StunAttributeType::MessageIntegrity.into());
        buf.put_u16(MESSAGE_INTEGRITY_SIZE as u16);
        buf.put_slice(&integrity);

        let len = buf.len();
        set_length(&mut buf, len - STUN_HEADER_SIZE + ATTRIBUTE_HEADER_SIZE + FINGERPRINT_SIZE)?;
        let crc = crc32fast::hash(&buf) ^ FINGERPRINT_XOR;
        buf.put_u16(StunAttributeType::Fingerprint.into());
        buf.put_u16(FINGERPRINT_SIZE as u16);
        buf.put_u32(crc);

        Ok(buf.freeze())
    }

    fn encode_header_and<'a>(
        &self,
        attributes: impl Iterator<Item = &'a StunAttribute>,
    ) -> Result<BytesMut, StunError> {
        let mut buf = BytesMut::with_capacity(STUN_HEADER_SIZE + 64);

        buf.put_u16(encode_message_type(self.class, self.method));
        buf.put_u16(0);
        buf.put_u32(STUN_MAGIC_COOKIE);
        buf.put_slice(&self.transaction_id);

        for attr in attributes {
            let len = u16::try_from(attr.value.len()).map_err(|_| StunError::AttributeTooLong {
                attr_type: attr.attr_type.into(),
                len: attr.value.len(),
            })?;

            buf.put_u16(attr.attr_type.into());
            buf.put_u16(len);
            buf.put_slice(&attr.value);
            for _ in attr.value.len()..padded(attr.value.len()) {
                buf.put_u8(0);
            }
        }

        Ok(buf)
    }

    /// Decode a message
    pub fn decode(bytes: &[u8]) -> Result<Self, StunError> {
        let spans = attribute_spans(bytes)?;

        let msg_type = u16::from_be_bytes([bytes[0], bytes[1]]);
        let (class, method) = decode_message_type(msg_type);

        let mut transaction_id = [0u8; 12];
        transaction_id.copy_from_slice(&bytes[8..STUN_HEADER_SIZE]);

        let attributes = spans
            .into_iter()
            .map(|span| StunAttribute {
                attr_type: span.attr_type.into(),
                value: Bytes::copy_from_slice(&bytes[span.value_offset..span.value_offset + span.value_len]),
            })
            .collect();

        Ok(Self {
            class,
            method,
            transaction_id,
            attributes,
        })
    }
}

fn set_length(buf: &mut BytesMut, len: usize) -> Result<(), StunError> {
    let len = u16::try_from(len).map_err(|_| StunError::MessageTooLong(len))?;
    buf[2..4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

/// Location of one attribute inside a raw message
#[derive(Debug, Clone, Copy)]
struct AttributeSpan {
    attr_type: u16,
    /// Offset of the attribute header
    offset: usize,
    value_offset: usize,
    value_len: usize,
}

/// Validate the header and locate every attribute
fn attribute_spans(bytes: &[u8]) -> Result<Vec<AttributeSpan>, StunError> {
    if bytes.len() < STUN_HEADER_SIZE {
        return Err(StunError::TooShort(bytes.len()));
    }

    // The two most significant bits of every STUN message are zero
    if bytes[0] & 0xC0 != 0 {
        return Err(StunError::NotStun);
    }

    let cookie = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if cookie != STUN_MAGIC_COOKIE {
        return Err(StunError::InvalidMagicCookie(cookie));
    }

    let declared = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
    if declared % 4 != 0 || declared != bytes.len() - STUN_HEADER_SIZE {
        return Err(StunError::LengthMismatch {
            declared,
            actual: bytes.len() - STUN_HEADER_SIZE,
        });
    }

    let mut spans = Vec::new();
    let mut offset = STUN_HEADER_SIZE;

    while offset < bytes.len() {
        if offset + ATTRIBUTE_HEADER_SIZE > bytes.len() {
            return Err(StunError::AttributeOverrun { offset });
        }

        let attr_type = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
        let value_len = u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]) as usize;
        let value_offset = offset + ATTRIBUTE_HEADER_SIZE;

        if value_offset + padded(value_len) > bytes.len() {
            return Err(StunError::AttributeOverrun { offset });
        }

        spans.push(AttributeSpan {
            attr_type,
            offset,
            value_offset,
            value_len,
        });

        offset = value_offset + padded(value_len);
    }

    Ok(spans)
}

/// Check the FINGERPRINT of a raw message
///
/// Returns false if the message is malformed, has no FINGERPRINT, or the
/// FINGERPRINT is not the last attribute.
pub fn verify_fingerprint(bytes: &[u8]) -> bool {
    let Ok(spans) = attribute_spans(bytes) else {
        return false;
    };

    match spans.last() {
        Some(span)
            if span.attr_type == u16::from(StunAttributeType::Fingerprint)
                && span.value_len == FINGERPRINT_SIZE =>
        {
            let v = &bytes[span.value_offset..span.value_offset + FINGERPRINT_SIZE];
            let received = u32::from_be_bytes([v[0], v[1], v[2], v[3]]);
            crc32fast::hash(&bytes[..span.offset]) ^ FINGERPRINT_XOR == received
        }
        _ => false,
    }
}

/// Check the MESSAGE-INTEGRITY of a raw message under a short-term key
///
/// Only a FINGERPRINT may follow MESSAGE-INTEGRITY.
pub fn verify_message_integrity(bytes: &[u8], key: &[u8]) -> bool {
    let Ok(spans) = attribute_spans(bytes) else {
        return false;
    };

    let integrity_type = u16::from(StunAttributeType::MessageIntegrity);
    let Some(index) = spans.iter().position(|span| span.attr_type == integrity_type) else {
        return false;
    };

    let span = spans[index];
    let trailing_ok = spans[index + 1..]
        .iter()
        .all(|s| s.attr_type == u16::from(StunAttributeType::Fingerprint));
    if span.value_len != MESSAGE_INTEGRITY_SIZE || !trailing_ok {
        return false;
    }

    let mut covered = bytes[..span.offset].to_vec();
    let len = span.offset - STUN_HEADER_SIZE + ATTRIBUTE_HEADER_SIZE + MESSAGE_INTEGRITY_SIZE;
    covered[2..4].copy_from_slice(&(len as u16).to_be_bytes());

    let Ok(mut mac) = HmacSha1::new_from_slice(key) else {
        return false;
    };
    mac.update(&covered);
    mac.verify_slice(&bytes[span.value_offset..span.value_offset + MESSAGE_INTEGRITY_SIZE])
        .is_ok()
}
