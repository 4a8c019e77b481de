//! SRTP handling
//!
//! The dispatcher forwards SRTP/SRTCP untouched; this module holds the
//! forwarding policies and the negotiated profile/key types.

pub mod forwarder;
pub mod profile;

pub use forwarder::{SrtpForwarder, SrtpPolicy};
pub use profile::{ProtectionProfile, SrtpKeys};
