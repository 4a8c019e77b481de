//! Dispatcher configuration
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! bind_ip = "0.0.0.0"
//! queue_depth = 10
//! tick_interval_ms = 10
//! recv_buffer_size = 2048
//! association_id_width = "wide"
//! srtp_policy = "broadcast_exclusion"
//! protection_profiles = [1, 7]
//! # ice_password = "..."
//! # software = "rvoip-media-mux"
//! # idle_timeout_secs = 300
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::association::AssociationIdWidth;
use crate::error::{Error, Result};
use crate::srtp::{ProtectionProfile, SrtpPolicy};
use crate::stun::responder::{MAX_PASSWORD_LEN, MAX_SOFTWARE_LEN, MIN_PASSWORD_LEN};
use crate::stun::STUN_HEADER_SIZE;

/// Default inbound queue depth
pub const DEFAULT_QUEUE_DEPTH: usize = 10;

/// Default maintenance tick, in milliseconds
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 10;

/// Default receive buffer size
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 2048;

/// Largest UDP payload
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Configuration for a [`MediaDispatcher`](crate::dispatcher::MediaDispatcher)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Local address to bind; the port is given to `listen`
    pub bind_ip: IpAddr,

    /// Capacity of the queue between the receive and dispatch tasks
    pub queue_depth: usize,

    /// Maintenance tick period
    pub tick_interval_ms: u64,

    /// Largest datagram accepted; longer ones are truncated by the socket
    pub recv_buffer_size: usize,

    /// Bytes of the address hash kept in association ids
    pub association_id_width: AssociationIdWidth,

    /// How SRTP packets are relayed
    pub srtp_policy: SrtpPolicy,

    /// Profiles offered to the key-management side on ClientHello
    pub protection_profiles: Vec<ProtectionProfile>,

    /// ICE password; generated when absent
    pub ice_password: Option<String>,

    /// SOFTWARE attribute added to STUN replies
    pub software: Option<String>,

    /// Forget peers idle for this long; never when absent
    pub idle_timeout_secs: Option<u64>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            queue_depth: DEFAULT_QUEUE_DEPTH,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            association_id_width: AssociationIdWidth::default(),
            srtp_policy: SrtpPolicy::default(),
            protection_profiles: Vec::new(),
            ice_password: None,
            software: None,
            idle_timeout_secs: None,
        }
    }
}

impl DispatcherConfig {
    /// Parse a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| Error::Config(format!("Invalid dispatcher config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.queue_depth == 0 {
            return Err(Error::Config("queue_depth must be at least 1".to_string()));
        }

        if self.tick_interval_ms == 0 {
            return Err(Error::Config("tick_interval_ms must be at least 1".to_string()));
        }

        if !(STUN_HEADER_SIZE..=MAX_DATAGRAM_SIZE).contains(&self.recv_buffer_size) {
            return Err(Error::Config(format!(
                "recv_buffer_size must be between {} and {}, got {}",
                STUN_HEADER_SIZE, MAX_DATAGRAM_SIZE, self.recv_buffer_size
            )));
        }

        if let Some(password) = &self.ice_password {
            let len = password.chars().count();
            if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
                return Err(Error::Config(format!(
                    "ice_password must be {} to {} characters, got {}",
                    MIN_PASSWORD_LEN, MAX_PASSWORD_LEN, len
                )));
            }
        }

        if let Some(software) = &self.software {
            if software.len() > MAX_SOFTWARE_LEN {
                return Err(Error::Config(format!(
                    "software must be at most {} bytes, got {}",
                    MAX_SOFTWARE_LEN,
                    software.len()
                )));
            }
        }

        if self.idle_timeout_secs == Some(0) {
            return Err(Error::Config("idle_timeout_secs must be at least 1".to_string()));
        }

        Ok(())
    }

    /// Maintenance tick period
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Idle timeout, if pruning is enabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn with_bind_ip(mut self, bind_ip: IpAddr) -> Self {
        self.bind_ip = bind_ip;
        self
    }

    pub fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth;
        self
    }

    /// Set the maintenance tick, rounded up to whole milliseconds
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = ceil_units(interval.as_nanos(), 1_000_000);
        self
    }

    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    pub fn with_association_id_width(mut self, width: AssociationIdWidth) -> Self {
        self.association_id_width = width;
        self
    }

    pub fn with_srtp_policy(mut self, policy: SrtpPolicy) -> Self {
        self.srtp_policy = policy;
        self
    }

    pub fn with_protection_profiles(mut self, profiles: Vec<ProtectionProfile>) -> Self {
        self.protection_profiles = profiles;
        self
    }

    pub fn with_ice_password(mut self, password: impl Into<String>) -> Self {
        self.ice_password = Some(password.into());
        self
    }

    /// Set the SOFTWARE value; more than 763 bytes fails `validate`
    pub fn with_software(mut self, software: impl Into<String>) -> Self {
        self.software = Some(software.into());
        self
    }

    /// Enable idle pruning, rounded up to whole seconds
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_secs = Some(ceil_units(timeout.as_nanos(), 1_000_000_000));
        self
    }
}

/// `nanos` in units of `unit` nanoseconds, rounded up and saturating
fn ceil_units(nanos: u128, unit: u128) -> u64 {
    u64::try_from(nanos.div_ceil(unit)).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.queue_depth, 10);
        assert_eq!(config.tick_interval(), Duration::from_millis(10));
        assert_eq!(config.recv_buffer_size, 2048);
        assert_eq!(config.association_id_width, AssociationIdWidth::Wide);
        assert_eq!(config.srtp_policy, SrtpPolicy::BroadcastExclusion);
        assert!(config.protection_profiles.is_empty());
        assert!(config.idle_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(DispatcherConfig::from_toml_str("").unwrap(), DispatcherConfig::default());
    }

    #[test]
    fn test_parse_toml() {
        let config = DispatcherConfig::from_toml_str(
            r#"
            bind_ip = "127.0.0.1"
            queue_depth = 32
            association_id_width = "narrow"
            srtp_policy = "unicast"
            protection_profiles = [1, 7]
            software = "relay"
            idle_timeout_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.queue_depth, 32);
        assert_eq!(config.tick_interval_ms, DEFAULT_TICK_INTERVAL_MS);
        assert_eq!(config.association_id_width, AssociationIdWidth::Narrow);
        assert_eq!(config.srtp_policy, SrtpPolicy::Unicast);
        assert_eq!(
            config.protection_profiles,
            vec![ProtectionProfile::Aes128CmSha1_80, ProtectionProfile::AeadAes128Gcm]
        );
        assert_eq!(config.software.as_deref(), Some("relay"));
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_toml_string_reloads() {
        let config = DispatcherConfig::default()
            .with_srtp_policy(SrtpPolicy::Unicast)
            .with_protection_profiles(vec![ProtectionProfile::Aes128CmSha1_32]);

        let text = config.to_toml_string().unwrap();
        assert_eq!(DispatcherConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_validation() {
        assert!(DispatcherConfig::default().with_queue_depth(0).validate().is_err());
        assert!(DispatcherConfig::default()
            .with_tick_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(DispatcherConfig::default().with_recv_buffer_size(8).validate().is_err());
        assert!(DispatcherConfig::default().with_ice_password("short").validate().is_err());
        assert!(DispatcherConfig::default()
            .with_ice_password("a".repeat(22))
            .validate()
            .is_ok());
        assert!(DispatcherConfig::from_toml_str("queue_depth = 0").is_err());
        assert!(DispatcherConfig::from_toml_str("srtp_policy = \"multicast\"").is_err());
    }

    #[test]
    fn test_software_length_cap() {
        assert!(DispatcherConfig::default()
            .with_software("s".repeat(MAX_SOFTWARE_LEN))
            .validate()
            .is_ok());
        assert!(matches!(
            DispatcherConfig::default().with_software("s".repeat(70_000)).validate(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_sub_unit_durations_round_up() {
        let config = DispatcherConfig::default()
            .with_tick_interval(Duration::from_micros(500))
            .with_idle_timeout(Duration::from_millis(1500));
        assert_eq!(config.tick_interval(), Duration::from_millis(1));
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(2)));
        assert!(config.validate().is_ok());

        let exact = DispatcherConfig::default().with_tick_interval(Duration::from_millis(20));
        assert_eq!(exact.tick_interval_ms, 20);
    }

    #[test]
    fn test_missing_file() {
        let err = DispatcherConfig::from_file("/nonexistent/media-mux.toml").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
