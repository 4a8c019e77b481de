//! Shared helpers for the integration tests
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

use rvoip_media_mux::{
    AssociationId, DispatcherConfig, KeyManagementTunnel, MediaDistributor, ProtectionProfile, Result,
    SrtpKeys,
};

/// How long a test waits for a datagram that should arrive
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a test waits to be sure a datagram does not arrive
pub const SILENCE: Duration = Duration::from_millis(200);

/// Key server that echoes each datagram with 0x01 appended
pub struct EchoKeyServer {
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl EchoKeyServer {
    pub async fn start() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        let task = tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            while let Ok((len, from)) = socket.recv_from(&mut buf).await {
                let mut reply = buf[..len].to_vec();
                reply.push(0x01);
                let _ = socket.send_to(&reply, from).await;
            }
        });

        Self { addr, task }
    }
}

impl Drop for EchoKeyServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Distributor that hands every delivery to a channel
pub struct ChannelDistributor {
    tx: mpsc::UnboundedSender<(AssociationId, Bytes)>,
}

impl ChannelDistributor {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(AssociationId, Bytes)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl MediaDistributor for ChannelDistributor {
    async fn send(&self, association: AssociationId, record: Bytes) -> Result<()> {
        let _ = self.tx.send((association, record));
        Ok(())
    }

    async fn send_with_keys(
        &self,
        association: AssociationId,
        record: Bytes,
        _profile: ProtectionProfile,
        _keys: SrtpKeys,
    ) -> Result<()> {
        let _ = self.tx.send((association, record));
        Ok(())
    }
}

/// What a dispatcher handed to its tunnel
#[derive(Debug, Clone, PartialEq)]
pub enum TunnelCall {
    Send(AssociationId, Bytes),
    ClientHello(AssociationId, Bytes, Vec<ProtectionProfile>),
}

/// Tunnel that reports every call on a channel
pub struct RecordingTunnel {
    tx: mpsc::UnboundedSender<TunnelCall>,
}

impl RecordingTunnel {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TunnelCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl KeyManagementTunnel for RecordingTunnel {
    async fn send(&self, association: AssociationId, record: Bytes) -> Result<()> {
        let _ = self.tx.send(TunnelCall::Send(association, record));
        Ok(())
    }

    async fn send_with_profiles(
        &self,
        association: AssociationId,
        record: Bytes,
        profiles: &[ProtectionProfile],
    ) -> Result<()> {
        let _ = self
            .tx
            .send(TunnelCall::ClientHello(association, record, profiles.to_vec()));
        Ok(())
    }

    async fn set_keys(&self, _association: AssociationId, _keys: SrtpKeys) -> Result<()> {
        Ok(())
    }
}

/// Loopback-only dispatcher configuration
pub fn loopback_config() -> DispatcherConfig {
    DispatcherConfig::default().with_bind_ip("127.0.0.1".parse().unwrap())
}

/// A peer socket on loopback
pub async fn peer() -> (UdpSocket, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    (socket, addr)
}

/// Next datagram on `socket`, or None after `wait`
pub async fn recv_within(socket: &UdpSocket, wait: Duration) -> Option<Vec<u8>> {
    let mut buf = [0u8; 2048];
    match timeout(wait, socket.recv_from(&mut buf)).await {
        Ok(Ok((len, _))) => Some(buf[..len].to_vec()),
        _ => None,
    }
}

/// Poll `condition` until it holds; false on timeout
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + RECV_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Sample key material
pub fn sample_keys() -> SrtpKeys {
    SrtpKeys::new(
        Bytes::from_static(&[0x11; 16]),
        Bytes::from_static(&[0x22; 16]),
        Bytes::from_static(&[0x33; 14]),
        Bytes::from_static(&[0x44; 14]),
    )
}
