//! Receive and dispatch tasks
//!
//! The receive task only moves datagrams from the socket into a bounded
//! queue. The dispatch task drains the queue and routes each packet by its
//! first byte; all routing is serialized on it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use super::maintenance::MaintenanceHook;
use crate::association::AssociationRegistry;
use crate::dtls::DtlsRouter;
use crate::packet::{Packet, PacketClass};
use crate::shutdown::signalled;
use crate::srtp::SrtpForwarder;
use crate::stun::StunResponder;

/// Back-off after a failed socket read
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(1);

/// Everything the dispatch task needs to route a packet
pub(crate) struct PacketRouter {
    pub(crate) socket: Arc<UdpSocket>,
    pub(crate) registry: Arc<RwLock<AssociationRegistry>>,
    pub(crate) responder: StunResponder,
    pub(crate) dtls: DtlsRouter,
    pub(crate) srtp: SrtpForwarder,
}

impl PacketRouter {
    /// Route one datagram; failures are logged, never returned
    pub(crate) async fn route(&self, packet: Packet) {
        let association = self.registry.write().lookup_or_register(packet.source);
        let class = packet.class();

        trace!(
            "{} packet of {} bytes from {} ({})",
            class,
            packet.payload.len(),
            packet.source,
            association
        );

        match class {
            PacketClass::Stun => self.answer_stun(&packet.payload, packet.source).await,
            PacketClass::Dtls => self.dtls.route(association, packet.payload).await,
            PacketClass::Srtp => {
                if let Err(e) = self
                    .srtp
                    .forward(&self.socket, &self.registry, association, &packet.payload)
                    .await
                {
                    debug!("Dropping SRTP packet from {}: {}", packet.source, e);
                }
            }
            PacketClass::Unknown => {
                debug!(
                    "Dropping unclassifiable packet from {} (first byte {:?})",
                    packet.source,
                    packet.payload.first()
                );
            }
        }
    }

    async fn answer_stun(&self, payload: &[u8], source: SocketAddr) {
        match self.responder.handle(payload, source) {
            Ok(Some(reply)) => {
                if let Err(e) = self.socket.send_to(&reply, source).await {
                    warn!("Error sending STUN reply to {}: {}", source, e);
                }
            }
            Ok(None) => {}
            Err(e) => debug!("Dropping STUN packet from {}: {}", source, e),
        }
    }
}

/// Read datagrams into the queue until shutdown
pub(crate) async fn receive_loop(
    socket: Arc<UdpSocket>,
    queue: mpsc::Sender<Packet>,
    mut shutdown_rx: watch::Receiver<bool>,
    buffer_size: usize,
) {
    let mut buf = vec![0u8; buffer_size];

    loop {
        tokio::select! {
            biased;
            _ = signalled(&mut shutdown_rx) => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, source)) => {
                    let packet = Packet::new(source, Bytes::copy_from_slice(&buf[..len]));

                    // A full queue holds intake here, but shutdown still wins
                    tokio::select! {
                        biased;
                        _ = signalled(&mut shutdown_rx) => break,
                        sent = queue.send(packet) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    debug!("Transient UDP read error: {}", e);
                    tokio::time::sleep(READ_ERROR_BACKOFF).await;
                }
            }
        }
    }

    trace!("Receive task terminated");
}

/// Route queued packets and run maintenance until shutdown
pub(crate) async fn dispatch_loop(
    router: PacketRouter,
    mut queue: mpsc::Receiver<Packet>,
    mut shutdown_rx: watch::Receiver<bool>,
    tick_interval: Duration,
    maintenance: Arc<dyn MaintenanceHook>,
) {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = signalled(&mut shutdown_rx) => break,
            _ = ticker.tick() => maintenance.on_tick(&router.registry),
            packet = queue.recv() => match packet {
                Some(packet) => router.route(packet).await,
                None => break,
            },
        }
    }

    trace!("Dispatch task terminated");
}
