//! Single-socket media dispatcher
//!
//! A [`MediaDispatcher`] owns one UDP socket shared by every peer and every
//! protocol. Each inbound datagram is attributed to an association and routed
//! by its first byte:
//!
//! - STUN is answered in place by the Binding responder
//! - DTLS is handed to the key-management tunnel
//! - SRTP is relayed to the other peers
//!
//! The key-management side talks back to peers through [`MediaDistributor`],
//! which the dispatcher implements.

mod maintenance;
mod router;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::association::{AssociationId, AssociationRegistry};
use crate::config::DispatcherConfig;
use crate::dtls::DtlsRouter;
use crate::error::{Error, Result};
use crate::packet::{classify, PacketClass};
use crate::srtp::{ProtectionProfile, SrtpForwarder, SrtpKeys};
use crate::stun::StunResponder;
use crate::tunnel::{KeyManagementTunnel, MediaDistributor};

pub use maintenance::{IdlePruner, MaintenanceHook, NoopMaintenance};
use router::{dispatch_loop, receive_loop, PacketRouter};

/// Lifecycle of a dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Created, not yet listening
    Idle,
    /// Socket bound, tasks running
    Running,
    /// Shutdown signalled, waiting for the tasks
    Draining,
    /// Tasks joined and socket closed
    Stopped,
}

impl std::fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Demultiplexes STUN, DTLS and SRTP on one UDP socket
///
/// Cloning yields another handle to the same dispatcher.
#[derive(Clone)]
pub struct MediaDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    config: DispatcherConfig,
    registry: Arc<RwLock<AssociationRegistry>>,
    responder: StunResponder,
    dtls: DtlsRouter,
    srtp: SrtpForwarder,
    maintenance: RwLock<Arc<dyn MaintenanceHook>>,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    state: Mutex<DispatcherState>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    // Serializes listen and stop
    lifecycle: AsyncMutex<()>,
}

impl MediaDispatcher {
    /// Create a dispatcher routing DTLS to `tunnel`
    pub fn new(config: DispatcherConfig, tunnel: Arc<dyn KeyManagementTunnel>) -> Result<Self> {
        config.validate()?;

        let mut responder = match &config.ice_password {
            Some(password) => StunResponder::with_password(password.clone())?,
            None => StunResponder::new(),
        };
        if let Some(software) = &config.software {
            responder = responder.with_software(software.clone())?;
        }

        let maintenance: Arc<dyn MaintenanceHook> = match config.idle_timeout() {
            Some(max_idle) => Arc::new(IdlePruner::new(max_idle)),
            None => Arc::new(NoopMaintenance),
        };

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(DispatcherInner {
                registry: Arc::new(RwLock::new(AssociationRegistry::new(config.association_id_width))),
                responder,
                dtls: DtlsRouter::new(tunnel, config.protection_profiles.clone()),
                srtp: SrtpForwarder::new(config.srtp_policy),
                maintenance: RwLock::new(maintenance),
                socket: RwLock::new(None),
                state: Mutex::new(DispatcherState::Idle),
                shutdown_tx,
                tasks: Mutex::new(Vec::new()),
                lifecycle: AsyncMutex::new(()),
                config,
            }),
        })
    }

    /// Replace the maintenance hook; takes effect on the next `listen`
    pub fn with_maintenance(self, hook: Arc<dyn MaintenanceHook>) -> Self {
        *self.inner.maintenance.write() = hook;
        self
    }

    /// Bind `bind_ip:port` and start the receive and dispatch tasks
    ///
    /// Port 0 picks an ephemeral port; see [`local_addr`](Self::local_addr).
    /// A dispatcher is started at most once.
    pub async fn listen(&self, port: u16) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        if *self.inner.state.lock() != DispatcherState::Idle {
            return Err(Error::AlreadyListening);
        }

        let bind_addr = SocketAddr::new(self.inner.config.bind_ip, port);
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| Error::Bind { port, source })?;
        let socket = Arc::new(socket);
        let local_addr = socket.local_addr()?;

        let (queue_tx, queue_rx) = mpsc::channel(self.inner.config.queue_depth);

        let router = PacketRouter {
            socket: Arc::clone(&socket),
            registry: Arc::clone(&self.inner.registry),
            responder: self.inner.responder.clone(),
            dtls: self.inner.dtls.clone(),
            srtp: self.inner.srtp,
        };
        let maintenance = Arc::clone(&*self.inner.maintenance.read());

        let receive = tokio::spawn(receive_loop(
            Arc::clone(&socket),
            queue_tx,
            self.inner.shutdown_tx.subscribe(),
            self.inner.config.recv_buffer_size,
        ));
        let dispatch = tokio::spawn(dispatch_loop(
            router,
            queue_rx,
            self.inner.shutdown_tx.subscribe(),
            self.inner.config.tick_interval(),
            maintenance,
        ));

        self.inner.tasks.lock().extend([receive, dispatch]);
        *self.inner.socket.write() = Some(socket);
        *self.inner.state.lock() = DispatcherState::Running;

        info!("Media dispatcher listening on {}", local_addr);
        Ok(())
    }

    /// Bound socket address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket().ok().and_then(|socket| socket.local_addr().ok())
    }

    /// Current lifecycle state
    pub fn state(&self) -> DispatcherState {
        *self.inner.state.lock()
    }

    /// Read access to the association registry
    ///
    /// The guard is a blocking lock and the dispatch task takes the write
    /// lock for every packet. Never hold it across an `.await`: doing so
    /// stalls a runtime worker until it is released. Use
    /// [`peers`](Self::peers) for a copy that can be kept.
    pub fn registry(&self) -> RwLockReadGuard<'_, AssociationRegistry> {
        self.inner.registry.read()
    }

    /// Snapshot of every known association and its address
    pub fn peers(&self) -> Vec<(AssociationId, SocketAddr)> {
        self.inner.registry.read().snapshot()
    }

    /// Configuration in effect
    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    /// ICE password that signs STUN replies
    pub fn ice_password(&self) -> &str {
        self.inner.responder.password()
    }

    /// Send a DTLS record to the peer of an association
    pub async fn send(&self, association: AssociationId, record: Bytes) -> Result<()> {
        let (socket, addr) = self.send_target(association, &record)?;
        socket.send_to(&record, addr).await?;

        debug!("Sent {} byte DTLS record to {} ({})", record.len(), addr, association);
        Ok(())
    }

    /// Send a DTLS record and store the keys negotiated for the association
    ///
    /// Nothing is stored if the record is rejected.
    pub async fn send_with_keys(
        &self,
        association: AssociationId,
        record: Bytes,
        profile: ProtectionProfile,
        keys: SrtpKeys,
    ) -> Result<()> {
        let (socket, addr) = self.send_target(association, &record)?;

        if !self.inner.registry.write().set_keys(&association, profile, keys) {
            return Err(Error::UnknownClient(association));
        }
        info!("Negotiated {} for association {}", profile, association);

        socket.send_to(&record, addr).await?;
        debug!("Sent {} byte DTLS record to {} ({})", record.len(), addr, association);
        Ok(())
    }

    /// Stop both tasks and close the socket
    ///
    /// Safe to call repeatedly and concurrently; every call returns once the
    /// dispatcher is stopped.
    pub async fn stop(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;

        {
            let mut state = self.inner.state.lock();
            match *state {
                DispatcherState::Stopped => return,
                DispatcherState::Idle => {
                    *state = DispatcherState::Stopped;
                    return;
                }
                DispatcherState::Running | DispatcherState::Draining => {
                    *state = DispatcherState::Draining;
                }
            }
        }

        self.inner.shutdown_tx.send_replace(true);

        let tasks: Vec<_> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Dispatcher task ended abnormally: {}", e);
            }
        }

        // Last reference once both tasks are gone
        let socket = self.inner.socket.write().take();
        let local_addr = socket.and_then(|socket| socket.local_addr().ok());

        *self.inner.state.lock() = DispatcherState::Stopped;

        match local_addr {
            Some(addr) => info!("Media dispatcher on {} stopped", addr),
            None => info!("Media dispatcher stopped"),
        }
    }

    /// Validate a send and find where it goes
    ///
    /// Checks, in order: DTLS payload, known association, open socket.
    fn send_target(&self, association: AssociationId, record: &[u8]) -> Result<(Arc<UdpSocket>, SocketAddr)> {
        let class = classify(record);
        if class != PacketClass::Dtls {
            return Err(Error::NonDtlsPacket(class));
        }

        let addr = self
            .inner
            .registry
            .read()
            .address_of(&association)
            .ok_or(Error::UnknownClient(association))?;

        Ok((self.socket()?, addr))
    }

    fn socket(&self) -> Result<Arc<UdpSocket>> {
        self.inner.socket.read().clone().ok_or(Error::NotListening)
    }
}

#[async_trait]
impl MediaDistributor for MediaDispatcher {
    async fn send(&self, association: AssociationId, record: Bytes) -> Result<()> {
        MediaDispatcher::send(self, association, record).await
    }

    async fn send_with_keys(
        &self,
        association: AssociationId,
        record: Bytes,
        profile: ProtectionProfile,
        keys: SrtpKeys,
    ) -> Result<()> {
        MediaDispatcher::send_with_keys(self, association, record, profile, keys).await
    }
}

impl std::fmt::Debug for MediaDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaDispatcher")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("associations", &self.inner.registry.read().len())
            .finish()
    }
}
