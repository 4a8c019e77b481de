//! UDP relay to a remote key-distribution server
//!
//! Each association gets its own connected UDP socket towards the key server,
//! so replies can be attributed to the association they belong to without
//! any framing. Replies are handed to the attached [`MediaDistributor`].
//!
//! A session lives until [`UdpForwarder::close_session`],
//! [`UdpForwarder::close_idle`] or [`UdpForwarder::stop`] releases its socket
//! and reader task.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::net::{lookup_host, ToSocketAddrs, UdpSocket};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::{KeyManagementTunnel, MediaDistributor};
use crate::association::AssociationId;
use crate::error::{Error, Result};
use crate::shutdown::signalled;
use crate::srtp::{ProtectionProfile, SrtpKeys};

/// Receive buffer for key server replies
const RELAY_BUFFER_SIZE: usize = 2048;

type DistributorSlot = Arc<RwLock<Option<Arc<dyn MediaDistributor>>>>;

/// Tunnel relaying DTLS to a key server over UDP
#[derive(Clone)]
pub struct UdpForwarder {
    inner: Arc<ForwarderInner>,
}

struct ForwarderInner {
    server: SocketAddr,
    sessions: AsyncMutex<HashMap<AssociationId, RelaySession>>,
    distributor: DistributorSlot,
    keys: Mutex<HashMap<AssociationId, SrtpKeys>>,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

/// Relay socket of one association and the task reading it
struct RelaySession {
    socket: Arc<UdpSocket>,
    reader: JoinHandle<()>,
    last_sent: Instant,
}

impl RelaySession {
    /// Stop the reader and wait for it, releasing its socket handle
    async fn close(self, association: &AssociationId) {
        self.reader.abort();
        match self.reader.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!("Relay task for {} ended abnormally: {}", association, e),
        }
    }
}

impl UdpForwarder {
    /// Create a forwarder towards a key server
    pub async fn connect(server: impl ToSocketAddrs) -> Result<Self> {
        let server = lookup_host(server)
            .await?
            .next()
            .ok_or_else(|| Error::Config("key server address did not resolve".to_string()))?;

        info!("Relaying DTLS to key server at {}", server);

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(ForwarderInner {
                server,
                sessions: AsyncMutex::new(HashMap::new()),
                distributor: Arc::new(RwLock::new(None)),
                keys: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                shutdown_tx,
            }),
        })
    }

    /// Key server address
    pub fn server_addr(&self) -> SocketAddr {
        self.inner.server
    }

    /// Attach the distributor that receives key server replies
    pub fn set_distributor(&self, distributor: Arc<dyn MediaDistributor>) {
        *self.inner.distributor.write() = Some(distributor);
    }

    /// Hop-by-hop keys installed for an association
    pub fn keys_for(&self, association: &AssociationId) -> Option<SrtpKeys> {
        self.inner.keys.lock().get(association).cloned()
    }

    /// Number of associations with an open relay socket
    pub async fn session_count(&self) -> usize {
        self.inner.sessions.lock().await.len()
    }

    /// Close the relay session of an association and forget its keys
    ///
    /// Returns false if the association had no open session. A later record
    /// for the association opens a fresh socket.
    pub async fn close_session(&self, association: &AssociationId) -> bool {
        self.inner.keys.lock().remove(association);

        let session = self.inner.sessions.lock().await.remove(association);
        match session {
            Some(session) => {
                session.close(association).await;
                debug!("Closed relay session for association {}", association);
                true
            }
            None => false,
        }
    }

    /// Close every session that has relayed nothing within `max_idle`
    ///
    /// Returns the number of closed sessions.
    pub async fn close_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let idle: Vec<_> = {
            let mut sessions = self.inner.sessions.lock().await;
            let ids: Vec<_> = sessions
                .iter()
                .filter(|(_, session)| now.duration_since(session.last_sent) >= max_idle)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id).map(|session| (id, session)))
                .collect()
        };

        let closed = idle.len();
        for (association, session) in idle {
            self.inner.keys.lock().remove(&association);
            session.close(&association).await;
        }

        if closed > 0 {
            debug!("Closed {} idle relay session(s)", closed);
        }
        closed
    }

    /// Stop every relay task and close the relay sockets
    pub async fn stop(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.shutdown_tx.send_replace(true);

        let sessions: Vec<_> = self.inner.sessions.lock().await.drain().collect();
        for (association, session) in sessions {
            if let Err(e) = session.reader.await {
                warn!("Relay task for {} ended abnormally: {}", association, e);
            }
        }
        // Breaks the dispatcher <-> forwarder reference cycle
        self.inner.distributor.write().take();

        info!("UDP forwarder to {} stopped", self.inner.server);
    }

    async fn session(&self, association: AssociationId) -> Result<Arc<UdpSocket>> {
        let mut sessions = self.inner.sessions.lock().await;
        if let Some(session) = sessions.get_mut(&association) {
            session.last_sent = Instant::now();
            return Ok(Arc::clone(&session.socket));
        }

        let local = if self.inner.server.is_ipv4() {
            SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)
        } else {
            SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0)
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.inner.server).await?;
        let socket = Arc::new(socket);

        debug!(
            "Opened relay socket {} for association {}",
            socket.local_addr()?,
            association
        );

        let reader = spawn_relay_reader(
            association,
            Arc::clone(&socket),
            Arc::clone(&self.inner.distributor),
            self.inner.shutdown_tx.subscribe(),
        );

        sessions.insert(
            association,
            RelaySession {
                socket: Arc::clone(&socket),
                reader,
                last_sent: Instant::now(),
            },
        );
        Ok(socket)
    }

    async fn relay(&self, association: AssociationId, record: Bytes) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Tunnel("forwarder stopped".to_string()));
        }

        let socket = self.session(association).await?;
        socket.send(&record).await?;

        trace!("Relayed {} bytes for {} to key server", record.len(), association);
        Ok(())
    }
}

/// Reads key server replies for one association until shutdown
fn spawn_relay_reader(
    association: AssociationId,
    socket: Arc<UdpSocket>,
    distributor: DistributorSlot,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; RELAY_BUFFER_SIZE];

        loop {
            tokio::select! {
                _ = signalled(&mut shutdown_rx) => break,
                result = socket.recv(&mut buf) => match result {
                    Ok(len) => {
                        let target = distributor.read().clone();
                        let Some(target) = target else {
                            debug!("No distributor attached; dropping key server reply for {}", association);
                            continue;
                        };

                        let record = Bytes::copy_from_slice(&buf[..len]);
                        if let Err(e) = target.send(association, record).await {
                            warn!("Error delivering key server reply to {}: {}", association, e);
                        }
                    }
                    Err(e) => {
                        debug!("Relay receive error for {}: {}", association, e);
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                }
            }
        }

        trace!("Relay reader for {} terminated", association);
    })
}

#[async_trait]
impl KeyManagementTunnel for UdpForwarder {
    async fn send(&self, association: AssociationId, record: Bytes) -> Result<()> {
        self.relay(association, record).await
    }

    async fn send_with_profiles(
        &self,
        association: AssociationId,
        record: Bytes,
        profiles: &[ProtectionProfile],
    ) -> Result<()> {
        debug!(
            "ClientHello from {} offered with {} protection profile(s)",
            association,
            profiles.len()
        );
        self.relay(association, record).await
    }

    async fn set_keys(&self, association: AssociationId, keys: SrtpKeys) -> Result<()> {
        self.inner.keys.lock().insert(association, keys);
        Ok(())
    }
}

impl std::fmt::Debug for UdpForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UdpForwarder({})", self.inner.server)
    }
}
