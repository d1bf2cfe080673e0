use super::transmission::Transmission;
use crate::config::ConnectionConfig;
use crate::error::ClientError;
use crate::subscription::{SubscriptionId, Subscribers};
use log::{debug, error, info, warn};
use protocol::{
    build_cmd_packet, build_keep_alive_packet, build_login_packet, verify_login, wire_sequence,
    Event, Sequence, MAX_PACKET_SIZE,
};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// State shared between a [`Connection`] and the tasks it spawns.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) sequence: AtomicU32,
    pub(crate) pingback: AtomicU64,
    pub(crate) keep_alive: AtomicU64,
    /// Outstanding commands by wire sequence.
    pub(crate) transmissions: RwLock<HashMap<u8, Transmission>>,
    /// Keep-alives still owed a reply, counted by wire sequence.
    pub(crate) keep_alives: Mutex<HashMap<u8, u32>>,
    pub(crate) subscribers: RwLock<Subscribers<Event>>,
}

impl Shared {
    pub(crate) fn sequence(&self) -> Sequence {
        self.sequence.load(Ordering::SeqCst)
    }

    pub(crate) fn add_pingback(&self) -> u64 {
        self.pingback.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn add_keep_alive(&self) -> u64 {
        self.keep_alive.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Notes that a keep-alive with wire sequence `key` is about to go out,
    /// so its bare reply is not taken for a command response.
    pub(crate) async fn expect_pingback(&self, key: u8) {
        *self.keep_alives.lock().await.entry(key).or_insert(0) += 1;
    }

    /// Consumes one outstanding keep-alive for `key`, if there is one.
    pub(crate) async fn take_pingback(&self, key: u8) -> bool {
        let mut keep_alives = self.keep_alives.lock().await;
        match keep_alives.get_mut(&key) {
            Some(1) => {
                keep_alives.remove(&key);
                true
            }
            Some(count) => {
                *count -= 1;
                true
            }
            None => false,
        }
    }

    /// Removes `transmission` from the table, unless its slot has since been
    /// taken by a newer command with the same wire sequence.
    pub(crate) async fn retire(&self, transmission: &Transmission) -> bool {
        let key = wire_sequence(transmission.key());
        let mut transmissions = self.transmissions.write().await;
        if transmissions
            .get(&key)
            .is_some_and(|current| current.is_same(transmission))
        {
            transmissions.remove(&key);
            true
        } else {
            false
        }
    }
}

/// Cancellation scope for the loops of one open session.
#[derive(Debug)]
struct Supervisor {
    token: CancellationToken,
    tracker: TaskTracker,
}

/// A single BattlEye RCON session.
///
/// The connection is closed while it holds no socket. [`open`](Self::open)
/// logs in and starts the keep-alive and reader loops, [`close`](Self::close)
/// stops them and releases the socket. Callers serialize `open`, `close` and
/// `write`; everything else may be called concurrently.
#[derive(Debug)]
pub struct Connection {
    config: ConnectionConfig,
    socket: Option<Arc<UdpSocket>>,
    pub(super) shared: Arc<Shared>,
    supervisor: Option<Supervisor>,
    /// Cancelled on drop so subscription watchdogs do not outlive us.
    lifetime: CancellationToken,
}

impl Connection {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            socket: None,
            shared: Arc::new(Shared::default()),
            supervisor: None,
            lifetime: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// True while logged in with both session loops running. A connection
    /// whose loops stopped on a fatal error reports false but still needs
    /// [`close`](Self::close) to release its socket.
    pub fn is_open(&self) -> bool {
        self.socket.is_some() && !self.session_ended()
    }

    fn session_ended(&self) -> bool {
        self.supervisor
            .as_ref()
            .is_some_and(|supervisor| supervisor.token.is_cancelled())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Dials the server, logs in and starts the session loops.
    ///
    /// Nothing is kept if any step fails; the connection stays closed.
    pub async fn open(&mut self) -> Result<(), ClientError> {
        if self.socket.is_some() {
            return Err(ClientError::AlreadyOpen);
        }

        let socket = dial(&self.config.address).await.map_err(ClientError::Dial)?;
        self.login(&socket).await?;
        info!("Logged in to {}", self.config.address);

        self.socket = Some(Arc::new(socket));
        self.hold()
    }

    async fn login(&self, socket: &UdpSocket) -> Result<(), ClientError> {
        let packet = build_login_packet(&self.config.password);
        match timeout(self.config.login_write_timeout, socket.send(&packet)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(ClientError::LoginSendFailed(e)),
            Err(_) => {
                return Err(ClientError::LoginSendFailed(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "login write timed out",
                )))
            }
        }

        let mut buffer = [0u8; MAX_PACKET_SIZE];
        let len = match timeout(self.config.login_read_timeout, socket.recv(&mut buffer)).await {
            Ok(Ok(len)) => len,
            Ok(Err(e)) => return Err(ClientError::LoginReadFailed(e)),
            Err(_) => return Err(ClientError::LoginTimeout(self.config.login_read_timeout)),
        };

        verify_login(&buffer[..len]).map_err(ClientError::LoginVerifyFailed)
    }

    /// Starts the keep-alive writer and the reader under one cancellation
    /// scope. A fatal error in either loop stops both.
    pub fn hold(&mut self) -> Result<(), ClientError> {
        let socket = self.socket.clone().ok_or(ClientError::NotOpen)?;
        if self.supervisor.is_some() {
            return Err(ClientError::AlreadyOpen);
        }

        let token = CancellationToken::new();
        let tracker = TaskTracker::new();

        let writer = writer_loop(
            Arc::clone(&socket),
            Arc::clone(&self.shared),
            self.config.keep_alive_interval,
            token.clone(),
        );
        tracker.spawn(async move {
            if let Err(e) = writer.await {
                error!("Keep-alive loop stopped: {}", e);
            }
        });

        let reader = reader_loop(
            socket,
            Arc::clone(&self.shared),
            self.config.read_timeout,
            token.clone(),
            tracker.clone(),
        );
        tracker.spawn(async move {
            if let Err(e) = reader.await {
                error!("Reader loop stopped: {}", e);
            }
        });

        self.supervisor = Some(Supervisor { token, tracker });
        Ok(())
    }

    /// Stops both loops, waits for them and any in-flight packet handlers to
    /// finish, then releases the socket. Pending transmissions are dropped.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        let socket = self.socket.take().ok_or(ClientError::NotOpen)?;

        if let Some(supervisor) = self.supervisor.take() {
            supervisor.token.cancel();
            supervisor.tracker.close();
            supervisor.tracker.wait().await;
        }

        let dropped = {
            let mut transmissions = self.shared.transmissions.write().await;
            let count = transmissions.len();
            transmissions.clear();
            count
        };
        if dropped > 0 {
            debug!("Dropped {} pending transmissions on close", dropped);
        }
        self.shared.keep_alives.lock().await.clear();

        Arc::try_unwrap(socket)
            .map_err(|_| ClientError::CloseFailed("socket is still in use".to_string()))?;
        info!("Connection to {} closed", self.config.address);
        Ok(())
    }

    /// Sends `cmd` under the next sequence and returns its transmission.
    pub async fn write(&self, cmd: &str) -> Result<Transmission, ClientError> {
        let socket = self.socket.as_ref().ok_or(ClientError::NotOpen)?;
        if self.session_ended() {
            return Err(ClientError::SessionEnded);
        }

        let seq = self.next_sequence();
        let key = wire_sequence(seq);
        let transmission = Transmission::new(seq, cmd);

        {
            let mut transmissions = self.shared.transmissions.write().await;
            if let Some(stale) = transmissions.insert(key, transmission.clone()) {
                warn!(
                    "Sequence {} wrapped onto pending {:?}, discarding it",
                    key,
                    stale.request()
                );
            }
        }

        if let Err(e) = socket.send(&build_cmd_packet(cmd, seq)).await {
            self.shared.transmissions.write().await.remove(&key);
            return Err(ClientError::SendFailed(e));
        }

        debug!("Sent command {:?} with sequence {}", cmd, seq);
        Ok(transmission)
    }

    /// Delivers every server message to `out` until `token` is cancelled.
    /// Cancelling removes the subscription and closes `out`.
    pub async fn subscribe(
        &self,
        token: CancellationToken,
        out: mpsc::Sender<Event>,
    ) -> SubscriptionId {
        let id = self.shared.subscribers.write().await.add(out);
        debug!("Subscribed {}", id);

        let shared = Arc::downgrade(&self.shared);
        let lifetime = self.lifetime.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = lifetime.cancelled() => return,
            }
            if let Some(shared) = shared.upgrade() {
                if shared.subscribers.write().await.remove(id) {
                    debug!("Unsubscribed {}", id);
                }
            }
        });

        id
    }

    /// Removes a subscription right away. Returns false if it was already gone.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.subscribers.write().await.remove(id)
    }

    pub async fn subscriber_count(&self) -> usize {
        self.shared.subscribers.read().await.len()
    }

    /// Processes one inbound packet as the reader loop would.
    pub async fn handle_packet(&self, packet: &[u8]) -> Result<(), ClientError> {
        self.shared
            .handle_packet(self.socket.as_deref(), packet)
            .await
    }

    pub fn sequence(&self) -> Sequence {
        self.shared.sequence()
    }

    pub fn next_sequence(&self) -> Sequence {
        self.shared.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn reset_sequence(&self) {
        self.shared.sequence.store(0, Ordering::SeqCst);
    }

    pub fn pingback(&self) -> u64 {
        self.shared.pingback.load(Ordering::SeqCst)
    }

    pub fn reset_pingback(&self) {
        self.shared.pingback.store(0, Ordering::SeqCst);
    }

    pub fn keep_alive(&self) -> u64 {
        self.shared.keep_alive.load(Ordering::SeqCst)
    }

    pub fn reset_keep_alive(&self) {
        self.shared.keep_alive.store(0, Ordering::SeqCst);
    }

    pub async fn transmission(&self, seq: Sequence) -> Option<Transmission> {
        self.shared
            .transmissions
            .read()
            .await
            .get(&wire_sequence(seq))
            .cloned()
    }

    pub async fn pending_transmissions(&self) -> usize {
        self.shared.transmissions.read().await.len()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.lifetime.cancel();
        if let Some(supervisor) = &self.supervisor {
            supervisor.token.cancel();
        }
    }
}

impl crate::rcon::Connection for Connection {
    type Transmission = Transmission;

    async fn open(&mut self) -> Result<(), ClientError> {
        self.open().await
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        self.close().await
    }

    async fn write(&self, cmd: &str) -> Result<Transmission, ClientError> {
        self.write(cmd).await
    }

    async fn subscribe(
        &self,
        token: CancellationToken,
        out: mpsc::Sender<Event>,
    ) -> SubscriptionId {
        self.subscribe(token, out).await
    }
}

/// Resolves `address` and returns a UDP socket connected to the first
/// candidate that accepts.
async fn dial(address: &str) -> io::Result<UdpSocket> {
    let mut last_err = None;

    for addr in lookup_host(address).await? {
        let local: SocketAddr = if addr.is_ipv4() {
            ([0u8; 4], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };

        let attempt = async {
            let socket = UdpSocket::bind(local).await?;
            socket.connect(addr).await?;
            Ok::<_, io::Error>(socket)
        };
        match attempt.await {
            Ok(socket) => return Ok(socket),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} did not resolve to any address", address),
        )
    }))
}

async fn writer_loop(
    socket: Arc<UdpSocket>,
    shared: Arc<Shared>,
    period: Duration,
    token: CancellationToken,
) -> Result<(), ClientError> {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("Keep-alive loop shutting down");
                return Ok(());
            }
            _ = ticker.tick() => {
                let seq = shared.sequence();
                shared.expect_pingback(wire_sequence(seq)).await;
                let packet = build_keep_alive_packet(seq);
                if let Err(e) = socket.send(&packet).await {
                    token.cancel();
                    return Err(ClientError::SendFailed(e));
                }
                let count = shared.add_keep_alive();
                debug!("Sent keep-alive #{}", count);
            }
        }
    }
}

async fn reader_loop(
    socket: Arc<UdpSocket>,
    shared: Arc<Shared>,
    read_timeout: Duration,
    token: CancellationToken,
    tracker: TaskTracker,
) -> Result<(), ClientError> {
    let mut buffer = [0u8; MAX_PACKET_SIZE];

    loop {
        let received = tokio::select! {
            _ = token.cancelled() => {
                debug!("Reader loop shutting down");
                return Ok(());
            }
            received = timeout(read_timeout, socket.recv(&mut buffer)) => received,
        };

        let len = match received {
            // Read deadline elapsed; poll again.
            Err(_) => continue,
            Ok(Ok(len)) => len,
            Ok(Err(e)) => {
                token.cancel();
                return Err(ClientError::Receive(e));
            }
        };

        let packet = buffer[..len].to_vec();
        let shared = Arc::clone(&shared);
        let socket = Arc::clone(&socket);
        tracker.spawn(async move {
            if let Err(e) = shared.handle_packet(Some(socket.as_ref()), &packet).await {
                warn!("Dropping packet: {}", e);
            }
        });
    }
}
