//! Server network layer answering BattlEye RCON traffic over UDP

use crate::session_manager::SessionManager;
use log::{debug, error, info, warn};
use protocol::{
    build_cmd_response, build_login_response, build_multi_response, build_server_message, data,
    packet_type, verify, PacketType, MAX_PACKET_SIZE,
};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Behaviour of a [`MockServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub password: String,
    /// Command responses longer than this are split into fragments.
    pub max_fragment: usize,
    /// Send fragments last-first to exercise out-of-order reassembly.
    pub reverse_fragments: bool,
    /// Canned answers by command; anything else is echoed back.
    pub responses: HashMap<String, String>,
    pub session_timeout: Duration,
    pub max_sessions: usize,
    /// Push `broadcast_message` to every session at this interval.
    pub broadcast_interval: Option<Duration>,
    pub broadcast_message: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            password: String::new(),
            max_fragment: 1024,
            reverse_fragments: false,
            responses: HashMap::new(),
            session_timeout: Duration::from_secs(45),
            max_sessions: 16,
            broadcast_interval: None,
            broadcast_message: "RCon admin #0 (127.0.0.1) logged in".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            ..Self::default()
        }
    }

    pub fn with_response(mut self, command: impl Into<String>, response: impl Into<String>) -> Self {
        self.responses.insert(command.into(), response.into());
        self
    }

    pub fn with_max_fragment(mut self, max_fragment: usize) -> Self {
        self.max_fragment = max_fragment.max(1);
        self
    }

    pub fn with_reverse_fragments(mut self, reverse: bool) -> Self {
        self.reverse_fragments = reverse;
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    pub fn with_broadcast(mut self, every: Duration, message: impl Into<String>) -> Self {
        self.broadcast_interval = Some(every);
        self.broadcast_message = message.into();
        self
    }
}

#[derive(Debug, Default)]
struct Stats {
    logins: AtomicU64,
    rejected_logins: AtomicU64,
    commands: AtomicU64,
    keep_alives: AtomicU64,
    acks: AtomicU64,
    broadcasts: AtomicU64,
}

/// Counters of everything the server has handled so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub logins: u64,
    pub rejected_logins: u64,
    pub commands: u64,
    pub keep_alives: u64,
    pub acks: u64,
    pub broadcasts: u64,
}

impl Stats {
    fn snapshot(&self) -> ServerStats {
        ServerStats {
            logins: self.logins.load(Ordering::SeqCst),
            rejected_logins: self.rejected_logins.load(Ordering::SeqCst),
            commands: self.commands.load(Ordering::SeqCst),
            keep_alives: self.keep_alives.load(Ordering::SeqCst),
            acks: self.acks.load(Ordering::SeqCst),
            broadcasts: self.broadcasts.load(Ordering::SeqCst),
        }
    }
}

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
enum NetworkEvent {
    PacketReceived { packet: Vec<u8>, addr: SocketAddr },
    SessionTimeout { session_id: u32 },
}

/// Requests sent from a [`ServerHandle`] to the main server loop
#[derive(Debug)]
enum ServerCommand {
    Broadcast { message: String },
}

/// Control surface for a running [`MockServer`].
#[derive(Debug, Clone)]
pub struct ServerHandle {
    commands: mpsc::UnboundedSender<ServerCommand>,
    sessions: Arc<RwLock<SessionManager>>,
    stats: Arc<Stats>,
}

impl ServerHandle {
    /// Queues a server message for every logged-in session. Returns false if
    /// the server has stopped.
    pub fn broadcast(&self, message: impl Into<String>) -> bool {
        self.commands
            .send(ServerCommand::Broadcast {
                message: message.into(),
            })
            .is_ok()
    }

    pub fn stats(&self) -> ServerStats {
        self.stats.snapshot()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// A BattlEye-speaking UDP server for local development and tests
pub struct MockServer {
    socket: Arc<UdpSocket>,
    sessions: Arc<RwLock<SessionManager>>,
    config: ServerConfig,
    stats: Arc<Stats>,

    event_tx: mpsc::UnboundedSender<NetworkEvent>,
    event_rx: mpsc::UnboundedReceiver<NetworkEvent>,
    command_tx: mpsc::UnboundedSender<ServerCommand>,
    command_rx: mpsc::UnboundedReceiver<ServerCommand>,
}

impl MockServer {
    pub async fn bind(addr: &str, config: ServerConfig) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Mock RCON server listening on {}", socket.local_addr()?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let sessions = SessionManager::new(config.max_sessions, config.session_timeout);

        Ok(MockServer {
            socket,
            sessions: Arc::new(RwLock::new(sessions)),
            config,
            stats: Arc::new(Stats::default()),
            event_tx,
            event_rx,
            command_tx,
            command_rx,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            commands: self.command_tx.clone(),
            sessions: Arc::clone(&self.sessions),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self, token: CancellationToken) {
        let socket = Arc::clone(&self.socket);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_PACKET_SIZE];

            loop {
                let received = tokio::select! {
                    _ = token.cancelled() => break,
                    received = socket.recv_from(&mut buffer) => received,
                };

                match received {
                    Ok((len, addr)) => {
                        let packet = buffer[..len].to_vec();
                        if event_tx
                            .send(NetworkEvent::PacketReceived { packet, addr })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        // ICMP errors from departed clients surface here.
                        debug!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that drops idle sessions
    fn spawn_timeout_checker(&self, token: CancellationToken) {
        let sessions = Arc::clone(&self.sessions);
        let event_tx = self.event_tx.clone();
        let period = (self.config.session_timeout / 2)
            .clamp(Duration::from_millis(10), Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = interval(period);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let timed_out = sessions.write().await.check_timeouts();
                for session_id in timed_out {
                    if event_tx
                        .send(NetworkEvent::SessionTimeout { session_id })
                        .is_err()
                    {
                        return;
                    }
                }
            }
        });
    }

    async fn send(&self, packet: &[u8], addr: SocketAddr) {
        if let Err(e) = self.socket.send_to(packet, addr).await {
            error!("Failed to send packet to {}: {}", addr, e);
        }
    }

    /// Processes one datagram from `addr`
    async fn handle_packet(&self, packet: &[u8], addr: SocketAddr) {
        if let Err(e) = verify(packet) {
            warn!("Dropping invalid packet from {}: {}", addr, e);
            return;
        }
        let (Ok(kind), Ok(payload)) = (packet_type(packet), data(packet)) else {
            return;
        };

        if kind == PacketType::Login {
            self.handle_login(payload, addr).await;
            return;
        }

        if !self.sessions.write().await.touch(addr) {
            debug!("Ignoring packet from {} without a session", addr);
            return;
        }

        match kind {
            PacketType::Command => self.handle_command(payload, addr).await,
            PacketType::ServerMessage => {
                self.sessions.write().await.record_ack(addr);
                self.stats.acks.fetch_add(1, Ordering::SeqCst);
            }
            other => warn!("Unexpected packet type {:?} from {}", other, addr),
        }
    }

    async fn handle_login(&self, password: &[u8], addr: SocketAddr) {
        let accepted = password == self.config.password.as_bytes() && {
            let mut sessions = self.sessions.write().await;
            if let Some(existing) = sessions.find_session_by_addr(addr) {
                sessions.remove_session(&existing);
            }
            sessions.add_session(addr).is_some()
        };

        if accepted {
            self.stats.logins.fetch_add(1, Ordering::SeqCst);
        } else {
            info!("Rejected login from {}", addr);
            self.stats.rejected_logins.fetch_add(1, Ordering::SeqCst);
        }
        self.send(&build_login_response(accepted), addr).await;
    }

    async fn handle_command(&self, payload: &[u8], addr: SocketAddr) {
        let Some((&seq, body)) = payload.split_first() else {
            return;
        };

        if body.is_empty() {
            self.stats.keep_alives.fetch_add(1, Ordering::SeqCst);
            debug!("Keep-alive {} from {}", seq, addr);
            self.send(&build_cmd_response(seq, &[]), addr).await;
            return;
        }

        self.stats.commands.fetch_add(1, Ordering::SeqCst);
        let command = String::from_utf8_lossy(body);
        let response = self
            .config
            .responses
            .get(command.as_ref())
            .map(String::as_str)
            .unwrap_or(command.as_ref());
        debug!("Command {:?} from {} (sequence {})", command, addr, seq);

        if response.len() <= self.config.max_fragment {
            self.send(&build_cmd_response(seq, response.as_bytes()), addr)
                .await;
            return;
        }

        let mut fragments = build_multi_response(seq, response.as_bytes(), self.config.max_fragment);
        if self.config.reverse_fragments {
            fragments.reverse();
        }
        for fragment in fragments {
            self.send(&fragment, addr).await;
        }
    }

    /// Pushes `message` to every session, each under its own sequence
    async fn broadcast(&self, message: &str) {
        let targets = self.sessions.write().await.push_targets();
        if targets.is_empty() {
            return;
        }

        for (addr, seq) in targets {
            self.send(&build_server_message(seq, message), addr).await;
        }
        self.stats.broadcasts.fetch_add(1, Ordering::SeqCst);
    }

    /// Main server loop. Returns once `token` is cancelled.
    pub async fn run(mut self, token: CancellationToken) {
        self.spawn_network_receiver(token.clone());
        self.spawn_timeout_checker(token.clone());

        let broadcasting = self.config.broadcast_interval.is_some();
        let period = self
            .config
            .broadcast_interval
            .unwrap_or(Duration::from_secs(3600))
            .max(Duration::from_millis(1));
        let mut broadcast_interval = interval(period);
        broadcast_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip the first tick since it fires immediately
        broadcast_interval.tick().await;

        info!("Mock RCON server started");

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Mock RCON server shutting down");
                    break;
                }

                event = self.event_rx.recv() => {
                    match event {
                        Some(NetworkEvent::PacketReceived { packet, addr }) => {
                            self.handle_packet(&packet, addr).await;
                        }
                        Some(NetworkEvent::SessionTimeout { session_id }) => {
                            info!("Session {} timed out", session_id);
                        }
                        None => break,
                    }
                }

                Some(command) = self.command_rx.recv() => {
                    match command {
                        ServerCommand::Broadcast { message } => self.broadcast(&message).await,
                    }
                }

                _ = broadcast_interval.tick(), if broadcasting => {
                    let message = self.config.broadcast_message.clone();
                    self.broadcast(&message).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{
        build_cmd_packet, build_keep_alive_packet, build_login_packet, build_msg_ack_packet,
        multi, response_body, sequence, verify_login, PacketError,
    };
    use tokio::time::timeout;

    async fn start(config: ServerConfig) -> (SocketAddr, ServerHandle, CancellationToken) {
        let server = MockServer::bind("127.0.0.1:0", config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.handle();
        let token = CancellationToken::new();
        tokio::spawn(server.run(token.clone()));
        (addr, handle, token)
    }

    async fn peer(server: SocketAddr) -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(server).await.unwrap();
        socket
    }

    async fn recv(socket: &UdpSocket) -> Vec<u8> {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let len = timeout(Duration::from_secs(1), socket.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf[..len].to_vec()
    }

    async fn logged_in(server: SocketAddr, password: &str) -> UdpSocket {
        let socket = peer(server).await;
        socket.send(&build_login_packet(password)).await.unwrap();
        verify_login(&recv(&socket).await).unwrap();
        socket
    }

    #[test]
    fn test_config_builders() {
        let config = ServerConfig::new("secret")
            .with_response("players", "Players on server: 0")
            .with_max_fragment(0)
            .with_reverse_fragments(true)
            .with_max_sessions(2)
            .with_broadcast(Duration::from_secs(5), "hello");

        assert_eq!(config.password, "secret");
        assert_eq!(config.max_fragment, 1);
        assert!(config.reverse_fragments);
        assert_eq!(config.max_sessions, 2);
        assert_eq!(config.broadcast_interval, Some(Duration::from_secs(5)));
        assert_eq!(config.responses["players"], "Players on server: 0");
    }

    #[tokio::test]
    async fn test_login_accepted_and_rejected() {
        let (addr, handle, token) = start(ServerConfig::new("secret")).await;

        let good = logged_in(addr, "secret").await;
        let bad = peer(addr).await;
        bad.send(&build_login_packet("wrong")).await.unwrap();
        assert_eq!(
            verify_login(&recv(&bad).await),
            Err(PacketError::LoginRejected)
        );

        let stats = handle.stats();
        assert_eq!(stats.logins, 1);
        assert_eq!(stats.rejected_logins, 1);
        assert_eq!(handle.session_count().await, 1);

        drop(good);
        token.cancel();
    }

    #[tokio::test]
    async fn test_full_server_rejects_login() {
        let (addr, handle, token) = start(ServerConfig::new("secret").with_max_sessions(1)).await;

        let _first = logged_in(addr, "secret").await;
        let second = peer(addr).await;
        second.send(&build_login_packet("secret")).await.unwrap();
        assert_eq!(
            verify_login(&recv(&second).await),
            Err(PacketError::LoginRejected)
        );
        assert_eq!(handle.session_count().await, 1);
        token.cancel();
    }

    #[tokio::test]
    async fn test_keep_alive_pingback() {
        let (addr, handle, token) = start(ServerConfig::new("secret")).await;
        let socket = logged_in(addr, "secret").await;

        socket.send(&build_keep_alive_packet(3)).await.unwrap();
        let reply = recv(&socket).await;
        assert_eq!(reply, build_cmd_response(3, &[]));
        assert_eq!(handle.stats().keep_alives, 1);
        token.cancel();
    }

    #[tokio::test]
    async fn test_command_echo_and_canned_response() {
        let config = ServerConfig::new("secret").with_response("players", "Players on server: 0");
        let (addr, handle, token) = start(config).await;
        let socket = logged_in(addr, "secret").await;

        socket.send(&build_cmd_packet("players", 1)).await.unwrap();
        let reply = recv(&socket).await;
        assert_eq!(sequence(&reply).unwrap(), 1);
        assert_eq!(response_body(&reply).unwrap(), b"Players on server: 0");

        socket.send(&build_cmd_packet("say -1 hi", 2)).await.unwrap();
        let reply = recv(&socket).await;
        assert_eq!(response_body(&reply).unwrap(), b"say -1 hi");

        assert_eq!(handle.stats().commands, 2);
        token.cancel();
    }

    #[tokio::test]
    async fn test_long_response_is_fragmented() {
        let config = ServerConfig::new("secret")
            .with_response("bans", "0123456789")
            .with_max_fragment(4)
            .with_reverse_fragments(true);
        let (addr, _handle, token) = start(config).await;
        let socket = logged_in(addr, "secret").await;

        socket.send(&build_cmd_packet("bans", 7)).await.unwrap();
        let mut indices = Vec::new();
        for _ in 0..3 {
            let fragment = multi(&recv(&socket).await).unwrap();
            assert_eq!(fragment.count, 3);
            indices.push(fragment.index);
        }
        assert_eq!(indices, vec![2, 1, 0]);
        token.cancel();
    }

    #[tokio::test]
    async fn test_packets_without_session_are_ignored() {
        let (addr, handle, token) = start(ServerConfig::new("secret")).await;
        let socket = peer(addr).await;

        socket.send(&build_cmd_packet("players", 1)).await.unwrap();
        let mut buf = [0u8; 64];
        let silent = timeout(Duration::from_millis(100), socket.recv(&mut buf)).await;
        assert!(silent.is_err());
        assert_eq!(handle.stats().commands, 0);
        token.cancel();
    }

    #[tokio::test]
    async fn test_broadcast_and_ack() {
        let (addr, handle, token) = start(ServerConfig::new("secret")).await;
        let socket = logged_in(addr, "secret").await;

        assert!(handle.broadcast("Player #1 connected"));
        let message = recv(&socket).await;
        assert_eq!(packet_type(&message).unwrap(), PacketType::ServerMessage);
        assert_eq!(sequence(&message).unwrap(), 0);
        assert_eq!(&data(&message).unwrap()[1..], b"Player #1 connected");

        socket.send(&build_msg_ack_packet(0)).await.unwrap();
        // The ack has no reply; poll the counter.
        for _ in 0..50 {
            if handle.stats().acks == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let stats = handle.stats();
        assert_eq!(stats.acks, 1);
        assert_eq!(stats.broadcasts, 1);
        token.cancel();
    }

    #[tokio::test]
    async fn test_periodic_broadcast() {
        let config = ServerConfig::new("secret").with_broadcast(Duration::from_millis(20), "tick");
        let (addr, _handle, token) = start(config).await;
        let socket = logged_in(addr, "secret").await;

        let first = recv(&socket).await;
        let second = recv(&socket).await;
        assert_eq!(sequence(&first).unwrap(), 0);
        assert_eq!(sequence(&second).unwrap(), 1);
        token.cancel();
    }

    #[tokio::test]
    async fn test_idle_session_times_out() {
        let config = ServerConfig::new("secret").with_session_timeout(Duration::from_millis(30));
        let (addr, handle, token) = start(config).await;
        let _socket = logged_in(addr, "secret").await;
        assert_eq!(handle.session_count().await, 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(handle.session_count().await, 0);
        token.cancel();
    }

    #[tokio::test]
    async fn test_handle_after_shutdown() {
        let server = MockServer::bind("127.0.0.1:0", ServerConfig::new("secret"))
            .await
            .unwrap();
        let handle = server.handle();
        let token = CancellationToken::new();
        token.cancel();
        server.run(token).await;

        assert!(!handle.broadcast("nobody listens"));
    }
}
