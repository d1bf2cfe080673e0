//! Classification and handling of inbound packets

use super::connection::Shared;
use crate::error::ClientError;
use log::{debug, warn};
use protocol::{
    build_msg_ack_packet, data, multi, packet_type, response_body, sequence, verify, Event,
    PacketError, PacketType, Sequence,
};
use tokio::net::UdpSocket;

impl Shared {
    /// Routes one verified packet: pingbacks are counted, command responses
    /// resolve their transmission and server messages are acknowledged and
    /// fanned out. Packets of unknown type are ignored.
    pub(crate) async fn handle_packet(
        &self,
        socket: Option<&UdpSocket>,
        packet: &[u8],
    ) -> Result<(), ClientError> {
        verify(packet)?;
        let payload = data(packet)?;

        if payload.is_empty() {
            self.count_pingback();
            return Ok(());
        }

        match packet_type(packet)? {
            PacketType::Command => {
                // Keep-alives are answered with a bare sequence byte. An
                // outstanding keep-alive claims such a reply before any
                // command waiting on the same sequence does.
                if payload.len() == 1
                    && (self.take_pingback(payload[0]).await
                        || !self.is_pending(payload[0]).await)
                {
                    self.count_pingback();
                    return Ok(());
                }
                self.handle_response(packet).await
            }
            PacketType::ServerMessage => self.handle_server_message(socket, packet).await,
            other => {
                debug!("Ignoring packet of type {:?}", other);
                Ok(())
            }
        }
    }

    fn count_pingback(&self) {
        let count = self.add_pingback();
        debug!("Pingback #{}", count);
    }

    async fn is_pending(&self, key: u8) -> bool {
        self.transmissions.read().await.contains_key(&key)
    }

    /// Stores the response fragment carried by `packet` in its transmission.
    /// The transmission leaves the table once its last fragment is in.
    pub(crate) async fn handle_response(&self, packet: &[u8]) -> Result<(), ClientError> {
        let key = sequence(packet)?;
        let transmission = self
            .transmissions
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or(ClientError::UnknownTransmission(key))?;

        let (index, count) = match multi(packet) {
            Some(fragment) => (fragment.index, fragment.count),
            None => (0, 1),
        };
        if index >= count {
            return Err(PacketError::InvalidFragment { index, count }.into());
        }

        let body = response_body(packet)?;
        if transmission.add_fragment(index, count, body)? {
            self.retire(&transmission).await;
            debug!(
                "Transmission {} complete ({} fragments)",
                transmission.key(),
                count
            );
        }
        Ok(())
    }

    /// Acknowledges a server message and offers it to every subscriber.
    pub(crate) async fn handle_server_message(
        &self,
        socket: Option<&UdpSocket>,
        packet: &[u8],
    ) -> Result<(), ClientError> {
        let seq = sequence(packet)?;
        let text = String::from_utf8_lossy(&data(packet)?[1..]).into_owned();
        let event = Event::new(text);

        let socket = socket.ok_or(ClientError::NotOpen)?;
        socket
            .send(&build_msg_ack_packet(Sequence::from(seq)))
            .await
            .map_err(ClientError::SendFailed)?;

        let gone = self.subscribers.read().await.publish(&event);
        if !gone.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in gone {
                subscribers.remove(id);
                warn!("Removed subscriber {} after its receiver was dropped", id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Connection, Transmission};
    use crate::config::ConnectionConfig;
    use crate::error::ClientError;
    use protocol::{
        build_cmd_response, build_login_packet, build_login_response, build_msg_ack_packet,
        build_multi_response, build_packet, build_server_message, EventKind, PacketError,
        PacketType,
    };
    use std::time::Duration;
    use tokio::net::UdpSocket;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    fn closed_connection() -> Connection {
        Connection::new(ConnectionConfig::new("127.0.0.1:2306", "secret"))
    }

    async fn register(connection: &Connection, key: u8, request: &str) -> Transmission {
        let transmission = Transmission::new(key as u32, request);
        connection
            .shared
            .transmissions
            .write()
            .await
            .insert(key, transmission.clone());
        transmission
    }

    #[tokio::test]
    async fn test_empty_command_is_pingback() {
        let connection = closed_connection();
        let transmission = register(&connection, 0, "players").await;

        connection
            .handle_packet(&build_packet(&[], PacketType::Command))
            .await
            .unwrap();

        assert_eq!(connection.pingback(), 1);
        assert!(!transmission.is_done());
        assert_eq!(connection.pending_transmissions().await, 1);
    }

    #[tokio::test]
    async fn test_bare_sequence_is_pingback() {
        let connection = closed_connection();

        connection
            .handle_packet(&build_cmd_response(0, b""))
            .await
            .unwrap();
        connection
            .handle_packet(&build_cmd_response(7, b""))
            .await
            .unwrap();

        assert_eq!(connection.pingback(), 2);
        connection.reset_pingback();
        assert_eq!(connection.pingback(), 0);
    }

    #[tokio::test]
    async fn test_single_response_resolves() {
        let connection = closed_connection();
        let transmission = register(&connection, 1, "serverinfo").await;

        connection
            .handle_packet(&build_cmd_response(1, b"Server: test"))
            .await
            .unwrap();

        assert_eq!(transmission.response().as_deref(), Some("Server: test"));
        assert_eq!(connection.pingback(), 0);
        assert_eq!(connection.pending_transmissions().await, 0);
    }

    #[tokio::test]
    async fn test_empty_response_for_pending_command() {
        let connection = closed_connection();
        let transmission = register(&connection, 3, "say -1 hello").await;

        connection
            .handle_packet(&build_cmd_response(3, b""))
            .await
            .unwrap();

        assert!(transmission.is_done());
        assert_eq!(transmission.response().as_deref(), Some(""));
        assert_eq!(connection.pingback(), 0);
    }

    #[tokio::test]
    async fn test_keep_alive_reply_does_not_resolve_pending_command() {
        let connection = closed_connection();
        let transmission = register(&connection, 1, "players").await;
        connection.shared.expect_pingback(1).await;

        connection
            .handle_packet(&build_cmd_response(1, b""))
            .await
            .unwrap();
        assert_eq!(connection.pingback(), 1);
        assert!(!transmission.is_done());
        assert_eq!(connection.pending_transmissions().await, 1);

        connection
            .handle_packet(&build_cmd_response(1, b"Players on server: 3"))
            .await
            .unwrap();
        assert_eq!(
            transmission.response().as_deref(),
            Some("Players on server: 3")
        );

        // With no keep-alive outstanding, a bare reply answers the command.
        let say = register(&connection, 1, "say -1 hi").await;
        connection
            .handle_packet(&build_cmd_response(1, b""))
            .await
            .unwrap();
        assert_eq!(say.response().as_deref(), Some(""));
        assert_eq!(connection.pingback(), 1);
    }

    #[tokio::test]
    async fn test_completion_keeps_newer_command_on_same_sequence() {
        let connection = closed_connection();
        let old = register(&connection, 4, "players").await;
        let newer = register(&connection, 4, "bans").await;

        old.add_fragment(0, 1, b"done").unwrap();
        assert!(!connection.shared.retire(&old).await);
        assert!(connection
            .transmission(4)
            .await
            .is_some_and(|t| t.is_same(&newer)));

        assert!(connection.shared.retire(&newer).await);
        assert_eq!(connection.pending_transmissions().await, 0);
    }

    #[tokio::test]
    async fn test_fragment_count_mismatch() {
        let connection = closed_connection();
        let transmission = register(&connection, 1, "players").await;

        connection
            .handle_packet(&build_packet(&[1, 0x00, 3, 0, b'a'], PacketType::Command))
            .await
            .unwrap();
        let err = connection
            .handle_packet(&build_packet(&[1, 0x00, 2, 1, b'b'], PacketType::Command))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ClientError::Packet(PacketError::FragmentCountMismatch { expected: 3, count: 2 })
        ));
        assert!(!transmission.is_done());
        assert_eq!(connection.pending_transmissions().await, 1);
    }

    #[tokio::test]
    async fn test_multi_response_reverse_order() {
        let connection = closed_connection();
        let transmission = register(&connection, 1, "players").await;

        let mut fragments = build_multi_response(1, b"test data", 5);
        assert_eq!(fragments.len(), 2);
        fragments.reverse();

        connection.handle_packet(&fragments[0]).await.unwrap();
        assert!(!transmission.is_done());
        assert_eq!(connection.pending_transmissions().await, 1);

        connection.handle_packet(&fragments[1]).await.unwrap();
        assert!(transmission.is_done());
        assert_eq!(transmission.response().as_deref(), Some("test data"));
        assert_eq!(connection.pending_transmissions().await, 0);
    }

    #[tokio::test]
    async fn test_late_fragment_is_unknown() {
        let connection = closed_connection();
        register(&connection, 1, "players").await;

        let fragments = build_multi_response(1, b"abcdef", 3);
        connection.handle_packet(&fragments[0]).await.unwrap();
        connection.handle_packet(&fragments[1]).await.unwrap();

        let err = connection.handle_packet(&fragments[1]).await.unwrap_err();
        assert!(matches!(err, ClientError::UnknownTransmission(1)));
    }

    #[tokio::test]
    async fn test_unknown_transmission() {
        let connection = closed_connection();
        let err = connection
            .handle_packet(&build_cmd_response(9, b"orphan"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::UnknownTransmission(9)));
    }

    #[tokio::test]
    async fn test_fragment_index_out_of_range() {
        let connection = closed_connection();
        let transmission = register(&connection, 1, "players").await;

        let packet = build_packet(&[1, 0x00, 2, 2, b'x'], PacketType::Command);
        let err = connection.handle_packet(&packet).await.unwrap_err();

        assert!(matches!(
            err,
            ClientError::Packet(PacketError::InvalidFragment { index: 2, count: 2 })
        ));
        assert!(!transmission.is_done());
    }

    #[tokio::test]
    async fn test_corrupt_packet_rejected() {
        let connection = closed_connection();
        let mut packet = build_cmd_response(1, b"hello");
        let last = packet.len() - 1;
        packet[last] ^= 0xFF;

        let err = connection.handle_packet(&packet).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Packet(PacketError::ChecksumMismatch { .. })
        ));
        assert_eq!(connection.pingback(), 0);
    }

    #[tokio::test]
    async fn test_unknown_type_ignored() {
        let connection = closed_connection();
        connection
            .handle_packet(&build_packet(&[1, 2, 3], PacketType::Unknown(0x7F)))
            .await
            .unwrap();
        assert_eq!(connection.pingback(), 0);
    }

    #[tokio::test]
    async fn test_server_message_requires_socket() {
        let connection = closed_connection();
        let err = connection
            .handle_packet(&build_server_message(0, "RCon admin #0 logged in"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotOpen));
    }

    #[tokio::test]
    async fn test_server_message_acked_and_published() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = server.local_addr().unwrap().to_string();
        let mut connection = Connection::new(ConnectionConfig::new(&address, "secret"));

        let answer = async {
            let mut buf = [0u8; 64];
            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], build_login_packet("secret").as_slice());
            server
                .send_to(&build_login_response(true), peer)
                .await
                .unwrap();
        };
        let (opened, _) = tokio::join!(connection.open(), answer);
        opened.unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        connection.subscribe(CancellationToken::new(), tx).await;

        connection
            .handle_packet(&build_server_message(4, "(Global) Player: hello"))
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = timeout(Duration::from_secs(1), server.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], build_msg_ack_packet(4).as_slice());

        let event = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, EventKind::Chat);
        assert_eq!(event.payload, "(Global) Player: hello");

        connection.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_removed() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(server.local_addr().unwrap()).await.unwrap();

        let connection = closed_connection();
        let (tx, rx) = mpsc::channel(4);
        connection.subscribe(CancellationToken::new(), tx).await;
        drop(rx);

        connection
            .shared
            .handle_packet(Some(&client), &build_server_message(0, "Player #1 connected"))
            .await
            .unwrap();
        assert_eq!(connection.subscriber_count().await, 0);
    }
}
