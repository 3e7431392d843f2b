//! End-to-end session scenarios against an in-process fake admin server.
//!
//! The fake server speaks the wire format directly on a `TcpListener`; the
//! session under test runs on the same task, so server scripts are joined
//! with the session call they answer.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use chrono::NaiveDate;
use openttd_admin::config::AdminConfig;
use openttd_admin::core::packet::{
    AdminChat, AdminGamescript, AdminJoin, AdminPacket, AdminPing, AdminPoll, AdminQuit,
    AdminRcon, AdminUpdateFrequency,
    PacketType, ServerClientJoin, ServerDate, ServerFull, ServerPacket, ServerPong,
    ServerProtocol, ServerRcon, ServerRconEnd, ServerShutdown, ServerWelcome,
};
use openttd_admin::protocol::session::SessionPhase;
use openttd_admin::protocol::types::{DestType, NetworkAction, UpdateFrequency, UpdateType};
use openttd_admin::protocol::Session;
use openttd_admin::ProtocolError;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const SHORT: Duration = Duration::from_millis(200);
const SCRIPT_TIMEOUT: Duration = Duration::from_secs(5);

struct FakeServer {
    stream: TcpStream,
}

impl FakeServer {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = tokio::time::timeout(SCRIPT_TIMEOUT, listener.accept())
            .await
            .expect("session never connected")
            .unwrap();
        Self { stream }
    }

    async fn read_packet(&mut self) -> AdminPacket {
        tokio::time::timeout(SCRIPT_TIMEOUT, async {
            let mut prefix = [0u8; 2];
            self.stream.read_exact(&mut prefix).await.unwrap();
            let size = usize::from(u16::from_le_bytes(prefix));
            let mut frame = prefix.to_vec();
            frame.resize(size, 0);
            self.stream.read_exact(&mut frame[2..]).await.unwrap();
            AdminPacket::decode(&frame, true).unwrap()
        })
        .await
        .expect("session sent nothing")
    }

    async fn send(&mut self, packet: impl Into<ServerPacket>) {
        let frame = packet.into().encode(true).unwrap();
        self.stream.write_all(&frame).await.unwrap();
    }

    /// True if the session closed its end without sending anything else
    async fn closed(&mut self) -> bool {
        let mut byte = [0u8; 1];
        matches!(
            tokio::time::timeout(SCRIPT_TIMEOUT, self.stream.read(&mut byte)).await,
            Ok(Ok(0))
        )
    }
}

fn protocol(version: u8, table: &[(u16, u16)]) -> ServerProtocol {
    ServerProtocol {
        version: Some(version),
        supported_frequencies: Some(table.iter().copied().collect()),
    }
}

fn welcome(server_name: &str) -> ServerWelcome {
    ServerWelcome {
        server_name: Some(server_name.into()),
        revision: Some("14.1".into()),
        is_dedicated: Some(true),
        map_name: Some("Random Map".into()),
        seed: Some(12345),
        landscape: Some(0),
        creation_date: NaiveDate::from_ymd_opt(1950, 1, 1),
        map_x: Some(256),
        map_y: Some(256),
    }
}

fn rcon_line(line: &str) -> ServerRcon {
    ServerRcon {
        colour: Some(1),
        result: Some(line.into()),
    }
}

async fn listen(mutate: impl FnOnce(&mut AdminConfig)) -> (TcpListener, AdminConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = AdminConfig::default_with_overrides(|c| {
        c.client.host = "127.0.0.1".into();
        c.client.port = port;
        c.session.password = "p".into();
        c.session.name = "n".into();
        c.session.version = "1".into();
        c.session.join_timeout = Duration::from_secs(2);
        c.session.rcon_timeout = Duration::from_secs(2);
        c.session.poll_interval = Duration::from_millis(50);
        c.session.update_frequencies = BTreeMap::new();
        mutate(c);
    });
    (listener, config)
}

/// A session that completed the handshake, plus the server side of it
async fn joined(mutate: impl FnOnce(&mut AdminConfig)) -> (Session, FakeServer) {
    let (listener, config) = listen(mutate).await;
    let mut session = Session::without_handler(&config);
    let script = async {
        let mut server = FakeServer::accept(&listener).await;
        server.read_packet().await;
        server.send(protocol(1, &[(0, 0x02)])).await;
        server.send(welcome("Test Server")).await;
        server
    };
    let (result, server) = tokio::join!(session.join_server(), script);
    result.unwrap();
    (session, server)
}

#[tokio::test]
async fn test_handshake_and_subscriptions() {
    let (listener, config) = listen(|c| {
        c.session.update_frequencies = BTreeMap::from([
            (UpdateType::Date, UpdateFrequency::Daily),
            (UpdateType::Chat, UpdateFrequency::Automatic),
        ]);
    })
    .await;
    let mut session = Session::without_handler(&config);

    let script = async {
        let mut server = FakeServer::accept(&listener).await;
        assert_eq!(server.read_packet().await, AdminPacket::from(AdminJoin::new("p", "n", "1")));
        // welcome first: the order of the two is not fixed
        server.send(welcome("Test Server")).await;
        server.send(protocol(1, &[(0, 0x02)])).await;
        // chat is not in the table, so only the date subscription is sent
        assert_eq!(
            server.read_packet().await,
            AdminPacket::from(AdminUpdateFrequency::new(0, 0x02))
        );
        server
    };
    let (result, mut server) = tokio::join!(session.join_server(), script);
    assert!(matches!(
        result,
        Err(ProtocolError::UnsupportedUpdateType(UpdateType::Chat))
    ));

    // the session stays joined
    assert!(session.is_connected());
    assert_eq!(session.state().phase, SessionPhase::Joined);
    assert_eq!(session.server_name(), Some("Test Server"));
    assert_eq!(session.protocol_version(), Some(1));

    session
        .set_update_frequency(UpdateType::Date, UpdateFrequency::Daily)
        .await
        .unwrap();
    assert!(matches!(
        session
            .set_update_frequency(UpdateType::Date, UpdateFrequency::Weekly)
            .await,
        Err(ProtocolError::UnsupportedFrequency { .. })
    ));
    assert!(matches!(
        session
            .set_update_frequency(UpdateType::Console, UpdateFrequency::Automatic)
            .await,
        Err(ProtocolError::UnsupportedUpdateType(UpdateType::Console))
    ));

    // rejected requests sent nothing: the ping follows the accepted one directly
    session.ping(5).await.unwrap();
    assert_eq!(
        server.read_packet().await,
        AdminPacket::from(AdminUpdateFrequency::new(0, 0x02))
    );
    assert_eq!(server.read_packet().await, AdminPacket::from(AdminPing::new(5)));
}

#[tokio::test]
async fn test_first_unsupported_subscription_is_reported() {
    let (listener, config) = listen(|c| {
        c.session.update_frequencies = BTreeMap::from([
            (UpdateType::Date, UpdateFrequency::Weekly),
            (UpdateType::ClientInfo, UpdateFrequency::Automatic),
            (UpdateType::Console, UpdateFrequency::Automatic),
        ]);
    })
    .await;
    let mut session = Session::without_handler(&config);

    let script = async {
        let mut server = FakeServer::accept(&listener).await;
        server.read_packet().await;
        server.send(protocol(1, &[(0, 0x02), (1, 0x40)])).await;
        server.send(welcome("Test Server")).await;
        // the supported entry after the rejected one still goes out
        assert_eq!(
            server.read_packet().await,
            AdminPacket::from(AdminUpdateFrequency::new(1, 0x40))
        );
        server
    };
    let (result, mut server) = tokio::join!(session.join_server(), script);

    match result {
        Err(ProtocolError::UnsupportedFrequency {
            update_type,
            frequency,
        }) => {
            assert_eq!(update_type, UpdateType::Date);
            assert_eq!(frequency, UpdateFrequency::Weekly);
        }
        other => panic!("expected the date subscription to fail, got {other:?}"),
    }
    assert!(session.is_connected());

    session.ping(9).await.unwrap();
    assert_eq!(server.read_packet().await, AdminPacket::from(AdminPing::new(9)));
}

#[tokio::test]
async fn test_join_twice_is_rejected() {
    let (mut session, _server) = joined(|_| {}).await;
    assert!(matches!(
        session.join_server().await,
        Err(ProtocolError::AlreadyConnected)
    ));
    assert!(session.is_connected());
}

#[tokio::test]
async fn test_join_timeout_reports_missing_packets() {
    let (listener, config) = listen(|c| c.session.join_timeout = SHORT).await;
    let mut session = Session::without_handler(&config);

    let script = async {
        let mut server = FakeServer::accept(&listener).await;
        server.read_packet().await;
        server.send(protocol(1, &[])).await;
        server
    };
    let (result, _server) = tokio::join!(session.join_server(), script);

    assert!(matches!(
        result,
        Err(ProtocolError::JoinTimeout {
            protocol: true,
            welcome: false
        })
    ));
    assert!(!session.is_connected());
    assert_eq!(session.state().phase, SessionPhase::Disconnected);
}

#[tokio::test]
async fn test_full_server_rejects_join() {
    let (listener, config) = listen(|_| {}).await;
    let mut session = Session::without_handler(&config);

    let script = async {
        let mut server = FakeServer::accept(&listener).await;
        server.read_packet().await;
        server.send(ServerFull::default()).await;
        server
    };
    let (result, _server) = tokio::join!(session.join_server(), script);

    assert!(matches!(result, Err(ProtocolError::JoinRejected(_))));
    assert!(!session.is_connected());
}

#[tokio::test]
async fn test_rcon_collects_lines_in_order() {
    let (mut session, mut server) = joined(|_| {}).await;

    let script = async {
        assert_eq!(server.read_packet().await, AdminPacket::from(AdminRcon::new("say hi")));
        server.send(rcon_line("first")).await;
        server.send(rcon_line("second")).await;
        server
            .send(ServerRconEnd {
                command: Some("say hi".into()),
            })
            .await;
    };
    let (lines, ()) = tokio::join!(session.send_rcon("say hi", None), script);

    assert_eq!(lines.unwrap(), ["first", "second"]);
    assert!(session.state().rcon.is_none());
}

#[tokio::test]
async fn test_rcon_timeout_late_output_is_swallowed() {
    let (mut session, mut server) = joined(|_| {}).await;

    let script = async {
        server.read_packet().await;
    };
    let (result, ()) = tokio::join!(session.send_rcon("slow", Some(SHORT)), script);
    assert!(matches!(result, Err(ProtocolError::RconTimeout(_))));
    assert!(session.state().rcon.is_none());
    assert_eq!(session.state().abandoned_rcon, ["slow"]);

    // the next command goes out at once; the late output of the first is dropped
    let script = async {
        assert_eq!(server.read_packet().await, AdminPacket::from(AdminRcon::new("next")));
        server.send(rcon_line("late")).await;
        server
            .send(ServerRconEnd {
                command: Some("slow".into()),
            })
            .await;
        server.send(rcon_line("ok")).await;
        server
            .send(ServerRconEnd {
                command: Some("next".into()),
            })
            .await;
    };
    let (lines, ()) = tokio::join!(session.send_rcon("next", None), script);

    assert_eq!(lines.unwrap(), ["ok"]);
    assert!(session.state().abandoned_rcon.is_empty());
}

#[tokio::test]
async fn test_rcon_end_that_never_arrives_does_not_block() {
    let (mut session, mut server) = joined(|_| {}).await;

    let script = async {
        server.read_packet().await;
    };
    let (result, ()) = tokio::join!(session.send_rcon("lost", Some(SHORT)), script);
    assert!(matches!(result, Err(ProtocolError::RconTimeout(_))));

    for _ in 0..3 {
        let script = async {
            assert_eq!(server.read_packet().await, AdminPacket::from(AdminRcon::new("status")));
            server.send(rcon_line("ok")).await;
            server
                .send(ServerRconEnd {
                    command: Some("status".into()),
                })
                .await;
        };
        let (lines, ()) = tokio::join!(session.send_rcon("status", None), script);
        assert_eq!(lines.unwrap(), ["ok"]);
        assert!(session.state().abandoned_rcon.is_empty());
    }
}

#[tokio::test]
async fn test_cancelled_rcon_blocks_until_its_deadline() {
    let (mut session, mut server) = joined(|_| {}).await;

    // the caller gives up before the command's own timeout
    let script = async {
        server.read_packet().await;
    };
    let (outer, ()) = tokio::join!(
        tokio::time::timeout(Duration::from_millis(50), session.send_rcon("slow", Some(SHORT))),
        script
    );
    assert!(outer.is_err());

    assert!(matches!(
        session.send_rcon("next", None).await,
        Err(ProtocolError::RequestInProgress(command)) if command == "slow"
    ));

    tokio::time::sleep(SHORT).await;

    let script = async {
        assert_eq!(server.read_packet().await, AdminPacket::from(AdminRcon::new("next")));
        server
            .send(ServerRconEnd {
                command: Some("next".into()),
            })
            .await;
    };
    let (lines, ()) = tokio::join!(session.send_rcon("next", None), script);
    assert!(lines.unwrap().is_empty());
}

#[tokio::test]
async fn test_shutdown_ends_main_loop_and_quit_says_goodbye() {
    let (mut session, mut server) = joined(|_| {}).await;

    server
        .send(ServerDate {
            date: NaiveDate::from_ymd_opt(1950, 6, 1),
        })
        .await;
    server.send(ServerShutdown::default()).await;

    tokio::time::timeout(SCRIPT_TIMEOUT, session.main_loop())
        .await
        .expect("main loop did not stop")
        .unwrap();
    assert_eq!(session.current_date(), NaiveDate::from_ymd_opt(1950, 6, 1));
    assert!(session.stop_handle().is_stopped());

    session.quit_server().await;
    assert_eq!(server.read_packet().await, AdminPacket::from(AdminQuit::default()));
    assert!(server.closed().await);
    assert!(!session.is_connected());
    assert!(!session.stop_handle().is_stopped());
    assert_eq!(session.state().phase, SessionPhase::Disconnected);
}

#[tokio::test]
async fn test_peer_close_is_terminal() {
    let (mut session, server) = joined(|_| {}).await;
    drop(server);

    let result = tokio::time::timeout(SCRIPT_TIMEOUT, session.main_loop())
        .await
        .expect("main loop did not notice the close");
    assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    assert!(!session.is_connected());
    assert_eq!(session.state().phase, SessionPhase::Disconnected);
}

#[tokio::test]
async fn test_stop_handle_from_another_task() {
    let (mut session, _server) = joined(|_| {}).await;
    let stop = session.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.stop();
    });

    tokio::time::timeout(SCRIPT_TIMEOUT, session.main_loop())
        .await
        .expect("main loop ignored the stop flag")
        .unwrap();
    assert!(session.is_connected());
}

#[tokio::test]
async fn test_stop_while_busy_then_quit_sends_whole_frame() {
    let (mut session, mut server) = joined(|_| {}).await;
    for day in 1..=20 {
        server
            .send(ServerDate {
                date: NaiveDate::from_ymd_opt(1950, 1, day),
            })
            .await;
    }

    let stop = session.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.stop();
    });
    tokio::time::timeout(SCRIPT_TIMEOUT, session.main_loop())
        .await
        .expect("main loop ignored the stop flag")
        .unwrap();

    session.quit_server().await;
    assert_eq!(server.read_packet().await, AdminPacket::from(AdminQuit::default()));
    assert!(server.closed().await);
}

#[tokio::test]
async fn test_chat_helpers_send_one_packet_per_line() {
    let (mut session, mut server) = joined(|_| {}).await;

    session.send_public_chat("hello").await.unwrap();
    session.send_company_chat(["a", "b"], 3).await.unwrap();
    session.send_client_chat(vec!["psst".to_string()], 9).await.unwrap();

    let chat = |dest: DestType, to: u32, text: &str| -> AdminPacket {
        AdminChat::new(NetworkAction::Chat.code(), dest.code(), to, text).into()
    };
    assert_eq!(server.read_packet().await, chat(DestType::Broadcast, 0, "hello"));
    assert_eq!(server.read_packet().await, chat(DestType::Team, 3, "a"));
    assert_eq!(server.read_packet().await, chat(DestType::Team, 3, "b"));
    assert_eq!(server.read_packet().await, chat(DestType::Client, 9, "psst"));
}

#[tokio::test]
async fn test_poll_and_gamescript_on_the_wire() {
    let (mut session, mut server) = joined(|_| {}).await;
    assert!(session.state().is_joined());

    session.poll(UpdateType::ClientInfo, u32::MAX).await.unwrap();
    session.send_gamescript(r#"{"action":"ping"}"#).await.unwrap();

    let code = u8::try_from(UpdateType::ClientInfo.code()).unwrap();
    assert_eq!(
        server.read_packet().await,
        AdminPacket::from(AdminPoll::new(code, u32::MAX))
    );
    assert_eq!(
        server.read_packet().await,
        AdminPacket::from(AdminGamescript::new(r#"{"action":"ping"}"#))
    );
    assert!(session.queued_packets().is_empty());
}

#[tokio::test]
async fn test_joining_client_gets_welcome_message() {
    let (mut session, mut server) =
        joined(|c| c.session.welcome_message = Some(vec!["Welcome!".into()])).await;

    server.send(ServerClientJoin { client_id: Some(4) }).await;
    session.receive_packets(Some(1), SCRIPT_TIMEOUT).await.unwrap();
    assert!(session.clients().contains_key(&4));

    let mut lines = Vec::new();
    for _ in 0..3 {
        match server.read_packet().await {
            AdminPacket::Chat(chat) => {
                assert_eq!(chat.network_action, Some(NetworkAction::ChatClient.code()));
                assert_eq!(chat.destination, Some(4));
                lines.push(chat.message.unwrap());
            }
            other => panic!("expected chat, got {other:?}"),
        }
    }
    assert_eq!(lines[1], "Welcome!");
    assert!(lines[0].chars().all(|c| c == '-'));
}

#[tokio::test]
async fn test_receive_packets_counts() {
    let (mut session, mut server) = joined(|_| {}).await;

    server.send(ServerPong { data: Some(1) }).await;
    server.send(ServerPong { data: Some(2) }).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(session.receive_packets(None, SHORT).await.unwrap(), 2);
    assert!(matches!(
        session.receive_packets(Some(1), SHORT).await,
        Err(ProtocolError::NotAllPacketsReceived {
            expected: 1,
            received: 0
        })
    ));
}

#[tokio::test]
async fn test_wait_for_packet_dispatches_others() {
    let (mut session, mut server) = joined(|_| {}).await;

    server
        .send(ServerDate {
            date: NaiveDate::from_ymd_opt(2000, 1, 1),
        })
        .await;
    server.send(ServerPong { data: Some(77) }).await;

    let packet = session
        .wait_for_packet(PacketType::ServerPong, SCRIPT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(packet, ServerPacket::from(ServerPong { data: Some(77) }));
    assert_eq!(session.current_date(), NaiveDate::from_ymd_opt(2000, 1, 1));

    assert!(matches!(
        session.wait_for_packet(PacketType::ServerPong, SHORT).await,
        Err(ProtocolError::Timeout)
    ));
}

#[tokio::test]
async fn test_unknown_packet_keeps_session_alive() {
    let (mut session, mut server) = joined(|_| {}).await;

    server.stream.write_all(&[6, 0, 250, 1, 2, 3]).await.unwrap();
    server.send(ServerPong { data: Some(3) }).await;

    assert_eq!(session.receive_packets(Some(2), SCRIPT_TIMEOUT).await.unwrap(), 2);
    assert!(session.is_connected());
    assert_eq!(session.metrics().snapshot().unknown_packets, 1);
}

#[tokio::test]
async fn test_undecodable_packet_is_skipped_in_strict_mode() {
    let (mut session, mut server) = joined(|c| c.codec.strict_decode = true).await;

    // an rcon line cut off inside its colour field
    let frame = [4, 0, PacketType::ServerRcon.tag(), 1];
    server.stream.write_all(&frame).await.unwrap();
    server.send(ServerPong { data: Some(4) }).await;

    assert_eq!(session.receive_packets(Some(2), SCRIPT_TIMEOUT).await.unwrap(), 2);
    assert!(session.is_connected());
    assert!(session.state().rcon.is_none());
    assert_eq!(session.metrics().snapshot().decode_errors, 1);
}
