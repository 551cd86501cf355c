// SPDX-License-Identifier: MPL-2.0

//! End-to-end checks against an in-process quinn server on loopback.

use std::net::{SocketAddr, UdpSocket};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use flowsdk_quic::mqtt_serde::control_packet::MqttPacket;
use flowsdk_quic::mqtt_serde::packet::connack::MqttConnAck;
use flowsdk_quic::mqtt_serde::packet::ping::MqttPingResp;
use flowsdk_quic::mqtt_serde::{MqttParser, MQTT_V311};
use flowsdk_quic::{
    ConnectionState, MqttClientOptions, QuicConfig, QuicConnection, QuicMqttSession, StreamId,
    TransportError,
};
use quinn::rustls;
use quinn::rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy)]
enum Behaviour {
    /// Every stream echoes back what it receives and finishes when the client does.
    Echo,
    /// Answers CONNECT with CONNACK and PINGREQ with PINGRESP.
    Broker,
}

struct TestServer {
    addr: SocketAddr,
    cert: Vec<u8>,
}

fn self_signed() -> (CertificateDer<'static>, PrivatePkcs8KeyDer<'static>) {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert = certified.cert.der().clone();
    let key = PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der());
    (cert, key)
}

/// Starts a server on a background runtime; it lives until the test process exits.
fn start_server(behaviour: Behaviour) -> TestServer {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let (cert, key) = self_signed();
            let provider = Arc::new(rustls::crypto::ring::default_provider());
            let mut tls = rustls::ServerConfig::builder_with_provider(provider)
                .with_protocol_versions(&[&rustls::version::TLS13])
                .unwrap()
                .with_no_client_auth()
                .with_single_cert(vec![cert.clone()], key.into())
                .unwrap();
            tls.alpn_protocols = vec![b"mqtt".to_vec()];
            let crypto = quinn::crypto::rustls::QuicServerConfig::try_from(tls).unwrap();
            let server_config = quinn::ServerConfig::with_crypto(Arc::new(crypto));
            let endpoint =
                quinn::Endpoint::server(server_config, "127.0.0.1:0".parse().unwrap()).unwrap();

            tx.send(TestServer {
                addr: endpoint.local_addr().unwrap(),
                cert: cert.to_vec(),
            })
            .unwrap();

            while let Some(incoming) = endpoint.accept().await {
                tokio::spawn(async move {
                    let Ok(conn) = incoming.await else { return };
                    while let Ok((send, recv)) = conn.accept_bi().await {
                        match behaviour {
                            Behaviour::Echo => tokio::spawn(echo(send, recv)),
                            Behaviour::Broker => tokio::spawn(broker(send, recv)),
                        };
                    }
                });
            }
        });
    });
    rx.recv_timeout(Duration::from_secs(10)).unwrap()
}

async fn echo(mut send: quinn::SendStream, mut recv: quinn::RecvStream) {
    let mut buf = vec![0u8; 4096];
    loop {
        match recv.read(&mut buf).await {
            Ok(Some(n)) => {
                if send.write_all(&buf[..n]).await.is_err() {
                    return;
                }
            }
            Ok(None) => {
                let _ = send.finish();
                return;
            }
            Err(_) => return,
        }
    }
}

async fn broker(mut send: quinn::SendStream, mut recv: quinn::RecvStream) {
    let mut parser = MqttParser::new(4096, MQTT_V311);
    let mut buf = vec![0u8; 4096];
    while let Ok(Some(n)) = recv.read(&mut buf).await {
        parser.feed(&buf[..n]);
        while let Ok(Some(packet)) = parser.next_packet() {
            let reply = match packet {
                MqttPacket::Connect(_) => MqttPacket::ConnAck(MqttConnAck::new(false, 0, MQTT_V311)),
                MqttPacket::PingReq(_) => MqttPacket::PingResp(MqttPingResp::new()),
                _ => continue,
            };
            if send.write_all(&reply.to_bytes().unwrap()).await.is_err() {
                return;
            }
        }
    }
    let _ = send.finish();
}

fn client_config(server: &TestServer) -> QuicConfig {
    QuicConfig::builder()
        .alpn("mqtt")
        .server_name("localhost")
        .custom_roots(vec![server.cert.clone()])
        .connect_timeout(Duration::from_secs(5))
        .build()
}

fn connect(server: &TestServer) -> QuicConnection {
    let conn = QuicConnection::new(client_config(server));
    conn.connect("127.0.0.1", server.addr.port()).unwrap();
    conn
}

/// Reads until `len` bytes arrived on `id`.
fn read_exact(conn: &QuicConnection, id: StreamId, len: usize) -> Vec<u8> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut out = Vec::new();
    while out.len() < len {
        assert!(Instant::now() < deadline, "timed out after {} bytes", out.len());
        conn.wait_readable(id, Duration::from_millis(100)).unwrap();
        out.extend_from_slice(&conn.read_stream(id, len - out.len()).unwrap());
    }
    out
}

#[test]
fn test_connect_and_echo() {
    let server = start_server(Behaviour::Echo);
    let conn = connect(&server);

    assert!(conn.is_connected());
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(conn.negotiated_alpn(), Some(b"mqtt".to_vec()));
    assert_eq!(conn.remote_addr(), Some(server.addr));
    assert!(conn.local_addr().is_some());

    let id = conn.open_stream().unwrap();
    assert!(id.is_client_initiated());
    assert!(id.is_bidirectional());
    conn.write_stream(id, b"hello over quic", false).unwrap();
    assert_eq!(read_exact(&conn, id, 15), b"hello over quic");

    conn.close();
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(!conn.is_connected());
}

#[test]
fn test_streams_do_not_mix() {
    let server = start_server(Behaviour::Echo);
    let conn = connect(&server);

    let a = conn.open_stream().unwrap();
    let b = conn.open_stream().unwrap();
    assert_ne!(a, b);

    conn.write_stream(a, b"aaaa", false).unwrap();
    conn.write_stream(b, b"bbbbbb", false).unwrap();
    conn.write_stream(a, b"AA", false).unwrap();

    assert_eq!(read_exact(&conn, b, 6), b"bbbbbb");
    assert_eq!(read_exact(&conn, a, 6), b"aaaaAA");
    conn.close();
}

#[test]
fn test_large_write_is_delivered_in_order() {
    let server = start_server(Behaviour::Echo);
    let conn = connect(&server);
    let id = conn.open_stream().unwrap();

    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    for chunk in payload.chunks(10_000) {
        conn.write_stream(id, chunk, false).unwrap();
    }
    assert_eq!(read_exact(&conn, id, payload.len()), payload);
    conn.close();
}

#[test]
fn test_close_stream_finishes_both_directions() {
    let server = start_server(Behaviour::Echo);
    let conn = connect(&server);
    let id = conn.open_stream().unwrap();

    conn.write_stream(id, b"bye", false).unwrap();
    conn.close_stream(id).unwrap();
    assert_eq!(read_exact(&conn, id, 3), b"bye");

    let deadline = Instant::now() + Duration::from_secs(5);
    while !conn.is_stream_finished(id) {
        assert!(Instant::now() < deadline, "peer never finished the stream");
        conn.wait_readable(id, Duration::from_millis(100)).unwrap();
    }
    assert!(conn.read_stream(id, 64).unwrap().is_empty());
    conn.close();
}

#[test]
fn test_unknown_stream_close() {
    let server = start_server(Behaviour::Echo);
    let conn = connect(&server);
    assert_eq!(
        conn.close_stream(StreamId(4000)),
        Err(TransportError::UnknownStream(StreamId(4000)))
    );
    conn.close();
}

#[test]
fn test_connect_twice() {
    let server = start_server(Behaviour::Echo);
    let conn = connect(&server);
    assert_eq!(
        conn.connect("127.0.0.1", server.addr.port()),
        Err(TransportError::AlreadyStarted)
    );
    assert!(conn.is_connected());
    conn.close();
}

#[test]
fn test_operations_after_close() {
    let server = start_server(Behaviour::Echo);
    let conn = connect(&server);
    let id = conn.open_stream().unwrap();
    conn.close();
    conn.close();

    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(
        conn.open_stream(),
        Err(TransportError::ConnectionNotInitialized)
    );
    assert_eq!(
        conn.write_stream(id, b"late", false),
        Err(TransportError::ConnectionNotInitialized)
    );
}

#[test]
fn test_handshake_timeout_against_silent_peer() {
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = silent.local_addr().unwrap().port();

    let conn = QuicConnection::new(
        QuicConfig::builder()
            .insecure_skip_verify(true)
            .connect_timeout(Duration::from_millis(300))
            .build(),
    );
    let started = Instant::now();
    match conn.connect("127.0.0.1", port) {
        Err(TransportError::HandshakeTimeout(timeout)) => {
            assert_eq!(timeout, Duration::from_millis(300))
        }
        other => panic!("expected handshake timeout, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(conn.state(), ConnectionState::Failed(_)));
    assert!(conn.last_error().contains("timed out"));

    conn.close();
    assert!(matches!(conn.state(), ConnectionState::Failed(_)));
}

#[test]
fn test_worker_exit_rejects_stream_operations() {
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = silent.local_addr().unwrap().port();

    let conn = QuicConnection::new(
        QuicConfig::builder()
            .insecure_skip_verify(true)
            .connect_timeout(Duration::from_millis(200))
            .build(),
    );
    assert!(matches!(
        conn.connect("127.0.0.1", port),
        Err(TransportError::HandshakeTimeout(_))
    ));

    // nobody called close(); the worker stops on its own after the timeout
    let id = StreamId(0);
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match conn.write_stream(id, b"lost bytes", false) {
            Err(TransportError::ConnectionNotInitialized) => break,
            Ok(()) => {}
            Err(other) => panic!("unexpected {:?}", other),
        }
        assert!(Instant::now() < deadline, "writes still accepted after the worker stopped");
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(
        conn.read_stream(id, 16),
        Err(TransportError::ConnectionNotInitialized)
    );
    assert_eq!(
        conn.wait_readable(id, Duration::from_millis(10)),
        Err(TransportError::ConnectionNotInitialized)
    );
    assert_eq!(
        conn.close_stream(id),
        Err(TransportError::ConnectionNotInitialized)
    );
    assert_eq!(
        conn.open_stream(),
        Err(TransportError::ConnectionNotInitialized)
    );
    conn.close();
}

#[test]
fn test_concurrent_close() {
    let server = start_server(Behaviour::Echo);
    let conn = Arc::new(connect(&server));
    let id = conn.open_stream().unwrap();

    let closers: Vec<_> = (0..4)
        .map(|_| {
            let conn = conn.clone();
            thread::spawn(move || {
                conn.close();
                // every caller returns only after teardown finished
                assert_eq!(conn.state(), ConnectionState::Closed);
            })
        })
        .collect();
    for closer in closers {
        closer.join().unwrap();
    }

    assert!(!conn.is_connected());
    assert_eq!(
        conn.write_stream(id, b"late", false),
        Err(TransportError::ConnectionNotInitialized)
    );
    assert_eq!(
        conn.open_stream(),
        Err(TransportError::ConnectionNotInitialized)
    );
}

#[test]
fn test_close_interrupts_connect() {
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = silent.local_addr().unwrap().port();

    let conn = Arc::new(QuicConnection::new(
        QuicConfig::builder()
            .insecure_skip_verify(true)
            .connect_timeout(Duration::from_secs(10))
            .build(),
    ));
    let started = Instant::now();
    let connecting = {
        let conn = conn.clone();
        thread::spawn(move || conn.connect("127.0.0.1", port))
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    while conn.state() != ConnectionState::Handshaking {
        assert!(Instant::now() < deadline, "handshake never started");
        thread::sleep(Duration::from_millis(10));
    }
    thread::sleep(Duration::from_millis(100));
    conn.close();

    match connecting.join().unwrap() {
        Err(TransportError::HandshakeFailure(reason)) => {
            assert!(reason.contains("during handshake"), "{}", reason)
        }
        other => panic!("expected connect to be interrupted, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(
        conn.open_stream(),
        Err(TransportError::ConnectionNotInitialized)
    );
}

#[test]
fn test_untrusted_certificate_fails_handshake() {
    let server = start_server(Behaviour::Echo);
    let (other_cert, _) = self_signed();
    let conn = QuicConnection::new(
        QuicConfig::builder()
            .server_name("localhost")
            .custom_roots(vec![other_cert.to_vec()])
            .connect_timeout(Duration::from_secs(5))
            .build(),
    );
    assert!(matches!(
        conn.connect("127.0.0.1", server.addr.port()),
        Err(TransportError::HandshakeFailure(_))
    ));
    assert!(!conn.is_connected());
    conn.close();
}

#[test]
fn test_mqtt_session_over_quic() {
    let server = start_server(Behaviour::Broker);
    let options = MqttClientOptions::builder()
        .client_id("loopback")
        .operation_timeout(Duration::from_secs(5))
        .build()
        .unwrap();

    let mut session =
        QuicMqttSession::connect_to("127.0.0.1", server.addr.port(), client_config(&server), options)
            .unwrap();
    assert!(session.is_connected());
    session.ping().unwrap();

    let conn = session.transport().connection().clone();
    session.disconnect().unwrap();
    assert!(!session.is_connected());
    assert_eq!(conn.state(), ConnectionState::Closed);
}
