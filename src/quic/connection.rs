// SPDX-License-Identifier: MPL-2.0

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket as StdUdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use quinn_proto::crypto::rustls::QuicClientConfig;
use tracing::{debug, error, info, warn};

use super::config::QuicConfig;
use super::engine::{Command, Engine};
use super::error::TransportError;
use super::shared::Shared;
use super::stream::OutgoingChunk;
use super::tls::build_client_config;
use super::{ConnectionState, StreamId};

/// A client QUIC connection.
///
/// All methods take `&self` and may be called from any thread. Network I/O
/// happens on a background worker started by [`connect`](Self::connect);
/// the methods here only touch shared queues and wake the worker.
///
/// ```no_run
/// use flowsdk_quic::quic::{QuicConfig, QuicConnection};
///
/// let conn = QuicConnection::new(QuicConfig::default());
/// conn.connect("broker.example.com", 14567)?;
/// let id = conn.open_stream()?;
/// conn.write_stream(id, b"hello", false)?;
/// conn.close();
/// # Ok::<(), flowsdk_quic::quic::TransportError>(())
/// ```
pub struct QuicConnection {
    config: QuicConfig,
    shared: Arc<Shared>,
    commands: Mutex<Option<Sender<Command>>>,
    /// Doubles as the cleanup lock: whoever holds it owns start and teardown.
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl QuicConnection {
    pub fn new(config: QuicConfig) -> Self {
        QuicConnection {
            config,
            shared: Arc::new(Shared::default()),
            commands: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &QuicConfig {
        &self.config
    }

    /// Performs the QUIC + TLS handshake with `host:port`, blocking until it
    /// completes, fails, or `connect_timeout` elapses.
    ///
    /// Setup errors (resolution, socket, TLS material) are reported before
    /// any worker thread starts.
    pub fn connect(&self, host: &str, port: u16) -> Result<(), TransportError> {
        {
            let mut worker = self.worker.lock();
            if let Some(handle) = worker.take() {
                if !handle.is_finished() {
                    *worker = Some(handle);
                    return Err(TransportError::AlreadyStarted);
                }
                if handle.join().is_err() {
                    error!("previous QUIC worker panicked");
                }
            }

            self.shared.reset();
            let (tx, rx) = unbounded();
            let (engine, rt) = self.prepare(host, port, rx)?;

            self.shared.set_state(ConnectionState::Handshaking);
            self.shared.set_initialized(true);
            *self.commands.lock() = Some(tx);

            let handle = thread::Builder::new()
                .name("quic-worker".to_string())
                .spawn(move || rt.block_on(engine.run()))
                .map_err(|e| {
                    self.shared.set_initialized(false);
                    self.shared.set_state(ConnectionState::Idle);
                    self.commands.lock().take();
                    TransportError::Io(format!("failed to spawn worker: {}", e))
                })?;
            *worker = Some(handle);
        }

        let deadline = Instant::now() + self.config.connect_timeout;
        match self.shared.wait_while_handshaking(deadline) {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Failed(reason) => Err(TransportError::HandshakeFailure(reason)),
            ConnectionState::Idle | ConnectionState::Handshaking => {
                let reason = "handshake timed out".to_string();
                warn!(timeout = ?self.config.connect_timeout, "QUIC handshake timed out");
                self.shared.set_error(reason.clone());
                self.shared.transition(
                    |s| *s == ConnectionState::Handshaking,
                    ConnectionState::Failed(reason),
                );
                self.shared.request_close();
                Err(TransportError::HandshakeTimeout(self.config.connect_timeout))
            }
            other => Err(TransportError::HandshakeFailure(format!(
                "connection {} during handshake",
                other
            ))),
        }
    }

    /// Everything that can fail synchronously: resolution, socket, runtime,
    /// TLS material and the initial QUIC state.
    fn prepare(
        &self,
        host: &str,
        port: u16,
        commands: Receiver<Command>,
    ) -> Result<(Engine, tokio::runtime::Runtime), TransportError> {
        let remote = (host, port)
            .to_socket_addrs()
            .map_err(|e| TransportError::Configuration(format!("cannot resolve {}: {}", host, e)))?
            .next()
            .ok_or_else(|| {
                TransportError::Configuration(format!("{} resolved to no addresses", host))
            })?;

        let bind_addr: SocketAddr = if remote.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let std_socket = StdUdpSocket::bind(bind_addr)?;
        std_socket.connect(remote)?;
        std_socket.set_nonblocking(true)?;
        let local = std_socket.local_addr()?;

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()?;
        let socket = {
            let _guard = rt.enter();
            tokio::net::UdpSocket::from_std(std_socket)?
        };

        let tls = build_client_config(&self.config)?;
        let crypto = QuicClientConfig::try_from(tls)
            .map_err(|e| TransportError::Configuration(format!("TLS config unusable for QUIC: {}", e)))?;
        let mut client_config = quinn_proto::ClientConfig::new(Arc::new(crypto));
        client_config.transport_config(Arc::new(self.config.transport_config()?));

        let server_name = self
            .config
            .server_name
            .clone()
            .unwrap_or_else(|| host.to_string());
        let engine = Engine::new(
            socket,
            remote,
            &server_name,
            client_config,
            self.config.max_udp_payload_size,
            self.shared.clone(),
            commands,
        )?;

        {
            let mut path = self.shared.path.lock();
            path.local = Some(local);
            path.remote = Some(remote);
        }
        info!(%host, %remote, %local, %server_name, "starting QUIC handshake");
        Ok((engine, rt))
    }

    /// Opens a client bidirectional stream. Waits for stream credit up to
    /// `connect_timeout`.
    pub fn open_stream(&self) -> Result<StreamId, TransportError> {
        if !self.shared.is_initialized() {
            return Err(TransportError::ConnectionNotInitialized);
        }
        let state = self.shared.state();
        if state != ConnectionState::Connected {
            return Err(TransportError::StreamNotReady(format!("connection is {}", state)));
        }
        let commands = self
            .commands
            .lock()
            .clone()
            .ok_or(TransportError::ConnectionNotInitialized)?;

        let (reply_tx, reply_rx) = bounded(1);
        commands
            .send(Command::OpenStream(reply_tx))
            .map_err(|_| TransportError::StreamNotReady("worker stopped".to_string()))?;
        self.shared.wake.notify_one();

        match reply_rx.recv_timeout(self.config.connect_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(TransportError::StreamNotReady(
                "no stream credit from peer".to_string(),
            )),
            Err(RecvTimeoutError::Disconnected) => {
                Err(TransportError::StreamNotReady("worker stopped".to_string()))
            }
        }
    }

    /// Queues `data` for `id`, finishing the send side after it when `fin`
    /// is set. Never blocks.
    pub fn write_stream(&self, id: StreamId, data: &[u8], fin: bool) -> Result<(), TransportError> {
        if !self.shared.is_initialized() {
            return Err(TransportError::ConnectionNotInitialized);
        }
        if data.is_empty() && !fin {
            return Ok(());
        }
        self.shared
            .outgoing
            .push(id, OutgoingChunk::new(Bytes::copy_from_slice(data), fin));
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Returns up to `max_len` received bytes; empty when nothing is buffered.
    pub fn read_stream(&self, id: StreamId, max_len: usize) -> Result<Bytes, TransportError> {
        if !self.shared.is_initialized() {
            return Err(TransportError::ConnectionNotInitialized);
        }
        Ok(self.shared.streams.read(id, max_len))
    }

    /// Waits until `id` has buffered data, has finished, or `timeout` passes.
    pub fn wait_readable(&self, id: StreamId, timeout: Duration) -> Result<bool, TransportError> {
        if !self.shared.is_initialized() {
            return Err(TransportError::ConnectionNotInitialized);
        }
        Ok(self.shared.streams.wait_readable(id, timeout))
    }

    /// Half-closes the send side of `id` once everything queued before it is sent.
    pub fn close_stream(&self, id: StreamId) -> Result<(), TransportError> {
        if !self.shared.is_initialized() {
            return Err(TransportError::ConnectionNotInitialized);
        }
        if !self.shared.streams.contains(id) {
            return Err(TransportError::UnknownStream(id));
        }
        debug!(%id, "closing stream");
        self.shared.outgoing.push(id, OutgoingChunk::new(Bytes::new(), true));
        self.shared.wake.notify_one();
        Ok(())
    }

    /// True once the peer has finished `id` and every byte has been read.
    pub fn is_stream_finished(&self, id: StreamId) -> bool {
        self.shared.streams.is_finished(id)
    }

    /// Closes the connection and joins the worker. Safe to call repeatedly
    /// and from several threads.
    pub fn close(&self) {
        let mut worker = self.worker.lock();
        let Some(handle) = worker.take() else {
            return;
        };

        self.shared.transition(
            |s| matches!(s, ConnectionState::Handshaking | ConnectionState::Connected),
            ConnectionState::Closing,
        );
        self.shared.request_close();
        if handle.join().is_err() {
            error!("QUIC worker panicked");
        }

        self.commands.lock().take();
        self.shared.set_initialized(false);
        self.shared.outgoing.clear();
        self.shared.streams.close_all();
        self.shared
            .transition(|s| !matches!(s, ConnectionState::Failed(_)), ConnectionState::Closed);
        info!("QUIC connection closed");
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Reason of the most recent failure; empty when there was none.
    pub fn last_error(&self) -> String {
        self.shared.last_error()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.path.lock().local
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.shared.path.lock().remote
    }

    pub fn negotiated_alpn(&self) -> Option<Vec<u8>> {
        self.shared.path.lock().alpn.clone()
    }
}

impl Drop for QuicConnection {
    fn drop(&mut self) {
        self.close();
    }
}
