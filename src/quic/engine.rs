// SPDX-License-Identifier: MPL-2.0

//! Worker loop: the only code that touches the UDP socket and the
//! `quinn-proto` connection.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use quinn_proto::{
    ClientConfig, Connection, ConnectionError, ConnectionHandle, DatagramEvent, Dir, Endpoint,
    Event, ReadError, StreamEvent, VarInt, WriteError,
};
use tokio::net::UdpSocket;
use tracing::{debug, error, info, trace, warn};

use super::shared::Shared;
use super::stream::{flush_stream, FlushOutcome, WriteOutcome};
use super::{ConnectionState, StreamId, TransportError};

/// Longest the worker sleeps between scans.
const MAX_WAIT: Duration = Duration::from_millis(100);
const RECV_BUF_SIZE: usize = 64 * 1024;
/// Largest read taken from a stream in one go.
const READ_CHUNK: usize = 64 * 1024;

pub(crate) type OpenReply = Sender<Result<StreamId, TransportError>>;

/// Requests that need the QUIC state machine itself.
pub(crate) enum Command {
    OpenStream(OpenReply),
}

/// Owns every piece of QUIC state. Lives on the worker thread.
pub(crate) struct Engine {
    endpoint: Endpoint,
    conn: Connection,
    handle: ConnectionHandle,
    socket: UdpSocket,
    shared: Arc<Shared>,
    commands: Receiver<Command>,
    pending_opens: VecDeque<OpenReply>,
    recv_buf: Vec<u8>,
    send_buf: Vec<u8>,
}

enum Exit {
    Closed,
    Failed(String),
}

impl Engine {
    /// Creates the endpoint and starts the handshake. Nothing is sent until
    /// the worker runs.
    pub(crate) fn new(
        socket: UdpSocket,
        remote: SocketAddr,
        server_name: &str,
        client_config: ClientConfig,
        max_udp_payload: u16,
        shared: Arc<Shared>,
        commands: Receiver<Command>,
    ) -> Result<Self, TransportError> {
        let mut endpoint_config = quinn_proto::EndpointConfig::default();
        endpoint_config
            .max_udp_payload_size(max_udp_payload)
            .map_err(|e| TransportError::Configuration(format!("max UDP payload: {}", e)))?;

        let mut endpoint = Endpoint::new(Arc::new(endpoint_config), None, true, None);
        let (handle, conn) = endpoint
            .connect(Instant::now(), client_config, remote, server_name)
            .map_err(|e| TransportError::Configuration(format!("QUIC connect failed: {}", e)))?;

        Ok(Engine {
            endpoint,
            conn,
            handle,
            socket,
            shared,
            commands,
            pending_opens: VecDeque::new(),
            recv_buf: vec![0u8; RECV_BUF_SIZE],
            send_buf: Vec::with_capacity(max_udp_payload as usize),
        })
    }

    /// Runs until the connection closes, fails, or a close is requested.
    pub(crate) async fn run(mut self) {
        info!(remote = ?self.shared.path.lock().remote, "QUIC worker started");
        let exit = self.run_loop().await;

        for reply in self.pending_opens.drain(..) {
            let _ = reply.send(Err(TransportError::StreamNotReady(
                "connection closed".to_string(),
            )));
        }
        while let Ok(Command::OpenStream(reply)) = self.commands.try_recv() {
            let _ = reply.send(Err(TransportError::StreamNotReady(
                "connection closed".to_string(),
            )));
        }

        match exit {
            Exit::Closed => {
                self.shared.transition(|s| !s.is_terminal(), ConnectionState::Closed);
            }
            Exit::Failed(reason) => {
                error!(%reason, "QUIC worker stopped on error");
                self.shared.set_error(reason.clone());
                self.shared
                    .transition(|s| *s != ConnectionState::Closed, ConnectionState::Failed(reason));
            }
        }
        // the quinn connection dies with this task; later writes must fail
        self.shared.set_initialized(false);
        self.shared.outgoing.clear();
        self.shared.streams.close_all();
        info!("QUIC worker exited");
    }

    async fn run_loop(&mut self) -> Exit {
        loop {
            let timeout = self.next_wait();
            tokio::select! {
                res = self.socket.readable() => {
                    if let Err(e) = res {
                        return Exit::Failed(format!("socket readiness failed: {}", e));
                    }
                }
                _ = self.shared.wake.notified() => {}
                _ = tokio::time::sleep(timeout) => {}
            }

            let now = Instant::now();
            if let Err(reason) = self.drain_socket(now) {
                return Exit::Failed(reason);
            }
            if self.conn.poll_timeout().is_some_and(|t| t <= now) {
                self.conn.handle_timeout(now);
            }
            self.process_endpoint_events();
            if let Some(exit) = self.process_events() {
                return exit;
            }
            self.process_commands();
            self.flush_outgoing();
            if let Err(reason) = self.transmit(now) {
                return Exit::Failed(reason);
            }

            if self.shared.close_requested() {
                self.close_connection();
                return Exit::Closed;
            }
            if self.conn.is_drained() {
                return Exit::Closed;
            }
        }
    }

    fn next_wait(&mut self) -> Duration {
        match self.conn.poll_timeout() {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(MAX_WAIT),
            None => MAX_WAIT,
        }
    }

    /// Feeds every queued datagram to the endpoint.
    fn drain_socket(&mut self, now: Instant) -> Result<(), String> {
        let remote = self.conn.remote_address();
        loop {
            let n = match self.socket.try_recv(&mut self.recv_buf) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    // ICMP unreachable on a connected socket; let the handshake timer decide
                    debug!(error = %e, "peer port unreachable");
                    return Ok(());
                }
                Err(e) => return Err(format!("UDP receive failed: {}", e)),
            };
            trace!(bytes = n, "datagram received");

            let data = BytesMut::from(&self.recv_buf[..n]);
            let mut response = Vec::new();
            match self.endpoint.handle(now, remote, None, None, data, &mut response) {
                Some(DatagramEvent::ConnectionEvent(handle, event)) if handle == self.handle => {
                    self.conn.handle_event(event);
                }
                Some(DatagramEvent::ConnectionEvent(handle, _)) => {
                    debug!(?handle, "datagram for an unknown connection handle");
                }
                Some(DatagramEvent::NewConnection(incoming)) => {
                    // client only: refuse anything the peer tries to open at endpoint level
                    let transmit = self.endpoint.refuse(incoming, &mut response);
                    self.send_datagram(&response[..transmit.size])?;
                }
                Some(DatagramEvent::Response(transmit)) => {
                    self.send_datagram(&response[..transmit.size])?;
                }
                None => {}
            }
        }
    }

    fn process_endpoint_events(&mut self) {
        while let Some(event) = self.conn.poll_endpoint_events() {
            if let Some(conn_event) = self.endpoint.handle_event(self.handle, event) {
                self.conn.handle_event(conn_event);
            }
        }
    }

    /// Applies connection events to shared state. Returns an exit when the
    /// connection is gone.
    fn process_events(&mut self) -> Option<Exit> {
        while let Some(event) = self.conn.poll() {
            match event {
                Event::HandshakeDataReady => debug!("handshake data ready"),
                Event::Connected => self.on_connected(),
                Event::ConnectionLost { reason } => return Some(self.on_lost(reason)),
                Event::Stream(StreamEvent::Readable { id }) => self.read_stream(id.into()),
                Event::Stream(StreamEvent::Opened { dir: Dir::Bi }) => self.accept_streams(),
                Event::Stream(StreamEvent::Opened { dir: Dir::Uni }) => {
                    while let Some(id) = self.conn.streams().accept(Dir::Uni) {
                        let id = StreamId::from(id);
                        debug!(%id, "peer opened a unidirectional stream");
                        self.shared.streams.ensure(id);
                        self.read_stream(id);
                    }
                }
                Event::Stream(StreamEvent::Finished { id }) => {
                    debug!(id = %StreamId::from(id), "send side finished and acknowledged");
                }
                Event::Stream(StreamEvent::Stopped { id, error_code }) => {
                    let id = StreamId::from(id);
                    let dropped = self.shared.outgoing.drop_stream(id);
                    warn!(%id, %error_code, dropped, "peer stopped the stream");
                }
                Event::Stream(StreamEvent::Available { dir: Dir::Bi }) => self.service_pending_opens(),
                _ => {}
            }
        }
        None
    }

    fn on_connected(&mut self) {
        let alpn = self
            .conn
            .crypto_session()
            .handshake_data()
            .and_then(|data| data.downcast::<quinn_proto::crypto::rustls::HandshakeData>().ok())
            .and_then(|data| data.protocol);
        info!(
            alpn = ?alpn.as_deref().map(String::from_utf8_lossy),
            "QUIC handshake complete"
        );
        self.shared.path.lock().alpn = alpn;
        self.shared
            .transition(|s| *s == ConnectionState::Handshaking, ConnectionState::Connected);
        self.service_pending_opens();
    }

    fn on_lost(&mut self, reason: ConnectionError) -> Exit {
        if self.shared.close_requested() {
            return Exit::Closed;
        }
        let handshaking = self.shared.state() == ConnectionState::Handshaking;
        match reason {
            ConnectionError::LocallyClosed => Exit::Closed,
            ConnectionError::TimedOut if handshaking => {
                Exit::Failed("handshake failed: idle timeout".to_string())
            }
            other if handshaking => Exit::Failed(format!("handshake failed: {}", other)),
            other => Exit::Failed(format!("connection lost: {}", other)),
        }
    }

    fn accept_streams(&mut self) {
        while let Some(id) = self.conn.streams().accept(Dir::Bi) {
            let id = StreamId::from(id);
            debug!(%id, "peer opened a bidirectional stream");
            self.shared.streams.ensure(id);
            self.read_stream(id);
        }
    }

    /// Moves everything readable on `id` into the shared inbound buffer.
    fn read_stream(&mut self, id: StreamId) {
        let qid = match quinn_proto::StreamId::try_from(id) {
            Ok(qid) => qid,
            Err(_) => return,
        };
        let mut recv = self.conn.recv_stream(qid);
        let mut chunks = match recv.read(true) {
            Ok(chunks) => chunks,
            Err(e) => {
                debug!(%id, error = ?e, "stream not readable");
                return;
            }
        };
        loop {
            match chunks.next(READ_CHUNK) {
                Ok(Some(chunk)) => {
                    trace!(%id, bytes = chunk.bytes.len(), "stream data");
                    self.shared.streams.push_inbound(id, &chunk.bytes);
                }
                Ok(None) => {
                    debug!(%id, "peer finished the stream");
                    self.shared.streams.mark_fin(id);
                    break;
                }
                Err(ReadError::Blocked) => break,
                Err(e) => {
                    warn!(%id, error = %e, "peer reset the stream");
                    self.shared.streams.mark_closed(id);
                    break;
                }
            }
        }
        let _ = chunks.finalize();
    }

    fn process_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(Command::OpenStream(reply)) => self.open_stream(reply),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return,
            }
        }
    }

    fn open_stream(&mut self, reply: OpenReply) {
        if self.shared.state() != ConnectionState::Connected {
            let _ = reply.send(Err(TransportError::StreamNotReady(format!(
                "connection is {}",
                self.shared.state()
            ))));
            return;
        }
        match self.conn.streams().open(Dir::Bi) {
            Some(id) => {
                let id = StreamId::from(id);
                debug!(%id, "opened bidirectional stream");
                self.shared.streams.ensure(id);
                let _ = reply.send(Ok(id));
            }
            None => {
                debug!("stream limit reached, waiting for credit");
                self.pending_opens.push_back(reply);
            }
        }
    }

    fn service_pending_opens(&mut self) {
        while !self.pending_opens.is_empty() {
            let Some(id) = self.conn.streams().open(Dir::Bi) else {
                return;
            };
            let id = StreamId::from(id);
            self.shared.streams.ensure(id);
            if let Some(reply) = self.pending_opens.pop_front() {
                debug!(%id, "opened bidirectional stream after credit");
                let _ = reply.send(Ok(id));
            }
        }
    }

    /// Hands queued application writes to the send streams, in stream-id order.
    fn flush_outgoing(&mut self) {
        let mut queued = self.shared.outgoing.take();
        for (&id, queue) in queued.iter_mut() {
            let qid = match quinn_proto::StreamId::try_from(id) {
                Ok(qid) => qid,
                Err(_) => {
                    queue.clear();
                    continue;
                }
            };
            // both callbacks need the connection; they never run concurrently
            let conn = RefCell::new(&mut self.conn);
            let outcome = flush_stream(
                queue,
                |data| match conn.borrow_mut().send_stream(qid).write(data) {
                    Ok(n) => WriteOutcome::Accepted(n),
                    Err(WriteError::Blocked) => WriteOutcome::Blocked,
                    Err(e) => {
                        warn!(%id, error = ?e, "stream rejected data");
                        WriteOutcome::Closed
                    }
                },
                || {
                    if let Err(e) = conn.borrow_mut().send_stream(qid).finish() {
                        debug!(%id, error = ?e, "finish on a closed stream");
                    }
                },
            );
            if outcome == FlushOutcome::Closed {
                warn!(%id, "dropped queued data for a closed stream");
            }
        }
        self.shared.outgoing.restore(queued);
    }

    /// Sends everything the connection wants to send, one datagram at a time.
    fn transmit(&mut self, now: Instant) -> Result<(), String> {
        loop {
            self.send_buf.clear();
            let transmit = match self.conn.poll_transmit(now, 1, &mut self.send_buf) {
                Some(t) => t,
                None => return Ok(()),
            };
            if transmit.size == 0 {
                return Ok(());
            }
            self.send_datagram(&self.send_buf[..transmit.size])?;
        }
    }

    fn send_datagram(&self, datagram: &[u8]) -> Result<(), String> {
        match self.socket.try_send(datagram) {
            Ok(_) => {
                trace!(bytes = datagram.len(), "datagram sent");
                Ok(())
            }
            // dropped datagrams are recovered by QUIC loss detection
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!("socket buffer full, datagram dropped");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                debug!(error = %e, "peer port unreachable");
                Ok(())
            }
            Err(e) => Err(format!("UDP send failed: {}", e)),
        }
    }

    /// Emits a single CONNECTION_CLOSE unless the connection is already
    /// closing or draining.
    fn close_connection(&mut self) {
        if self.conn.is_closed() {
            debug!("connection already closing, no close frame sent");
            return;
        }
        let now = Instant::now();
        self.conn
            .close(now, VarInt::from_u32(0), Bytes::from_static(b"client close"));
        self.send_buf.clear();
        if let Some(transmit) = self.conn.poll_transmit(now, 1, &mut self.send_buf) {
            if transmit.size > 0 {
                if let Err(e) = self.send_datagram(&self.send_buf[..transmit.size]) {
                    warn!(error = %e, "failed to send close frame");
                }
            }
        }
        info!("connection close sent");
    }
}
