// SPDX-License-Identifier: MPL-2.0

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::quic::{QuicConnection, StreamId, TransportError};

/// A single ordered byte stream an MQTT session runs over.
pub trait StreamTransport {
    /// Queues `data` for sending; does not wait for the peer.
    fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Returns up to `max_len` received bytes without blocking; empty when
    /// nothing is buffered.
    fn recv(&self, max_len: usize) -> Result<Bytes, TransportError>;

    /// Waits until `recv` would return data or the stream has ended.
    fn wait_readable(&self, timeout: Duration) -> Result<bool, TransportError>;

    /// Half-closes the send direction.
    fn finish(&self) -> Result<(), TransportError>;

    /// True once the peer ended the stream and all its data has been read.
    fn is_finished(&self) -> bool;

    /// Tears down whatever carries the stream.
    fn close(&self) {}
}

/// One bidirectional stream of a shared [`QuicConnection`].
#[derive(Clone)]
pub struct QuicStream {
    conn: Arc<QuicConnection>,
    id: StreamId,
}

impl QuicStream {
    /// Opens a new bidirectional stream on an established connection.
    pub fn open(conn: Arc<QuicConnection>) -> Result<Self, TransportError> {
        let id = conn.open_stream()?;
        Ok(QuicStream { conn, id })
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn connection(&self) -> &Arc<QuicConnection> {
        &self.conn
    }
}

impl StreamTransport for QuicStream {
    fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        self.conn.write_stream(self.id, data, false)
    }

    fn recv(&self, max_len: usize) -> Result<Bytes, TransportError> {
        self.conn.read_stream(self.id, max_len)
    }

    fn wait_readable(&self, timeout: Duration) -> Result<bool, TransportError> {
        self.conn.wait_readable(self.id, timeout)
    }

    fn finish(&self) -> Result<(), TransportError> {
        self.conn.close_stream(self.id)
    }

    fn is_finished(&self) -> bool {
        self.conn.is_stream_finished(self.id)
    }

    fn close(&self) {
        self.conn.close();
    }
}
