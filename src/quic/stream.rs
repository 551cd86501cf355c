// SPDX-License-Identifier: MPL-2.0

//! Per-stream buffers shared between callers and the worker.
//!
//! Inbound bytes sit in a [`StreamTable`] until the application reads them;
//! outbound writes sit in [`OutgoingQueues`] until the worker hands them to the
//! QUIC engine. Each has its own lock, held for a single mutation only.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::{Condvar, Mutex};

use super::StreamId;

#[derive(Debug, Default)]
pub(crate) struct StreamState {
    inbound: BytesMut,
    fin_received: bool,
    closed: bool,
}

impl StreamState {
    fn is_readable(&self) -> bool {
        !self.inbound.is_empty() || self.fin_received || self.closed
    }
}

/// Inbound side of every known stream.
#[derive(Debug, Default)]
pub(crate) struct StreamTable {
    streams: Mutex<HashMap<StreamId, StreamState>>,
    data_arrived: Condvar,
}

impl StreamTable {
    /// Registers a stream; a no-op when it is already known.
    pub(crate) fn ensure(&self, id: StreamId) {
        self.streams.lock().entry(id).or_default();
    }

    pub(crate) fn contains(&self, id: StreamId) -> bool {
        self.streams.lock().contains_key(&id)
    }

    /// Appends received bytes, creating the stream on first sight.
    pub(crate) fn push_inbound(&self, id: StreamId, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.streams
            .lock()
            .entry(id)
            .or_default()
            .inbound
            .extend_from_slice(data);
        self.data_arrived.notify_all();
    }

    pub(crate) fn mark_fin(&self, id: StreamId) {
        self.streams.lock().entry(id).or_default().fin_received = true;
        self.data_arrived.notify_all();
    }

    /// Peer reset or stopped the stream; nothing more will arrive.
    pub(crate) fn mark_closed(&self, id: StreamId) {
        self.streams.lock().entry(id).or_default().closed = true;
        self.data_arrived.notify_all();
    }

    /// Dequeues up to `max_len` bytes. Never blocks; empty when nothing is buffered.
    pub(crate) fn read(&self, id: StreamId, max_len: usize) -> Bytes {
        let mut streams = self.streams.lock();
        match streams.get_mut(&id) {
            Some(state) => {
                let n = state.inbound.len().min(max_len);
                state.inbound.split_to(n).freeze()
            }
            None => Bytes::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn buffered(&self, id: StreamId) -> usize {
        self.streams.lock().get(&id).map_or(0, |s| s.inbound.len())
    }

    /// Peer finished (or reset) the stream and every byte has been read.
    pub(crate) fn is_finished(&self, id: StreamId) -> bool {
        self.streams
            .lock()
            .get(&id)
            .is_some_and(|s| (s.fin_received || s.closed) && s.inbound.is_empty())
    }

    /// Waits until the stream has data or has ended, or `timeout` elapses.
    /// Returns whether it is readable.
    pub(crate) fn wait_readable(&self, id: StreamId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut streams = self.streams.lock();
        loop {
            if streams.get(&id).is_some_and(StreamState::is_readable) {
                return true;
            }
            if self.data_arrived.wait_until(&mut streams, deadline).timed_out() {
                return streams.get(&id).is_some_and(StreamState::is_readable);
            }
        }
    }

    /// Marks every stream closed and wakes all waiters.
    pub(crate) fn close_all(&self) {
        for state in self.streams.lock().values_mut() {
            state.closed = true;
        }
        self.data_arrived.notify_all();
    }

    pub(crate) fn clear(&self) {
        self.streams.lock().clear();
        self.data_arrived.notify_all();
    }
}

/// One application write: payload, how much of it the engine has taken, and
/// whether the stream ends after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OutgoingChunk {
    pub(crate) data: Bytes,
    pub(crate) offset: usize,
    pub(crate) fin: bool,
}

impl OutgoingChunk {
    pub(crate) fn new(data: Bytes, fin: bool) -> Self {
        OutgoingChunk {
            data,
            offset: 0,
            fin,
        }
    }

    pub(crate) fn remaining(&self) -> &[u8] {
        &self.data[self.offset..]
    }
}

pub(crate) type OutgoingMap = BTreeMap<StreamId, VecDeque<OutgoingChunk>>;

/// Outbound chunks per stream, FIFO within a stream, drained in stream-id order.
#[derive(Debug, Default)]
pub(crate) struct OutgoingQueues {
    inner: Mutex<OutgoingMap>,
}

impl OutgoingQueues {
    pub(crate) fn push(&self, id: StreamId, chunk: OutgoingChunk) {
        self.inner.lock().entry(id).or_default().push_back(chunk);
    }

    /// Takes everything queued so far, leaving the shared map empty.
    pub(crate) fn take(&self) -> OutgoingMap {
        std::mem::take(&mut *self.inner.lock())
    }

    /// Puts back chunks the engine could not take, ahead of anything queued
    /// since `take`.
    pub(crate) fn restore(&self, leftover: OutgoingMap) {
        let mut inner = self.inner.lock();
        for (id, mut chunks) in leftover {
            if chunks.is_empty() {
                continue;
            }
            let newer = inner.remove(&id).unwrap_or_default();
            chunks.extend(newer);
            inner.insert(id, chunks);
        }
    }

    pub(crate) fn drop_stream(&self, id: StreamId) -> usize {
        self.inner.lock().remove(&id).map_or(0, |q| q.len())
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.inner.lock().values().all(VecDeque::is_empty)
    }

    pub(crate) fn clear(&self) {
        self.inner.lock().clear();
    }
}

/// Result of handing bytes to the engine's send stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    /// The engine took this many bytes (possibly fewer than offered).
    Accepted(usize),
    /// Flow control is exhausted for now.
    Blocked,
    /// The stream no longer accepts data.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushOutcome {
    Drained,
    Blocked,
    Closed,
}

/// Feeds a stream's queue to the engine in order. Partially accepted chunks
/// keep their offset and stay at the head; a chunk with `fin` finishes the
/// stream only once all of its bytes are taken.
pub(crate) fn flush_stream<W, F>(
    queue: &mut VecDeque<OutgoingChunk>,
    mut write: W,
    mut finish: F,
) -> FlushOutcome
where
    W: FnMut(&[u8]) -> WriteOutcome,
    F: FnMut(),
{
    while let Some(chunk) = queue.front_mut() {
        while chunk.offset < chunk.data.len() {
            match write(chunk.remaining()) {
                WriteOutcome::Accepted(0) | WriteOutcome::Blocked => return FlushOutcome::Blocked,
                WriteOutcome::Accepted(n) => chunk.offset += n,
                WriteOutcome::Closed => {
                    queue.clear();
                    return FlushOutcome::Closed;
                }
            }
        }
        if chunk.fin {
            finish();
        }
        queue.pop_front();
    }
    FlushOutcome::Drained
}
