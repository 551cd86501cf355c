// SPDX-License-Identifier: MPL-2.0

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use tracing::{debug, info};

use super::stream::{OutgoingQueues, StreamTable};
use super::ConnectionState;

#[derive(Debug, Default, Clone)]
pub(crate) struct PathInfo {
    pub(crate) local: Option<SocketAddr>,
    pub(crate) remote: Option<SocketAddr>,
    pub(crate) alpn: Option<Vec<u8>>,
}

/// State shared between the facade and the worker.
pub(crate) struct Shared {
    state: Mutex<ConnectionState>,
    state_changed: Condvar,
    last_error: Mutex<String>,
    pub(crate) streams: StreamTable,
    pub(crate) outgoing: OutgoingQueues,
    pub(crate) path: Mutex<PathInfo>,
    /// A QUIC connection object exists: set by `connect`, cleared when the
    /// worker exits or by `close`.
    initialized: AtomicBool,
    close_requested: AtomicBool,
    /// Interrupts the worker's wait; permits coalesce.
    pub(crate) wake: Notify,
}

impl Default for Shared {
    fn default() -> Self {
        Shared {
            state: Mutex::new(ConnectionState::Idle),
            state_changed: Condvar::new(),
            last_error: Mutex::new(String::new()),
            streams: StreamTable::default(),
            outgoing: OutgoingQueues::default(),
            path: Mutex::new(PathInfo::default()),
            initialized: AtomicBool::new(false),
            close_requested: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }
}

impl Shared {
    pub(crate) fn state(&self) -> ConnectionState {
        self.state.lock().clone()
    }

    pub(crate) fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if *state != next {
            info!(from = %*state, to = %next, "connection state change");
            *state = next;
        }
        self.state_changed.notify_all();
    }

    /// Applies `next` only while the current state satisfies `allowed`.
    pub(crate) fn transition(
        &self,
        allowed: impl Fn(&ConnectionState) -> bool,
        next: ConnectionState,
    ) -> bool {
        let mut state = self.state.lock();
        if !allowed(&state) {
            return false;
        }
        info!(from = %*state, to = %next, "connection state change");
        *state = next;
        self.state_changed.notify_all();
        true
    }

    /// Blocks while the state is `Idle` or `Handshaking`, up to `deadline`.
    pub(crate) fn wait_while_handshaking(&self, deadline: Instant) -> ConnectionState {
        let mut state = self.state.lock();
        while matches!(*state, ConnectionState::Idle | ConnectionState::Handshaking) {
            if self.state_changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.clone()
    }

    pub(crate) fn last_error(&self) -> String {
        self.last_error.lock().clone()
    }

    pub(crate) fn set_error(&self, error: impl Into<String>) {
        let error = error.into();
        debug!(%error, "recording connection error");
        *self.last_error.lock() = error;
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn set_initialized(&self, value: bool) {
        self.initialized.store(value, Ordering::Release);
    }

    pub(crate) fn close_requested(&self) -> bool {
        self.close_requested.load(Ordering::Acquire)
    }

    pub(crate) fn request_close(&self) {
        self.close_requested.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    /// Resets everything for a fresh `connect`.
    pub(crate) fn reset(&self) {
        self.close_requested.store(false, Ordering::Release);
        self.last_error.lock().clear();
        self.streams.clear();
        self.outgoing.clear();
        *self.path.lock() = PathInfo::default();
        *self.state.lock() = ConnectionState::Idle;
    }
}
