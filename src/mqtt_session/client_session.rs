// SPDX-License-Identifier: MPL-2.0

use std::collections::HashMap;

use crate::mqtt_client::error::MqttClientError;

/// What an outstanding packet identifier is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pending {
    /// QoS 1 PUBLISH awaiting PUBACK
    Publish { topic: String },
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
}

/// Client-side session state: packet identifier allocation and the
/// identifiers still waiting for an acknowledgement.
#[derive(Debug, Default)]
pub struct ClientSession {
    last_packet_id: u16,
    in_flight: HashMap<u16, Pending>,
}

impl ClientSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next free identifier in 1..=65535, wrapping and skipping ids in flight.
    pub fn next_packet_id(&mut self) -> Result<u16, MqttClientError> {
        if self.in_flight.len() >= u16::MAX as usize {
            return Err(MqttClientError::PacketIdExhausted);
        }
        loop {
            self.last_packet_id = self.last_packet_id.wrapping_add(1);
            if self.last_packet_id == 0 {
                self.last_packet_id = 1;
            }
            if !self.in_flight.contains_key(&self.last_packet_id) {
                return Ok(self.last_packet_id);
            }
        }
    }

    pub fn track(&mut self, packet_id: u16, pending: Pending) {
        self.in_flight.insert(packet_id, pending);
    }

    /// Releases `packet_id`; `None` when nothing was waiting on it.
    pub fn complete(&mut self, packet_id: u16) -> Option<Pending> {
        self.in_flight.remove(&packet_id)
    }

    pub fn is_in_flight(&self, packet_id: u16) -> bool {
        self.in_flight.contains_key(&packet_id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Drops all in-flight state, e.g. when the broker reports no stored session.
    pub fn clear(&mut self) {
        self.in_flight.clear();
    }
}
