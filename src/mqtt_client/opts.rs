// SPDX-License-Identifier: MPL-2.0

use std::time::Duration;

use crate::mqtt_client::error::MqttClientError;
use crate::mqtt_serde::packet::connect::{MqttConnect, Will};
use crate::mqtt_serde::properties::Property;
use crate::mqtt_serde::{MQTT_V311, MQTT_V5};

pub const DEFAULT_KEEP_ALIVE: u16 = 60;
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct MqttClientOptions {
    pub client_id: String,
    /// 4 (3.1.1) or 5 (5.0)
    pub protocol_version: u8,
    pub clean_start: bool,
    pub keep_alive: u16,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub will: Option<Will>,
    // v5 only, ignored for 3.1.1
    pub session_expiry_interval: Option<u32>,
    pub receive_maximum: Option<u16>,
    /// Upper bound for each request/acknowledgement exchange.
    pub operation_timeout: Duration,
    pub auto_ack: bool, // if true, acknowledge inbound QoS 1 deliveries as they are read
}

impl Default for MqttClientOptions {
    fn default() -> Self {
        MqttClientOptions {
            client_id: String::new(),
            protocol_version: MQTT_V311,
            clean_start: true,
            keep_alive: DEFAULT_KEEP_ALIVE,
            username: None,
            password: None,
            will: None,
            session_expiry_interval: None,
            receive_maximum: None,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            auto_ack: true,
        }
    }
}

impl MqttClientOptions {
    pub fn builder() -> MqttClientOptionsBuilder {
        MqttClientOptionsBuilder {
            options: MqttClientOptions::default(),
        }
    }

    pub fn is_v5(&self) -> bool {
        self.protocol_version == MQTT_V5
    }

    /// CONNECT packet described by these options.
    pub fn to_connect(&self) -> MqttConnect {
        let mut properties = Vec::new();
        if self.is_v5() {
            if let Some(interval) = self.session_expiry_interval {
                properties.push(Property::SessionExpiryInterval(interval));
            }
            if let Some(max) = self.receive_maximum {
                properties.push(Property::ReceiveMaximum(max));
            }
        }
        let connect = MqttConnect::new(
            self.client_id.clone(),
            self.keep_alive,
            self.clean_start,
            self.protocol_version,
        )
        .with_credentials(self.username.clone(), self.password.clone())
        .with_properties(properties);
        match &self.will {
            Some(will) => connect.with_will(will.clone()),
            None => connect,
        }
    }
}

pub struct MqttClientOptionsBuilder {
    options: MqttClientOptions,
}

impl MqttClientOptionsBuilder {
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.options.client_id = id.into();
        self
    }

    pub fn protocol_version(mut self, version: u8) -> Self {
        self.options.protocol_version = version;
        self
    }

    pub fn clean_start(mut self, clean: bool) -> Self {
        self.options.clean_start = clean;
        self
    }

    pub fn keep_alive(mut self, seconds: u16) -> Self {
        self.options.keep_alive = seconds;
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.options.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<Vec<u8>>) -> Self {
        self.options.password = Some(password.into());
        self
    }

    pub fn will(mut self, will: Will) -> Self {
        self.options.will = Some(will);
        self
    }

    pub fn session_expiry_interval(mut self, seconds: u32) -> Self {
        self.options.session_expiry_interval = Some(seconds);
        self
    }

    pub fn receive_maximum(mut self, max: u16) -> Self {
        self.options.receive_maximum = Some(max);
        self
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.options.operation_timeout = timeout;
        self
    }

    pub fn auto_ack(mut self, auto_ack: bool) -> Self {
        self.options.auto_ack = auto_ack;
        self
    }

    pub fn build(self) -> Result<MqttClientOptions, MqttClientError> {
        let opts = self.options;
        if opts.protocol_version != MQTT_V311 && opts.protocol_version != MQTT_V5 {
            return Err(MqttClientError::InvalidConfiguration {
                field: "protocol_version".to_string(),
                reason: format!("{} is neither 4 (3.1.1) nor 5 (5.0)", opts.protocol_version),
            });
        }
        if opts.client_id.is_empty() && !opts.clean_start && opts.protocol_version == MQTT_V311 {
            return Err(MqttClientError::InvalidConfiguration {
                field: "client_id".to_string(),
                reason: "an empty client id requires clean session in 3.1.1".to_string(),
            });
        }
        if opts.protocol_version == MQTT_V311 && opts.password.is_some() && opts.username.is_none() {
            return Err(MqttClientError::InvalidConfiguration {
                field: "password".to_string(),
                reason: "3.1.1 does not allow a password without a username".to_string(),
            });
        }
        if opts.receive_maximum == Some(0) {
            return Err(MqttClientError::InvalidConfiguration {
                field: "receive_maximum".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if opts.operation_timeout.is_zero() {
            return Err(MqttClientError::InvalidConfiguration {
                field: "operation_timeout".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(opts)
    }
}
