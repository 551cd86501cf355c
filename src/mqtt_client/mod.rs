// SPDX-License-Identifier: MPL-2.0

pub mod error;
pub mod opts;

pub use error::{MqttClientError, MqttClientResult};
pub use opts::{MqttClientOptions, MqttClientOptionsBuilder};
