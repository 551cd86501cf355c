// SPDX-License-Identifier: MPL-2.0

use std::env;
use std::process;
use std::time::Duration;

use flowsdk_quic::mqtt_serde::MQTT_V5;
use flowsdk_quic::{MqttClientOptions, QuicConfig, QuicMqttSession};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        eprintln!(
            "Usage: {} <host> <port> <topic> [--v5] [--insecure] [--ca-file <path>]",
            args[0]
        );
        process::exit(1);
    }
    let host = &args[1];
    let port: u16 = args[2].parse()?;
    let topic = &args[3];

    let mut quic = QuicConfig::builder();
    let mut version = 4;
    let mut rest = args[4..].iter();
    while let Some(flag) = rest.next() {
        match flag.as_str() {
            "--v5" => version = MQTT_V5,
            "--insecure" => quic = quic.insecure_skip_verify(true),
            "--ca-file" => {
                let path = rest.next().ok_or("--ca-file needs a path")?;
                quic = quic.ca_file(path);
            }
            other => return Err(format!("unknown flag {}", other).into()),
        }
    }

    let options = MqttClientOptions::builder()
        .client_id(format!("flowsdk-quic-{}", process::id()))
        .protocol_version(version)
        .keep_alive(30)
        .build()?;

    let mut session = QuicMqttSession::connect_to(host, port, quic.build(), options)?;
    if let Some(alpn) = session.transport().connection().negotiated_alpn() {
        info!(alpn = %String::from_utf8_lossy(&alpn), "connected");
    }

    let granted = session.subscribe(topic, 1)?;
    info!(%topic, granted, "subscribed");

    let payload = format!("hello from {}", process::id());
    session.publish(topic, payload.as_bytes(), 1, false)?;
    info!(rtt = ?session.ping()?, "ping");

    match session.next_message(Duration::from_secs(10))? {
        Some(message) => println!(
            "{} [qos {}]: {}",
            message.topic_name,
            message.qos,
            String::from_utf8_lossy(&message.payload)
        ),
        None => println!("no message received within 10s"),
    }

    session.unsubscribe(topic)?;
    session.disconnect()?;
    Ok(())
}
