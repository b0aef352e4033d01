#![allow(dead_code)]

use std::time::Duration;

use zerocast_core::{
    MemoryTransport, Record, RecordData, Server, ServerConfig, ServerListener, TransportLog,
};

pub fn config() -> ServerConfig {
    ServerConfig {
        host_name: Some("zc".into()),
        addresses: vec!["192.168.50.10".parse().unwrap()],
        ..ServerConfig::default()
    }
}

pub fn server(listener: impl ServerListener + 'static) -> (Server, TransportLog) {
    let transport = MemoryTransport::new();
    let log = transport.log();
    let mut server = Server::new(config(), transport, listener).unwrap();
    server.transport_ready().unwrap();
    (server, log)
}

/// Advances the paused clock and runs whatever fell due.
pub async fn advance(server: &mut Server, by: Duration) {
    tokio::time::advance(by).await;
    server.process_timeouts();
}

pub fn srv(name: &str, port: u16, target: &str) -> Record {
    Record::new(
        name,
        120,
        RecordData::Srv {
            priority: 0,
            weight: 0,
            port,
            target: target.into(),
        },
    )
}

pub fn ptr(name: &str, target: &str) -> Record {
    Record::new(name, 4500, RecordData::Ptr(target.into()))
}
