//! Shared fixtures for unit tests.

use crate::config::ServerConfig;
use crate::record::{Record, RecordData};
use crate::server::{Server, ServerState};
use crate::transport::{MemoryTransport, TransportLog};

pub(crate) fn config() -> ServerConfig {
    ServerConfig {
        host_name: Some("zc".into()),
        addresses: vec!["192.168.50.10".parse().unwrap()],
        ..ServerConfig::default()
    }
}

pub(crate) fn starting_server() -> (Server, TransportLog) {
    let transport = MemoryTransport::new();
    let log = transport.log();
    let server = Server::new(config(), transport, |_s: &mut Server, _st: ServerState| {}).unwrap();
    (server, log)
}

pub(crate) fn running_server() -> (Server, TransportLog) {
    let (mut server, log) = starting_server();
    server.transport_ready().unwrap();
    (server, log)
}

pub(crate) fn ptr(name: &str, target: &str) -> Record {
    Record::new(name, 4500, RecordData::Ptr(target.into()))
}

pub(crate) fn a(name: &str, ip: &str) -> Record {
    Record::new(name, 120, RecordData::A(ip.parse().unwrap()))
}
