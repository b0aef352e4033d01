use zerocast_core::{InterfaceIndex, Protocol, Record, Server};

/// Interface index reported for everything the daemon hands us. The daemon
/// does not say which interface a response arrived on.
pub const BRIDGE_INTERFACE: InterfaceIndex = 0;

/// TTL given to SRV and address records learned from the daemon (seconds).
pub const HOST_TTL: u32 = 120;

/// TTL given to PTR and TXT records learned from the daemon (seconds).
pub const SERVICE_TTL: u32 = 4500;

/// A record change observed on the network, waiting to be fed to the core.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Record {
        interface: InterfaceIndex,
        protocol: Protocol,
        record: Record,
    },
    Withdrawn {
        interface: InterfaceIndex,
        protocol: Protocol,
        record: Record,
    },
}

impl Incoming {
    /// Hands the change to `server`.
    pub fn apply(self, server: &mut Server) {
        match self {
            Incoming::Record {
                interface,
                protocol,
                record,
            } => server.handle_record(interface, protocol, record),
            Incoming::Withdrawn {
                interface,
                protocol,
                record,
            } => server.handle_withdrawn(interface, protocol, &record),
        }
    }
}
