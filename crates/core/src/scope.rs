//! Interface and protocol-family scoping.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// OS interface index, as reported by the interface monitor.
pub type InterfaceIndex = u32;

/// Address family a record was received on or is published for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Inet,
    Inet6,
}

impl Protocol {
    /// The family of an address.
    pub fn of(address: &IpAddr) -> Self {
        match address {
            IpAddr::V4(_) => Protocol::Inet,
            IpAddr::V6(_) => Protocol::Inet6,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Inet => write!(f, "inet"),
            Protocol::Inet6 => write!(f, "inet6"),
        }
    }
}

/// Where a record is published or which traffic a browser listens to.
///
/// `None` in either field is the wildcard ("all interfaces", "all families").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Scope {
    pub interface: Option<InterfaceIndex>,
    pub protocol: Option<Protocol>,
}

impl Scope {
    pub const ANY: Scope = Scope {
        interface: None,
        protocol: None,
    };

    pub fn new(interface: Option<InterfaceIndex>, protocol: Option<Protocol>) -> Self {
        Self {
            interface,
            protocol,
        }
    }

    /// Returns true if traffic on `(interface, protocol)` falls in this scope.
    pub fn matches(&self, interface: InterfaceIndex, protocol: Protocol) -> bool {
        self.interface.is_none_or(|i| i == interface)
            && self.protocol.is_none_or(|p| p == protocol)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.interface {
            Some(i) => write!(f, "{i}")?,
            None => f.write_str("*")?,
        }
        f.write_str(".")?;
        match self.protocol {
            Some(p) => write!(f, "{p}"),
            None => f.write_str("*"),
        }
    }
}
