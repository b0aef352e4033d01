//! Zero-configuration mDNS/DNS-SD responder core.
//!
//! A [`Server`] publishes records through entry groups, resolves
//! name conflicts, and runs browsers and resolvers over the records it hears.
//! Packet I/O lives behind the [`Transport`] trait; the embedding
//! application drives timers via [`Server::next_timeout`] and
//! [`Server::process_timeouts`].

mod alternative;
mod browse;
mod cache;
mod config;
pub mod domain;
mod entry_group;
mod error;
pub mod record;
mod scope;
mod server;
mod timer;
mod transport;

#[cfg(test)]
mod testing;

pub use alternative::{RetryPolicy, alternative_host_name, alternative_service_name};
pub use browse::{
    AddressResolution, BrowseEvent, BrowseListener, BrowserEvent, BrowserId, DnsServerInfo,
    DnsServerKind, DomainBrowserKind, HostNameResolution, ResolveListener, ResolverEvent,
    ServiceInstance, ServiceResolution, ServiceTypeInfo,
};
pub use config::{ServerConfig, default_host_name};
pub use entry_group::{EntryGroupListener, EntryGroupState, GroupId};
pub use error::Error;
pub use record::{Key, Record, RecordData, TxtList};
pub use scope::{InterfaceIndex, Protocol, Scope};
pub use server::{Server, ServerListener, ServerState};
pub use transport::{MemoryTransport, Transport, TransportLog, TransportOp};
