use std::net::IpAddr;

use crate::Error;
use crate::cache::Cache;
use crate::domain;
use crate::record::Key;
use crate::scope::{InterfaceIndex, Protocol, Scope};
use crate::server::Server;

use super::{
    BrowserEvent, BrowserId, BrowserKind, Delivery, Effects, ListenerBox, RecordChange,
    ResolveListener, ResolverEvent, Subscription, address_keys,
};

/// A host name and one of its addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostNameResolution {
    pub host_name: String,
    pub address: IpAddr,
}

/// Resolves a host name to its first known address.
pub(crate) struct HostNameResolver {
    host_name: String,
    aprotocol: Option<Protocol>,
    done: bool,
}

impl Subscription for HostNameResolver {
    fn keys(&self) -> Vec<Key> {
        address_keys(&self.host_name, self.aprotocol)
    }

    fn on_change(
        &mut self,
        _cache: &Cache,
        _scope: &Scope,
        change: &RecordChange<'_>,
        effects: &mut Effects,
    ) {
        if self.done || change.event != BrowserEvent::New {
            return;
        }
        if !self.keys().iter().any(|k| k.matches(change.record.key())) {
            return;
        }
        let Some(address) = change.record.data().as_address() else {
            return;
        };

        self.done = true;
        effects.finished = true;
        effects
            .deliveries
            .push(Delivery::HostName(ResolverEvent::Found {
                interface: change.interface,
                protocol: change.protocol,
                result: HostNameResolution {
                    host_name: change.record.name().to_string(),
                    address,
                },
            }));
    }

    fn on_deadline(&mut self, effects: &mut Effects) {
        if !self.done {
            self.done = true;
            effects.finished = true;
            effects
                .deliveries
                .push(Delivery::HostName(ResolverEvent::Timeout));
        }
    }

    fn is_resolver(&self) -> bool {
        true
    }
}

impl Server {
    /// Resolves `host_name` to an address of family `aprotocol` (any if `None`).
    pub fn host_name_resolver_new(
        &mut self,
        interface: Option<InterfaceIndex>,
        protocol: Option<Protocol>,
        host_name: &str,
        aprotocol: Option<Protocol>,
        listener: impl ResolveListener<HostNameResolution> + 'static,
    ) -> Result<BrowserId, Error> {
        if !domain::is_valid_domain_name(host_name) {
            return Err(Error::InvalidDomainName(host_name.to_string()));
        }
        let kind = BrowserKind::HostName(HostNameResolver {
            host_name: domain::normalize(host_name),
            aprotocol,
            done: false,
        });
        self.browser_attach(
            Scope::new(interface, protocol),
            kind,
            ListenerBox::HostName(Box::new(listener)),
        )
    }
}
