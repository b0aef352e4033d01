use std::net::IpAddr;

use crate::Error;
use crate::cache::Cache;
use crate::domain;
use crate::record::{Key, TYPE_PTR};
use crate::scope::{InterfaceIndex, Protocol, Scope};
use crate::server::Server;

use super::{
    BrowserEvent, BrowserId, BrowserKind, Delivery, Effects, ListenerBox, RecordChange,
    ResolveListener, ResolverEvent, Subscription,
};

/// An address and the host name it maps back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressResolution {
    pub address: IpAddr,
    pub host_name: String,
}

/// Reverse-resolves an address through its `in-addr.arpa`/`ip6.arpa` PTR.
pub(crate) struct AddressResolver {
    address: IpAddr,
    key: Key,
    done: bool,
}

impl Subscription for AddressResolver {
    fn keys(&self) -> Vec<Key> {
        vec![self.key.clone()]
    }

    fn on_change(
        &mut self,
        _cache: &Cache,
        _scope: &Scope,
        change: &RecordChange<'_>,
        effects: &mut Effects,
    ) {
        if self.done || change.event != BrowserEvent::New || change.record.key() != &self.key {
            return;
        }
        let Some(host_name) = change.record.data().target() else {
            return;
        };

        self.done = true;
        effects.finished = true;
        effects
            .deliveries
            .push(Delivery::Address(ResolverEvent::Found {
                interface: change.interface,
                protocol: change.protocol,
                result: AddressResolution {
                    address: self.address,
                    host_name: host_name.to_string(),
                },
            }));
    }

    fn on_deadline(&mut self, effects: &mut Effects) {
        if !self.done {
            self.done = true;
            effects.finished = true;
            effects
                .deliveries
                .push(Delivery::Address(ResolverEvent::Timeout));
        }
    }

    fn is_resolver(&self) -> bool {
        true
    }
}

impl Server {
    /// Resolves `address` back to a host name.
    ///
    /// A protocol scope of the other address family is rejected with
    /// [`Error::InvalidScope`].
    pub fn address_resolver_new(
        &mut self,
        interface: Option<InterfaceIndex>,
        protocol: Option<Protocol>,
        address: IpAddr,
        listener: impl ResolveListener<AddressResolution> + 'static,
    ) -> Result<BrowserId, Error> {
        if let Some(protocol) = protocol
            && protocol != Protocol::of(&address)
        {
            return Err(Error::InvalidScope(format!(
                "{address} is not an {protocol} address"
            )));
        }
        let kind = BrowserKind::Address(AddressResolver {
            address,
            key: Key::in_class(&domain::reverse_lookup_name(&address), TYPE_PTR),
            done: false,
        });
        self.browser_attach(
            Scope::new(interface, protocol),
            kind,
            ListenerBox::Address(Box::new(listener)),
        )
    }
}
