use std::net::IpAddr;

use crate::Error;
use crate::cache::Cache;
use crate::domain;
use crate::record::{Key, RecordData, TYPE_SRV, TYPE_TXT, TxtList};
use crate::scope::{InterfaceIndex, Protocol, Scope};
use crate::server::Server;

use super::{
    BrowserId, BrowserKind, Delivery, Effects, ListenerBox, RecordChange, ResolveListener,
    ResolverEvent, Subscription, address_keys,
};

/// Everything needed to connect to a service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceResolution {
    pub name: String,
    pub service_type: String,
    pub domain: String,
    pub host_name: String,
    pub address: IpAddr,
    pub port: u16,
    pub txt: TxtList,
}

/// Combines SRV, TXT and the SRV target's address, all seen on the same
/// interface and protocol, into one answer.
pub(crate) struct ServiceResolver {
    name: String,
    service_type: String,
    domain: String,
    srv_key: Key,
    txt_key: Key,
    aprotocol: Option<Protocol>,
    done: bool,
}

impl ServiceResolver {
    fn is_relevant(&self, change: &RecordChange<'_>) -> bool {
        let key = change.record.key();
        key == &self.srv_key || key == &self.txt_key || change.record.data().as_address().is_some()
    }

    /// Looks for a complete answer in the cache, asking for the address of
    /// every SRV target seen along the way.
    fn resolve(&self, cache: &Cache, scope: &Scope, effects: &mut Effects) -> Option<Delivery> {
        for srv in cache
            .lookup(&self.srv_key)
            .filter(|e| scope.matches(e.interface, e.protocol))
        {
            let RecordData::Srv { port, target, .. } = srv.record.data() else {
                continue;
            };
            let address_keys = address_keys(target, self.aprotocol);

            let txt = cache
                .lookup(&self.txt_key)
                .filter(|e| e.interface == srv.interface && e.protocol == srv.protocol)
                .find_map(|e| match e.record.data() {
                    RecordData::Txt(txt) => Some(txt.clone()),
                    _ => None,
                });
            let address = address_keys.iter().find_map(|key| {
                cache
                    .lookup(key)
                    .filter(|e| e.interface == srv.interface && e.protocol == srv.protocol)
                    .find_map(|e| e.record.data().as_address())
            });
            effects.queries.extend(address_keys);

            if let (Some(txt), Some(address)) = (txt, address) {
                return Some(Delivery::ServiceResolver(ResolverEvent::Found {
                    interface: srv.interface,
                    protocol: srv.protocol,
                    result: ServiceResolution {
                        name: self.name.clone(),
                        service_type: self.service_type.clone(),
                        domain: self.domain.clone(),
                        host_name: target.clone(),
                        address,
                        port: *port,
                        txt,
                    },
                }));
            }
        }
        None
    }
}

impl Subscription for ServiceResolver {
    fn keys(&self) -> Vec<Key> {
        vec![self.srv_key.clone(), self.txt_key.clone()]
    }

    fn on_change(
        &mut self,
        cache: &Cache,
        scope: &Scope,
        change: &RecordChange<'_>,
        effects: &mut Effects,
    ) {
        if self.done || !self.is_relevant(change) {
            return;
        }
        if let Some(found) = self.resolve(cache, scope, effects) {
            self.done = true;
            effects.finished = true;
            effects.deliveries.push(found);
        }
    }

    fn on_deadline(&mut self, effects: &mut Effects) {
        if !self.done {
            self.done = true;
            effects.finished = true;
            effects
                .deliveries
                .push(Delivery::ServiceResolver(ResolverEvent::Timeout));
        }
    }

    fn is_resolver(&self) -> bool {
        true
    }
}

impl Server {
    /// Resolves the service instance `name` of `service_type` in `domain`.
    #[allow(clippy::too_many_arguments)]
    pub fn service_resolver_new(
        &mut self,
        interface: Option<InterfaceIndex>,
        protocol: Option<Protocol>,
        name: &str,
        service_type: &str,
        domain: Option<&str>,
        aprotocol: Option<Protocol>,
        listener: impl ResolveListener<ServiceResolution> + 'static,
    ) -> Result<BrowserId, Error> {
        let domain = self.browse_domain(domain)?;
        let full_name = domain::service_name_join(name, service_type, &domain)?;
        let kind = BrowserKind::ServiceResolver(ServiceResolver {
            name: name.to_string(),
            service_type: service_type.to_string(),
            srv_key: Key::in_class(&full_name, TYPE_SRV),
            txt_key: Key::in_class(&full_name, TYPE_TXT),
            domain,
            aprotocol,
            done: false,
        });
        self.browser_attach(
            Scope::new(interface, protocol),
            kind,
            ListenerBox::ServiceResolver(Box::new(listener)),
        )
    }
}
