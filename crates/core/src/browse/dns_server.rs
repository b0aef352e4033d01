use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

use crate::Error;
use crate::cache::Cache;
use crate::record::{Key, RecordData, TYPE_SRV};
use crate::scope::{InterfaceIndex, Protocol, Scope};
use crate::server::Server;

use super::{
    BrowseListener, BrowserId, BrowserKind, Delivery, Effects, ListenerBox, Outstanding,
    RecordChange, Subscription, address_keys,
};

/// Which unicast DNS service a server offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DnsServerKind {
    /// Recursive resolution (`_domain._udp`).
    Resolve,
    /// Dynamic updates (`_dns-update._udp`).
    Update,
}

impl DnsServerKind {
    pub fn service_type(self) -> &'static str {
        match self {
            DnsServerKind::Resolve => "_domain._udp",
            DnsServerKind::Update => "_dns-update._udp",
        }
    }
}

impl fmt::Display for DnsServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsServerKind::Resolve => write!(f, "resolve"),
            DnsServerKind::Update => write!(f, "update"),
        }
    }
}

/// A unicast DNS server advertised on the link.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DnsServerInfo {
    pub host_name: String,
    pub address: IpAddr,
    pub port: u16,
}

/// Follows DNS-server SRV records and reports each server once its target
/// address is known.
pub(crate) struct DnsServerBrowser {
    srv_key: Key,
    aprotocol: Option<Protocol>,
    seen: Outstanding<DnsServerInfo>,
    /// Address keys of the SRV targets currently followed.
    followed: HashSet<Key>,
}

impl DnsServerBrowser {
    fn current(
        &self,
        cache: &Cache,
        scope: &Scope,
    ) -> (HashSet<(InterfaceIndex, Protocol, DnsServerInfo)>, HashSet<Key>) {
        let mut servers = HashSet::new();
        let mut wanted = HashSet::new();
        for srv in cache
            .lookup(&self.srv_key)
            .filter(|e| scope.matches(e.interface, e.protocol))
        {
            let RecordData::Srv { port, target, .. } = srv.record.data() else {
                continue;
            };
            let keys = address_keys(target, self.aprotocol);
            let address = keys.iter().find_map(|key| {
                cache
                    .lookup(key)
                    .filter(|e| e.interface == srv.interface && e.protocol == srv.protocol)
                    .find_map(|e| e.record.data().as_address())
            });
            wanted.extend(keys);

            if let Some(address) = address {
                servers.insert((
                    srv.interface,
                    srv.protocol,
                    DnsServerInfo {
                        host_name: target.clone(),
                        address,
                        port: *port,
                    },
                ));
            }
        }
        (servers, wanted)
    }
}

impl Subscription for DnsServerBrowser {
    fn keys(&self) -> Vec<Key> {
        vec![self.srv_key.clone()]
    }

    fn on_change(
        &mut self,
        cache: &Cache,
        scope: &Scope,
        change: &RecordChange<'_>,
        effects: &mut Effects,
    ) {
        if change.record.key() != &self.srv_key && change.record.data().as_address().is_none() {
            return;
        }
        let (current, wanted) = self.current(cache, scope);
        effects
            .released
            .extend(self.followed.difference(&wanted).cloned());
        effects
            .queries
            .extend(wanted.difference(&self.followed).cloned());
        self.followed = wanted;
        for ev in self.seen.sync(current) {
            effects.deliveries.push(Delivery::DnsServer(ev));
        }
    }
}

impl Server {
    /// Browses DNS servers of `kind` advertised in `domain`.
    pub fn dns_server_browser_new(
        &mut self,
        interface: Option<InterfaceIndex>,
        protocol: Option<Protocol>,
        domain: Option<&str>,
        kind: DnsServerKind,
        aprotocol: Option<Protocol>,
        listener: impl BrowseListener<DnsServerInfo> + 'static,
    ) -> Result<BrowserId, Error> {
        let domain = self.browse_domain(domain)?;
        let name = format!("{}.{domain}", kind.service_type());
        let browser = BrowserKind::DnsServer(DnsServerBrowser {
            srv_key: Key::in_class(&name, TYPE_SRV),
            aprotocol,
            seen: Outstanding::default(),
            followed: HashSet::new(),
        });
        self.browser_attach(
            Scope::new(interface, protocol),
            browser,
            ListenerBox::DnsServer(Box::new(listener)),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::browse::{BrowseEvent, BrowserEvent};
    use crate::record::Record;
    use crate::testing::running_server;
    use crate::transport::TransportOp;

    use super::*;

    fn srv(target: &str) -> Record {
        Record::new(
            "_domain._udp.local",
            120,
            RecordData::Srv {
                priority: 0,
                weight: 0,
                port: 53,
                target: target.into(),
            },
        )
    }

    fn a(name: &str, ip: &str) -> Record {
        Record::new(name, 120, RecordData::A(ip.parse().unwrap()))
    }

    #[tokio::test(start_paused = true)]
    async fn new_once_address_known_and_remove_with_srv() {
        let (mut server, _log) = running_server();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        server
            .dns_server_browser_new(
                None,
                None,
                None,
                DnsServerKind::Resolve,
                Some(Protocol::Inet),
                move |_s: &mut Server, _id: BrowserId, ev: BrowseEvent<DnsServerInfo>| {
                    sink.borrow_mut().push(ev)
                },
            )
            .unwrap();

        let host = "ip-192-168-50-1.local";
        server.handle_record(1, Protocol::Inet, srv(host));
        assert!(seen.borrow().is_empty());

        server.handle_record(1, Protocol::Inet, a(host, "192.168.50.1"));
        server.handle_record(1, Protocol::Inet, a(host, "192.168.50.1"));
        server.handle_record(1, Protocol::Inet, srv(host).with_ttl(0));

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].event, BrowserEvent::New);
        assert_eq!(seen[0].item.port, 53);
        assert_eq!(seen[0].item.address, "192.168.50.1".parse::<IpAddr>().unwrap());
        assert_eq!(seen[1].event, BrowserEvent::Remove);
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_targets_stop_their_address_queries() {
        let (mut server, log) = running_server();
        let id = server
            .dns_server_browser_new(
                None,
                None,
                None,
                DnsServerKind::Resolve,
                Some(Protocol::Inet),
                |_s: &mut Server, _id: BrowserId, _ev: BrowseEvent<DnsServerInfo>| {},
            )
            .unwrap();

        let old = Key::in_class("old.local", crate::record::TYPE_A);
        let new = Key::in_class("new.local", crate::record::TYPE_A);
        server.handle_record(1, Protocol::Inet, srv("old.local"));
        server.handle_record(1, Protocol::Inet, srv("old.local").with_ttl(0));
        server.handle_record(1, Protocol::Inet, srv("new.local"));

        assert_eq!(server.browsers[&id].subscriptions.len(), 2);
        assert!(server.browsers[&id].subscriptions.contains(&new));
        let log = log.borrow();
        let ops: Vec<&TransportOp> = log
            .iter()
            .filter(|op| matches!(op, TransportOp::Query(_, k) | TransportOp::CancelQuery(_, k) if k == &old))
            .collect();
        assert!(matches!(ops[..], [TransportOp::Query(..), TransportOp::CancelQuery(..)]));
    }

    #[test]
    fn kind_service_types() {
        assert_eq!(DnsServerKind::Resolve.service_type(), "_domain._udp");
        assert_eq!(DnsServerKind::Update.service_type(), "_dns-update._udp");
    }
}
