use crate::Error;
use crate::cache::Cache;
use crate::domain;
use crate::record::{Key, TYPE_PTR};
use crate::scope::{InterfaceIndex, Protocol, Scope};
use crate::server::Server;

use super::{
    BrowseListener, BrowserId, BrowserKind, Delivery, Effects, ListenerBox, Outstanding,
    RecordChange, Subscription,
};

/// A service instance found by a service browser.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceInstance {
    /// Instance name, unescaped (`Test Service #2`).
    pub name: String,
    pub service_type: String,
    pub domain: String,
}

pub(crate) struct ServiceBrowser {
    key: Key,
    seen: Outstanding<ServiceInstance>,
}

impl Subscription for ServiceBrowser {
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
        if change.record.key() != &self.key {
            return;
        }
        let Some(parts) = change
            .record
            .data()
            .target()
            .and_then(domain::service_name_split)
        else {
            return;
        };
        let instance = ServiceInstance {
            name: parts.name,
            service_type: parts.service_type,
            domain: parts.domain,
        };
        if let Some(ev) = self
            .seen
            .apply(change.interface, change.protocol, change.event, instance)
        {
            effects.deliveries.push(Delivery::Service(ev));
        }
    }
}

impl Server {
    /// Browses instances of `service_type` (e.g. `_http._tcp`) in `domain`.
    pub fn service_browser_new(
        &mut self,
        interface: Option<InterfaceIndex>,
        protocol: Option<Protocol>,
        service_type: &str,
        domain: Option<&str>,
        listener: impl BrowseListener<ServiceInstance> + 'static,
    ) -> Result<BrowserId, Error> {
        if !domain::is_valid_service_type(service_type) {
            return Err(Error::InvalidServiceType(service_type.to_string()));
        }
        let domain = self.browse_domain(domain)?;
        let name = domain::join(&[service_type, domain.as_str()]);
        let kind = BrowserKind::Service(ServiceBrowser {
            key: Key::in_class(&name, TYPE_PTR),
            seen: Outstanding::default(),
        });
        self.browser_attach(
            Scope::new(interface, protocol),
            kind,
            ListenerBox::Service(Box::new(listener)),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    use crate::browse::{BrowseEvent, BrowserEvent};
    use crate::record::Record;
    use crate::testing::{ptr, running_server};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn new_then_remove_on_expiry() {
        let (mut server, _log) = running_server();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        server
            .service_browser_new(
                None,
                None,
                "_http._tcp",
                None,
                move |_s: &mut Server, _id: BrowserId, ev: BrowseEvent<ServiceInstance>| {
                    sink.borrow_mut().push(ev)
                },
            )
            .unwrap();

        let short: Record = ptr("_http._tcp.local", "Ecstasy\\ HTTP._http._tcp.local").with_ttl(2);
        server.handle_record(2, Protocol::Inet, short);

        tokio::time::advance(Duration::from_secs(2)).await;
        server.process_timeouts();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].event, BrowserEvent::New);
        assert_eq!(seen[0].item.name, "Ecstasy HTTP");
        assert_eq!(seen[0].item.service_type, "_http._tcp");
        assert_eq!(seen[1].event, BrowserEvent::Remove);
        assert_eq!(seen[1].item, seen[0].item);
    }

    #[tokio::test(start_paused = true)]
    async fn spellings_of_one_instance_are_one_item() {
        let (mut server, _log) = running_server();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        server
            .service_browser_new(
                None,
                None,
                "_http._tcp",
                None,
                move |_s: &mut Server, _id: BrowserId, ev: BrowseEvent<ServiceInstance>| {
                    sink.borrow_mut().push(format!("{} {}", ev.event, ev.item.name))
                },
            )
            .unwrap();

        for target in [
            "Web._http._tcp.local",
            "WEB._http._tcp.local",
            "Foo\\ Bar._http._tcp.local",
            "Foo\\032Bar._http._tcp.local",
        ] {
            server.handle_record(2, Protocol::Inet, ptr("_http._tcp.local", target));
        }
        let goodbye = ptr("_http._tcp.local", "Foo\\ Bar._http._tcp.local").with_ttl(0);
        server.handle_record(2, Protocol::Inet, goodbye);

        assert_eq!(*seen.borrow(), vec!["new Web", "new Foo Bar", "remove Foo Bar"]);
        assert_eq!(server.cache.len(), 1);
    }

    #[test]
    fn rejects_bad_service_type() {
        let (mut server, _log) = running_server();
        let result = server.service_browser_new(
            None,
            None,
            "http",
            None,
            |_s: &mut Server, _id: BrowserId, _ev: BrowseEvent<ServiceInstance>| {},
        );
        assert!(matches!(result, Err(Error::InvalidServiceType(_))));
    }
}
