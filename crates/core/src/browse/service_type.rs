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

/// A service type advertised in a domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceTypeInfo {
    pub service_type: String,
    pub domain: String,
}

/// Follows the `_services._dns-sd._udp` enumeration of a domain.
pub(crate) struct ServiceTypeBrowser {
    key: Key,
    seen: Outstanding<ServiceTypeInfo>,
}

impl Subscription for ServiceTypeBrowser {
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
        let Some((service_type, domain)) = change
            .record
            .data()
            .target()
            .and_then(domain::service_type_split)
        else {
            return;
        };
        let info = ServiceTypeInfo {
            service_type,
            domain,
        };
        if let Some(ev) = self
            .seen
            .apply(change.interface, change.protocol, change.event, info)
        {
            effects.deliveries.push(Delivery::ServiceType(ev));
        }
    }
}

impl Server {
    /// Browses the service types registered in `domain`.
    pub fn service_type_browser_new(
        &mut self,
        interface: Option<InterfaceIndex>,
        protocol: Option<Protocol>,
        domain: Option<&str>,
        listener: impl BrowseListener<ServiceTypeInfo> + 'static,
    ) -> Result<BrowserId, Error> {
        let domain = self.browse_domain(domain)?;
        let name = format!("_services._dns-sd._udp.{domain}");
        let kind = BrowserKind::ServiceType(ServiceTypeBrowser {
            key: Key::in_class(&name, TYPE_PTR),
            seen: Outstanding::default(),
        });
        self.browser_attach(
            Scope::new(interface, protocol),
            kind,
            ListenerBox::ServiceType(Box::new(listener)),
        )
    }
}
