use std::fmt;

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

/// Which DNS-SD domain enumeration list to browse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainBrowserKind {
    /// Domains recommended for browsing (`b`).
    Browse,
    /// The default browsing domain (`db`).
    BrowseDefault,
    /// Domains recommended for registration (`r`).
    Register,
    /// The default registration domain (`dr`).
    RegisterDefault,
    /// Legacy browsing domains (`lb`).
    BrowseLegacy,
}

impl DomainBrowserKind {
    fn label(self) -> &'static str {
        match self {
            DomainBrowserKind::Browse => "b",
            DomainBrowserKind::BrowseDefault => "db",
            DomainBrowserKind::Register => "r",
            DomainBrowserKind::RegisterDefault => "dr",
            DomainBrowserKind::BrowseLegacy => "lb",
        }
    }
}

impl fmt::Display for DomainBrowserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub(crate) struct DomainBrowser {
    key: Key,
    seen: Outstanding<String>,
}

impl Subscription for DomainBrowser {
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
        let Some(target) = change.record.data().target() else {
            return;
        };
        if let Some(ev) = self.seen.apply(
            change.interface,
            change.protocol,
            change.event,
            target.to_string(),
        ) {
            effects.deliveries.push(Delivery::Domain(ev));
        }
    }
}

impl Server {
    /// Browses the domains advertised under `domain` (the server's domain if
    /// `None`).
    pub fn domain_browser_new(
        &mut self,
        interface: Option<InterfaceIndex>,
        protocol: Option<Protocol>,
        domain: Option<&str>,
        kind: DomainBrowserKind,
        listener: impl BrowseListener<String> + 'static,
    ) -> Result<BrowserId, Error> {
        let domain = self.browse_domain(domain)?;
        let name = format!("{}._dns-sd._udp.{domain}", kind.label());
        let browser = BrowserKind::Domain(DomainBrowser {
            key: Key::in_class(&name, TYPE_PTR),
            seen: Outstanding::default(),
        });
        self.browser_attach(
            Scope::new(interface, protocol),
            browser,
            ListenerBox::Domain(Box::new(listener)),
        )
    }

    /// Validates a browse domain, defaulting to the server's own.
    pub(crate) fn browse_domain(&self, domain: Option<&str>) -> Result<String, Error> {
        match domain {
            Some(d) if !domain::is_valid_domain_name(d) => {
                Err(Error::InvalidDomainName(d.to_string()))
            }
            Some(d) => Ok(domain::normalize(d)),
            None => Ok(self.domain_name().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::browse::{BrowseEvent, BrowserEvent};
    use crate::testing::{ptr, running_server};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn lists_advertised_domains() {
        let (mut server, _log) = running_server();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        server
            .domain_browser_new(
                None,
                None,
                None,
                DomainBrowserKind::Browse,
                move |_s: &mut Server, _id: BrowserId, ev: BrowseEvent<String>| {
                    sink.borrow_mut().push((ev.event, ev.item))
                },
            )
            .unwrap();

        server.handle_record(1, Protocol::Inet, ptr("b._dns-sd._udp.local", "example.com"));
        server.handle_record(1, Protocol::Inet, ptr("r._dns-sd._udp.local", "other.com"));
        server.handle_withdrawn(1, Protocol::Inet, &ptr("b._dns-sd._udp.local", "example.com"));

        assert_eq!(
            *seen.borrow(),
            vec![
                (BrowserEvent::New, "example.com".to_string()),
                (BrowserEvent::Remove, "example.com".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_bad_domain() {
        let (mut server, _log) = running_server();
        let result = server.domain_browser_new(
            None,
            None,
            Some("bad..domain"),
            DomainBrowserKind::Register,
            |_s: &mut Server, _id: BrowserId, _ev: BrowseEvent<String>| {},
        );
        assert!(matches!(result, Err(Error::InvalidDomainName(_))));
    }
}
