use crate::Error;
use crate::cache::Cache;
use crate::record::{Key, Record};
use crate::scope::{InterfaceIndex, Protocol, Scope};
use crate::server::Server;

use super::{
    BrowseListener, BrowserId, BrowserKind, Delivery, Effects, ListenerBox, Outstanding,
    RecordChange, Subscription,
};

/// Reports every record matching a key, which may be a class/type pattern.
pub(crate) struct RecordBrowser {
    key: Key,
    seen: Outstanding<Record>,
}

impl Subscription for RecordBrowser {
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
        if !self.key.matches(change.record.key()) {
            return;
        }
        if let Some(ev) = self.seen.apply(
            change.interface,
            change.protocol,
            change.event,
            change.record.clone(),
        ) {
            effects.deliveries.push(Delivery::Record(ev));
        }
    }
}

impl Server {
    /// Browses raw records matching `key`.
    pub fn record_browser_new(
        &mut self,
        interface: Option<InterfaceIndex>,
        protocol: Option<Protocol>,
        key: Key,
        listener: impl BrowseListener<Record> + 'static,
    ) -> Result<BrowserId, Error> {
        key.validate()?;
        let kind = BrowserKind::Record(RecordBrowser {
            key,
            seen: Outstanding::default(),
        });
        self.browser_attach(
            Scope::new(interface, protocol),
            kind,
            ListenerBox::Record(Box::new(listener)),
        )
    }
}
