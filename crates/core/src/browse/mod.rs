//! Browsers and resolvers.
//!
//! Every subscription kind shares one lifecycle: it is attached to the
//! [`Server`], issues queries through the transport, receives every cache
//! change that falls in its scope, and turns the ones it cares about into
//! events. Browsers emit NEW/REMOVE pairs; resolvers emit a single FOUND or
//! TIMEOUT and then detach.

mod address;
mod dns_server;
mod domain;
mod host_name;
mod record;
mod service;
mod service_resolver;
mod service_type;

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

use tokio::time::Instant;
use tracing::{debug, error};

use crate::cache::Cache;
use crate::record::{Key, Record};
use crate::scope::{InterfaceIndex, Protocol, Scope};
use crate::server::{Pending, Server};
use crate::timer::Timeout;
use crate::{Error, ServerState};

pub use address::AddressResolution;
pub use dns_server::{DnsServerInfo, DnsServerKind};
pub use domain::DomainBrowserKind;
pub use host_name::HostNameResolution;
pub use service::ServiceInstance;
pub use service_resolver::ServiceResolution;
pub use service_type::ServiceTypeInfo;

use address::AddressResolver;
use dns_server::DnsServerBrowser;
use domain::DomainBrowser;
use host_name::HostNameResolver;
use record::RecordBrowser;
use service::ServiceBrowser;
use service_resolver::ServiceResolver;
use service_type::ServiceTypeBrowser;

/// Handle to a browser or resolver owned by a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BrowserId(u64);

impl BrowserId {
    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for BrowserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "browser#{}", self.0)
    }
}

/// Arrival or departure of a browsed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrowserEvent {
    New,
    Remove,
}

impl fmt::Display for BrowserEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrowserEvent::New => write!(f, "new"),
            BrowserEvent::Remove => write!(f, "remove"),
        }
    }
}

/// A NEW or REMOVE notification from a browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseEvent<T> {
    pub interface: InterfaceIndex,
    pub protocol: Protocol,
    pub event: BrowserEvent,
    pub item: T,
}

/// The single outcome of a resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverEvent<T> {
    Found {
        interface: InterfaceIndex,
        protocol: Protocol,
        result: T,
    },
    Timeout,
}

/// Receives NEW/REMOVE events from a browser.
pub trait BrowseListener<T> {
    fn on_browse(&mut self, server: &mut Server, browser: BrowserId, event: BrowseEvent<T>);
}

impl<T, F> BrowseListener<T> for F
where
    F: FnMut(&mut Server, BrowserId, BrowseEvent<T>),
{
    fn on_browse(&mut self, server: &mut Server, browser: BrowserId, event: BrowseEvent<T>) {
        self(server, browser, event)
    }
}

/// Receives the FOUND/TIMEOUT outcome of a resolver.
pub trait ResolveListener<T> {
    fn on_resolve(&mut self, server: &mut Server, resolver: BrowserId, event: ResolverEvent<T>);
}

impl<T, F> ResolveListener<T> for F
where
    F: FnMut(&mut Server, BrowserId, ResolverEvent<T>),
{
    fn on_resolve(&mut self, server: &mut Server, resolver: BrowserId, event: ResolverEvent<T>) {
        self(server, resolver, event)
    }
}

/// A listener of whichever kind its browser expects.
pub(crate) enum ListenerBox {
    Record(Box<dyn BrowseListener<Record>>),
    Domain(Box<dyn BrowseListener<String>>),
    ServiceType(Box<dyn BrowseListener<ServiceTypeInfo>>),
    Service(Box<dyn BrowseListener<ServiceInstance>>),
    DnsServer(Box<dyn BrowseListener<DnsServerInfo>>),
    HostName(Box<dyn ResolveListener<HostNameResolution>>),
    Address(Box<dyn ResolveListener<AddressResolution>>),
    ServiceResolver(Box<dyn ResolveListener<ServiceResolution>>),
}

/// An event waiting in the dispatch queue.
#[derive(Debug, Clone)]
pub(crate) enum Delivery {
    Record(BrowseEvent<Record>),
    Domain(BrowseEvent<String>),
    ServiceType(BrowseEvent<ServiceTypeInfo>),
    Service(BrowseEvent<ServiceInstance>),
    DnsServer(BrowseEvent<DnsServerInfo>),
    HostName(ResolverEvent<HostNameResolution>),
    Address(ResolverEvent<AddressResolution>),
    ServiceResolver(ResolverEvent<ServiceResolution>),
}

impl Delivery {
    /// Resolver outcomes are the last event their resolver ever sends.
    pub(crate) fn is_final(&self) -> bool {
        matches!(
            self,
            Delivery::HostName(_) | Delivery::Address(_) | Delivery::ServiceResolver(_)
        )
    }
}

impl ListenerBox {
    pub(crate) fn deliver(&mut self, server: &mut Server, id: BrowserId, delivery: Delivery) {
        match (self, delivery) {
            (ListenerBox::Record(l), Delivery::Record(ev)) => l.on_browse(server, id, ev),
            (ListenerBox::Domain(l), Delivery::Domain(ev)) => l.on_browse(server, id, ev),
            (ListenerBox::ServiceType(l), Delivery::ServiceType(ev)) => {
                l.on_browse(server, id, ev)
            }
            (ListenerBox::Service(l), Delivery::Service(ev)) => l.on_browse(server, id, ev),
            (ListenerBox::DnsServer(l), Delivery::DnsServer(ev)) => l.on_browse(server, id, ev),
            (ListenerBox::HostName(l), Delivery::HostName(ev)) => l.on_resolve(server, id, ev),
            (ListenerBox::Address(l), Delivery::Address(ev)) => l.on_resolve(server, id, ev),
            (ListenerBox::ServiceResolver(l), Delivery::ServiceResolver(ev)) => {
                l.on_resolve(server, id, ev)
            }
            (_, delivery) => error!(browser = %id, ?delivery, "event does not fit listener"),
        }
    }
}

/// A cache change as seen by a browser.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecordChange<'a> {
    pub(crate) interface: InterfaceIndex,
    pub(crate) protocol: Protocol,
    pub(crate) record: &'a Record,
    pub(crate) event: BrowserEvent,
}

/// What a browser wants done after looking at a change.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    pub(crate) deliveries: Vec<Delivery>,
    /// Further keys to query (e.g. a resolver's SRV target address).
    pub(crate) queries: Vec<Key>,
    /// Keys taken through `queries` that are no longer needed.
    pub(crate) released: Vec<Key>,
    /// The resolver is done; cancel its queries and deadline.
    pub(crate) finished: bool,
}

impl Effects {
    fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
            && self.queries.is_empty()
            && self.released.is_empty()
            && !self.finished
    }
}

/// Items a browser has announced with NEW and not yet taken back.
///
/// Keeps NEW and REMOVE strictly alternating per `(interface, protocol, item)`.
#[derive(Debug)]
pub(crate) struct Outstanding<T> {
    items: HashSet<(InterfaceIndex, Protocol, T)>,
}

impl<T> Default for Outstanding<T> {
    fn default() -> Self {
        Self {
            items: HashSet::new(),
        }
    }
}

impl<T: Clone + Eq + Hash> Outstanding<T> {
    /// Records `event` for `item`; returns the event to emit, if any.
    pub(crate) fn apply(
        &mut self,
        interface: InterfaceIndex,
        protocol: Protocol,
        event: BrowserEvent,
        item: T,
    ) -> Option<BrowseEvent<T>> {
        let entry = (interface, protocol, item);
        let changed = match event {
            BrowserEvent::New => self.items.insert(entry.clone()),
            BrowserEvent::Remove => self.items.remove(&entry),
        };
        changed.then(|| BrowseEvent {
            interface: entry.0,
            protocol: entry.1,
            event,
            item: entry.2,
        })
    }

    /// Brings the outstanding set to `current`, emitting REMOVE for what
    /// vanished and NEW for what appeared.
    pub(crate) fn sync(
        &mut self,
        current: HashSet<(InterfaceIndex, Protocol, T)>,
    ) -> Vec<BrowseEvent<T>> {
        let mut events = Vec::new();
        let gone: Vec<_> = self.items.difference(&current).cloned().collect();
        for (interface, protocol, item) in gone {
            events.extend(self.apply(interface, protocol, BrowserEvent::Remove, item));
        }
        for (interface, protocol, item) in current {
            events.extend(self.apply(interface, protocol, BrowserEvent::New, item));
        }
        events
    }
}

/// Per-kind matching logic.
pub(crate) trait Subscription {
    /// Keys to query for when the browser is attached.
    fn keys(&self) -> Vec<Key>;

    fn on_change(
        &mut self,
        cache: &Cache,
        scope: &Scope,
        change: &RecordChange<'_>,
        effects: &mut Effects,
    );

    /// Called when a resolver's deadline passes.
    fn on_deadline(&mut self, _effects: &mut Effects) {}

    fn is_resolver(&self) -> bool {
        false
    }
}

pub(crate) enum BrowserKind {
    Record(RecordBrowser),
    HostName(HostNameResolver),
    Address(AddressResolver),
    Domain(DomainBrowser),
    ServiceType(ServiceTypeBrowser),
    Service(ServiceBrowser),
    ServiceResolver(ServiceResolver),
    DnsServer(DnsServerBrowser),
}

impl BrowserKind {
    fn subscription(&mut self) -> &mut dyn Subscription {
        match self {
            BrowserKind::Record(b) => b,
            BrowserKind::HostName(b) => b,
            BrowserKind::Address(b) => b,
            BrowserKind::Domain(b) => b,
            BrowserKind::ServiceType(b) => b,
            BrowserKind::Service(b) => b,
            BrowserKind::ServiceResolver(b) => b,
            BrowserKind::DnsServer(b) => b,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            BrowserKind::Record(_) => "record browser",
            BrowserKind::HostName(_) => "host name resolver",
            BrowserKind::Address(_) => "address resolver",
            BrowserKind::Domain(_) => "domain browser",
            BrowserKind::ServiceType(_) => "service type browser",
            BrowserKind::Service(_) => "service browser",
            BrowserKind::ServiceResolver(_) => "service resolver",
            BrowserKind::DnsServer(_) => "DNS server browser",
        }
    }
}

pub(crate) struct Browser {
    pub(crate) scope: Scope,
    pub(crate) kind: BrowserKind,
    /// `None` while the listener is running.
    pub(crate) listener: Option<ListenerBox>,
    /// Keys this browser holds a query reference on.
    pub(crate) subscriptions: Vec<Key>,
    /// A resolver that has produced its outcome and awaits delivery.
    pub(crate) finished: bool,
}

/// Address-record keys for `host`, restricted to `aprotocol` if given.
pub(crate) fn address_keys(host: &str, aprotocol: Option<Protocol>) -> Vec<Key> {
    use crate::record::{TYPE_A, TYPE_AAAA};

    match aprotocol {
        Some(Protocol::Inet) => vec![Key::in_class(host, TYPE_A)],
        Some(Protocol::Inet6) => vec![Key::in_class(host, TYPE_AAAA)],
        None => vec![Key::in_class(host, TYPE_A), Key::in_class(host, TYPE_AAAA)],
    }
}

impl Server {
    /// Attaches a new browser, queries for its keys and replays the cache.
    pub(crate) fn browser_attach(
        &mut self,
        scope: Scope,
        mut kind: BrowserKind,
        listener: ListenerBox,
    ) -> Result<BrowserId, Error> {
        if self.state == ServerState::Stopped {
            return Err(Error::InvalidState("server is stopped".into()));
        }

        let id = BrowserId(self.allocate_id());
        let keys = kind.subscription().keys();
        for key in &keys {
            self.query_ref(scope, key);
        }
        let is_resolver = kind.subscription().is_resolver();
        debug!(browser = %id, kind = kind.name(), %scope, "browser attached");

        self.browsers.insert(
            id,
            Browser {
                scope,
                kind,
                listener: Some(listener),
                subscriptions: keys,
                finished: false,
            },
        );

        let mut effects = Effects::default();
        if let Some(browser) = self.browsers.get_mut(&id) {
            for entry in self
                .cache
                .iter()
                .filter(|e| scope.matches(e.interface, e.protocol))
            {
                let change = RecordChange {
                    interface: entry.interface,
                    protocol: entry.protocol,
                    record: &entry.record,
                    event: BrowserEvent::New,
                };
                browser
                    .kind
                    .subscription()
                    .on_change(&self.cache, &scope, &change, &mut effects);
            }
        }
        let finished = effects.finished;
        self.apply_effects(id, effects);

        if is_resolver && !finished {
            let at = Instant::now() + self.config.resolver_timeout();
            self.timers.schedule(at, Timeout::ResolverDeadline(id));
        }

        self.dispatch();
        Ok(id)
    }

    /// Detaches a browser. Events already queued for it are dropped.
    /// Freeing an unknown or already freed browser does nothing.
    pub fn browser_free(&mut self, id: BrowserId) {
        let Some(browser) = self.browsers.remove(&id) else {
            return;
        };
        debug!(browser = %id, kind = browser.kind.name(), "browser freed");
        for key in &browser.subscriptions {
            self.query_unref(browser.scope, key);
        }
    }

    /// Returns true if `id` is still attached.
    pub fn browser_is_live(&self, id: BrowserId) -> bool {
        self.browsers.contains_key(&id)
    }

    /// Feeds one cache change to every browser whose scope covers it.
    pub(crate) fn notify_browsers(
        &mut self,
        interface: InterfaceIndex,
        protocol: Protocol,
        record: &Record,
        event: BrowserEvent,
    ) {
        let change = RecordChange {
            interface,
            protocol,
            record,
            event,
        };

        let mut pending = Vec::new();
        for (id, browser) in self.browsers.iter_mut() {
            if browser.finished || !browser.scope.matches(interface, protocol) {
                continue;
            }
            let mut effects = Effects::default();
            browser
                .kind
                .subscription()
                .on_change(&self.cache, &browser.scope, &change, &mut effects);
            if !effects.is_empty() {
                pending.push((*id, effects));
            }
        }

        for (id, effects) in pending {
            self.apply_effects(id, effects);
        }
    }

    pub(crate) fn resolver_deadline(&mut self, id: BrowserId) {
        let mut effects = Effects::default();
        match self.browsers.get_mut(&id) {
            Some(browser) if !browser.finished => {
                debug!(browser = %id, kind = browser.kind.name(), "resolver timed out");
                browser.kind.subscription().on_deadline(&mut effects);
            }
            _ => return,
        }
        self.apply_effects(id, effects);
    }

    fn apply_effects(&mut self, id: BrowserId, effects: Effects) {
        let Some(browser) = self.browsers.get_mut(&id) else {
            return;
        };
        let scope = browser.scope;

        let mut fresh = Vec::new();
        for key in effects.queries {
            if !browser.subscriptions.contains(&key) {
                browser.subscriptions.push(key.clone());
                fresh.push(key);
            }
        }

        let released = if effects.finished {
            browser.finished = true;
            std::mem::take(&mut browser.subscriptions)
        } else {
            let mut released = Vec::new();
            for key in effects.released {
                if let Some(at) = browser.subscriptions.iter().position(|k| k == &key) {
                    released.push(browser.subscriptions.swap_remove(at));
                }
            }
            released
        };

        for key in &fresh {
            self.query_ref(scope, key);
        }
        for key in &released {
            self.query_unref(scope, key);
        }
        for delivery in effects.deliveries {
            self.pending.push_back(Pending::Browse(id, delivery));
        }
    }

    /// Takes a query reference; the first one starts the query.
    pub(crate) fn query_ref(&mut self, scope: Scope, key: &Key) {
        let count = self.queries.entry((scope, key.clone())).or_insert(0);
        *count += 1;
        if *count == 1 {
            self.transport.query(scope, key);
        }
    }

    /// Drops a query reference; the last one cancels the query.
    pub(crate) fn query_unref(&mut self, scope: Scope, key: &Key) {
        let map_key = (scope, key.clone());
        let Some(count) = self.queries.get_mut(&map_key) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            self.queries.remove(&map_key);
            self.transport.cancel_query(scope, key);
        }
    }
}
