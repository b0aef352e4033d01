//! The responder: owns the host name, entry groups, browsers and the cache.
//!
//! Everything runs on the caller's thread. Mutations queue their listener
//! notifications, and the queue is drained at the end of the outermost API
//! call. Listeners get `&mut Server` and may call back into it freely;
//! nested calls only add to the queue.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::Error;
use crate::browse::{Browser, BrowserEvent, BrowserId, Delivery};
use crate::cache::{Cache, CacheUpdate};
use crate::config::{ServerConfig, default_host_name};
use crate::domain;
use crate::entry_group::{Entry, EntryGroup, EntryGroupState, GroupId};
use crate::record::{Key, Record, RecordData, TYPE_A, TYPE_AAAA};
use crate::scope::{InterfaceIndex, Protocol, Scope};
use crate::timer::{Timeout, TimerQueue};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerState {
    /// Waiting for the transport to come up.
    Starting,
    Running,
    /// Another host claims our host name; call [`Server::set_host_name`].
    Collision,
    /// Probing a new host name.
    Registering,
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Collision => "collision",
            ServerState::Registering => "registering",
            ServerState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Receives server state changes.
pub trait ServerListener {
    fn on_state(&mut self, server: &mut Server, state: ServerState);
}

impl<F> ServerListener for F
where
    F: FnMut(&mut Server, ServerState),
{
    fn on_state(&mut self, server: &mut Server, state: ServerState) {
        self(server, state)
    }
}

/// A listener notification waiting to be delivered.
pub(crate) enum Pending {
    Server(ServerState),
    Group(GroupId, EntryGroupState),
    Browse(BrowserId, Delivery),
}

pub struct Server {
    pub(crate) config: ServerConfig,
    pub(crate) state: ServerState,
    host_name: String,
    host_name_fqdn: String,
    domain: String,
    pub(crate) transport: Box<dyn Transport>,
    listener: Option<Box<dyn ServerListener>>,
    /// The internal group carrying our address and HINFO records.
    pub(crate) host_group: Option<GroupId>,
    pub(crate) groups: BTreeMap<GroupId, EntryGroup>,
    pub(crate) browsers: BTreeMap<BrowserId, Browser>,
    pub(crate) cache: Cache,
    pub(crate) timers: TimerQueue,
    /// Reference counts of active queries.
    pub(crate) queries: HashMap<(Scope, Key), usize>,
    pub(crate) pending: VecDeque<Pending>,
    dispatching: bool,
    next_id: u64,
}

impl Server {
    /// Creates a server in the Starting state and opens the transport.
    ///
    /// Call [`Server::transport_ready`] once the sockets are usable.
    pub fn new(
        config: ServerConfig,
        transport: impl Transport + 'static,
        listener: impl ServerListener + 'static,
    ) -> Result<Self, Error> {
        config.validate()?;
        let mut transport: Box<dyn Transport> = Box::new(transport);
        transport.open()?;

        let host_name = config.host_name.clone().unwrap_or_else(default_host_name);
        let domain = domain::normalize(&config.domain);
        let host_name_fqdn = domain::join(&[&domain::escape_label(&host_name), &domain]);
        info!(host = %host_name_fqdn, "server starting");

        Ok(Self {
            cache: Cache::new(config.cache_entries_max),
            config,
            state: ServerState::Starting,
            host_name,
            host_name_fqdn,
            domain,
            transport,
            listener: Some(Box::new(listener)),
            host_group: None,
            groups: BTreeMap::new(),
            browsers: BTreeMap::new(),
            timers: TimerQueue::default(),
            queries: HashMap::new(),
            pending: VecDeque::new(),
            dispatching: false,
            next_id: 0,
        })
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// The host name label, without domain.
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn host_name_fqdn(&self) -> &str {
        &self.host_name_fqdn
    }

    pub fn domain_name(&self) -> &str {
        &self.domain
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Moves from Starting to Running, publishes the host records and starts
    /// probing for groups committed in the meantime.
    pub fn transport_ready(&mut self) -> Result<(), Error> {
        if self.state != ServerState::Starting {
            return Err(Error::InvalidState(format!(
                "transport ready while {}",
                self.state
            )));
        }
        self.set_server_state(ServerState::Running);
        self.publish_host_records();
        self.start_deferred_probes();
        self.dispatch();
        Ok(())
    }

    /// Picks a new host name after a collision.
    ///
    /// Every local record naming the old FQDN is re-derived, committed groups
    /// are probed again and the server goes through Registering back to
    /// Running.
    pub fn set_host_name(&mut self, host_name: &str) -> Result<(), Error> {
        if self.state != ServerState::Collision {
            return Err(Error::InvalidState(format!(
                "host name can only change after a collision, server is {}",
                self.state
            )));
        }
        if !domain::is_valid_host_name(host_name) {
            return Err(Error::InvalidHostName(host_name.to_string()));
        }

        let old = std::mem::take(&mut self.host_name_fqdn);
        self.host_name = host_name.to_string();
        self.host_name_fqdn = domain::join(&[&domain::escape_label(host_name), &self.domain]);
        info!(old = %old, new = %self.host_name_fqdn, "host name changed");

        let new = self.host_name_fqdn.clone();
        self.rename_host_records(&old, &new);
        self.set_server_state(ServerState::Registering);
        self.publish_host_records();
        self.dispatch();
        Ok(())
    }

    /// Withdraws everything and stops. Later mutating calls fail with
    /// [`Error::InvalidState`]. Calling it again does nothing.
    pub fn shutdown(&mut self) {
        if self.state == ServerState::Stopped {
            return;
        }
        info!(host = %self.host_name_fqdn, "server shutting down");
        self.teardown();
        self.pending.clear();
        self.set_server_state(ServerState::Stopped);
        self.dispatch();
    }

    /// Feeds a record received on `(interface, protocol)`. A zero TTL is a
    /// goodbye.
    pub fn handle_record(&mut self, interface: InterfaceIndex, protocol: Protocol, record: Record) {
        if self.state == ServerState::Stopped {
            return;
        }
        if record.is_goodbye() {
            self.remove_cached(interface, protocol, &record);
        } else {
            self.check_conflicts(interface, protocol, &record);
            match self
                .cache
                .update(interface, protocol, record.clone(), Instant::now())
            {
                CacheUpdate::Inserted => {
                    self.notify_browsers(interface, protocol, &record, BrowserEvent::New)
                }
                CacheUpdate::Refreshed => {}
                CacheUpdate::Rejected => {
                    warn!(record = %record, max = self.config.cache_entries_max, "cache full, record dropped")
                }
            }
        }
        self.dispatch();
    }

    /// Forgets a record the transport reports as gone.
    pub fn handle_withdrawn(&mut self, interface: InterfaceIndex, protocol: Protocol, record: &Record) {
        if self.state == ServerState::Stopped {
            return;
        }
        self.remove_cached(interface, protocol, record);
        self.dispatch();
    }

    /// The earliest pending deadline, for the reactor to sleep until.
    pub fn next_timeout(&self) -> Option<Instant> {
        match (self.timers.next_deadline(), self.cache.next_expiry()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Runs every timer that is due and expires stale cache entries.
    pub fn process_timeouts(&mut self) {
        if self.state == ServerState::Stopped {
            return;
        }
        let now = Instant::now();
        while let Some(timeout) = self.timers.pop_due(now) {
            match timeout {
                Timeout::ProbeComplete { group, generation } => {
                    self.probe_complete(group, generation)
                }
                Timeout::ResolverDeadline(id) => self.resolver_deadline(id),
            }
        }
        for entry in self.cache.expire(now) {
            debug!(record = %entry.record, "cache entry expired");
            self.notify_browsers(entry.interface, entry.protocol, &entry.record, BrowserEvent::Remove);
        }
        self.dispatch();
    }

    /// Describes every local and cached record, one line each.
    pub fn dump(&self) -> impl Iterator<Item = String> + '_ {
        let header = std::iter::once(format!(
            ";;; {} ({}), {} cached",
            self.host_name_fqdn,
            self.state,
            self.cache.len()
        ));
        let local = self.groups.iter().flat_map(move |(id, group)| {
            let owner = if self.host_group == Some(*id) {
                "host".to_string()
            } else {
                id.to_string()
            };
            group.entries.iter().map(move |entry| {
                format!(
                    "{} ; local {} ; {} {}",
                    entry.record, entry.scope, owner, group.state
                )
            })
        });
        let cached = self.cache.iter().map(|entry| {
            format!(
                "{} ; cached {}.{}",
                entry.record, entry.interface, entry.protocol
            )
        });
        header.chain(local).chain(cached)
    }

    /// Writes [`Server::dump`] into `sink`.
    pub fn dump_to(&self, mut sink: impl FnMut(&str)) {
        for line in self.dump() {
            sink(&line);
        }
    }

    pub(crate) fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub(crate) fn ensure_not_stopped(&self) -> Result<(), Error> {
        if self.state == ServerState::Stopped {
            return Err(Error::InvalidState("server is stopped".into()));
        }
        Ok(())
    }

    /// Delivers queued notifications until the queue is empty.
    ///
    /// A listener is taken out of its slot while it runs and put back only
    /// if its object still exists, so it may free itself.
    pub(crate) fn dispatch(&mut self) {
        if self.dispatching {
            return;
        }
        self.dispatching = true;
        while let Some(pending) = self.pending.pop_front() {
            match pending {
                Pending::Server(state) => {
                    let Some(mut listener) = self.listener.take() else {
                        continue;
                    };
                    listener.on_state(self, state);
                    self.listener.get_or_insert(listener);
                }
                Pending::Group(id, state) => {
                    let Some(mut listener) = self.groups.get_mut(&id).and_then(|g| g.listener.take())
                    else {
                        continue;
                    };
                    listener.on_state(self, id, state);
                    if let Some(group) = self.groups.get_mut(&id) {
                        group.listener = Some(listener);
                    }
                }
                Pending::Browse(id, delivery) => {
                    let last = delivery.is_final();
                    let Some(mut listener) =
                        self.browsers.get_mut(&id).and_then(|b| b.listener.take())
                    else {
                        continue;
                    };
                    listener.deliver(self, id, delivery);
                    if last {
                        self.browsers.remove(&id);
                    } else if let Some(browser) = self.browsers.get_mut(&id) {
                        browser.listener = Some(listener);
                    }
                }
            }
        }
        self.dispatching = false;
    }

    fn set_server_state(&mut self, state: ServerState) {
        if self.state == state {
            return;
        }
        info!(from = %self.state, to = %state, host = %self.host_name_fqdn, "server state changed");
        self.state = state;
        self.pending.push_back(Pending::Server(state));
    }

    /// Reacts to the host group's own state machine.
    pub(crate) fn host_group_changed(&mut self, state: EntryGroupState) {
        match state {
            EntryGroupState::Established if self.state == ServerState::Registering => {
                self.set_server_state(ServerState::Running);
                self.start_deferred_probes();
            }
            EntryGroupState::Collision => self.enter_collision(),
            _ => {}
        }
    }

    fn enter_collision(&mut self) {
        if !matches!(self.state, ServerState::Running | ServerState::Registering) {
            return;
        }
        warn!(host = %self.host_name_fqdn, "host name conflict");
        if let Some(id) = self.host_group.take() {
            self.withdraw_group(id);
            self.groups.remove(&id);
        }
        self.set_server_state(ServerState::Collision);
    }

    fn publish_host_records(&mut self) {
        let scope = Scope::ANY;
        let fqdn = self.host_name_fqdn.clone();
        let mut entries = Vec::new();
        if self.config.publish_addresses {
            for address in self.config.addresses.clone() {
                match self.address_entries(scope, &fqdn, address) {
                    Ok(more) => entries.extend(more),
                    Err(e) => warn!(%address, error = %e, "cannot publish address"),
                }
            }
        }
        if self.config.publish_hinfo {
            let hinfo = RecordData::Hinfo {
                cpu: std::env::consts::ARCH.to_uppercase(),
                os: std::env::consts::OS.to_uppercase(),
            };
            entries.push(Entry::new(scope, Record::new(&fqdn, self.config.host_ttl, hinfo)));
        }
        debug!(host = %fqdn, records = entries.len(), "publishing host records");
        self.install_host_group(entries);
    }

    fn start_deferred_probes(&mut self) {
        let deferred: Vec<GroupId> = self
            .groups
            .iter()
            .filter(|(_, g)| g.pending_probe)
            .map(|(id, _)| *id)
            .collect();
        for id in deferred {
            self.start_probe(id);
        }
    }

    fn check_conflicts(&mut self, interface: InterfaceIndex, protocol: Protocol, record: &Record) {
        let collided: Vec<GroupId> = self
            .groups
            .iter()
            .filter(|(_, g)| g.conflicts_with(interface, protocol, record))
            .map(|(id, _)| *id)
            .collect();
        for id in collided {
            warn!(group = %id, record = %record, "conflicting remote record");
            self.set_group_state(id, EntryGroupState::Collision);
        }

        let claims_host = matches!(record.rtype(), TYPE_A | TYPE_AAAA)
            && domain::names_equal(record.name(), &self.host_name_fqdn);
        if claims_host {
            let published = self
                .host_group
                .and_then(|id| self.groups.get(&id))
                .is_some_and(|g| g.has_key(record));
            if !published {
                warn!(record = %record, "remote host claims our name");
                self.enter_collision();
            }
        }
    }

    fn remove_cached(&mut self, interface: InterfaceIndex, protocol: Protocol, record: &Record) {
        if let Some(entry) = self.cache.remove(interface, protocol, record) {
            self.notify_browsers(interface, protocol, &entry.record, BrowserEvent::Remove);
        }
    }

    /// Withdraws all groups and cancels all queries.
    fn teardown(&mut self) {
        let ids: Vec<GroupId> = self.groups.keys().copied().collect();
        for id in ids {
            self.withdraw_group(id);
        }
        self.groups.clear();
        self.host_group = None;

        for ((scope, key), _) in std::mem::take(&mut self.queries) {
            self.transport.cancel_query(scope, &key);
        }
        self.browsers.clear();
        self.timers.clear();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("state", &self.state)
            .field("host_name_fqdn", &self.host_name_fqdn)
            .field("groups", &self.groups.len())
            .field("browsers", &self.browsers.len())
            .field("cached", &self.cache.len())
            .finish()
    }
}
