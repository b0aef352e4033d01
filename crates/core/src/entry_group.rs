//! Entry groups: sets of local records published and withdrawn together.
//!
//! A group is filled while Uncommitted, then committed. Committing announces
//! every record and starts probing; if nobody on the link objects before the
//! probe period ends the group becomes Established. A conflicting unique
//! record from another host moves it to Collision instead. The records stay
//! in place until the owner resets or frees the group.

use std::fmt;
use std::net::IpAddr;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::Error;
use crate::browse::DnsServerKind;
use crate::domain;
use crate::record::{Record, RecordData, TxtList};
use crate::scope::{InterfaceIndex, Protocol, Scope};
use crate::server::{Pending, Server, ServerState};
use crate::timer::Timeout;

/// Handle to an entry group owned by a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryGroupState {
    Uncommitted,
    Registering,
    Established,
    Collision,
    /// Records could not be re-derived after a host rename.
    Failure,
}

impl fmt::Display for EntryGroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryGroupState::Uncommitted => "uncommitted",
            EntryGroupState::Registering => "registering",
            EntryGroupState::Established => "established",
            EntryGroupState::Collision => "collision",
            EntryGroupState::Failure => "failure",
        };
        f.write_str(s)
    }
}

/// Receives state changes of an entry group.
pub trait EntryGroupListener {
    fn on_state(&mut self, server: &mut Server, group: GroupId, state: EntryGroupState);
}

impl<F> EntryGroupListener for F
where
    F: FnMut(&mut Server, GroupId, EntryGroupState),
{
    fn on_state(&mut self, server: &mut Server, group: GroupId, state: EntryGroupState) {
        self(server, group, state)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) scope: Scope,
    pub(crate) record: Record,
    /// Unique entries conflict with differing remote data for their key.
    pub(crate) unique: bool,
}

impl Entry {
    pub(crate) fn new(scope: Scope, record: Record) -> Self {
        let unique = !record.is_shared();
        Self {
            scope,
            record,
            unique,
        }
    }

    fn shared(scope: Scope, record: Record) -> Self {
        Self {
            scope,
            record,
            unique: false,
        }
    }

    /// Full equality: same scope and same record (TTL aside).
    fn same_as(&self, other: &Entry) -> bool {
        self.scope == other.scope && self.record == other.record
    }
}

pub(crate) struct EntryGroup {
    pub(crate) state: EntryGroupState,
    pub(crate) entries: Vec<Entry>,
    /// `None` for the server's own host group and while the listener runs.
    pub(crate) listener: Option<Box<dyn EntryGroupListener>>,
    /// Bumped whenever probing restarts, to drop stale probe timers.
    pub(crate) generation: u64,
    /// Records are currently on the wire.
    pub(crate) announced: bool,
    /// Committed while the server was not running; probe once it is.
    pub(crate) pending_probe: bool,
}

impl EntryGroup {
    pub(crate) fn new(listener: Option<Box<dyn EntryGroupListener>>) -> Self {
        Self {
            state: EntryGroupState::Uncommitted,
            entries: Vec::new(),
            listener,
            generation: 0,
            announced: false,
            pending_probe: false,
        }
    }

    fn contains(&self, entry: &Entry) -> bool {
        self.entries.iter().any(|e| e.same_as(entry))
    }

    pub(crate) fn has_key(&self, record: &Record) -> bool {
        self.entries.iter().any(|e| e.record.key() == record.key())
    }

    /// True if a remote `record` seen on `(interface, protocol)` contradicts
    /// one of this group's unique entries.
    pub(crate) fn conflicts_with(
        &self,
        interface: InterfaceIndex,
        protocol: Protocol,
        record: &Record,
    ) -> bool {
        if !matches!(
            self.state,
            EntryGroupState::Registering | EntryGroupState::Established
        ) {
            return false;
        }
        let mut claimed = false;
        for entry in &self.entries {
            if entry.record.key() != record.key() || !entry.scope.matches(interface, protocol) {
                continue;
            }
            if entry.record.data().equivalent(record.data()) {
                return false;
            }
            claimed |= entry.unique;
        }
        claimed
    }
}

impl Server {
    /// Creates an empty, uncommitted entry group.
    pub fn entry_group_new(
        &mut self,
        listener: impl EntryGroupListener + 'static,
    ) -> Result<GroupId, Error> {
        self.ensure_not_stopped()?;
        let id = GroupId(self.allocate_id());
        self.groups
            .insert(id, EntryGroup::new(Some(Box::new(listener))));
        debug!(group = %id, "entry group created");
        Ok(id)
    }

    /// Adds one record to an uncommitted or registering group.
    pub fn entry_group_add_record(
        &mut self,
        group: GroupId,
        interface: Option<InterfaceIndex>,
        protocol: Option<Protocol>,
        record: Record,
    ) -> Result<(), Error> {
        let entry = Entry::new(Scope::new(interface, protocol), record);
        self.group_add_entries(group, vec![entry])
    }

    /// Adds the PTR, SRV and TXT records of a DNS-SD service, plus the
    /// service-type enumeration PTR if the group does not carry it yet.
    ///
    /// `host` defaults to the server's FQDN and `domain` to its domain. An
    /// empty TXT list is published as a single empty string.
    #[allow(clippy::too_many_arguments)]
    pub fn entry_group_add_service(
        &mut self,
        group: GroupId,
        interface: Option<InterfaceIndex>,
        protocol: Option<Protocol>,
        name: &str,
        service_type: &str,
        domain: Option<&str>,
        host: Option<&str>,
        port: u16,
        txt: TxtList,
    ) -> Result<(), Error> {
        let domain = self.browse_domain(domain)?;
        let full_name = domain::service_name_join(name, service_type, &domain)?;
        let type_domain = domain::join(&[service_type, domain.as_str()]);
        let target = match host {
            Some(h) if !domain::is_valid_domain_name(h) => {
                return Err(Error::InvalidHostName(h.to_string()));
            }
            Some(h) => domain::normalize(h),
            None => self.host_name_fqdn().to_string(),
        };
        let txt = if txt.is_empty() {
            TxtList::from_strings([""])
        } else {
            txt
        };

        let scope = Scope::new(interface, protocol);
        let service_ttl = self.config.service_ttl;
        let host_ttl = self.config.host_ttl;
        let mut entries = vec![
            Entry::new(
                scope,
                Record::new(&type_domain, service_ttl, RecordData::Ptr(full_name.clone())),
            ),
            Entry::new(
                scope,
                Record::new(
                    &full_name,
                    host_ttl,
                    RecordData::Srv {
                        priority: 0,
                        weight: 0,
                        port,
                        target,
                    },
                ),
            ),
            Entry::new(scope, Record::new(&full_name, service_ttl, RecordData::Txt(txt))),
        ];

        let enumeration = Entry::new(
            scope,
            Record::new(
                &format!("_services._dns-sd._udp.{domain}"),
                service_ttl,
                RecordData::Ptr(type_domain),
            ),
        );
        let known = self
            .groups
            .get(&group)
            .is_some_and(|g| g.contains(&enumeration));
        if !known {
            entries.push(enumeration);
        }

        self.group_add_entries(group, entries)
    }

    /// Adds an A/AAAA record for `name` and the matching reverse PTR.
    pub fn entry_group_add_address(
        &mut self,
        group: GroupId,
        interface: Option<InterfaceIndex>,
        protocol: Option<Protocol>,
        name: &str,
        address: IpAddr,
    ) -> Result<(), Error> {
        let entries = self.address_entries(Scope::new(interface, protocol), name, address)?;
        self.group_add_entries(group, entries)
    }

    /// Advertises a unicast DNS server at `address`.
    ///
    /// The server gets a synthetic host name (`ip-192-168-50-1.<domain>`)
    /// with its own address records, and a shared SRV record under
    /// `_domain._udp` or `_dns-update._udp`.
    #[allow(clippy::too_many_arguments)]
    pub fn entry_group_add_dns_server_address(
        &mut self,
        group: GroupId,
        interface: Option<InterfaceIndex>,
        protocol: Option<Protocol>,
        domain: Option<&str>,
        kind: DnsServerKind,
        address: IpAddr,
        port: u16,
    ) -> Result<(), Error> {
        let domain = self.browse_domain(domain)?;
        let host = match address {
            IpAddr::V4(v4) => format!("ip-{}.{domain}", v4.to_string().replace('.', "-")),
            IpAddr::V6(v6) => format!("ip6-{}.{domain}", v6.to_string().replace(':', "-")),
        };

        let scope = Scope::new(interface, protocol);
        let existing = self.groups.get(&group);
        let mut entries: Vec<Entry> = self
            .address_entries(scope, &host, address)?
            .into_iter()
            .filter(|e| !existing.is_some_and(|g| g.contains(e)))
            .collect();
        entries.push(Entry::shared(
            scope,
            Record::new(
                &format!("{}.{domain}", kind.service_type()),
                self.config.host_ttl,
                RecordData::Srv {
                    priority: 0,
                    weight: 0,
                    port,
                    target: host,
                },
            ),
        ));

        self.group_add_entries(group, entries)
    }

    /// Announces the group's records and starts probing.
    ///
    /// Only legal while Uncommitted. Committing an empty group is allowed.
    pub fn entry_group_commit(&mut self, group: GroupId) -> Result<(), Error> {
        self.ensure_not_stopped()?;
        let g = self.user_group_mut(group)?;
        if g.state != EntryGroupState::Uncommitted {
            return Err(Error::InvalidState(format!(
                "cannot commit {group} while {}",
                g.state
            )));
        }

        self.set_group_state(group, EntryGroupState::Registering);
        if self.state == ServerState::Running {
            self.start_probe(group);
        } else if let Some(g) = self.groups.get_mut(&group) {
            debug!(group = %group, server = ?self.state, "server not running; probe deferred");
            g.pending_probe = true;
        }
        self.dispatch();
        Ok(())
    }

    /// Withdraws and clears the group's records and returns it to
    /// Uncommitted. Legal in every state.
    pub fn entry_group_reset(&mut self, group: GroupId) -> Result<(), Error> {
        self.ensure_not_stopped()?;
        self.user_group_mut(group)?;
        self.withdraw_group(group);
        if let Some(g) = self.groups.get_mut(&group) {
            g.entries.clear();
            g.generation += 1;
            g.pending_probe = false;
        }
        self.set_group_state(group, EntryGroupState::Uncommitted);
        self.dispatch();
        Ok(())
    }

    /// Withdraws the group's records and drops it with its listener.
    /// Freeing an unknown or already freed group does nothing.
    pub fn entry_group_free(&mut self, group: GroupId) {
        if self.host_group == Some(group) || !self.groups.contains_key(&group) {
            return;
        }
        self.withdraw_group(group);
        self.groups.remove(&group);
        debug!(group = %group, "entry group freed");
    }

    pub fn entry_group_state(&self, group: GroupId) -> Result<EntryGroupState, Error> {
        self.user_group(group).map(|g| g.state)
    }

    pub fn entry_group_is_empty(&self, group: GroupId) -> Result<bool, Error> {
        self.user_group(group).map(|g| g.entries.is_empty())
    }

    fn user_group(&self, group: GroupId) -> Result<&EntryGroup, Error> {
        match self.groups.get(&group) {
            Some(g) if self.host_group != Some(group) => Ok(g),
            _ => Err(Error::NotFound(group.to_string())),
        }
    }

    fn user_group_mut(&mut self, group: GroupId) -> Result<&mut EntryGroup, Error> {
        match self.groups.get_mut(&group) {
            Some(g) if self.host_group != Some(group) => Ok(g),
            _ => Err(Error::NotFound(group.to_string())),
        }
    }

    pub(crate) fn address_entries(
        &self,
        scope: Scope,
        name: &str,
        address: IpAddr,
    ) -> Result<Vec<Entry>, Error> {
        if !domain::is_valid_domain_name(name) {
            return Err(Error::InvalidDomainName(name.to_string()));
        }
        let ttl = self.config.host_ttl;
        let reverse = domain::reverse_lookup_name(&address);
        Ok(vec![
            Entry::new(scope, Record::new(name, ttl, RecordData::address(address))),
            Entry::new(scope, Record::new(&reverse, ttl, RecordData::Ptr(name.to_string()))),
        ])
    }

    /// Validates and appends entries, all or nothing.
    fn group_add_entries(&mut self, group: GroupId, entries: Vec<Entry>) -> Result<(), Error> {
        self.ensure_not_stopped()?;
        let g = self.user_group(group)?;
        if !matches!(
            g.state,
            EntryGroupState::Uncommitted | EntryGroupState::Registering
        ) {
            return Err(Error::InvalidState(format!(
                "cannot add records to {group} while {}",
                g.state
            )));
        }
        for (i, entry) in entries.iter().enumerate() {
            entry.record.validate()?;
            if g.contains(entry) || entries[..i].iter().any(|e| e.same_as(entry)) {
                return Err(Error::Duplicate(entry.record.to_string()));
            }
        }

        let announced = g.announced;
        if announced {
            for entry in &entries {
                self.transport.announce(entry.scope, &entry.record);
            }
        }
        let mut probing = false;
        if let Some(g) = self.groups.get_mut(&group) {
            g.entries.extend(entries);
            probing = g.state == EntryGroupState::Registering && !g.pending_probe;
        }
        if probing && self.cached_conflict(group) {
            warn!(group = %group, "added record conflicts with a cached one");
            self.set_group_state(group, EntryGroupState::Collision);
            self.dispatch();
        }
        Ok(())
    }

    /// Whether a cached remote record contradicts one of the group's.
    fn cached_conflict(&self, group: GroupId) -> bool {
        let Some(g) = self.groups.get(&group) else {
            return false;
        };
        self.cache
            .iter()
            .any(|c| g.conflicts_with(c.interface, c.protocol, &c.record))
    }

    /// Announces a group, checks the cache for contradicting records and
    /// schedules probe completion.
    pub(crate) fn start_probe(&mut self, group: GroupId) {
        let Some(g) = self.groups.get_mut(&group) else {
            return;
        };
        g.pending_probe = false;
        g.generation += 1;
        let generation = g.generation;
        if !g.announced {
            for entry in &g.entries {
                self.transport.announce(entry.scope, &entry.record);
            }
            g.announced = true;
        }

        if self.cached_conflict(group) {
            warn!(group = %group, "conflicting record already cached");
            self.set_group_state(group, EntryGroupState::Collision);
            return;
        }

        let at = Instant::now() + self.config.probe_duration();
        self.timers
            .schedule(at, Timeout::ProbeComplete { group, generation });
    }

    pub(crate) fn probe_complete(&mut self, group: GroupId, generation: u64) {
        let current = self
            .groups
            .get(&group)
            .is_some_and(|g| g.generation == generation && g.state == EntryGroupState::Registering);
        if current {
            self.set_group_state(group, EntryGroupState::Established);
        }
    }

    /// Sends goodbyes for an announced group.
    pub(crate) fn withdraw_group(&mut self, group: GroupId) {
        let Some(g) = self.groups.get_mut(&group) else {
            return;
        };
        if !g.announced {
            return;
        }
        for entry in &g.entries {
            self.transport.withdraw(entry.scope, &entry.record);
        }
        g.announced = false;
    }

    /// Replaces the host group with a fresh one holding `entries` and starts
    /// probing it. The host group has no listener and never shows up in the
    /// public API.
    pub(crate) fn install_host_group(&mut self, entries: Vec<Entry>) {
        if let Some(old) = self.host_group.take() {
            self.withdraw_group(old);
            self.groups.remove(&old);
        }
        let id = GroupId(self.allocate_id());
        let mut group = EntryGroup::new(None);
        for entry in entries {
            if !group.contains(&entry) {
                group.entries.push(entry);
            }
        }
        group.state = EntryGroupState::Registering;
        self.groups.insert(id, group);
        self.host_group = Some(id);
        self.start_probe(id);
    }

    /// Points every user record that names host `old` at `new`.
    ///
    /// Touched groups are withdrawn. Live ones go back to Registering and
    /// probe again once the server runs; a group whose renamed records no
    /// longer validate fails.
    pub(crate) fn rename_host_records(&mut self, old: &str, new: &str) {
        let ids: Vec<GroupId> = self
            .groups
            .keys()
            .copied()
            .filter(|id| Some(*id) != self.host_group)
            .collect();
        for id in ids {
            let Some(g) = self.groups.get(&id) else {
                continue;
            };
            let renamed: Vec<Option<Record>> = g
                .entries
                .iter()
                .map(|e| e.record.rename_host(old, new))
                .collect();
            if renamed.iter().all(Option::is_none) {
                continue;
            }
            let invalid = renamed.iter().flatten().any(|r| r.validate().is_err());
            let live = matches!(
                g.state,
                EntryGroupState::Registering | EntryGroupState::Established
            );

            self.withdraw_group(id);
            if let Some(g) = self.groups.get_mut(&id) {
                for (entry, record) in g.entries.iter_mut().zip(renamed) {
                    if let Some(record) = record {
                        entry.record = record;
                    }
                }
                g.generation += 1;
                g.pending_probe = live && !invalid;
            }
            debug!(group = %id, old, new, "host records renamed");
            if invalid {
                warn!(group = %id, "renamed records are invalid");
                self.set_group_state(id, EntryGroupState::Failure);
            } else if live {
                self.set_group_state(id, EntryGroupState::Registering);
            }
        }
    }

    pub(crate) fn set_group_state(&mut self, group: GroupId, state: EntryGroupState) {
        let Some(g) = self.groups.get_mut(&group) else {
            return;
        };
        if g.state == state {
            return;
        }
        debug!(group = %group, from = %g.state, to = %state, "entry group state changed");
        g.state = state;
        if self.host_group == Some(group) {
            self.host_group_changed(state);
        } else {
            self.pending.push_back(Pending::Group(group, state));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    use crate::record::{TYPE_PTR, TYPE_SRV, TYPE_TXT};
    use crate::testing::{a, running_server, starting_server};
    use crate::transport::TransportOp;

    use super::*;

    type States = Rc<RefCell<Vec<EntryGroupState>>>;

    fn recorder(states: &States) -> impl FnMut(&mut Server, GroupId, EntryGroupState) + 'static {
        let states = Rc::clone(states);
        move |_s: &mut Server, _g: GroupId, state: EntryGroupState| states.borrow_mut().push(state)
    }

    #[tokio::test(start_paused = true)]
    async fn commit_establishes_after_probing() {
        let (mut server, log) = running_server();
        let states = States::default();
        let group = server.entry_group_new(recorder(&states)).unwrap();
        server
            .entry_group_add_record(group, None, None, a("svc.local", "10.0.0.7"))
            .unwrap();
        server.entry_group_commit(group).unwrap();
        assert!(log
            .borrow()
            .contains(&TransportOp::Announce(Scope::ANY, a("svc.local", "10.0.0.7"))));

        tokio::time::advance(Duration::from_millis(749)).await;
        server.process_timeouts();
        assert_eq!(*states.borrow(), vec![EntryGroupState::Registering]);

        tokio::time::advance(Duration::from_millis(1)).await;
        server.process_timeouts();
        assert_eq!(
            *states.borrow(),
            vec![EntryGroupState::Registering, EntryGroupState::Established]
        );
        assert_eq!(server.entry_group_state(group).unwrap(), EntryGroupState::Established);
    }

    #[tokio::test(start_paused = true)]
    async fn add_record_errors() {
        let (mut server, _log) = running_server();
        let group = server.entry_group_new(recorder(&States::default())).unwrap();
        let record = a("svc.local", "10.0.0.7");
        server
            .entry_group_add_record(group, None, None, record.clone())
            .unwrap();

        let dup = server.entry_group_add_record(group, None, None, record.with_ttl(10));
        assert!(matches!(dup, Err(Error::Duplicate(_))));

        let other_scope = server.entry_group_add_record(group, Some(1), None, record.clone());
        assert!(other_scope.is_ok());

        let chaos = Record::generic("svc.local", 3, 1, 120, vec![10, 0, 0, 1]);
        assert!(matches!(
            server.entry_group_add_record(group, None, None, chaos),
            Err(Error::InvalidRecord(_))
        ));

        server.entry_group_commit(group).unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        server.process_timeouts();
        let late = server.entry_group_add_record(group, None, None, a("late.local", "10.0.0.8"));
        assert!(matches!(late, Err(Error::InvalidState(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn adding_while_registering_announces_at_once() {
        let (mut server, log) = running_server();
        let group = server.entry_group_new(recorder(&States::default())).unwrap();
        server.entry_group_commit(group).unwrap();
        server
            .entry_group_add_record(group, None, None, a("late.local", "10.0.0.8"))
            .unwrap();
        assert!(log
            .borrow()
            .contains(&TransportOp::Announce(Scope::ANY, a("late.local", "10.0.0.8"))));
    }

    #[tokio::test(start_paused = true)]
    async fn record_added_while_registering_hits_cached_conflict() {
        let (mut server, _log) = running_server();
        server.handle_record(2, Protocol::Inet, a("late.local", "10.9.9.9"));

        let states = States::default();
        let group = server.entry_group_new(recorder(&states)).unwrap();
        server
            .entry_group_add_record(group, None, None, a("svc.local", "10.0.0.7"))
            .unwrap();
        server.entry_group_commit(group).unwrap();
        server
            .entry_group_add_record(group, None, None, a("late.local", "10.0.0.8"))
            .unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        server.process_timeouts();
        assert_eq!(
            *states.borrow(),
            vec![EntryGroupState::Registering, EntryGroupState::Collision]
        );
        assert_eq!(server.entry_group_state(group).unwrap(), EntryGroupState::Collision);
    }

    #[tokio::test(start_paused = true)]
    async fn service_helper_adds_all_records() {
        let (mut server, _log) = running_server();
        let group = server.entry_group_new(recorder(&States::default())).unwrap();
        server
            .entry_group_add_service(group, None, None, "Test Service", "_http._tcp", None, None, 80, TxtList::new())
            .unwrap();
        server
            .entry_group_add_service(group, None, None, "Test Service", "_ftp._tcp", None, None, 21, TxtList::new())
            .unwrap();

        let g = &server.groups[&group];
        let types: Vec<u16> = g.entries.iter().map(|e| e.record.rtype()).collect();
        assert_eq!(
            types,
            vec![TYPE_PTR, TYPE_SRV, TYPE_TXT, TYPE_PTR, TYPE_PTR, TYPE_SRV, TYPE_TXT, TYPE_PTR]
        );
        let srv = &g.entries[1].record;
        assert_eq!(srv.name(), "Test Service._http._tcp.local");
        assert_eq!(srv.data().target(), Some(server.host_name_fqdn()));
        assert_eq!(g.entries[2].record.data(), &RecordData::Txt(TxtList::from_strings([""])));

        let again = server.entry_group_add_service(
            group, None, None, "Test Service", "_http._tcp", None, None, 80, TxtList::new(),
        );
        assert!(matches!(again, Err(Error::Duplicate(_))));
        assert_eq!(server.groups[&group].entries.len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn dns_server_helper() {
        let (mut server, _log) = running_server();
        let group = server.entry_group_new(recorder(&States::default())).unwrap();
        server
            .entry_group_add_dns_server_address(
                group,
                None,
                None,
                None,
                DnsServerKind::Resolve,
                "192.168.50.1".parse().unwrap(),
                53,
            )
            .unwrap();

        let g = &server.groups[&group];
        assert_eq!(g.entries.len(), 3);
        assert_eq!(g.entries[0].record.name(), "ip-192-168-50-1.local");
        assert_eq!(g.entries[1].record.name(), "1.50.168.192.in-addr.arpa");
        let srv = &g.entries[2];
        assert_eq!(srv.record.name(), "_domain._udp.local");
        assert!(!srv.unique);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_withdraws_and_notifies_once() {
        let (mut server, log) = running_server();
        let states = States::default();
        let group = server.entry_group_new(recorder(&states)).unwrap();
        server
            .entry_group_add_record(group, None, None, a("svc.local", "10.0.0.7"))
            .unwrap();
        server.entry_group_commit(group).unwrap();
        server.entry_group_reset(group).unwrap();
        server.entry_group_reset(group).unwrap();

        assert!(log
            .borrow()
            .contains(&TransportOp::Withdraw(Scope::ANY, a("svc.local", "10.0.0.7"))));
        assert!(server.entry_group_is_empty(group).unwrap());
        assert_eq!(
            *states.borrow(),
            vec![EntryGroupState::Registering, EntryGroupState::Uncommitted]
        );

        // The old probe timer must not establish the reset group.
        tokio::time::advance(Duration::from_secs(1)).await;
        server.process_timeouts();
        assert_eq!(server.entry_group_state(group).unwrap(), EntryGroupState::Uncommitted);
    }

    #[tokio::test(start_paused = true)]
    async fn free_is_idempotent() {
        let (mut server, log) = running_server();
        let group = server.entry_group_new(recorder(&States::default())).unwrap();
        server
            .entry_group_add_record(group, None, None, a("svc.local", "10.0.0.7"))
            .unwrap();
        server.entry_group_commit(group).unwrap();

        server.entry_group_free(group);
        server.entry_group_free(group);
        let withdrawals = log
            .borrow()
            .iter()
            .filter(|op| matches!(op, TransportOp::Withdraw(..)))
            .count();
        assert_eq!(withdrawals, 1);
        assert!(matches!(server.entry_group_state(group), Err(Error::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn commit_before_running_is_deferred() {
        let (mut server, log) = starting_server();
        let states = States::default();
        let group = server.entry_group_new(recorder(&states)).unwrap();
        server
            .entry_group_add_record(group, None, None, a("svc.local", "10.0.0.7"))
            .unwrap();
        server.entry_group_commit(group).unwrap();
        assert!(!log.borrow().iter().any(|op| matches!(op, TransportOp::Announce(..))));

        tokio::time::advance(Duration::from_secs(5)).await;
        server.process_timeouts();
        assert_eq!(*states.borrow(), vec![EntryGroupState::Registering]);

        server.transport_ready().unwrap();
        tokio::time::advance(Duration::from_millis(750)).await;
        server.process_timeouts();
        assert_eq!(
            *states.borrow(),
            vec![EntryGroupState::Registering, EntryGroupState::Established]
        );
    }
}
