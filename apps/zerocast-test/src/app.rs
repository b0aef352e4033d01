//! Reactor loop: wires the responder to the mDNS bridge and drives it.

use std::cell::RefCell;
use std::net::IpAddr;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zerocast_core::record::TYPE_PTR;
use zerocast_core::{
    AddressResolution, BrowseEvent, BrowserId, DnsServerInfo, DnsServerKind, DomainBrowserKind,
    EntryGroupState, Error, GroupId, HostNameResolution, InterfaceIndex, Key, Protocol, Record,
    ResolverEvent, RetryPolicy, Server, ServerState, ServiceInstance, ServiceResolution,
    ServiceTypeInfo, TxtList, alternative_host_name, alternative_service_name,
};
use zerocast_discovery::{MdnsSdTransport, get_local_ips};

use crate::config::Config;

/// Services published under the harness's instance name.
const SERVICES: [(&str, u16); 3] = [("_http._tcp", 80), ("_ftp._tcp", 21), ("_webdav._tcp", 80)];

/// Runs the harness until Ctrl-C or the configured run time elapses.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let mut server_config = config.server.clone();
    if server_config.addresses.is_empty() {
        server_config.addresses = get_local_ips();
        info!(count = server_config.addresses.len(), "using local interface addresses");
    }

    let mut transport = MdnsSdTransport::new();
    let mut incoming = transport
        .take_incoming()
        .context("incoming channel already taken")?;

    let harness = Rc::new(RefCell::new(Harness::new(&config)));
    let mut server = Server::new(server_config, transport, server_listener(Rc::clone(&harness)))?;
    server.transport_ready()?;

    let browsers = start_browsers(&mut server, &config)?;
    info!(count = browsers.len(), "browsers started");

    let cancel = CancellationToken::new();
    watch_for_stop(cancel.clone(), config.run_time());

    let mut dump = tokio::time::interval(config.dump_interval());
    dump.set_missed_tick_behavior(MissedTickBehavior::Delay);
    dump.tick().await;

    loop {
        let wake = next_wake(&server, &harness);
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(change) = incoming.recv() => change.apply(&mut server),
            _ = sleep_until(wake) => {
                server.process_timeouts();
                retry_if_due(&mut server, &harness);
            }
            _ = dump.tick() => server.dump_to(|line: &str| info!(target: "zerocast::dump", "{line}")),
        }
    }

    info!("stopping server");
    server.shutdown();
    Ok(())
}

/// Cancels `cancel` on SIGINT or once `run_time` has elapsed.
fn watch_for_stop(cancel: CancellationToken, run_time: Option<Duration>) {
    tokio::spawn(async move {
        let expiry = async {
            match run_time {
                Some(run_time) => tokio::time::sleep(run_time).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("SIGINT received, shutting down"),
            _ = expiry => info!("run time elapsed, shutting down"),
        }
        cancel.cancel();
    });
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn next_wake(server: &Server, harness: &Shared) -> Option<Instant> {
    let retry = harness.borrow().retry_at;
    match (server.next_timeout(), retry) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Publication state shared by the listeners.
#[derive(Debug)]
struct Harness {
    service_name: String,
    dns_server: IpAddr,
    group: Option<GroupId>,
    collisions: u32,
    policy: RetryPolicy,
    /// Set while a backed-off re-publication is pending.
    retry_at: Option<Instant>,
}

type Shared = Rc<RefCell<Harness>>;

impl Harness {
    fn new(config: &Config) -> Self {
        Self {
            service_name: config.service_name.clone(),
            dns_server: config.dns_server,
            group: None,
            collisions: 0,
            policy: config.retry_policy(),
            retry_at: None,
        }
    }
}

fn server_listener(harness: Shared) -> impl FnMut(&mut Server, ServerState) + 'static {
    move |server: &mut Server, state: ServerState| match state {
        ServerState::Running => {
            info!("server startup complete, host name is <{}>", server.host_name_fqdn());
            create_entries(server, &harness, false);
        }
        ServerState::Collision => {
            remove_entries(server, &harness);
            let next = alternative_host_name(server.host_name());
            warn!("host name conflict, retrying with <{next}>");
            if let Err(e) = server.set_host_name(&next) {
                error!(host = %next, error = %e, "failed to set host name");
            }
        }
        other => debug!(state = %other, "server state changed"),
    }
}

fn group_listener(harness: Shared) -> impl FnMut(&mut Server, GroupId, EntryGroupState) + 'static {
    move |server: &mut Server, group: GroupId, state: EntryGroupState| match state {
        EntryGroupState::Established => {
            let name = {
                let mut h = harness.borrow_mut();
                h.collisions = 0;
                h.service_name.clone()
            };
            info!(%group, "service established under name <{name}>");
        }
        EntryGroupState::Collision => service_collision(server, &harness),
        EntryGroupState::Failure => error!(%group, "entry group failed"),
        other => debug!(%group, state = %other, "entry group state changed"),
    }
}

fn service_collision(server: &mut Server, harness: &Shared) {
    let delay = {
        let mut h = harness.borrow_mut();
        h.collisions += 1;
        h.policy.delay_for_attempt(h.collisions)
    };
    match delay {
        None => {
            let h = harness.borrow();
            error!(name = %h.service_name, collisions = h.collisions, "giving up on service name");
            drop(h);
            remove_entries(server, harness);
        }
        Some(delay) if delay.is_zero() => create_entries(server, harness, true),
        Some(delay) => {
            remove_entries(server, harness);
            let mut h = harness.borrow_mut();
            h.service_name = alternative_service_name(&h.service_name);
            h.retry_at = Some(Instant::now() + delay);
            warn!(?delay, "service name conflict, retrying with <{}> after backoff", h.service_name);
        }
    }
}

fn retry_if_due(server: &mut Server, harness: &Shared) {
    let due = harness
        .borrow()
        .retry_at
        .is_some_and(|at| at <= Instant::now());
    if due {
        harness.borrow_mut().retry_at = None;
        create_entries(server, harness, false);
    }
}

fn remove_entries(server: &mut Server, harness: &Shared) {
    let group = harness.borrow_mut().group.take();
    if let Some(group) = group {
        server.entry_group_free(group);
    }
}

/// Replaces the published entries, optionally under the next alternative
/// service name.
fn create_entries(server: &mut Server, harness: &Shared, new_name: bool) {
    remove_entries(server, harness);
    let (name, dns_server) = {
        let mut h = harness.borrow_mut();
        if new_name {
            h.service_name = alternative_service_name(&h.service_name);
            warn!("service name conflict, retrying with <{}>", h.service_name);
        }
        (h.service_name.clone(), h.dns_server)
    };

    let group = match server.entry_group_new(group_listener(Rc::clone(harness))) {
        Ok(group) => group,
        Err(e) => {
            error!(error = %e, "failed to create entry group");
            return;
        }
    };
    match add_entries(server, group, &name, dns_server) {
        Ok(()) => harness.borrow_mut().group = Some(group),
        Err(e) => {
            error!(%name, error = %e, "failed to publish entries");
            server.entry_group_free(group);
        }
    }
}

fn add_entries(server: &mut Server, group: GroupId, name: &str, dns_server: IpAddr) -> Result<(), Error> {
    for (service_type, port) in SERVICES {
        server.entry_group_add_service(
            group,
            None,
            None,
            name,
            service_type,
            None,
            None,
            port,
            TxtList::from_strings(["foo"]),
        )?;
    }
    server.entry_group_add_dns_server_address(
        group,
        None,
        None,
        None,
        DnsServerKind::Resolve,
        dns_server,
        53,
    )?;
    server.entry_group_commit(group)
}

fn at(interface: InterfaceIndex, protocol: Protocol) -> String {
    format!("{interface}.{protocol}")
}

/// Starts one browser of every kind, each logging what it sees.
fn start_browsers(server: &mut Server, config: &Config) -> Result<Vec<BrowserId>, Error> {
    let http = format!("_http._tcp.{}", server.domain_name());
    let mut ids = Vec::new();

    ids.push(server.record_browser_new(
        None,
        None,
        Key::in_class(&http, TYPE_PTR),
        |_s: &mut Server, _b: BrowserId, e: BrowseEvent<Record>| {
            info!(
                "SUBSCRIPTION: record [{}] on {} is {}",
                e.item,
                at(e.interface, e.protocol),
                e.event
            );
        },
    )?);

    let host = config.resolve_host.clone();
    ids.push(server.host_name_resolver_new(
        None,
        None,
        &config.resolve_host,
        None,
        move |_s: &mut Server, _b: BrowserId, e: ResolverEvent<HostNameResolution>| match e {
            ResolverEvent::Found { interface, protocol, result } => info!(
                "HNR: ({}) <{}> -> {} [found]",
                at(interface, protocol),
                result.host_name,
                result.address
            ),
            ResolverEvent::Timeout => warn!("HNR: <{host}> [timeout]"),
        },
    )?);

    let address = config.resolve_address;
    ids.push(server.address_resolver_new(
        None,
        None,
        address,
        move |_s: &mut Server, _b: BrowserId, e: ResolverEvent<AddressResolution>| match e {
            ResolverEvent::Found { interface, protocol, result } => info!(
                "AR: ({}) {} -> <{}> [found]",
                at(interface, protocol),
                result.address,
                result.host_name
            ),
            ResolverEvent::Timeout => warn!("AR: {address} [timeout]"),
        },
    )?);

    ids.push(server.domain_browser_new(
        None,
        None,
        None,
        DomainBrowserKind::Browse,
        |_s: &mut Server, _b: BrowserId, e: BrowseEvent<String>| {
            info!("DB: ({}) <{}> [{}]", at(e.interface, e.protocol), e.item, e.event);
        },
    )?);

    ids.push(server.service_type_browser_new(
        None,
        None,
        None,
        |_s: &mut Server, _b: BrowserId, e: BrowseEvent<ServiceTypeInfo>| {
            info!(
                "STB: ({}) {} in <{}> [{}]",
                at(e.interface, e.protocol),
                e.item.service_type,
                e.item.domain,
                e.event
            );
        },
    )?);

    ids.push(server.service_browser_new(
        None,
        None,
        "_http._tcp",
        None,
        |_s: &mut Server, _b: BrowserId, e: BrowseEvent<ServiceInstance>| {
            info!(
                "SB: ({}) <{}> as {} in <{}> [{}]",
                at(e.interface, e.protocol),
                e.item.name,
                e.item.service_type,
                e.item.domain,
                e.event
            );
        },
    )?);

    let service = config.resolve_service.clone();
    ids.push(server.service_resolver_new(
        None,
        None,
        &config.resolve_service,
        "_http._tcp",
        None,
        None,
        move |_s: &mut Server, _b: BrowserId, e: ResolverEvent<ServiceResolution>| match e {
            ResolverEvent::Found { interface, protocol, result } => info!(
                "SR: ({}) <{}> as {} in <{}>: {}/{}:{} ({}) [found]",
                at(interface, protocol),
                result.name,
                result.service_type,
                result.domain,
                result.host_name,
                result.address,
                result.port,
                result.txt
            ),
            ResolverEvent::Timeout => warn!("SR: <{service}> as _http._tcp [timeout]"),
        },
    )?);

    ids.push(server.dns_server_browser_new(
        None,
        None,
        None,
        DnsServerKind::Resolve,
        None,
        |_s: &mut Server, _b: BrowserId, e: BrowseEvent<DnsServerInfo>| {
            info!(
                "DSB: ({}): {}/{}:{} [{}]",
                at(e.interface, e.protocol),
                e.item.host_name,
                e.item.address,
                e.item.port,
                e.event
            );
        },
    )?);

    Ok(ids)
}
