use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock};

use mdns_sd::ServiceInfo;
use tracing::{debug, warn};
use zerocast_core::{Record, RecordData, TxtList, domain};

/// Full names (lowercase, with root dot) of the services we registered, so
/// the browse side can drop our own echoes.
pub(crate) type OwnServices = Arc<RwLock<HashSet<String>>>;

pub(crate) fn is_own(own: &OwnServices, fullname: &str) -> bool {
    own.read()
        .unwrap_or_else(PoisonError::into_inner)
        .contains(&fullname.to_ascii_lowercase())
}

/// What the daemon has to do after a record change.
#[derive(Debug)]
pub(crate) enum Change {
    Register(Box<ServiceInfo>),
    Unregister(String),
}

#[derive(Debug, Default)]
struct PublishedService {
    instance: String,
    ty_domain: String,
    srv: Option<(u16, String)>,
    txt: Option<TxtList>,
    /// Daemon full name while registered.
    registered: Option<String>,
}

/// Folds announced SRV, TXT and address records into daemon registrations.
///
/// A service is registered once its SRV, its TXT and at least one address
/// of the SRV target are known, and re-registered whenever one of them
/// changes. Other record types have no daemon counterpart.
#[derive(Debug, Default)]
pub(crate) struct Registrations {
    services: HashMap<String, PublishedService>,
    hosts: HashMap<String, BTreeSet<IpAddr>>,
    own: OwnServices,
}

fn name_key(name: &str) -> String {
    domain::canonical(name).to_ascii_lowercase()
}

impl Registrations {
    pub(crate) fn own(&self) -> OwnServices {
        Arc::clone(&self.own)
    }

    pub(crate) fn announce(&mut self, record: &Record) -> Vec<Change> {
        match record.data() {
            RecordData::Srv { port, target, .. } => {
                let srv = (*port, domain::normalize(target));
                self.update_service(record.name(), true, |s| s.srv = Some(srv))
            }
            RecordData::Txt(txt) => {
                self.update_service(record.name(), true, |s| s.txt = Some(txt.clone()))
            }
            RecordData::A(_) | RecordData::Aaaa(_) => {
                if let Some(address) = record.data().as_address() {
                    self.hosts
                        .entry(name_key(record.name()))
                        .or_default()
                        .insert(address);
                }
                self.sync_host(record.name())
            }
            _ => {
                debug!(record = %record, "no daemon counterpart, not published");
                Vec::new()
            }
        }
    }

    pub(crate) fn withdraw(&mut self, record: &Record) -> Vec<Change> {
        match record.data() {
            RecordData::Srv { .. } => self.update_service(record.name(), false, |s| s.srv = None),
            RecordData::Txt(_) => self.update_service(record.name(), false, |s| s.txt = None),
            RecordData::A(_) | RecordData::Aaaa(_) => {
                let key = name_key(record.name());
                if let (Some(addresses), Some(address)) =
                    (self.hosts.get_mut(&key), record.data().as_address())
                {
                    addresses.remove(&address);
                    if addresses.is_empty() {
                        self.hosts.remove(&key);
                    }
                }
                self.sync_host(record.name())
            }
            _ => Vec::new(),
        }
    }

    /// Unregisters everything.
    pub(crate) fn clear(&mut self) -> Vec<Change> {
        self.hosts.clear();
        let keys: Vec<String> = self.services.keys().cloned().collect();
        let changes = keys.iter().filter_map(|key| self.sync(key)).collect();
        self.services.clear();
        changes
    }

    fn update_service(
        &mut self,
        name: &str,
        create: bool,
        update: impl FnOnce(&mut PublishedService),
    ) -> Vec<Change> {
        let key = name_key(name);
        if !self.services.contains_key(&key) {
            if !create {
                return Vec::new();
            }
            let Some(parts) = domain::service_name_split(name)
                .filter(|p| domain::is_valid_service_type(&p.service_type))
            else {
                debug!(name, "not a service instance name, not published");
                return Vec::new();
            };
            self.services.insert(
                key.clone(),
                PublishedService {
                    instance: parts.name,
                    ty_domain: format!("{}.{}", parts.service_type, parts.domain),
                    ..PublishedService::default()
                },
            );
        }
        if let Some(service) = self.services.get_mut(&key) {
            update(service);
        }
        self.sync(&key).into_iter().collect()
    }

    fn sync_host(&mut self, host: &str) -> Vec<Change> {
        let host = name_key(host);
        let keys: Vec<String> = self
            .services
            .iter()
            .filter(|(_, s)| s.srv.as_ref().is_some_and(|(_, t)| name_key(t) == host))
            .map(|(k, _)| k.clone())
            .collect();
        keys.iter().filter_map(|key| self.sync(key)).collect()
    }

    fn sync(&mut self, key: &str) -> Option<Change> {
        let service = self.services.get_mut(key)?;
        let info = match (&service.srv, &service.txt) {
            (Some((port, target)), Some(txt)) => {
                let addresses: Vec<IpAddr> = self
                    .hosts
                    .get(&name_key(target))
                    .map(|a| a.iter().copied().collect())
                    .unwrap_or_default();
                if addresses.is_empty() {
                    None
                } else {
                    build_info(service, target, &addresses, *port, txt)
                }
            }
            _ => None,
        };

        let change = match info {
            Some(info) => {
                let fullname = info.get_fullname().to_string();
                self.own
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(fullname.to_ascii_lowercase());
                service.registered = Some(fullname);
                Some(Change::Register(Box::new(info)))
            }
            None => service.registered.take().map(|fullname| {
                self.own
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&fullname.to_ascii_lowercase());
                Change::Unregister(fullname)
            }),
        };
        if service.srv.is_none() && service.txt.is_none() && service.registered.is_none() {
            self.services.remove(key);
        }
        change
    }
}

fn build_info(
    service: &PublishedService,
    target: &str,
    addresses: &[IpAddr],
    port: u16,
    txt: &TxtList,
) -> Option<ServiceInfo> {
    let pairs: Vec<(String, String)> = txt
        .iter()
        .filter(|item| !item.is_empty())
        .map(|item| {
            let item = String::from_utf8_lossy(item);
            match item.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (item.to_string(), String::new()),
            }
        })
        .collect();
    let properties: Vec<(&str, &str)> = pairs
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    match ServiceInfo::new(
        &format!("{}.", service.ty_domain),
        &service.instance,
        &format!("{target}."),
        addresses,
        port,
        &properties[..],
    ) {
        Ok(info) => Some(info),
        Err(e) => {
            warn!(instance = %service.instance, error = %e, "failed to create service info");
            None
        }
    }
}

/// Returns local non-loopback addresses, excluding IPv4 link-local
/// (169.254.x.x) and IPv6 link-local (fe80::/10).
pub fn get_local_ips() -> Vec<IpAddr> {
    let mut ips = Vec::new();

    let Ok(interfaces) = if_addrs::get_if_addrs() else {
        return ips;
    };

    for iface in interfaces {
        if iface.is_loopback() {
            continue;
        }
        match iface.ip() {
            IpAddr::V4(ipv4) => {
                if ipv4.is_loopback() || ipv4.is_link_local() {
                    continue;
                }
                ips.push(IpAddr::V4(ipv4));
            }
            IpAddr::V6(ipv6) => {
                if ipv6.is_loopback() || ipv6.segments()[0] & 0xffc0 == 0xfe80 {
                    continue;
                }
                ips.push(IpAddr::V6(ipv6));
            }
        }
    }

    ips
}
