use std::collections::HashMap;
use std::net::IpAddr;

use mdns_sd::{ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use zerocast_core::record::{TYPE_PTR, TYPE_SRV, TYPE_TXT};
use zerocast_core::{Key, Protocol, Record, RecordData, TxtList, domain};

use crate::server::{OwnServices, is_own};
use crate::types::{BRIDGE_INTERFACE, HOST_TTL, Incoming, SERVICE_TTL};

const ENUMERATION_PREFIX: &str = "_services._dns-sd._udp";

/// The daemon browse (service type and domain, no root dot) that answers
/// `key`, if there is one.
///
/// PTR keys on a service type or the enumeration name browse that name;
/// SRV and TXT keys on an instance browse the instance's type. Address
/// records arrive with resolved services and need no browse of their own.
pub(crate) fn browse_target(key: &Key) -> Option<String> {
    match key.rtype() {
        TYPE_PTR => {
            let name = key.name();
            let is_enumeration = name
                .get(..ENUMERATION_PREFIX.len())
                .is_some_and(|p| p.eq_ignore_ascii_case(ENUMERATION_PREFIX));
            if is_enumeration || domain::service_type_split(name).is_some() {
                Some(name.to_string())
            } else {
                None
            }
        }
        TYPE_SRV | TYPE_TXT => {
            if let Some((service_type, domain)) = domain::service_type_split(key.name()) {
                return Some(format!("{service_type}.{domain}"));
            }
            domain::service_name_split(key.name())
                .filter(|p| domain::is_valid_service_type(&p.service_type))
                .map(|p| format!("{}.{}", p.service_type, p.domain))
        }
        _ => None,
    }
}

/// Converts a resolved service into the records it implies.
pub(crate) fn records_from_info(info: &ServiceInfo) -> Vec<(Protocol, Record)> {
    let ty_domain = domain::normalize(info.get_type());
    let fullname = domain::normalize(info.get_fullname());
    let instance = fullname
        .strip_suffix(ty_domain.as_str())
        .map(|s| s.trim_end_matches('.'))
        .unwrap_or(fullname.as_str());
    let name = format!("{}.{ty_domain}", domain::escape_label(instance));
    let host = domain::normalize(info.get_hostname());

    let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
    addresses.sort();
    let protocol = if addresses.iter().any(IpAddr::is_ipv4) {
        Protocol::Inet
    } else {
        Protocol::Inet6
    };

    let mut txt = TxtList::new();
    for property in info.get_properties().iter() {
        match property.val() {
            Some(val) => {
                let mut item = format!("{}=", property.key()).into_bytes();
                item.extend_from_slice(val);
                txt.push(item);
            }
            None => txt.push(property.key()),
        }
    }
    if txt.is_empty() {
        txt.push("");
    }

    let mut records = vec![
        (protocol, Record::new(&ty_domain, SERVICE_TTL, RecordData::Ptr(name.clone()))),
        (
            protocol,
            Record::new(
                &name,
                HOST_TTL,
                RecordData::Srv {
                    priority: 0,
                    weight: 0,
                    port: info.get_port(),
                    target: host.clone(),
                },
            ),
        ),
        (protocol, Record::new(&name, SERVICE_TTL, RecordData::Txt(txt))),
    ];
    for address in addresses {
        records.push((
            Protocol::of(&address),
            Record::new(&host, HOST_TTL, RecordData::address(address)),
        ));
    }
    records
}

/// Turns daemon events for one browse into [`Incoming`] changes.
pub(crate) struct Forwarder {
    known: HashMap<String, Vec<(Protocol, Record)>>,
    tx: mpsc::UnboundedSender<Incoming>,
    own: OwnServices,
}

impl Forwarder {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Incoming>, own: OwnServices) -> Self {
        Self {
            known: HashMap::new(),
            tx,
            own,
        }
    }

    /// Handles one event. Returns false once the browse stopped or the
    /// reactor went away.
    pub(crate) fn handle(&mut self, event: ServiceEvent) -> bool {
        let mut out = Vec::new();
        match event {
            ServiceEvent::ServiceResolved(info) => {
                if is_own(&self.own, info.get_fullname()) {
                    trace!(fullname = info.get_fullname(), "skipping own service");
                    return true;
                }
                let records = records_from_info(&info);
                let previous = self
                    .known
                    .insert(info.get_fullname().to_ascii_lowercase(), records.clone())
                    .unwrap_or_default();
                for (protocol, record) in previous {
                    if !records.iter().any(|(_, r)| r == &record) {
                        out.push(Incoming::Withdrawn {
                            interface: BRIDGE_INTERFACE,
                            protocol,
                            record,
                        });
                    }
                }
                out.extend(records.into_iter().map(|(protocol, record)| Incoming::Record {
                    interface: BRIDGE_INTERFACE,
                    protocol,
                    record,
                }));
            }
            ServiceEvent::ServiceFound(ty, fullname) => {
                let ty = domain::normalize(&ty);
                if ty.to_ascii_lowercase().starts_with(ENUMERATION_PREFIX) {
                    let record = Record::new(
                        &ty,
                        SERVICE_TTL,
                        RecordData::Ptr(domain::normalize(&fullname)),
                    );
                    out.push(Incoming::Record {
                        interface: BRIDGE_INTERFACE,
                        protocol: Protocol::Inet,
                        record,
                    });
                }
            }
            ServiceEvent::ServiceRemoved(_ty, fullname) => {
                for (protocol, record) in self
                    .known
                    .remove(&fullname.to_ascii_lowercase())
                    .unwrap_or_default()
                {
                    out.push(Incoming::Withdrawn {
                        interface: BRIDGE_INTERFACE,
                        protocol,
                        record,
                    });
                }
            }
            ServiceEvent::SearchStopped(ty) => {
                debug!(service_type = %ty, "browse stopped");
                return false;
            }
            _ => {}
        }
        out.into_iter().all(|incoming| self.tx.send(incoming).is_ok())
    }
}

/// Forwards events from a daemon browse until it stops or the reactor
/// goes away.
pub(crate) async fn forward(receiver: mdns_sd::Receiver<ServiceEvent>, mut forwarder: Forwarder) {
    while let Ok(event) = receiver.recv_async().await {
        if !forwarder.handle(event) {
            break;
        }
    }
}
