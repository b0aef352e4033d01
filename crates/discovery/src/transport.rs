use std::collections::HashMap;
use std::io;

use mdns_sd::ServiceDaemon;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zerocast_core::{Key, Record, Scope, Transport};

use crate::DiscoveryError;
use crate::client::{Forwarder, browse_target, forward};
use crate::server::{Change, Registrations};
use crate::types::Incoming;

/// One daemon browse shared by every key of a service type.
struct Browse {
    refs: usize,
    task: Option<JoinHandle<()>>,
}

impl Browse {
    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// [`Transport`] backed by an `mdns_sd::ServiceDaemon`.
///
/// The daemon picks interfaces itself, so publication and query scopes are
/// not narrowed. Records heard on the network arrive on the channel from
/// [`MdnsSdTransport::take_incoming`]; the reactor feeds them to the server
/// with [`Incoming::apply`].
pub struct MdnsSdTransport {
    daemon: Option<ServiceDaemon>,
    registrations: Registrations,
    /// Daemon browses, by service type and domain.
    browses: HashMap<String, Browse>,
    incoming_tx: mpsc::UnboundedSender<Incoming>,
    incoming_rx: Option<mpsc::UnboundedReceiver<Incoming>>,
}

impl MdnsSdTransport {
    /// Creates a transport. The daemon starts when the server opens it.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            daemon: None,
            registrations: Registrations::default(),
            browses: HashMap::new(),
            incoming_tx: tx,
            incoming_rx: Some(rx),
        }
    }

    /// Takes the receiver of network-side record changes. Can only be
    /// called once.
    pub fn take_incoming(&mut self) -> Option<mpsc::UnboundedReceiver<Incoming>> {
        self.incoming_rx.take()
    }

    /// Unregisters every service and shuts the daemon down.
    pub fn stop(&mut self) -> Result<(), DiscoveryError> {
        let changes = self.registrations.clear();
        self.apply(changes);
        for (_, mut browse) in self.browses.drain() {
            browse.abort();
        }
        if let Some(daemon) = self.daemon.take() {
            daemon.shutdown().map_err(|e| {
                DiscoveryError::Mdns(format!("failed to shut down mDNS daemon: {e}"))
            })?;
            info!("mDNS daemon stopped");
        }
        Ok(())
    }

    fn apply(&self, changes: Vec<Change>) {
        let Some(daemon) = &self.daemon else {
            return;
        };
        for change in changes {
            match change {
                Change::Register(info) => {
                    let fullname = info.get_fullname().to_string();
                    match daemon.register(*info) {
                        Ok(()) => debug!(%fullname, "service registered"),
                        Err(e) => warn!(%fullname, error = %e, "failed to register service"),
                    }
                }
                Change::Unregister(fullname) => {
                    if let Err(e) = daemon.unregister(&fullname) {
                        warn!(%fullname, error = %e, "failed to unregister service");
                    }
                }
            }
        }
    }
}

impl Default for MdnsSdTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MdnsSdTransport {
    fn open(&mut self) -> io::Result<()> {
        if self.daemon.is_some() {
            return Ok(());
        }
        let daemon = ServiceDaemon::new().map_err(|e| {
            io::Error::other(DiscoveryError::Mdns(format!(
                "failed to create mDNS daemon: {e}"
            )))
        })?;
        info!("mDNS daemon started");
        self.daemon = Some(daemon);
        Ok(())
    }

    fn announce(&mut self, _scope: Scope, record: &Record) {
        let changes = self.registrations.announce(record);
        self.apply(changes);
    }

    fn withdraw(&mut self, _scope: Scope, record: &Record) {
        let changes = self.registrations.withdraw(record);
        self.apply(changes);
    }

    fn query(&mut self, _scope: Scope, key: &Key) {
        let Some(target) = browse_target(key) else {
            debug!(%key, "answered by resolved services, no browse");
            return;
        };
        let browse = self.browses.entry(target.clone()).or_insert(Browse {
            refs: 0,
            task: None,
        });
        browse.refs += 1;
        if browse.refs > 1 {
            return;
        }
        let Some(daemon) = &self.daemon else {
            return;
        };

        let receiver = match daemon.browse(&format!("{target}.")) {
            Ok(receiver) => receiver,
            Err(e) => {
                warn!(service_type = %target, error = %e, "failed to browse mDNS");
                self.browses.remove(&target);
                return;
            }
        };
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(service_type = %target, error = %e, "no runtime to forward browse events");
                return;
            }
        };
        let forwarder = Forwarder::new(self.incoming_tx.clone(), self.registrations.own());
        let task = runtime.spawn(forward(receiver, forwarder));
        if let Some(browse) = self.browses.get_mut(&target) {
            browse.task = Some(task);
        }
        debug!(service_type = %target, "browse started");
    }

    fn cancel_query(&mut self, _scope: Scope, key: &Key) {
        let Some(target) = browse_target(key) else {
            return;
        };
        let Some(browse) = self.browses.get_mut(&target) else {
            return;
        };
        browse.refs -= 1;
        if browse.refs > 0 {
            return;
        }
        if let Some(mut browse) = self.browses.remove(&target) {
            browse.abort();
        }
        if let Some(daemon) = &self.daemon
            && let Err(e) = daemon.stop_browse(&format!("{target}."))
        {
            warn!(service_type = %target, error = %e, "failed to stop browse");
        }
    }
}

impl Drop for MdnsSdTransport {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "failed to stop mDNS transport");
        }
    }
}
