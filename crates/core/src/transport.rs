//! The seam between the core and the multicast packet layer.
//!
//! The core never touches sockets. A [`Transport`] carries announcements,
//! withdrawals and queries out; parsed records come back in through
//! [`Server::handle_record`](crate::Server::handle_record).

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use crate::record::{Key, Record};
use crate::scope::Scope;

/// Outbound side of the wire engine.
pub trait Transport {
    /// Opens sockets. Called once from [`Server::new`](crate::Server::new);
    /// an error aborts server construction.
    fn open(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Probes for and announces a local record.
    fn announce(&mut self, scope: Scope, record: &Record);

    /// Sends a goodbye for a previously announced record.
    fn withdraw(&mut self, scope: Scope, record: &Record);

    /// Starts continuous querying for `key`.
    fn query(&mut self, scope: Scope, key: &Key);

    /// Stops querying for `key`.
    fn cancel_query(&mut self, _scope: Scope, _key: &Key) {}
}

/// One operation seen by a [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportOp {
    Announce(Scope, Record),
    Withdraw(Scope, Record),
    Query(Scope, Key),
    CancelQuery(Scope, Key),
}

/// Shared view of the operations a [`MemoryTransport`] has seen.
pub type TransportLog = Rc<RefCell<Vec<TransportOp>>>;

/// Transport that only records what it is asked to do.
///
/// Useful for tests and dry runs; pair it with explicit
/// `handle_record` calls to simulate the network.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    log: TransportLog,
    fail_open: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose `open` fails, as a socket bind failure would.
    pub fn failing() -> Self {
        Self {
            log: TransportLog::default(),
            fail_open: true,
        }
    }

    /// Returns a handle to the operation log.
    pub fn log(&self) -> TransportLog {
        Rc::clone(&self.log)
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self) -> io::Result<()> {
        if self.fail_open {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                "multicast socket bind failed",
            ));
        }
        Ok(())
    }

    fn announce(&mut self, scope: Scope, record: &Record) {
        self.log
            .borrow_mut()
            .push(TransportOp::Announce(scope, record.clone()));
    }

    fn withdraw(&mut self, scope: Scope, record: &Record) {
        self.log
            .borrow_mut()
            .push(TransportOp::Withdraw(scope, record.clone()));
    }

    fn query(&mut self, scope: Scope, key: &Key) {
        self.log.borrow_mut().push(TransportOp::Query(scope, key.clone()));
    }

    fn cancel_query(&mut self, scope: Scope, key: &Key) {
        self.log
            .borrow_mut()
            .push(TransportOp::CancelQuery(scope, key.clone()));
    }
}
