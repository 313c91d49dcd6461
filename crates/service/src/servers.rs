use std::{net::SocketAddr, sync::Arc};

use parking_lot::Mutex;

use crate::{Error, schedule::RetransmitPolicy};

/// Settings for one upstream RADIUS server.
pub struct ServerOptions {
    pub address: SocketAddr,
    /// Shared secret; non-empty and shorter than the User-Password
    /// value bound, which the password transform requires.
    pub secret: String,
    pub retransmit: RetransmitPolicy,
    pub enabled: bool,
}

impl ServerOptions {
    pub fn new(address: SocketAddr, secret: impl Into<String>) -> Self {
        Self {
            address,
            secret: secret.into(),
            retransmit: RetransmitPolicy::default(),
            enabled: true,
        }
    }
}

/// One configured upstream server.
#[derive(Debug)]
pub struct Server {
    pub address: SocketAddr,
    pub secret: String,
    pub retransmit: RetransmitPolicy,
    pub enabled: bool,
}

/// The ordered list of configured upstream servers.
///
/// Insertion order is the priority order: a query walks the table from
/// its current cursor and takes the first enabled entry.  The table is
/// the only state shared between workers; the mutex is held across
/// short scans only, and the handed-out `Arc` keeps a resolved entry
/// alive across a concurrent removal.
pub struct ServerTable {
    limit: usize,
    entries: Mutex<Vec<Arc<Server>>>,
}

impl ServerTable {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            entries: Mutex::new(Vec::with_capacity(4)),
        }
    }

    /// Append a server to the table.
    ///
    /// # Test
    ///
    /// ```
    /// use radius_client_service::servers::{ServerOptions, ServerTable};
    ///
    /// let table = ServerTable::new(1);
    ///
    /// let first = ServerOptions::new("127.0.0.1:1812".parse().unwrap(), "abc");
    /// let second = ServerOptions::new("127.0.0.1:1813".parse().unwrap(), "abc");
    ///
    /// assert!(table.add(first).is_ok());
    /// assert!(table.add(second).is_err());
    /// assert_eq!(table.len(), 1);
    /// ```
    pub fn add(&self, options: ServerOptions) -> Result<(), Error> {
        if options.secret.is_empty() || options.secret.len() >= codec::USER_PASSWORD_MAX_LEN {
            return Err(Error::InvalidInput);
        }

        let mut entries = self.entries.lock();
        if entries.len() >= self.limit {
            return Err(Error::TooManyServers);
        }

        // capacity is stepped in fours.
        if entries.len() == entries.capacity() {
            entries.reserve_exact(4);
        }

        entries.push(Arc::new(Server {
            address: options.address,
            secret: options.secret,
            retransmit: options.retransmit,
            enabled: options.enabled,
        }));

        Ok(())
    }

    /// Remove the first entry bound to `address`, keeping the relative
    /// order of the survivors.
    pub fn remove(&self, address: &SocketAddr) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter().position(|server| server.address == *address) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Resolve the first enabled server at or after `from`.
    ///
    /// The lock is held across the scan only; the returned `Arc` is the
    /// caller's to keep for the lifetime of the attempt.
    pub fn next_enabled(&self, from: usize) -> Option<(usize, Arc<Server>)> {
        self.entries
            .lock()
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, server)| server.enabled)
            .map(|(index, server)| (index, server.clone()))
    }
}
