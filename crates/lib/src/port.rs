//! Free-port discovery for backend instances.
//!
//! The OS picks an ephemeral port for a throwaway loopback listener; the listener is
//! dropped before the port is returned so the backend can bind it itself. Another
//! process may grab the port in between; that shows up as a failed launch.

use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::sync::{Arc, Mutex, PoisonError};

/// How many fresh ports to ask the OS for before giving up on a lease.
const MAX_REQUERIES: usize = 16;

#[derive(Debug, thiserror::Error)]
#[error("no free port available: {0}")]
pub struct AllocationError(#[from] pub io::Error);

/// Ask the OS for a free loopback port. The port is free at the instant of the call only.
pub fn allocate() -> Result<u16, AllocationError> {
    let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

/// Hands out ports that are not held by any live instance of this supervisor.
#[derive(Debug, Clone, Default)]
pub struct PortAllocator {
    leased: Arc<Mutex<HashSet<u16>>>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh port and record it until the returned lease is dropped.
    pub fn lease(&self) -> Result<PortLease, AllocationError> {
        for _ in 0..MAX_REQUERIES {
            let port = allocate()?;
            let mut leased = self.leased.lock().unwrap_or_else(PoisonError::into_inner);
            if leased.insert(port) {
                return Ok(PortLease {
                    port,
                    leased: Arc::clone(&self.leased),
                });
            }
            log::debug!("port {} is held by a live instance, asking again", port);
        }
        Err(AllocationError(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("every port offered in {} tries is already leased", MAX_REQUERIES),
        )))
    }

    pub fn is_leased(&self, port: u16) -> bool {
        self.leased
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&port)
    }

    pub fn leased_count(&self) -> usize {
        self.leased.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A port reserved for one instance. Released when dropped.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    leased: Arc<Mutex<HashSet<u16>>>,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.leased
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.port);
    }
}
