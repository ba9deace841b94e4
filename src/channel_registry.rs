//! Module `channel_registry`
//!
//! Per-session data-connection state (spec §3's `DataConnection`) plus the
//! process-wide PASV port allocator. Grounded in the teacher's
//! `ChannelEntry`/`ChannelRegistry` (a socket-addr-keyed map of sockets);
//! here the registry shrinks to just port bookkeeping, since the
//! mode/listener/peer fields move onto the owning `Client` — one
//! `DataConnection` per session, not a global map of them.

use std::collections::HashSet;
use std::net::{SocketAddr, TcpListener};
use std::ops::Range;
use std::sync::{Arc, Mutex};

use crate::error::ResourceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Ascii,
    Binary,
    Ebcdic,
}

impl Default for TransferType {
    fn default() -> Self {
        TransferType::Ascii
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Stream,
    Zlib,
}

impl Default for TransferMode {
    fn default() -> Self {
        TransferMode::Stream
    }
}

#[derive(Default)]
pub enum DataMode {
    #[default]
    None,
    Port(SocketAddr),
    Pasv {
        listener: TcpListener,
        port: u16,
    },
}

/// Data-connection sub-state (spec §3/§4.5). `mode=None` holds no sockets.
#[derive(Default)]
pub struct DataConnection {
    pub mode: DataMode,
    pub transfer_type: TransferType,
    pub transfer_mode: TransferMode,
    pub restart_offset: u64,
    pub zlib_level: u32,
}

impl DataConnection {
    pub fn is_active(&self) -> bool {
        !matches!(self.mode, DataMode::None)
    }

    /// Clears the data connection, returning the PASV port to release
    /// (if any) so the caller can hand it back to the `PasvPortAllocator`.
    pub fn clear(&mut self) -> Option<u16> {
        match std::mem::take(&mut self.mode) {
            DataMode::Pasv { port, .. } => Some(port),
            _ => None,
        }
    }
}

/// Process-wide allocator for the PASV port range (spec §4.4/§6). Bind
/// failures and exhaustion both surface as `ResourceError::NoDataPortAvailable`.
#[derive(Clone)]
pub struct PasvPortAllocator {
    range: Range<u16>,
    in_use: Arc<Mutex<HashSet<u16>>>,
}

impl PasvPortAllocator {
    pub fn new(range: Range<u16>) -> Self {
        Self {
            range,
            in_use: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Binds a listener on the first free port in the configured range.
    pub fn bind(&self, ip: &str) -> Result<(TcpListener, u16), ResourceError> {
        let mut in_use = self.in_use.lock().unwrap();
        for port in self.range.clone() {
            if in_use.contains(&port) {
                continue;
            }
            if let Ok(listener) = TcpListener::bind((ip, port)) {
                in_use.insert(port);
                return Ok((listener, port));
            }
        }
        Err(ResourceError::NoDataPortAvailable)
    }

    pub fn release(&self, port: u16) {
        self.in_use.lock().unwrap().remove(&port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_distinct_ports_and_reuses_after_release() {
        let alloc = PasvPortAllocator::new(41000..41010);
        let (l1, p1) = alloc.bind("127.0.0.1").unwrap();
        let (l2, p2) = alloc.bind("127.0.0.1").unwrap();
        assert_ne!(p1, p2);
        drop(l1);
        drop(l2);
        alloc.release(p1);
        alloc.release(p2);
        let (_l3, p3) = alloc.bind("127.0.0.1").unwrap();
        assert!(p3 == p1 || p3 == p2);
    }

    #[test]
    fn exhausts_the_range() {
        let alloc = PasvPortAllocator::new(41100..41101);
        let (_l, _p) = alloc.bind("127.0.0.1").unwrap();
        assert!(alloc.bind("127.0.0.1").is_err());
    }
}
