//! Module `data_channel`
//!
//! `open_data_connection`/`reset_data_connection` (spec §4.5): PORT-connect
//! or PASV-accept before a transfer, and teardown after. Grounded in the
//! teacher's `setup_data_stream` (non-blocking accept-with-retry loop),
//! generalized to also cover the PORT-connect branch and to operate on a
//! single session's `DataConnection` instead of a registry keyed by peer
//! address.

use std::io;
use std::net::TcpStream;
use std::time::Duration;

use log::error;

use crate::channel_registry::{DataConnection, DataMode, PasvPortAllocator};
use crate::error::ResourceError;

/// Opens the data socket for the pending PASV/PORT setup (spec §4.5).
/// `NONE` mode is a caller bug turned into `NoDataPortAvailable` so every
/// transfer command can map the error uniformly to `425`.
pub fn open_data_connection(data: &DataConnection, socket_buffer_size: usize) -> Result<TcpStream, ResourceError> {
    match &data.mode {
        DataMode::None => Err(ResourceError::NoDataPortAvailable),
        DataMode::Port(peer) => {
            let stream = TcpStream::connect(peer).map_err(|e| {
                error!("PORT connect to {peer} failed: {e}");
                ResourceError::NoDataPortAvailable
            })?;
            configure_buffers(&stream, socket_buffer_size);
            Ok(stream)
        }
        DataMode::Pasv { listener, .. } => accept_with_retry(listener, socket_buffer_size),
    }
}

fn accept_with_retry(listener: &std::net::TcpListener, socket_buffer_size: usize) -> Result<TcpStream, ResourceError> {
    const ACCEPT_ATTEMPTS: u32 = 50;
    const ACCEPT_SLEEP_MS: u64 = 100;

    listener.set_nonblocking(true).map_err(|e| {
        error!("failed to set PASV listener non-blocking: {e}");
        ResourceError::NoDataPortAvailable
    })?;

    for _ in 0..ACCEPT_ATTEMPTS {
        match listener.accept() {
            Ok((stream, _addr)) => {
                stream.set_nonblocking(false).ok();
                configure_buffers(&stream, socket_buffer_size);
                return Ok(stream);
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(ACCEPT_SLEEP_MS));
            }
            Err(e) => {
                error!("failed to accept data connection: {e}");
                return Err(ResourceError::NoDataPortAvailable);
            }
        }
    }

    error!("timeout waiting for PASV data connection");
    Err(ResourceError::NoDataPortAvailable)
}

fn configure_buffers(stream: &TcpStream, size: usize) {
    // std::net has no portable SO_RCVBUF/SO_SNDBUF setter; sized reads in
    // `transfer.rs` approximate the spec's socket-buffer-size knob instead.
    let _ = (stream, size);
}

/// Tears down the data connection (spec §4.6): releases a PASV port back
/// to the allocator and resets the session to `DataMode::None`. Called on
/// transfer completion, `ABOR`, and session teardown.
pub fn reset_data_connection(data: &mut DataConnection, allocator: &PasvPortAllocator) {
    if let Some(port) = data.clear() {
        allocator.release(port);
    }
}
