//! Crate root: declares the FTP engine's modules and exposes `start_server`,
//! the external entry point `main.rs` calls after loading configuration.

/// FTP error taxonomy, each variant mapping to an FTP reply code.
pub mod error;

/// Tagged protocol-event stream and the subscriber registry for it.
pub mod events;

/// Startup configuration: TOML + env loading, validation, defaults.
pub mod config;

/// Path Resolver: virtual-path simplification and sandboxing.
pub mod path;

/// User registry: accounts, privileges, and session-count bookkeeping.
pub mod user;

/// The abstract remote-filesystem capability and its local-disk adapter.
pub mod remote_fs;

/// Per-session data-connection state and the PASV port allocator.
pub mod channel_registry;

/// FTP command enum and line parser.
pub mod command;

/// Per-connection session state (`Client`).
pub mod client;

/// Opens/tears down the data connection for a transfer.
pub mod data_channel;

/// The three transfer workers: retrieve, store, list.
pub mod transfer;

/// Per-command handler functions and the auth state machine.
pub mod handlers;

/// Owns one client's control socket for its whole lifetime.
pub mod client_handler;

/// Core server implementation: listener, acceptor loop, shared state.
mod server;

use crate::config::ServerConfig;
use crate::error::ConfigError;

/// Builds and runs the FTP engine from a loaded configuration. Blocks
/// until the control listener errors out.
pub fn start_server(config: ServerConfig) -> Result<(), ConfigError> {
    let server = server::Server::new(config)?;
    server.run();
    Ok(())
}
