//! Module `events`
//!
//! Observability sink for protocol-significant moments (spec §6). The
//! original C++ server exposes three raw function-pointer callbacks
//! (`OnServerEventCallback_t`, `OnUserEventCallback_t`,
//! `OnClientEventCallback_t`) each keyed by an `enum eEvents` and an
//! untyped `void *pArg`. Replaced here with one tagged `Event` enum
//! carrying typed payloads, and a small `EventSinks` registry of
//! `Fn(Event)` closures subscribers install at server construction.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use log::{error, info, warn};

/// A protocol-significant moment, carrying whatever payload the spec's event table needs.
#[derive(Debug, Clone)]
pub enum Event {
    // Lifecycle
    StartListening { addr: SocketAddr },
    StopListening,
    StartAccepting,
    StopAccepting,
    ErrorListening { reason: String },
    HdfsConnectError { client: SocketAddr, reason: String },
    MemError,
    ThreadError { reason: String },

    // User / session
    NewUser { login: String },
    DeleteUser { login: String },
    NewClient { addr: SocketAddr },
    DeleteClient { addr: SocketAddr },
    ClientDisconnect { addr: SocketAddr },
    ClientAuth { addr: SocketAddr, login: String },
    ClientSoftware { addr: SocketAddr, software: String },

    // Protocol activity
    RecvdCmdLine { addr: SocketAddr, line: String },
    SendReply { addr: SocketAddr, code: u16 },
    ClientUpload { addr: SocketAddr, path: String, bytes: u64 },
    ClientDownload { addr: SocketAddr, path: String, bytes: u64 },
    ClientList { addr: SocketAddr, path: String },
    ClientChangeDir { addr: SocketAddr, path: String },

    // Failures
    TooManyPassTries { addr: SocketAddr },
    NoLoginTimeout { addr: SocketAddr },
    NoTransferTimeout { addr: SocketAddr },
    ClientSockError { addr: SocketAddr, reason: String },
    ZlibVersionError,
    ZlibStreamError { addr: SocketAddr, reason: String },
}

type Sink = dyn Fn(&Event) + Send + Sync;

/// Subscriber registry. Cloning shares the same underlying subscriber list.
#[derive(Clone, Default)]
pub struct EventSinks {
    subscribers: Arc<Mutex<Vec<Box<Sink>>>>,
}

impl EventSinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber. Subscribers are invoked in registration order.
    pub fn subscribe<F>(&self, f: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribers.lock().unwrap().push(Box::new(f));
    }

    /// Publishes an event: logs it at a level appropriate to its severity,
    /// then fans it out to every subscriber.
    pub fn publish(&self, event: Event) {
        log_event(&event);
        for sub in self.subscribers.lock().unwrap().iter() {
            sub(&event);
        }
    }
}

fn log_event(event: &Event) {
    match event {
        Event::ErrorListening { reason } => error!("listen error: {reason}"),
        Event::HdfsConnectError { client, reason } => error!("HDFS connect error for {client}: {reason}"),
        Event::MemError => error!("out of memory allocating session"),
        Event::ThreadError { reason } => error!("worker thread error: {reason}"),
        Event::ZlibVersionError => error!("zlib version mismatch"),
        Event::ZlibStreamError { addr: client, reason } => error!("zlib stream error for {client}: {reason}"),
        Event::TooManyPassTries { addr } => warn!("{addr}: too many password tries, disconnecting"),
        Event::NoLoginTimeout { addr } => warn!("{addr}: no-login timeout"),
        Event::NoTransferTimeout { addr } => warn!("{addr}: no-transfer timeout"),
        Event::ClientSockError { addr, reason } => warn!("{addr}: socket error: {reason}"),
        Event::StartListening { addr } => info!("listening on {addr}"),
        Event::StopListening => info!("stopped listening"),
        Event::StartAccepting => info!("accepting connections"),
        Event::StopAccepting => info!("stopped accepting connections"),
        Event::NewUser { login } => info!("user added: {login}"),
        Event::DeleteUser { login } => info!("user deleted: {login}"),
        Event::NewClient { addr } => info!("new client: {addr}"),
        Event::DeleteClient { addr } => info!("client removed: {addr}"),
        Event::ClientDisconnect { addr } => info!("client disconnected: {addr}"),
        Event::ClientAuth { addr, login } => info!("{addr}: authenticated as {login}"),
        Event::ClientSoftware { addr, software } => info!("{addr}: client software {software}"),
        Event::ClientUpload { addr, path, bytes } => info!("{addr}: uploaded {path} ({bytes} bytes)"),
        Event::ClientDownload { addr, path, bytes } => info!("{addr}: downloaded {path} ({bytes} bytes)"),
        Event::ClientList { addr, path } => info!("{addr}: listed {path}"),
        Event::ClientChangeDir { addr, path } => info!("{addr}: cwd {path}"),
        Event::RecvdCmdLine { addr, line } => info!("{addr}: -> {line}"),
        Event::SendReply { addr, code } => info!("{addr}: <- {code}"),
    }
}
