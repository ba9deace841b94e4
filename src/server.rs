//! Module `server`
//!
//! The top-level `Server`: binds the control listener, owns the
//! process-wide collaborators every session needs (`UserRegistry`,
//! `EventSinks`, the `RemoteFs` backend, the PASV port allocator), and
//! runs the acceptor loop that spawns one `client_handler::handle_client`
//! thread per connection (spec §4.1/§5). Grounded in the teacher's
//! `Server` struct and `accept_client` loop, generalized from its fixed
//! `client_registry: Arc<Mutex<HashMap<..>>>` to a `SessionRegistry` of
//! lightweight shutdown handles, since `Client` state itself now lives
//! purely on its own connection's thread stack (no other thread ever
//! reaches into it) but `stop_listening` still needs a way to kick every
//! live session (spec §4.1, data model's "Server holds a weak link for
//! enumeration and shutdown").

use std::collections::HashMap;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{error, info};

use crate::channel_registry::PasvPortAllocator;
use crate::client_handler::handle_client;
use crate::config::ServerConfig;
use crate::error::ConfigError;
use crate::events::{Event, EventSinks};
use crate::remote_fs::{LocalFsRemote, RemoteFs};
use crate::user::{Privilege, UserRegistry};

/// A registry of live sessions' control-socket clones, kept only so
/// `stop_listening` can shut every one of them down without reaching
/// into session state owned by another thread (spec §4.6's `init_delete`
/// is "non-blocking: shuts down the control and data sockets"; this is
/// that same mechanism driven from the server side).
#[derive(Clone, Default)]
struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<u64, TcpStream>>>,
    next_id: Arc<AtomicU64>,
}

impl SessionRegistry {
    fn register(&self, stream: &TcpStream) -> std::io::Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let clone = stream.try_clone()?;
        self.sessions.lock().unwrap().insert(id, clone);
        Ok(id)
    }

    fn deregister(&self, id: u64) {
        self.sessions.lock().unwrap().remove(&id);
    }

    fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Non-blocking kick of every live session's control socket. The
    /// sessions themselves observe the resulting read error/EOF, tear
    /// down their own data connection and worker, and deregister.
    fn kick_all(&self) {
        let sessions = self.sessions.lock().unwrap();
        for stream in sessions.values() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// Top-level FTP engine: one control listener, a shared user registry,
/// a shared remote-FS backend, and the PASV port allocator every
/// session's `PASV` draws from.
pub(crate) struct Server {
    config: Arc<ServerConfig>,
    listener: TcpListener,
    users: UserRegistry,
    events: EventSinks,
    fs: Arc<dyn RemoteFs + Send + Sync>,
    pasv: PasvPortAllocator,
    sessions: SessionRegistry,
    is_listening: Arc<AtomicBool>,
    is_accepting: Arc<AtomicBool>,
}

impl Server {
    /// Binds the control socket, loads the user registry from `config`,
    /// and connects the remote-FS backend (spec §4.1's `start_listening`).
    pub fn new(config: ServerConfig) -> Result<Self, ConfigError> {
        let config = Arc::new(config);
        let listener = TcpListener::bind(config.control_socket()).map_err(|e| ConfigError::Other(format!("failed to bind {}: {e}", config.control_socket())))?;
        let users = UserRegistry::load_from_config(&config)?;
        let fs = LocalFsRemote::new(config.remote_fs_root_path());
        fs.connect().map_err(|e| ConfigError::Other(format!("failed to connect remote FS backend: {e}")))?;

        Ok(Self {
            pasv: PasvPortAllocator::new(config.data_port_range()),
            listener,
            users,
            events: EventSinks::new(),
            fs: Arc::new(fs),
            sessions: SessionRegistry::default(),
            is_listening: Arc::new(AtomicBool::new(true)),
            is_accepting: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    /// Registers an event subscriber (spec §6). Must be called before `run`.
    pub fn subscribe<F>(&self, f: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.events.subscribe(f);
    }

    pub fn is_listening(&self) -> bool {
        self.is_listening.load(Ordering::SeqCst)
    }

    pub fn is_accepting(&self) -> bool {
        self.is_accepting.load(Ordering::SeqCst)
    }

    /// Flips the acceptor loop on; `run()` calls this itself, but it is
    /// exposed so a caller can tell the difference between "bound" and
    /// "accepting" (spec §4.1).
    pub fn start_accepting(&self) {
        self.is_accepting.store(true, Ordering::SeqCst);
    }

    /// Adds a user to the running server (spec §4.1's `add_user`).
    pub fn add_user(&self, login: &str, password: &str, home: &str, privileges: Privilege, max_clients: u32) -> Result<u64, ConfigError> {
        let id = self.users.add_user(login, password, home, privileges, max_clients)?;
        self.events.publish(Event::NewUser { login: login.to_string() });
        Ok(id)
    }

    /// Deletes a user by login (spec §4.1's `delete_user`). A user with
    /// active sessions is marked deleted and reaped on last logout
    /// (`UserRegistry::delete_user`); `DeleteUser` fires as soon as the
    /// mark succeeds, matching the admin-visible action rather than the
    /// eventual reap.
    pub fn delete_user(&self, login: &str) -> bool {
        match self.users.search_by_login(login) {
            Some(handle) => {
                let removed = self.users.delete_user(handle.id);
                if removed {
                    self.events.publish(Event::DeleteUser { login: login.to_string() });
                }
                removed
            }
            None => false,
        }
    }

    /// Shuts down the listener and every live session (spec §4.1's
    /// `stop_listening`): stops accepting, kicks every session's control
    /// socket, unblocks the acceptor's blocking `accept()` with a local
    /// wake-up connection, then waits for `run()` to observe the flag and
    /// return. Guarantees Testable Property 7: after this returns, no
    /// session or worker task remains.
    pub fn stop_listening(&self) {
        if !self.is_listening.load(Ordering::SeqCst) {
            return;
        }
        self.is_accepting.store(false, Ordering::SeqCst);
        self.sessions.kick_all();

        if let Ok(addr) = self.listener.local_addr() {
            let _ = TcpStream::connect(addr);
        }

        while self.is_listening.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Runs the acceptor loop until `stop_listening` is called or the
    /// listener errors out (spec §4.1's `StartListening` +
    /// `StartAccepting`, merged here since this engine has no separate
    /// "bound but not accepting" state once `run` starts).
    pub fn run(&self) {
        let local_addr = self.listener.local_addr().ok();
        if let Some(addr) = local_addr {
            self.events.publish(Event::StartListening { addr });
        }
        self.start_accepting();
        self.events.publish(Event::StartAccepting);
        info!("hdfs-ftpd listening on {}", self.config.control_socket());

        for stream in self.listener.incoming() {
            if !self.is_accepting() {
                break;
            }

            let cmd_stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    error!("error accepting connection: {e}");
                    self.events.publish(Event::ErrorListening { reason: e.to_string() });
                    continue;
                }
            };

            if !self.is_accepting() {
                // stop_listening's own wake-up connection; drop it.
                continue;
            }

            let peer_addr = match cmd_stream.peer_addr() {
                Ok(a) => a,
                Err(e) => {
                    error!("failed to read peer address: {e}");
                    continue;
                }
            };
            let server_addr = match cmd_stream.local_addr() {
                Ok(a) => a,
                Err(e) => {
                    error!("failed to read local address: {e}");
                    continue;
                }
            };

            let session_id = match self.sessions.register(&cmd_stream) {
                Ok(id) => id,
                Err(e) => {
                    error!("failed to allocate session for {peer_addr}: {e}");
                    self.events.publish(Event::MemError);
                    continue;
                }
            };
            self.events.publish(Event::NewClient { addr: peer_addr });

            let config = Arc::clone(&self.config);
            let users = self.users.clone();
            let events = self.events.clone();
            let fs = Arc::clone(&self.fs);
            let pasv = self.pasv.clone();
            let sessions = self.sessions.clone();

            thread::spawn(move || {
                handle_client(cmd_stream, peer_addr, server_addr, config, users, events, fs, pasv);
                sessions.deregister(session_id);
            });
        }

        // belt-and-braces: if `run` exited some other way (listener
        // error) rather than through `stop_listening`, still kick
        // whatever sessions remain before declaring the server stopped.
        self.sessions.kick_all();
        while self.sessions.len() > 0 {
            thread::sleep(Duration::from_millis(10));
        }

        self.is_accepting.store(false, Ordering::SeqCst);
        self.is_listening.store(false, Ordering::SeqCst);
        self.events.publish(Event::StopAccepting);
        self.events.publish(Event::StopListening);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserConfig;
    use std::net::TcpStream;

    fn test_config(root: &std::path::Path) -> ServerConfig {
        ServerConfig {
            listening_ip: "127.0.0.1".into(),
            listening_port: 0,
            data_port_start: 41000,
            data_port_len: 20,
            max_password_tries: 3,
            check_pass_delay_ms: 0,
            no_login_timeout_secs: 0,
            no_transfer_timeout_secs: 0,
            transfer_buffer_size: 4096,
            transfer_socket_buffer_size: 8192,
            enable_fxp: true,
            enable_zlib: false,
            hdfs_namenode_host: "127.0.0.1".into(),
            hdfs_namenode_port: 0,
            hdfs_buffer_size: 0,
            hdfs_replication: 0,
            hdfs_block_size: 0,
            remote_fs_root: root.display().to_string(),
            users: vec![UserConfig {
                username: "user".into(),
                password: "pass".into(),
                home_path: "/".into(),
                privs: 63,
                max_clients: 0,
            }],
            log_directory: "logs".into(),
            enable_user_logging: false,
            enable_client_logging: false,
            enable_server_logging: false,
        }
    }

    #[test]
    fn stop_listening_tears_down_live_sessions() {
        let root = std::env::temp_dir().join(format!("hdfs-ftpd-server-test-{}", std::process::id()));
        std::fs::create_dir_all(&root).unwrap();
        let server = Server::new(test_config(&root)).unwrap();
        let addr = server.listener.local_addr().unwrap();

        let server = Arc::new(server);
        let run_server = Arc::clone(&server);
        let run_handle = thread::spawn(move || run_server.run());

        while !server.is_accepting() {
            thread::sleep(Duration::from_millis(5));
        }

        let _live_session = TcpStream::connect(addr).unwrap();
        while server.sessions.len() == 0 {
            thread::sleep(Duration::from_millis(5));
        }

        server.stop_listening();

        assert!(!server.is_listening());
        assert!(!server.is_accepting());
        assert_eq!(server.sessions.len(), 0);

        run_handle.join().unwrap();
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn add_and_delete_user_round_trip() {
        let root = std::env::temp_dir().join(format!("hdfs-ftpd-server-test-adduser-{}", std::process::id()));
        std::fs::create_dir_all(&root).unwrap();
        let server = Server::new(test_config(&root)).unwrap();

        server.add_user("carol", "pw", "/u/carol", Privilege::all(), 0).unwrap();
        assert!(server.users.search_by_login("carol").is_some());
        assert!(server.delete_user("carol"));
        assert!(server.users.search_by_login("carol").is_none());
        assert!(!server.delete_user("carol"), "deleting an already-deleted user reports false");

        std::fs::remove_dir_all(&root).ok();
    }
}
