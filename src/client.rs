//! Module `client`
//!
//! `Client`: the per-connection session state (spec §3's `ClientSession`).
//! Grounded in the teacher's `Client` struct (plain fields + getters/
//! setters), extended from its three auth booleans to the full auth
//! state machine, working directory, rename-from, data connection, and
//! timers spec §4.4-§4.6 require.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::channel_registry::DataConnection;
use crate::user::UserHandle;

/// Authentication state machine (spec §4.4's table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthed,
    AwaitPass,
    LoggedIn,
}

/// Per-connection session state. One `Client` per control socket; owned
/// exclusively by its control task (spec §5 — no cross-session locking).
pub struct Client {
    pub peer_addr: SocketAddr,
    pub server_addr: SocketAddr,

    pub auth_state: AuthState,
    pub pending_login: Option<String>,
    pub user: Option<UserHandle>,
    pub failed_password_tries: u32,

    pub cwd: String,
    pub rename_from: Option<String>,

    pub data: DataConnection,
    pub transfer_busy: bool,

    pub client_software: Option<String>,
    pub command_buffer: String,

    pub last_activity: Instant,
    pub no_login_deadline: Option<Instant>,
    pub no_transfer_deadline: Option<Instant>,
}

impl Client {
    pub fn new(peer_addr: SocketAddr, server_addr: SocketAddr, no_login_timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            peer_addr,
            server_addr,
            auth_state: AuthState::Unauthed,
            pending_login: None,
            user: None,
            failed_password_tries: 0,
            cwd: "/".to_string(),
            rename_from: None,
            data: DataConnection::default(),
            transfer_busy: false,
            client_software: None,
            command_buffer: String::new(),
            last_activity: now,
            no_login_deadline: if no_login_timeout.is_zero() { None } else { Some(now + no_login_timeout) },
            no_transfer_deadline: None,
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.auth_state == AuthState::LoggedIn && self.user.is_some()
    }

    /// Re-arms the no-transfer timer (commands and transfer activity both
    /// count, per spec §4.4's "resets timers" rule). A zero `timeout`
    /// disables the timer.
    pub fn touch(&mut self, no_transfer_timeout: Duration) {
        self.last_activity = Instant::now();
        self.no_transfer_deadline = if self.is_logged_in() && !no_transfer_timeout.is_zero() {
            Some(self.last_activity + no_transfer_timeout)
        } else {
            None
        };
    }

    /// Transitions into `LOGGED_IN`, clearing the pending-login and
    /// password-tries counters and disarming the no-login timer.
    pub fn complete_login(&mut self, user: UserHandle) {
        self.user = Some(user);
        self.auth_state = AuthState::LoggedIn;
        self.pending_login = None;
        self.failed_password_tries = 0;
        self.no_login_deadline = None;
        self.cwd = "/".to_string();
    }

    /// Logs the session out (re-login via a fresh `USER`, or teardown).
    /// Returns the previous user handle so the caller can release its
    /// registry reference.
    pub fn logout(&mut self) -> Option<UserHandle> {
        self.auth_state = AuthState::Unauthed;
        self.rename_from = None;
        self.user.take()
    }

    pub fn expired_no_login(&self) -> bool {
        matches!(self.no_login_deadline, Some(deadline) if Instant::now() >= deadline)
    }

    pub fn expired_no_transfer(&self) -> bool {
        matches!(self.no_transfer_deadline, Some(deadline) if Instant::now() >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn starts_unauthed_with_root_cwd() {
        let c = Client::new(addr(1), addr(2), Duration::ZERO);
        assert_eq!(c.auth_state, AuthState::Unauthed);
        assert_eq!(c.cwd, "/");
        assert!(!c.is_logged_in());
    }

    #[test]
    fn complete_login_resets_failed_tries_and_cwd() {
        let mut c = Client::new(addr(1), addr(2), Duration::ZERO);
        c.failed_password_tries = 2;
        c.complete_login(UserHandle {
            id: 1,
            login: "alice".into(),
            home: "/u/alice".into(),
            privileges: Default::default(),
            max_clients: 0,
        });
        assert!(c.is_logged_in());
        assert_eq!(c.failed_password_tries, 0);
    }

    #[test]
    fn zero_timeout_never_expires() {
        let c = Client::new(addr(1), addr(2), Duration::ZERO);
        assert!(!c.expired_no_login());
    }
}
