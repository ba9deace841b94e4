//! Module `user`
//!
//! The process-wide user registry (spec §3/§4.2). Grounded in
//! `original_source/CFtpServer.h`'s `CUserEntry` (intrusive doubly
//! linked list under `UserListLock`) and the teacher's
//! `Arc<Mutex<HashMap<..>>>` registry idiom from `server.rs`. Per the
//! design note "intrusive doubly-linked registries -> indexed
//! collections", the linked list becomes a keyed map plus a monotonic
//! id so teardown is "drain the collection", not pointer surgery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::{ServerConfig, UserConfig, MAX_LOGIN_LEN, MAX_PASSWORD_LEN};
use crate::error::ConfigError;
use crate::path::simplify;

/// Privilege bitmask (spec §6). Bits above 0x20 are rejected at load time
/// (`ServerConfig::validate`); `READFILE..DELETEDIR` mirror
/// `original_source/CFtpServer.h`'s anonymous enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Privilege(u16);

impl Privilege {
    pub const READFILE: Privilege = Privilege(0x01);
    pub const WRITEFILE: Privilege = Privilege(0x02);
    pub const DELETEFILE: Privilege = Privilege(0x04);
    pub const LIST: Privilege = Privilege(0x08);
    pub const CREATEDIR: Privilege = Privilege(0x10);
    pub const DELETEDIR: Privilege = Privilege(0x20);

    pub fn all() -> Privilege {
        Privilege(0x3f)
    }

    pub fn from_bits_truncate(bits: u16) -> Privilege {
        Privilege(bits & 0x3f)
    }

    pub fn contains(self, other: Privilege) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Privilege {
    type Output = Privilege;
    fn bitor(self, rhs: Privilege) -> Privilege {
        Privilege(self.0 | rhs.0)
    }
}

/// A single user account.
#[derive(Debug)]
pub struct User {
    pub id: u64,
    pub login: String,
    pub password: String,
    pub home: String,
    pub privileges: Privilege,
    pub max_clients: u32,
    pub current_clients: u32,
    pub deleted: bool,
    pub enabled: bool,
}

impl User {
    /// Empty password is an "anonymous-style" accept-any account (spec §3/§4.4).
    pub fn accepts_any_password(&self) -> bool {
        self.password.is_empty()
    }

    pub fn check_password(&self, candidate: &str) -> bool {
        self.accepts_any_password() || self.password == candidate
    }

    pub fn has_capacity(&self) -> bool {
        self.max_clients == 0 || self.current_clients < self.max_clients
    }
}

/// Process-wide registry of users, guarded by one lock (`user_list_lock` in spec §5).
#[derive(Clone)]
pub struct UserRegistry {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    users: HashMap<u64, User>,
    next_id: u64,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                users: HashMap::new(),
                next_id: 1,
            })),
        }
    }

    /// Loads every user from a validated `ServerConfig`. Assumes the config
    /// has already passed `ServerConfig::validate` (login length, uniqueness,
    /// privilege range); any violation here is a programming error, not an
    /// admin-API failure, so it is still surfaced as a `ConfigError`.
    pub fn load_from_config(config: &ServerConfig) -> Result<Self, ConfigError> {
        let registry = Self::new();
        for user in &config.users {
            registry.add_user(&user.username, &user.password, &user.home_path, user.privileges(), user.max_clients)?;
        }
        Ok(registry)
    }

    /// Adds a user. Refuses duplicate logins (case-insensitive) and logins
    /// longer than 16 bytes; canonicalizes the home path (no `..`, no
    /// trailing `/` except root).
    pub fn add_user(&self, login: &str, password: &str, home: &str, privileges: Privilege, max_clients: u32) -> Result<u64, ConfigError> {
        if login.len() > MAX_LOGIN_LEN {
            return Err(ConfigError::LoginTooLong(login.to_string()));
        }
        if password.len() > MAX_PASSWORD_LEN {
            return Err(ConfigError::PasswordTooLong(login.to_string()));
        }
        let home = simplify(home.trim()).map_err(|_| ConfigError::Other(format!("invalid home path for {login}: {home}")))?;

        let mut inner = self.inner.lock().unwrap();
        let lower = login.to_ascii_lowercase();
        if inner.users.values().any(|u| !u.deleted && u.login.to_ascii_lowercase() == lower) {
            return Err(ConfigError::DuplicateUser(login.to_string()));
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.users.insert(
            id,
            User {
                id,
                login: login.to_string(),
                password: password.to_string(),
                home,
                privileges,
                max_clients,
                current_clients: 0,
                deleted: false,
                enabled: true,
            },
        );
        Ok(id)
    }

    /// Marks a user deleted. A user with active sessions is not physically
    /// removed; the last session to log out reaps it (spec §3/§4.2).
    pub fn delete_user(&self, id: u64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.users.get_mut(&id) {
            Some(user) => {
                user.deleted = true;
                if user.current_clients == 0 {
                    inner.users.remove(&id);
                }
                true
            }
            None => false,
        }
    }

    /// First non-deleted user matching `name` case-insensitively.
    pub fn search_by_login(&self, name: &str) -> Option<UserHandle> {
        let inner = self.inner.lock().unwrap();
        let lower = name.to_ascii_lowercase();
        inner
            .users
            .values()
            .find(|u| !u.deleted && u.login.to_ascii_lowercase() == lower)
            .map(|u| UserHandle {
                id: u.id,
                login: u.login.clone(),
                home: u.home.clone(),
                privileges: u.privileges,
                max_clients: u.max_clients,
            })
    }

    /// Whether `login` logs in on a bare `USER` with no `PASS` needed.
    pub fn accepts_any_password(&self, login: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        let lower = login.to_ascii_lowercase();
        inner
            .users
            .values()
            .find(|u| !u.deleted && u.login.to_ascii_lowercase() == lower)
            .is_some_and(|u| u.accepts_any_password())
    }

    /// Checks `candidate` against `login`'s stored password.
    pub fn check_password(&self, login: &str, candidate: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        let lower = login.to_ascii_lowercase();
        inner
            .users
            .values()
            .find(|u| !u.deleted && u.login.to_ascii_lowercase() == lower)
            .is_some_and(|u| u.check_password(candidate))
    }

    /// Increments the session counter for a user, refusing if at capacity.
    /// Returns `false` (without incrementing) if the user is at `max_clients`.
    pub fn try_acquire(&self, id: u64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.users.get_mut(&id) {
            Some(user) if user.has_capacity() => {
                user.current_clients += 1;
                true
            }
            _ => false,
        }
    }

    /// Decrements the session counter; reaps the user if it was marked
    /// deleted and this was the last referencing session.
    pub fn release(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        let reap = match inner.users.get_mut(&id) {
            Some(user) => {
                user.current_clients = user.current_clients.saturating_sub(1);
                user.deleted && user.current_clients == 0
            }
            None => false,
        };
        if reap {
            inner.users.remove(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for UserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The narrow capability a `Client` holds for its logged-in user: only the
/// four fields a session needs, per the design note "friend-class reach-in
/// -> capability handles".
#[derive(Debug, Clone)]
pub struct UserHandle {
    pub id: u64,
    pub login: String,
    pub home: String,
    pub privileges: Privilege,
    pub max_clients: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_login_case_insensitive() {
        let reg = UserRegistry::new();
        reg.add_user("alice", "p", "/u/alice", Privilege::all(), 0).unwrap();
        assert!(reg.add_user("ALICE", "q", "/u/alice2", Privilege::all(), 0).is_err());
    }

    #[test]
    fn acquire_respects_max_clients() {
        let reg = UserRegistry::new();
        let id = reg.add_user("bob", "p", "/u/bob", Privilege::all(), 1).unwrap();
        assert!(reg.try_acquire(id));
        assert!(!reg.try_acquire(id));
        reg.release(id);
        assert!(reg.try_acquire(id));
    }

    #[test]
    fn delete_while_referenced_defers_removal() {
        let reg = UserRegistry::new();
        let id = reg.add_user("carl", "p", "/u/carl", Privilege::all(), 0).unwrap();
        reg.try_acquire(id);
        reg.delete_user(id);
        assert!(reg.search_by_login("carl").is_none(), "deleted users are not findable");
        reg.release(id);
        assert_eq!(reg.len(), 0, "last release reaps the deleted user");
    }
}
