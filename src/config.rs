//! Module `config`
//!
//! Startup configuration for the FTP engine (spec §6). Loaded once,
//! read without synchronization thereafter (§5's documented
//! precondition: configuration is only safe to mutate before
//! `start_listening`). Built on the teacher's `config` + `serde` stack;
//! field list and defaults follow `original_source/config.hpp`.

use std::net::IpAddr;
use std::path::PathBuf;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::user::Privilege;

/// Complete server configuration, loaded once at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listening_ip")]
    pub listening_ip: String,
    #[serde(default = "default_listening_port")]
    pub listening_port: u16,

    #[serde(default = "default_data_port_start")]
    pub data_port_start: u16,
    #[serde(default = "default_data_port_len")]
    pub data_port_len: u16,

    #[serde(default = "default_max_password_tries")]
    pub max_password_tries: u32,
    #[serde(default = "default_check_pass_delay")]
    pub check_pass_delay_ms: u64,
    #[serde(default)]
    pub no_login_timeout_secs: u64,
    #[serde(default)]
    pub no_transfer_timeout_secs: u64,

    #[serde(default = "default_transfer_buffer_size")]
    pub transfer_buffer_size: usize,
    #[serde(default = "default_transfer_socket_buffer_size")]
    pub transfer_socket_buffer_size: usize,

    #[serde(default = "default_true")]
    pub enable_fxp: bool,
    #[serde(default)]
    pub enable_zlib: bool,

    #[serde(default = "default_hdfs_host")]
    pub hdfs_namenode_host: String,
    #[serde(default)]
    pub hdfs_namenode_port: u16,
    #[serde(default)]
    pub hdfs_buffer_size: i32,
    #[serde(default)]
    pub hdfs_replication: u16,
    #[serde(default)]
    pub hdfs_block_size: i64,

    /// Root directory backing `LocalFsRemote`, the local stand-in for the
    /// real HDFS binding (spec §4.7 scopes the HDFS client itself out).
    #[serde(default = "default_remote_fs_root")]
    pub remote_fs_root: String,

    #[serde(default)]
    pub users: Vec<UserConfig>,

    #[serde(default = "default_log_directory")]
    pub log_directory: String,
    #[serde(default)]
    pub enable_user_logging: bool,
    #[serde(default = "default_true")]
    pub enable_client_logging: bool,
    #[serde(default = "default_true")]
    pub enable_server_logging: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UserConfig {
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub home_path: String,
    #[serde(default)]
    pub privs: u16,
    #[serde(default)]
    pub max_clients: u32,
}

fn default_listening_ip() -> String {
    "0.0.0.0".into()
}
fn default_listening_port() -> u16 {
    2100
}
fn default_data_port_start() -> u16 {
    100
}
fn default_data_port_len() -> u16 {
    900
}
fn default_max_password_tries() -> u32 {
    3
}
fn default_check_pass_delay() -> u64 {
    500
}
fn default_transfer_buffer_size() -> usize {
    32 * 1024
}
fn default_transfer_socket_buffer_size() -> usize {
    64 * 1024
}
fn default_hdfs_host() -> String {
    "127.0.0.1".into()
}
fn default_remote_fs_root() -> String {
    "data".into()
}
fn default_log_directory() -> String {
    "logs".into()
}
fn default_true() -> bool {
    true
}

/// Byte limits carried over from the original C++ header's fixed buffers,
/// now enforced at the parser boundary instead of via fixed-size arrays.
pub const MAX_LOGIN_LEN: usize = 16;
pub const MAX_PASSWORD_LEN: usize = 16;
pub const MAX_PATH_LEN: usize = 4096;
pub const MAX_COMMAND_LINE_LEN: usize = MAX_PATH_LEN + 32;

impl ServerConfig {
    /// Loads configuration from `config.toml`, trying the teacher's two
    /// candidate locations, with environment overrides under the
    /// `HDFS_FTPD` prefix, then validates it.
    pub fn load() -> Result<Self, ConfigError> {
        let candidate_paths = ["hdfs-ftpd/config", "config"];
        let mut last_error = None;

        for path in candidate_paths {
            match Config::builder()
                .add_source(File::with_name(path).required(false))
                .add_source(Environment::with_prefix("HDFS_FTPD").separator("_"))
                .build()
            {
                Ok(settings) => match settings.try_deserialize::<ServerConfig>() {
                    Ok(cfg) => {
                        cfg.validate()?;
                        return Ok(cfg);
                    }
                    Err(e) => {
                        last_error = Some(e.to_string());
                        continue;
                    }
                },
                Err(e) => {
                    last_error = Some(e.to_string());
                    continue;
                }
            }
        }

        Err(ConfigError::Other(format!(
            "failed to load configuration from any of {candidate_paths:?}: {last_error:?}"
        )))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.listening_ip
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::InvalidAddress(self.listening_ip.clone()))?;

        if self.listening_port == 0 {
            return Err(ConfigError::InvalidPort("listening_port cannot be 0".into()));
        }
        if self.data_port_len == 0 {
            return Err(ConfigError::EmptyDataPortRange);
        }

        let mut seen = std::collections::HashSet::new();
        for user in &self.users {
            let key = user.username.to_ascii_lowercase();
            if !seen.insert(key) {
                return Err(ConfigError::DuplicateUser(user.username.clone()));
            }
            if user.username.len() > MAX_LOGIN_LEN {
                return Err(ConfigError::LoginTooLong(user.username.clone()));
            }
            if user.password.len() > MAX_PASSWORD_LEN {
                return Err(ConfigError::PasswordTooLong(user.username.clone()));
            }
            if user.privs > 63 {
                return Err(ConfigError::InvalidPrivileges(user.privs));
            }
        }

        Ok(())
    }

    pub fn control_socket(&self) -> String {
        format!("{}:{}", self.listening_ip, self.listening_port)
    }

    pub fn data_port_range(&self) -> std::ops::Range<u16> {
        self.data_port_start..self.data_port_start.saturating_add(self.data_port_len)
    }

    pub fn log_directory_path(&self) -> PathBuf {
        PathBuf::from(&self.log_directory)
    }

    pub fn remote_fs_root_path(&self) -> PathBuf {
        PathBuf::from(&self.remote_fs_root)
    }
}

impl UserConfig {
    pub fn privileges(&self) -> Privilege {
        Privilege::from_bits_truncate(self.privs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_user(login: &str) -> UserConfig {
        UserConfig {
            username: login.into(),
            password: "x".into(),
            home_path: "/u/a".into(),
            privs: 1,
            max_clients: 0,
        }
    }

    fn base_config(users: Vec<UserConfig>) -> ServerConfig {
        ServerConfig {
            listening_ip: "0.0.0.0".into(),
            listening_port: 2100,
            data_port_start: 100,
            data_port_len: 900,
            max_password_tries: 3,
            check_pass_delay_ms: 500,
            no_login_timeout_secs: 0,
            no_transfer_timeout_secs: 0,
            transfer_buffer_size: 32 * 1024,
            transfer_socket_buffer_size: 64 * 1024,
            enable_fxp: true,
            enable_zlib: false,
            hdfs_namenode_host: "127.0.0.1".into(),
            hdfs_namenode_port: 0,
            hdfs_buffer_size: 0,
            hdfs_replication: 0,
            hdfs_block_size: 0,
            remote_fs_root: "data".into(),
            users,
            log_directory: "logs".into(),
            enable_user_logging: false,
            enable_client_logging: true,
            enable_server_logging: true,
        }
    }

    #[test]
    fn rejects_privileges_above_63() {
        let mut user = base_user("alice");
        user.privs = 64;
        let cfg = base_config(vec![user]);
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidPrivileges(64))));
    }

    #[test]
    fn rejects_duplicate_logins_case_insensitively() {
        let cfg = base_config(vec![base_user("Alice"), base_user("alice")]);
        assert!(matches!(cfg.validate(), Err(ConfigError::DuplicateUser(_))));
    }

    #[test]
    fn rejects_empty_data_port_range() {
        let mut cfg = base_config(vec![]);
        cfg.data_port_len = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::EmptyDataPortRange)));
    }
}
