//! Module `error`
//!
//! Error taxonomy for the FTP engine. Each variant knows both how to
//! describe itself for logs and which FTP reply it maps to, so a
//! handler can turn `Err(e)` straight into a wire reply with `e.reply()`.

use std::fmt;
use std::io;

/// Bad configuration supplied at load time (non-fatal; reported at the admin boundary).
#[derive(Debug)]
pub enum ConfigError {
    InvalidAddress(String),
    InvalidPort(String),
    InvalidPrivileges(u16),
    DuplicateUser(String),
    LoginTooLong(String),
    PasswordTooLong(String),
    EmptyDataPortRange,
    Other(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidAddress(a) => write!(f, "invalid listening address: {a}"),
            ConfigError::InvalidPort(p) => write!(f, "invalid port: {p}"),
            ConfigError::InvalidPrivileges(p) => write!(f, "privilege bitmask out of range: {p}"),
            ConfigError::DuplicateUser(u) => write!(f, "duplicate login: {u}"),
            ConfigError::LoginTooLong(u) => write!(f, "login longer than 16 bytes: {u}"),
            ConfigError::PasswordTooLong(u) => write!(f, "password longer than 16 bytes for user {u}"),
            ConfigError::EmptyDataPortRange => write!(f, "data port range is empty"),
            ConfigError::Other(m) => write!(f, "{m}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Protocol-level failure: syntax, wrong state, bad parameter, or unimplemented.
#[derive(Debug)]
pub enum ProtocolError {
    Syntax,
    WrongState,
    BadParameter(String),
    NotImplemented,
}

impl ProtocolError {
    pub fn reply(&self) -> (u16, &'static str) {
        match self {
            ProtocolError::Syntax => (500, "Syntax error, command unrecognized"),
            ProtocolError::WrongState => (503, "Bad sequence of commands"),
            ProtocolError::BadParameter(_) => (501, "Syntax error in parameters or arguments"),
            ProtocolError::NotImplemented => (502, "Command not implemented"),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Syntax => write!(f, "syntax error"),
            ProtocolError::WrongState => write!(f, "command not valid in this state"),
            ProtocolError::BadParameter(p) => write!(f, "bad parameter: {p}"),
            ProtocolError::NotImplemented => write!(f, "not implemented"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Authentication failures: bad credentials, too many tries, too many clients for a user.
#[derive(Debug)]
pub enum AuthError {
    UnknownUser(String),
    BadPassword(String),
    TooManyTries,
    TooManyClients(String),
    NotLoggedIn,
}

impl AuthError {
    pub fn reply(&self) -> (u16, String) {
        match self {
            AuthError::UnknownUser(_) => (530, "Invalid username".into()),
            AuthError::BadPassword(_) => (530, "Invalid password".into()),
            AuthError::TooManyTries => (530, "Too many password attempts".into()),
            AuthError::TooManyClients(u) => (530, format!("User {u} has reached max clients")),
            AuthError::NotLoggedIn => (530, "Not logged in".into()),
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::UnknownUser(u) => write!(f, "unknown user: {u}"),
            AuthError::BadPassword(u) => write!(f, "bad password for user: {u}"),
            AuthError::TooManyTries => write!(f, "too many password tries"),
            AuthError::TooManyClients(u) => write!(f, "max clients reached for user: {u}"),
            AuthError::NotLoggedIn => write!(f, "not logged in"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Remote-FS refusals: not-found/permission/escape, mid-transfer failure, or bad name.
#[derive(Debug)]
pub enum FilesystemError {
    NotFound(String),
    PermissionDenied(String),
    PathEscape(String),
    BadName(String),
    MidTransfer(io::Error),
}

impl FilesystemError {
    pub fn reply(&self) -> (u16, String) {
        match self {
            FilesystemError::NotFound(p) => (550, format!("{p}: No such file or directory")),
            FilesystemError::PermissionDenied(p) => (550, format!("{p}: Permission denied")),
            FilesystemError::PathEscape(p) => (550, format!("{p}: Not a valid path")),
            FilesystemError::BadName(p) => (553, format!("{p}: Requested action not taken")),
            FilesystemError::MidTransfer(e) => (451, format!("Requested action aborted: {e}")),
        }
    }
}

impl fmt::Display for FilesystemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilesystemError::NotFound(p) => write!(f, "not found: {p}"),
            FilesystemError::PermissionDenied(p) => write!(f, "permission denied: {p}"),
            FilesystemError::PathEscape(p) => write!(f, "path escapes sandbox: {p}"),
            FilesystemError::BadName(p) => write!(f, "invalid name: {p}"),
            FilesystemError::MidTransfer(e) => write!(f, "transfer failed: {e}"),
        }
    }
}

impl std::error::Error for FilesystemError {}

impl From<io::Error> for FilesystemError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FilesystemError::NotFound(err.to_string()),
            io::ErrorKind::PermissionDenied => FilesystemError::PermissionDenied(err.to_string()),
            _ => FilesystemError::MidTransfer(err),
        }
    }
}

/// Exhausted resources: no PASV ports left, or out of memory allocating a session.
#[derive(Debug)]
pub enum ResourceError {
    NoDataPortAvailable,
    OutOfMemory,
}

impl ResourceError {
    pub fn reply(&self) -> (u16, &'static str) {
        match self {
            ResourceError::NoDataPortAvailable => (425, "Can't open data connection"),
            ResourceError::OutOfMemory => (421, "Service not available, out of resources"),
        }
    }
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::NoDataPortAvailable => write!(f, "no data port available"),
            ResourceError::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

impl std::error::Error for ResourceError {}

/// Top-level error uniting every domain, so call sites can propagate with `?`
/// and translate to a reply at the smallest scope that can send one (spec §7).
#[derive(Debug)]
pub enum FtpError {
    Config(ConfigError),
    Protocol(ProtocolError),
    Auth(AuthError),
    Filesystem(FilesystemError),
    Resource(ResourceError),
}

impl FtpError {
    pub fn reply(&self) -> (u16, String) {
        match self {
            FtpError::Config(e) => (550, e.to_string()),
            FtpError::Protocol(e) => {
                let (code, msg) = e.reply();
                (code, msg.to_string())
            }
            FtpError::Auth(e) => e.reply(),
            FtpError::Filesystem(e) => e.reply(),
            FtpError::Resource(e) => {
                let (code, msg) = e.reply();
                (code, msg.to_string())
            }
        }
    }
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FtpError::Config(e) => write!(f, "{e}"),
            FtpError::Protocol(e) => write!(f, "{e}"),
            FtpError::Auth(e) => write!(f, "{e}"),
            FtpError::Filesystem(e) => write!(f, "{e}"),
            FtpError::Resource(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for FtpError {}

impl From<ConfigError> for FtpError {
    fn from(e: ConfigError) -> Self {
        FtpError::Config(e)
    }
}
impl From<ProtocolError> for FtpError {
    fn from(e: ProtocolError) -> Self {
        FtpError::Protocol(e)
    }
}
impl From<AuthError> for FtpError {
    fn from(e: AuthError) -> Self {
        FtpError::Auth(e)
    }
}
impl From<FilesystemError> for FtpError {
    fn from(e: FilesystemError) -> Self {
        FtpError::Filesystem(e)
    }
}
impl From<ResourceError> for FtpError {
    fn from(e: ResourceError) -> Self {
        FtpError::Resource(e)
    }
}
impl From<io::Error> for FtpError {
    fn from(e: io::Error) -> Self {
        FtpError::Filesystem(FilesystemError::from(e))
    }
}
