//! Module `handlers`
//!
//! Per-command handler functions and the auth state machine (spec §4.4).
//! Grounded in the teacher's `handle_command` dispatch shape (one
//! function per command, a result type the control loop turns into
//! bytes), generalized from its 14-command demo set to the full table
//! and to real sandboxing/privilege/remote-FS calls instead of
//! hardcoded strings and `./test_dir`.
//!
//! Handlers never touch sockets directly for transfers: a transfer
//! command resolves to `Outcome::StartTransfer`, and `client_handler`
//! owns opening the data connection, writing `150`, and running the
//! worker (keeping socket I/O concentrated in one place, as the teacher
//! does in `client_handler.rs`/`data_channel.rs`).

use std::net::{IpAddr, SocketAddr};
use std::thread;
use std::time::Duration;

use crate::channel_registry::{DataMode, PasvPortAllocator, TransferMode};
use crate::client::{AuthState, Client};
use crate::command::{parse_list_args, Command};
use crate::config::ServerConfig;
use crate::error::FtpError;
use crate::events::{Event, EventSinks};
use crate::path::{build_remote, build_virtual};
use crate::remote_fs::RemoteFs;
use crate::transfer::{ListFlags, StoreKind};
use crate::user::{Privilege, UserRegistry};

/// One FTP reply, possibly multi-line (spec §4.4's reply-formatting rule).
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    pub fn simple(code: u16, text: impl Into<String>) -> Self {
        Self { code, lines: vec![text.into()] }
    }

    pub fn multi(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    pub fn to_wire(&self) -> String {
        if self.lines.len() == 1 {
            format!("{} {}\r\n", self.code, self.lines[0])
        } else {
            let mut out = String::new();
            for line in &self.lines[..self.lines.len() - 1] {
                out.push_str(&format!("{}-{}\r\n", self.code, line));
            }
            out.push_str(&format!("{} {}\r\n", self.code, self.lines[self.lines.len() - 1]));
            out
        }
    }
}

impl From<FtpError> for Reply {
    fn from(err: FtpError) -> Self {
        let (code, text) = err.reply();
        Reply::simple(code, text)
    }
}

pub enum TransferKind {
    Retrieve { restart_offset: u64 },
    Store(StoreKind),
    List { flags: ListFlags, bare_names: bool },
}

pub struct TransferRequest {
    pub kind: TransferKind,
    pub remote_path: String,
}

pub enum Outcome {
    Reply(Reply),
    Close(Reply),
    StartTransfer(TransferRequest),
    /// `PASV` needs a listener bound from the process-wide port allocator,
    /// which `client_handler` holds, not `HandlerCtx` (spec §4.5). The
    /// control loop binds it, stores the result on `client.data`, and
    /// writes the `227` reply itself.
    NeedsPasv,
    /// `ABOR` while a transfer is running: `client_handler` owns the
    /// worker thread and the cloned control socket it shuts down to
    /// cancel it (spec §4.6's cooperative-cancellation rule).
    NeedsAbor,
}

/// Shared, read-mostly context a handler needs beyond the client's own state.
pub struct HandlerCtx<'a> {
    pub client: &'a mut Client,
    pub users: &'a UserRegistry,
    pub config: &'a ServerConfig,
    pub events: &'a EventSinks,
    pub fs: Option<&'a dyn RemoteFs>,
    pub pasv: &'a PasvPortAllocator,
}

pub fn handle_command(ctx: &mut HandlerCtx, command: &Command) -> Outcome {
    if !is_allowed_before_login(command) && !ctx.client.is_logged_in() {
        return Outcome::Reply(Reply::simple(530, "Not logged in"));
    }

    match command {
        Command::Quit => handle_quit(ctx),
        Command::User(name) => handle_user(ctx, name),
        Command::Pass(password) => handle_pass(ctx, password),
        Command::Noop => Outcome::Reply(Reply::simple(200, "NOOP ok")),
        Command::Allo => Outcome::Reply(Reply::simple(200, "ALLO ok")),
        Command::SiteHelp => Outcome::Reply(Reply::simple(214, "SITE HELP")),
        Command::Help => Outcome::Reply(Reply::simple(214, "Help: see RFC 959")),
        Command::Syst => Outcome::Reply(Reply::simple(215, "UNIX Type: L8")),
        Command::Stru(arg) => handle_stru(arg),
        Command::Mode(arg) => handle_mode(ctx, arg),
        Command::Type(arg) => handle_type(ctx, arg),
        Command::Clnt(software) => handle_clnt(ctx, software),
        Command::Port(arg) => handle_port(ctx, arg),
        Command::Pasv => Outcome::NeedsPasv,
        Command::List(arg) => handle_list(ctx, arg, false),
        Command::Nlst(arg) => handle_list(ctx, arg, true),
        Command::Cwd(path) => handle_cwd(ctx, path),
        Command::Cdup => handle_cwd(ctx, ".."),
        Command::Feat => Outcome::Reply(handle_feat(ctx)),
        Command::Mdtm(path) => handle_mdtm(ctx, path),
        Command::Pwd => Outcome::Reply(Reply::simple(257, format!("\"{}\" is current directory.", ctx.client.cwd))),
        Command::Stat(arg) => handle_stat(ctx, arg),
        Command::Abor => {
            if ctx.client.transfer_busy {
                Outcome::NeedsAbor
            } else {
                Outcome::Reply(Reply::simple(225, "No transfer in progress"))
            }
        }
        Command::Rest(arg) => handle_rest(ctx, arg),
        Command::Retr(path) => handle_retr(ctx, path),
        Command::Stor(path) => handle_store(ctx, path, StoreKind::Create),
        Command::Appe(path) => handle_store(ctx, path, StoreKind::Append),
        Command::Stou(path) => handle_stou(ctx, path),
        Command::Size(path) => handle_size(ctx, path),
        Command::Dele(path) => handle_dele(ctx, path),
        Command::Rnfr(path) => handle_rnfr(ctx, path),
        Command::Rnto(path) => handle_rnto(ctx, path),
        Command::Mkd(path) => handle_mkd(ctx, path),
        Command::Rmd(path) => handle_rmd(ctx, path),
        Command::Opts(arg) => handle_opts(ctx, arg),
        Command::Unknown(_) => Outcome::Reply(Reply::simple(500, "Syntax error, command unrecognized")),
    }
}

fn is_allowed_before_login(command: &Command) -> bool {
    matches!(
        command,
        Command::Quit | Command::Noop | Command::Help | Command::Syst | Command::Feat | Command::Clnt(_) | Command::Opts(_) | Command::User(_) | Command::Pass(_)
    )
}

fn handle_quit(ctx: &mut HandlerCtx) -> Outcome {
    if let Some(user) = ctx.client.logout() {
        ctx.users.release(user.id);
    }
    Outcome::Close(Reply::simple(221, "Goodbye"))
}

fn handle_user(ctx: &mut HandlerCtx, name: &str) -> Outcome {
    if name.is_empty() {
        return Outcome::Reply(Reply::simple(501, "Syntax error in parameters or arguments"));
    }

    if ctx.client.auth_state == AuthState::LoggedIn {
        if let Some(prev) = ctx.client.logout() {
            ctx.users.release(prev.id);
        }
    }

    let handle = match ctx.users.search_by_login(name) {
        Some(h) => h,
        None => {
            ctx.client.pending_login = None;
            return Outcome::Reply(Reply::simple(530, "Invalid username"));
        }
    };

    if ctx.users.accepts_any_password(&handle.login) {
        if ctx.users.try_acquire(handle.id) {
            ctx.client.complete_login(handle.clone());
            ctx.events.publish(Event::ClientAuth { addr: ctx.client.peer_addr, login: handle.login.clone() });
            Outcome::Reply(Reply::simple(230, "Login successful"))
        } else {
            Outcome::Close(Reply::simple(530, format!("User {} has reached max clients", handle.login)))
        }
    } else {
        ctx.client.pending_login = Some(handle.login.clone());
        ctx.client.auth_state = AuthState::AwaitPass;
        Outcome::Reply(Reply::simple(331, "Password required"))
    }
}

fn handle_pass(ctx: &mut HandlerCtx, password: &str) -> Outcome {
    match ctx.client.auth_state {
        AuthState::Unauthed => Outcome::Reply(Reply::simple(503, "Login with USER first")),
        AuthState::LoggedIn => Outcome::Reply(Reply::simple(503, "Already logged in")),
        AuthState::AwaitPass => {
            let login = match ctx.client.pending_login.clone() {
                Some(l) => l,
                None => return Outcome::Reply(Reply::simple(503, "Login with USER first")),
            };

            thread::sleep(Duration::from_millis(ctx.config.check_pass_delay_ms));

            let handle = match ctx.users.search_by_login(&login) {
                Some(h) => h,
                None => return Outcome::Reply(Reply::simple(530, "Invalid username")),
            };

            if !ctx.users.check_password(&login, password) {
                ctx.client.failed_password_tries += 1;
                if ctx.client.failed_password_tries >= ctx.config.max_password_tries {
                    ctx.events.publish(Event::TooManyPassTries { addr: ctx.client.peer_addr });
                    return Outcome::Close(Reply::simple(530, "Too many password attempts"));
                }
                return Outcome::Reply(Reply::simple(530, "Invalid password"));
            }

            if !ctx.users.try_acquire(handle.id) {
                return Outcome::Close(Reply::simple(530, format!("User {} has reached max clients", handle.login)));
            }

            ctx.client.complete_login(handle.clone());
            ctx.events.publish(Event::ClientAuth { addr: ctx.client.peer_addr, login: handle.login });
            Outcome::Reply(Reply::simple(230, "Login successful"))
        }
    }
}

fn handle_stru(arg: &str) -> Outcome {
    if arg.eq_ignore_ascii_case("F") || arg.is_empty() {
        Outcome::Reply(Reply::simple(200, "Structure set to F"))
    } else {
        Outcome::Reply(Reply::simple(504, "Only file structure is supported"))
    }
}

fn handle_mode(ctx: &mut HandlerCtx, arg: &str) -> Outcome {
    match arg.to_ascii_uppercase().as_str() {
        "S" | "" => {
            ctx.client.data.transfer_mode = TransferMode::Stream;
            Outcome::Reply(Reply::simple(200, "Mode set to S"))
        }
        "Z" if ctx.config.enable_zlib => {
            ctx.client.data.transfer_mode = TransferMode::Zlib;
            Outcome::Reply(Reply::simple(200, "Mode set to Z"))
        }
        _ => Outcome::Reply(Reply::simple(504, "Command not implemented for that parameter")),
    }
}

fn handle_type(ctx: &mut HandlerCtx, arg: &str) -> Outcome {
    use crate::channel_registry::TransferType;
    let upper = arg.to_ascii_uppercase();
    let first = upper.chars().next().unwrap_or('I');
    match first {
        'A' => {
            ctx.client.data.transfer_type = TransferType::Ascii;
            Outcome::Reply(Reply::simple(200, "Type set to A"))
        }
        'I' | 'L' => {
            ctx.client.data.transfer_type = TransferType::Binary;
            Outcome::Reply(Reply::simple(200, "Type set to I"))
        }
        'E' => {
            ctx.client.data.transfer_type = TransferType::Ebcdic;
            Outcome::Reply(Reply::simple(200, "Type set to E"))
        }
        _ => Outcome::Reply(Reply::simple(504, "Command not implemented for that parameter")),
    }
}

fn handle_clnt(ctx: &mut HandlerCtx, software: &str) -> Outcome {
    ctx.client.client_software = Some(software.to_string());
    ctx.events.publish(Event::ClientSoftware { addr: ctx.client.peer_addr, software: software.to_string() });
    Outcome::Reply(Reply::simple(200, "CLNT ok"))
}

fn handle_port(ctx: &mut HandlerCtx, arg: &str) -> Outcome {
    let octets: Vec<&str> = arg.split(',').map(str::trim).collect();
    if octets.len() != 6 {
        return Outcome::Reply(Reply::simple(501, "Syntax error in parameters or arguments"));
    }
    let parsed: Result<Vec<u8>, _> = octets[..4].iter().map(|s| s.parse::<u8>()).collect();
    let parsed = match parsed {
        Ok(v) => v,
        Err(_) => return Outcome::Reply(Reply::simple(501, "Syntax error in parameters or arguments")),
    };
    let (p1, p2) = match (octets[4].parse::<u16>(), octets[5].parse::<u16>()) {
        (Ok(a), Ok(b)) if a <= 255 && b <= 255 => (a, b),
        _ => return Outcome::Reply(Reply::simple(501, "Syntax error in parameters or arguments")),
    };
    let port = p1 * 256 + p2;
    let ip = IpAddr::from([parsed[0], parsed[1], parsed[2], parsed[3]]);

    if !ctx.config.enable_fxp && ip != ctx.client.peer_addr.ip() {
        return Outcome::Reply(Reply::simple(501, "PORT IP must match control connection"));
    }

    if let Some(stale_port) = ctx.client.data.clear() {
        ctx.pasv.release(stale_port);
    }
    ctx.client.data.mode = DataMode::Port(SocketAddr::new(ip, port));
    Outcome::Reply(Reply::simple(200, "PORT command successful"))
}

fn resolve_path(ctx: &HandlerCtx, asked: &str) -> Result<(String, String), Reply> {
    let home = match &ctx.client.user {
        Some(u) => u.home.clone(),
        None => return Err(Reply::simple(530, "Not logged in")),
    };
    let virt = build_virtual(&ctx.client.cwd, asked).map_err(|e| Reply::from(FtpError::from(e)))?;
    let remote = build_remote(&home, &virt).map_err(|e| Reply::from(FtpError::from(e)))?;
    Ok((virt, remote))
}

fn require_privilege(ctx: &HandlerCtx, priv_needed: Privilege) -> Result<(), Reply> {
    match &ctx.client.user {
        Some(u) if u.privileges.contains(priv_needed) => Ok(()),
        Some(_) => Err(Reply::simple(550, "Permission denied")),
        None => Err(Reply::simple(530, "Not logged in")),
    }
}

fn handle_cwd(ctx: &mut HandlerCtx, asked: &str) -> Outcome {
    let (virt, remote) = match resolve_path(ctx, asked) {
        Ok(v) => v,
        Err(r) => return Outcome::Reply(r),
    };
    let fs = match ctx.fs {
        Some(fs) => fs,
        None => return Outcome::Reply(Reply::simple(421, "Service not available")),
    };
    match fs.stat(&remote) {
        Ok(info) if info.is_dir() => {
            ctx.client.cwd = virt.clone();
            ctx.events.publish(Event::ClientChangeDir { addr: ctx.client.peer_addr, path: virt.clone() });
            Outcome::Reply(Reply::simple(250, format!("\"{virt}\" is current directory.")))
        }
        Ok(_) => Outcome::Reply(Reply::simple(550, "Not a directory")),
        Err(e) => Outcome::Reply(Reply::from(FtpError::from(e))),
    }
}

fn handle_feat(ctx: &HandlerCtx) -> Reply {
    let mut lines = vec!["Features:".to_string(), " SIZE".to_string(), " MDTM".to_string(), " REST STREAM".to_string(), " CLNT".to_string()];
    if ctx.config.enable_zlib {
        lines.push(" MODE Z".to_string());
    }
    lines.push("End".to_string());
    Reply::multi(211, lines)
}

fn handle_mdtm(ctx: &mut HandlerCtx, path: &str) -> Outcome {
    if let Err(r) = require_privilege(ctx, Privilege::READFILE) {
        return Outcome::Reply(r);
    }
    let (_virt, remote) = match resolve_path(ctx, path) {
        Ok(v) => v,
        Err(r) => return Outcome::Reply(r),
    };
    let fs = match ctx.fs {
        Some(fs) => fs,
        None => return Outcome::Reply(Reply::simple(421, "Service not available")),
    };
    match fs.stat(&remote) {
        Ok(info) => {
            use chrono::{DateTime, Utc};
            let dt: DateTime<Utc> = info.mtime.into();
            Outcome::Reply(Reply::simple(213, dt.format("%Y%m%d%H%M%S").to_string()))
        }
        Err(e) => Outcome::Reply(Reply::from(FtpError::from(e))),
    }
}

fn handle_stat(ctx: &mut HandlerCtx, arg: &str) -> Outcome {
    if arg.is_empty() {
        return Outcome::Reply(Reply::simple(211, "Server status OK"));
    }
    if let Err(r) = require_privilege(ctx, Privilege::READFILE) {
        return Outcome::Reply(r);
    }
    let (flags, given) = parse_list_args(arg, true);
    let flags = crate::transfer::ListFlags { all: flags.all, dir_itself: flags.dir_itself, classify: flags.classify, long: flags.long };
    let target = if given.is_empty() { ctx.client.cwd.clone() } else { given };
    let (_virt, remote) = match resolve_path(ctx, &target) {
        Ok(v) => v,
        Err(r) => return Outcome::Reply(r),
    };
    let fs = match ctx.fs {
        Some(fs) => fs,
        None => return Outcome::Reply(Reply::simple(421, "Service not available")),
    };
    match crate::transfer::list(fs, &remote, flags, false) {
        Ok(listing) => {
            let mut lines: Vec<String> = listing.lines().map(str::to_string).collect();
            lines.insert(0, "Status follows:".to_string());
            lines.push("End of status".to_string());
            Outcome::Reply(Reply::multi(213, lines))
        }
        Err(e) => Outcome::Reply(Reply::from(FtpError::from(e))),
    }
}

fn handle_rest(ctx: &mut HandlerCtx, arg: &str) -> Outcome {
    match arg.parse::<u64>() {
        Ok(offset) => {
            ctx.client.data.restart_offset = offset;
            Outcome::Reply(Reply::simple(350, format!("Restarting at {offset}")))
        }
        Err(_) => Outcome::Reply(Reply::simple(501, "Syntax error in parameters or arguments")),
    }
}

fn handle_list(ctx: &mut HandlerCtx, arg: &str, is_nlst: bool) -> Outcome {
    if let Err(r) = require_privilege(ctx, Privilege::LIST) {
        return Outcome::Reply(r);
    }
    let (flags, given) = parse_list_args(arg, !is_nlst);
    let target = if given.is_empty() { ctx.client.cwd.clone() } else { given };
    let (_virt, remote) = match resolve_path(ctx, &target) {
        Ok(v) => v,
        Err(r) => return Outcome::Reply(r),
    };
    if ctx.client.transfer_busy {
        return Outcome::Reply(Reply::simple(425, "A transfer is already in progress"));
    }
    Outcome::StartTransfer(TransferRequest {
        kind: TransferKind::List {
            flags: ListFlags { all: flags.all, dir_itself: flags.dir_itself, classify: flags.classify, long: flags.long },
            bare_names: is_nlst,
        },
        remote_path: remote,
    })
}

fn handle_retr(ctx: &mut HandlerCtx, path: &str) -> Outcome {
    if let Err(r) = require_privilege(ctx, Privilege::READFILE) {
        return Outcome::Reply(r);
    }
    let (_virt, remote) = match resolve_path(ctx, path) {
        Ok(v) => v,
        Err(r) => return Outcome::Reply(r),
    };
    if ctx.client.transfer_busy {
        return Outcome::Reply(Reply::simple(425, "A transfer is already in progress"));
    }
    let restart_offset = ctx.client.data.restart_offset;
    ctx.client.data.restart_offset = 0;
    Outcome::StartTransfer(TransferRequest {
        kind: TransferKind::Retrieve { restart_offset },
        remote_path: remote,
    })
}

fn handle_store(ctx: &mut HandlerCtx, path: &str, kind: StoreKind) -> Outcome {
    if let Err(r) = require_privilege(ctx, Privilege::WRITEFILE) {
        return Outcome::Reply(r);
    }
    if ctx.client.data.restart_offset > 0 {
        return Outcome::Reply(Reply::simple(501, "REST not supported for uploads"));
    }
    let (_virt, remote) = match resolve_path(ctx, path) {
        Ok(v) => v,
        Err(r) => return Outcome::Reply(r),
    };
    if ctx.client.transfer_busy {
        return Outcome::Reply(Reply::simple(425, "A transfer is already in progress"));
    }
    Outcome::StartTransfer(TransferRequest { kind: TransferKind::Store(kind), remote_path: remote })
}

fn handle_stou(ctx: &mut HandlerCtx, path: &str) -> Outcome {
    if let Err(r) = require_privilege(ctx, Privilege::WRITEFILE) {
        return Outcome::Reply(r);
    }
    let base_name = if path.is_empty() { "file" } else { path };
    let (dir_virt, dir_remote) = match resolve_path(ctx, ".") {
        Ok(v) => v,
        Err(r) => return Outcome::Reply(r),
    };
    let fs = match ctx.fs {
        Some(fs) => fs,
        None => return Outcome::Reply(Reply::simple(421, "Service not available")),
    };
    let unique_name = match crate::transfer::unique_store_name(fs, &dir_remote, base_name) {
        Ok(n) => n,
        Err(e) => return Outcome::Reply(Reply::from(FtpError::from(e))),
    };
    let remote = if dir_remote.ends_with('/') { format!("{dir_remote}{unique_name}") } else { format!("{dir_remote}/{unique_name}") };
    let virt = if dir_virt.ends_with('/') { format!("{dir_virt}{unique_name}") } else { format!("{dir_virt}/{unique_name}") };
    if ctx.client.transfer_busy {
        return Outcome::Reply(Reply::simple(425, "A transfer is already in progress"));
    }
    let _ = virt;
    Outcome::StartTransfer(TransferRequest { kind: TransferKind::Store(StoreKind::Create), remote_path: remote })
}

fn handle_size(ctx: &mut HandlerCtx, path: &str) -> Outcome {
    if let Err(r) = require_privilege(ctx, Privilege::READFILE) {
        return Outcome::Reply(r);
    }
    let (_virt, remote) = match resolve_path(ctx, path) {
        Ok(v) => v,
        Err(r) => return Outcome::Reply(r),
    };
    let fs = match ctx.fs {
        Some(fs) => fs,
        None => return Outcome::Reply(Reply::simple(421, "Service not available")),
    };
    match fs.stat(&remote) {
        Ok(info) => Outcome::Reply(Reply::simple(213, info.size.to_string())),
        Err(e) => Outcome::Reply(Reply::from(FtpError::from(e))),
    }
}

fn handle_dele(ctx: &mut HandlerCtx, path: &str) -> Outcome {
    if let Err(r) = require_privilege(ctx, Privilege::DELETEFILE) {
        return Outcome::Reply(r);
    }
    let (_virt, remote) = match resolve_path(ctx, path) {
        Ok(v) => v,
        Err(r) => return Outcome::Reply(r),
    };
    let fs = match ctx.fs {
        Some(fs) => fs,
        None => return Outcome::Reply(Reply::simple(421, "Service not available")),
    };
    match fs.delete(&remote) {
        Ok(()) => Outcome::Reply(Reply::simple(250, "File deleted")),
        Err(e) => Outcome::Reply(Reply::from(FtpError::from(e))),
    }
}

fn handle_rnfr(ctx: &mut HandlerCtx, path: &str) -> Outcome {
    if let Err(r) = require_privilege(ctx, Privilege::WRITEFILE) {
        return Outcome::Reply(r);
    }
    let (virt, remote) = match resolve_path(ctx, path) {
        Ok(v) => v,
        Err(r) => return Outcome::Reply(r),
    };
    let fs = match ctx.fs {
        Some(fs) => fs,
        None => return Outcome::Reply(Reply::simple(421, "Service not available")),
    };
    if let Err(e) = fs.stat(&remote) {
        return Outcome::Reply(Reply::from(FtpError::from(e)));
    }
    ctx.client.rename_from = Some(virt);
    Outcome::Reply(Reply::simple(350, "Ready for RNTO"))
}

fn handle_rnto(ctx: &mut HandlerCtx, path: &str) -> Outcome {
    let from_virt = match ctx.client.rename_from.take() {
        Some(p) => p,
        None => return Outcome::Reply(Reply::simple(503, "RNFR required first")),
    };
    let home = match &ctx.client.user {
        Some(u) => u.home.clone(),
        None => return Outcome::Reply(Reply::simple(530, "Not logged in")),
    };
    let from_remote = match build_remote(&home, &from_virt) {
        Ok(p) => p,
        Err(e) => return Outcome::Reply(Reply::from(FtpError::from(e))),
    };
    let (_virt, to_remote) = match resolve_path(ctx, path) {
        Ok(v) => v,
        Err(r) => return Outcome::Reply(r),
    };
    let fs = match ctx.fs {
        Some(fs) => fs,
        None => return Outcome::Reply(Reply::simple(421, "Service not available")),
    };
    match fs.rename(&from_remote, &to_remote) {
        Ok(()) => Outcome::Reply(Reply::simple(250, "Rename successful")),
        Err(e) => Outcome::Reply(Reply::from(FtpError::from(e))),
    }
}

fn handle_mkd(ctx: &mut HandlerCtx, path: &str) -> Outcome {
    if let Err(r) = require_privilege(ctx, Privilege::CREATEDIR) {
        return Outcome::Reply(r);
    }
    let (virt, remote) = match resolve_path(ctx, path) {
        Ok(v) => v,
        Err(r) => return Outcome::Reply(r),
    };
    let fs = match ctx.fs {
        Some(fs) => fs,
        None => return Outcome::Reply(Reply::simple(421, "Service not available")),
    };
    match fs.mkdir(&remote) {
        Ok(()) => Outcome::Reply(Reply::simple(257, format!("\"{virt}\" created."))),
        Err(e) => Outcome::Reply(Reply::from(FtpError::from(e))),
    }
}

fn handle_rmd(ctx: &mut HandlerCtx, path: &str) -> Outcome {
    if let Err(r) = require_privilege(ctx, Privilege::DELETEDIR) {
        return Outcome::Reply(r);
    }
    let (_virt, remote) = match resolve_path(ctx, path) {
        Ok(v) => v,
        Err(r) => return Outcome::Reply(r),
    };
    let fs = match ctx.fs {
        Some(fs) => fs,
        None => return Outcome::Reply(Reply::simple(421, "Service not available")),
    };
    match fs.rmdir(&remote) {
        Ok(()) => Outcome::Reply(Reply::simple(250, "Directory removed")),
        Err(e) => Outcome::Reply(Reply::from(FtpError::from(e))),
    }
}

/// `OPTS MODE Z LEVEL n` (spec's Open Question, resolved in DESIGN.md):
/// `n` must be an ASCII decimal integer in `0..=9`.
fn handle_opts(ctx: &mut HandlerCtx, arg: &str) -> Outcome {
    let upper = arg.to_ascii_uppercase();
    let mut tokens = upper.split_whitespace();
    if tokens.next() != Some("MODE") || tokens.next() != Some("Z") || tokens.next() != Some("LEVEL") {
        return Outcome::Reply(Reply::simple(501, "Syntax error in parameters or arguments"));
    }
    let level_tok = match tokens.next() {
        Some(t) if tokens.next().is_none() => t,
        _ => return Outcome::Reply(Reply::simple(501, "Syntax error in parameters or arguments")),
    };
    if !level_tok.bytes().all(|b| b.is_ascii_digit()) {
        return Outcome::Reply(Reply::simple(501, "Syntax error in parameters or arguments"));
    }
    match level_tok.parse::<u32>() {
        Ok(level) if level <= 9 => {
            ctx.client.data.zlib_level = level;
            Outcome::Reply(Reply::simple(200, format!("MODE Z LEVEL set to {level}")))
        }
        _ => Outcome::Reply(Reply::simple(501, "Syntax error in parameters or arguments")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserConfig;
    use crate::remote_fs::LocalFsRemote;
    use std::net::SocketAddr;

    fn base_config() -> ServerConfig {
        ServerConfig {
            listening_ip: "127.0.0.1".into(),
            listening_port: 2100,
            data_port_start: 41200,
            data_port_len: 10,
            max_password_tries: 3,
            check_pass_delay_ms: 0,
            no_login_timeout_secs: 0,
            no_transfer_timeout_secs: 0,
            transfer_buffer_size: 4096,
            transfer_socket_buffer_size: 8192,
            enable_fxp: true,
            enable_zlib: true,
            hdfs_namenode_host: "127.0.0.1".into(),
            hdfs_namenode_port: 0,
            hdfs_buffer_size: 0,
            hdfs_replication: 0,
            hdfs_block_size: 0,
            remote_fs_root: "data".into(),
            users: vec![UserConfig {
                username: "alice".into(),
                password: "secret".into(),
                home_path: "/u/alice".into(),
                privs: 63,
                max_clients: 0,
            }],
            log_directory: "logs".into(),
            enable_user_logging: false,
            enable_client_logging: true,
            enable_server_logging: true,
        }
    }

    fn peer() -> SocketAddr {
        "10.0.0.1:4321".parse().unwrap()
    }

    #[test]
    fn user_unknown_login_replies_530() {
        let config = base_config();
        let users = UserRegistry::load_from_config(&config).unwrap();
        let events = EventSinks::new();
        let mut client = Client::new(peer(), peer(), Duration::ZERO);
        let pasv = PasvPortAllocator::new(config.data_port_range());
        let mut ctx = HandlerCtx { client: &mut client, users: &users, config: &config, events: &events, fs: None, pasv: &pasv };
        match handle_user(&mut ctx, "ghost") {
            Outcome::Reply(r) => assert_eq!(r.code, 530),
            _ => panic!("expected a reply"),
        }
    }

    #[test]
    fn full_login_sequence_via_user_and_pass() {
        let config = base_config();
        let users = UserRegistry::load_from_config(&config).unwrap();
        let events = EventSinks::new();
        let mut client = Client::new(peer(), peer(), Duration::ZERO);
        {
            let pasv = PasvPortAllocator::new(config.data_port_range());
            let mut ctx = HandlerCtx { client: &mut client, users: &users, config: &config, events: &events, fs: None, pasv: &pasv };
            match handle_user(&mut ctx, "alice") {
                Outcome::Reply(r) => assert_eq!(r.code, 331),
                _ => panic!("expected 331"),
            }
        }
        let pasv = PasvPortAllocator::new(config.data_port_range());
        let mut ctx = HandlerCtx { client: &mut client, users: &users, config: &config, events: &events, fs: None, pasv: &pasv };
        match handle_pass(&mut ctx, "secret") {
            Outcome::Reply(r) => assert_eq!(r.code, 230),
            _ => panic!("expected 230"),
        }
        assert!(client.is_logged_in());
    }

    #[test]
    fn rnto_without_rnfr_is_rejected() {
        let config = base_config();
        let users = UserRegistry::load_from_config(&config).unwrap();
        let events = EventSinks::new();
        let mut client = Client::new(peer(), peer(), Duration::ZERO);
        client.complete_login(users.search_by_login("alice").unwrap());
        let pasv = PasvPortAllocator::new(config.data_port_range());
        let mut ctx = HandlerCtx { client: &mut client, users: &users, config: &config, events: &events, fs: None, pasv: &pasv };
        match handle_rnto(&mut ctx, "/b") {
            Outcome::Reply(r) => assert_eq!(r.code, 503),
            _ => panic!("expected 503"),
        }
    }

    #[test]
    fn retr_outside_home_is_rejected_before_any_fs_call() {
        let config = base_config();
        let users = UserRegistry::load_from_config(&config).unwrap();
        let events = EventSinks::new();
        let mut client = Client::new(peer(), peer(), Duration::ZERO);
        client.complete_login(users.search_by_login("alice").unwrap());
        let fs = LocalFsRemote::new(std::env::temp_dir());
        let pasv = PasvPortAllocator::new(config.data_port_range());
        let mut ctx = HandlerCtx { client: &mut client, users: &users, config: &config, events: &events, fs: Some(&fs), pasv: &pasv };
        match handle_retr(&mut ctx, "../../etc/passwd") {
            Outcome::Reply(r) => assert_eq!(r.code, 550),
            _ => panic!("expected 550"),
        }
    }

    #[test]
    fn opts_mode_z_level_accepts_single_digit() {
        let config = base_config();
        let users = UserRegistry::load_from_config(&config).unwrap();
        let events = EventSinks::new();
        let mut client = Client::new(peer(), peer(), Duration::ZERO);
        client.complete_login(users.search_by_login("alice").unwrap());
        let pasv = PasvPortAllocator::new(config.data_port_range());
        let mut ctx = HandlerCtx { client: &mut client, users: &users, config: &config, events: &events, fs: None, pasv: &pasv };
        match handle_opts(&mut ctx, "MODE Z LEVEL 7") {
            Outcome::Reply(r) => assert_eq!(r.code, 200),
            _ => panic!("expected 200"),
        }
        assert_eq!(client.data.zlib_level, 7);
    }

    #[test]
    fn opts_mode_z_level_rejects_out_of_range() {
        let config = base_config();
        let users = UserRegistry::load_from_config(&config).unwrap();
        let events = EventSinks::new();
        let mut client = Client::new(peer(), peer(), Duration::ZERO);
        client.complete_login(users.search_by_login("alice").unwrap());
        let pasv = PasvPortAllocator::new(config.data_port_range());
        let mut ctx = HandlerCtx { client: &mut client, users: &users, config: &config, events: &events, fs: None, pasv: &pasv };
        match handle_opts(&mut ctx, "MODE Z LEVEL 42") {
            Outcome::Reply(r) => assert_eq!(r.code, 501),
            _ => panic!("expected 501"),
        }
    }
}
