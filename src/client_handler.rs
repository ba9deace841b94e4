//! Module `client_handler`
//!
//! Owns one client's control socket for its whole lifetime: greeting,
//! command-line framing, dispatch through `handlers::handle_command`, and
//! the background-thread transfer worker with `ABOR` cancellation (spec
//! §4.5/§4.6). Grounded in the teacher's `handle_client` (read-into-buffer,
//! split on `\r\n`, write the reply back), extended with polling reads so
//! the control loop can both enforce timeouts and watch a transfer thread
//! without blocking on either.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::mpsc::{self, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use crate::channel_registry::PasvPortAllocator;
use crate::client::Client;
use crate::command::parse_command;
use crate::config::ServerConfig;
use crate::data_channel::{open_data_connection, reset_data_connection};
use crate::error::FilesystemError;
use crate::events::{Event, EventSinks};
use crate::handlers::{handle_command, HandlerCtx, Outcome, Reply, TransferKind, TransferRequest};
use crate::remote_fs::RemoteFs;
use crate::transfer;
use crate::user::UserRegistry;

/// Control loop poll interval: bounds how quickly a timeout or a finished
/// transfer is noticed while the socket has nothing to read.
const POLL_TIMEOUT: Duration = Duration::from_millis(250);

/// Outcome of a background transfer thread, forwarded to the control loop
/// over a channel so it can keep servicing the control socket meanwhile.
struct TransferResult {
    request_path: String,
    bytes: u64,
    outcome: Result<(), FilesystemError>,
    kind_name: &'static str,
}

struct ActiveTransfer {
    /// Kept only to call `shutdown` on `ABOR`; the worker thread has its
    /// own clone for the actual I/O.
    data_stream: TcpStream,
    handle: thread::JoinHandle<()>,
    rx: mpsc::Receiver<TransferResult>,
}

pub fn handle_client(
    mut cmd_stream: TcpStream,
    peer_addr: SocketAddr,
    server_addr: SocketAddr,
    config: Arc<ServerConfig>,
    users: UserRegistry,
    events: EventSinks,
    fs: Arc<dyn RemoteFs + Send + Sync>,
    pasv: PasvPortAllocator,
) {
    if let Err(e) = cmd_stream.write_all(b"220 hdfs-ftpd ready\r\n") {
        error!("{peer_addr}: failed to send greeting: {e}");
        return;
    }
    let _ = cmd_stream.set_read_timeout(Some(POLL_TIMEOUT));

    let mut client = Client::new(peer_addr, server_addr, Duration::from_secs(config.no_login_timeout_secs));
    let mut read_buf = [0u8; 4096];
    let mut active_transfer: Option<ActiveTransfer> = None;
    // Set on any abrupt exit path (read error, client closing the socket
    // without QUIT) so teardown fires `ClientDisconnect` in addition to
    // `DeleteClient`; a clean `QUIT` or a timeout close does not.
    let mut abrupt_disconnect = false;

    'control: loop {
        let poll = active_transfer.as_ref().map(|a| a.rx.try_recv());
        match poll {
            Some(Ok(result)) => {
                let active = active_transfer.take().unwrap();
                let _ = active.handle.join();
                // close the data channel before the terminating control
                // reply (spec §5's ordering guarantee); the worker's own
                // clone is already gone once it returns, but this kept
                // clone must be shut down explicitly or the FIN doesn't
                // go out until the match arm ends.
                let _ = active.data_stream.shutdown(Shutdown::Both);
                drop(active.data_stream);
                finish_transfer(&mut cmd_stream, &mut client, &pasv, &events, peer_addr, result);
            }
            Some(Err(TryRecvError::Disconnected)) => {
                let active = active_transfer.take().unwrap();
                let _ = active.handle.join();
                send_reply(&mut cmd_stream, &Reply::simple(451, "Transfer worker terminated unexpectedly"));
                reset_data_connection(&mut client.data, &pasv);
                client.transfer_busy = false;
            }
            Some(Err(TryRecvError::Empty)) => {}
            None => {
                if client.expired_no_login() {
                    send_reply(&mut cmd_stream, &Reply::simple(421, "No login within the allotted time"));
                    break 'control;
                }
                if client.expired_no_transfer() {
                    events.publish(Event::NoTransferTimeout { addr: peer_addr });
                    send_reply(&mut cmd_stream, &Reply::simple(421, "Idle timeout"));
                    break 'control;
                }
            }
        }

        match cmd_stream.read(&mut read_buf) {
            Ok(0) => {
                info!("{peer_addr}: connection closed by client");
                abrupt_disconnect = true;
                break 'control;
            }
            Ok(n) => {
                client.command_buffer.push_str(&String::from_utf8_lossy(&read_buf[..n]));
                if client.command_buffer.len() > crate::config::MAX_COMMAND_LINE_LEN {
                    send_reply(&mut cmd_stream, &Reply::simple(500, "Command line too long"));
                    client.command_buffer.clear();
                    continue;
                }

                while let Some(pos) = client.command_buffer.find("\r\n") {
                    let line = client.command_buffer[..pos].to_string();
                    client.command_buffer.drain(..pos + 2);
                    client.touch(Duration::from_secs(config.no_transfer_timeout_secs));
                    events.publish(Event::RecvdCmdLine { addr: peer_addr, line: line.clone() });

                    let command = parse_command(&line);
                    let outcome = {
                        let mut ctx = HandlerCtx {
                            client: &mut client,
                            users: &users,
                            config: &config,
                            events: &events,
                            fs: Some(fs.as_ref()),
                            pasv: &pasv,
                        };
                        handle_command(&mut ctx, &command)
                    };

                    match outcome {
                        Outcome::Reply(reply) => {
                            events.publish(Event::SendReply { addr: peer_addr, code: reply.code });
                            send_reply(&mut cmd_stream, &reply);
                        }
                        Outcome::Close(reply) => {
                            events.publish(Event::SendReply { addr: peer_addr, code: reply.code });
                            send_reply(&mut cmd_stream, &reply);
                            let _ = cmd_stream.shutdown(Shutdown::Both);
                            break 'control;
                        }
                        Outcome::NeedsPasv => handle_pasv(&mut cmd_stream, &mut client, &pasv, server_addr),
                        Outcome::NeedsAbor => {
                            // spec's ABOR reply is always the pair 426 then 226
                            // (spec §4.4), regardless of whether the worker had
                            // already finished the instant ABOR arrived.
                            if let Some(active) = active_transfer.take() {
                                let _ = active.data_stream.shutdown(Shutdown::Both);
                                let _ = active.handle.join();
                                client.transfer_busy = false;
                                reset_data_connection(&mut client.data, &pasv);
                            }
                            send_reply(&mut cmd_stream, &Reply::simple(426, "Transfer aborted"));
                            send_reply(&mut cmd_stream, &Reply::simple(226, "Closing data connection"));
                        }
                        Outcome::StartTransfer(request) => {
                            active_transfer = start_transfer(&mut cmd_stream, &mut client, &config, &fs, &pasv, request);
                        }
                    }
                }
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
            Err(e) => {
                warn!("{peer_addr}: control socket read failed: {e}");
                events.publish(Event::ClientSockError { addr: peer_addr, reason: e.to_string() });
                abrupt_disconnect = true;
                break 'control;
            }
        }
    }

    if let Some(active) = active_transfer {
        let _ = active.data_stream.shutdown(Shutdown::Both);
        let _ = active.handle.join();
    }
    if let Some(user) = client.logout() {
        users.release(user.id);
    }
    reset_data_connection(&mut client.data, &pasv);
    if abrupt_disconnect {
        events.publish(Event::ClientDisconnect { addr: peer_addr });
    }
    events.publish(Event::DeleteClient { addr: peer_addr });
    info!("{peer_addr}: session closed");
}

fn send_reply(stream: &mut TcpStream, reply: &Reply) {
    if let Err(e) = stream.write_all(reply.to_wire().as_bytes()) {
        warn!("failed to write reply to control socket: {e}");
    }
}

fn handle_pasv(cmd_stream: &mut TcpStream, client: &mut Client, pasv: &PasvPortAllocator, server_addr: SocketAddr) {
    if let Some(stale) = client.data.clear() {
        pasv.release(stale);
    }

    let ip = match server_addr.ip() {
        std::net::IpAddr::V4(v4) => v4,
        std::net::IpAddr::V6(_) => {
            send_reply(cmd_stream, &Reply::simple(425, "PASV requires an IPv4 control connection"));
            return;
        }
    };

    match pasv.bind(&ip.to_string()) {
        Ok((listener, port)) => {
            let octets = ip.octets();
            let p1 = port / 256;
            let p2 = port % 256;
            client.data.mode = crate::channel_registry::DataMode::Pasv { listener, port };
            send_reply(
                cmd_stream,
                &Reply::simple(
                    227,
                    format!("Entering Passive Mode ({},{},{},{},{},{}).", octets[0], octets[1], octets[2], octets[3], p1, p2),
                ),
            );
        }
        Err(e) => {
            let (code, text) = e.reply();
            send_reply(cmd_stream, &Reply::simple(code, text));
        }
    }
}

/// Opens the data connection for `request`, sends `150`, and spawns the
/// transfer worker thread. Returns `None` (after sending an error reply)
/// if the data connection could not be opened.
fn start_transfer(
    cmd_stream: &mut TcpStream,
    client: &mut Client,
    config: &Arc<ServerConfig>,
    fs: &Arc<dyn RemoteFs + Send + Sync>,
    pasv: &PasvPortAllocator,
    request: TransferRequest,
) -> Option<ActiveTransfer> {
    let data_stream = match open_data_connection(&client.data, config.transfer_socket_buffer_size) {
        Ok(s) => s,
        Err(e) => {
            let (code, text) = e.reply();
            send_reply(cmd_stream, &Reply::simple(code, text));
            reset_data_connection(&mut client.data, pasv);
            return None;
        }
    };

    let worker_stream = match data_stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            error!("failed to clone data stream: {e}");
            send_reply(cmd_stream, &Reply::simple(451, "Internal error opening data connection"));
            reset_data_connection(&mut client.data, pasv);
            return None;
        }
    };

    send_reply(cmd_stream, &Reply::simple(150, "Opening data connection"));
    client.transfer_busy = true;

    let transfer_mode = client.data.transfer_mode;
    let zlib_level = client.data.zlib_level;
    let buffer_size = config.transfer_buffer_size;
    let fs = Arc::clone(fs);
    let TransferRequest { kind, remote_path } = request;

    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let mut worker_stream = worker_stream;
        let (outcome, bytes, kind_name): (Result<(), FilesystemError>, u64, &'static str) = match kind {
            TransferKind::Retrieve { restart_offset } => {
                let r = transfer::retrieve(fs.as_ref(), &remote_path, restart_offset, &mut worker_stream, transfer_mode, zlib_level, buffer_size);
                match r {
                    Ok(n) => (Ok(()), n, "RETR"),
                    Err(e) => (Err(e), 0, "RETR"),
                }
            }
            TransferKind::Store(store_kind) => {
                let r = transfer::store(fs.as_ref(), &remote_path, store_kind, &mut worker_stream, transfer_mode, buffer_size);
                match r {
                    Ok(n) => (Ok(()), n, "STOR"),
                    Err(e) => (Err(e), 0, "STOR"),
                }
            }
            TransferKind::List { flags, bare_names } => match transfer::list(fs.as_ref(), &remote_path, flags, bare_names) {
                Ok(listing) => {
                    let bytes = listing.len() as u64;
                    match worker_stream.write_all(listing.as_bytes()) {
                        Ok(()) => (Ok(()), bytes, "LIST"),
                        Err(e) => (Err(FilesystemError::MidTransfer(e)), 0, "LIST"),
                    }
                }
                Err(e) => (Err(e), 0, "LIST"),
            },
        };
        let _ = tx.send(TransferResult { request_path: remote_path, bytes, outcome, kind_name });
    });

    Some(ActiveTransfer { data_stream, handle, rx })
}

fn finish_transfer(cmd_stream: &mut TcpStream, client: &mut Client, pasv: &PasvPortAllocator, events: &EventSinks, addr: SocketAddr, result: TransferResult) {
    client.transfer_busy = false;
    reset_data_connection(&mut client.data, pasv);

    match result.outcome {
        Ok(()) => {
            match result.kind_name {
                "RETR" => events.publish(Event::ClientDownload { addr, path: result.request_path, bytes: result.bytes }),
                "STOR" => events.publish(Event::ClientUpload { addr, path: result.request_path, bytes: result.bytes }),
                _ => events.publish(Event::ClientList { addr, path: result.request_path }),
            }
            send_reply(cmd_stream, &Reply::simple(226, "Transfer complete"));
        }
        Err(e) => {
            let (code, text) = e.reply();
            send_reply(cmd_stream, &Reply::simple(code, text));
        }
    }
}
