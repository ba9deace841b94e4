use std::fs;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::Duration;

use hdfs_ftpd::config::{ServerConfig, UserConfig};
use hdfs_ftpd::start_server;

// Ports are handed out sequentially so concurrently-run tests in this
// binary don't collide on the same control or data socket.
static NEXT_PORT: AtomicU16 = AtomicU16::new(20000);

fn next_port_pair() -> (u16, u16) {
    let control = NEXT_PORT.fetch_add(1, Ordering::SeqCst);
    let data_start = 40000 + control;
    (control, data_start)
}

fn test_config(control_port: u16, data_start: u16, root: &std::path::Path) -> ServerConfig {
    ServerConfig {
        listening_ip: "127.0.0.1".into(),
        listening_port: control_port,
        data_port_start: data_start,
        data_port_len: 20,
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
        enable_client_logging: true,
        enable_server_logging: true,
    }
}

// Starts a server on its own thread and waits for the control socket to
// accept connections before returning.
fn start_test_server(control_port: u16, data_start: u16) -> std::path::PathBuf {
    let root = std::env::temp_dir().join(format!("hdfs-ftpd-it-{}-{}", std::process::id(), control_port));
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("test.txt"), b"hello world").unwrap();
    fs::create_dir_all(root.join("dir1")).unwrap();

    let config = test_config(control_port, data_start, &root);
    thread::spawn(move || {
        let _ = start_server(config);
    });
    let _ = connect(control_port);
    root
}

// Connects to the control socket, retrying while the server thread
// finishes binding its listener.
fn connect(port: u16) -> (TcpStream, String) {
    let mut attempts = 50;
    loop {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(mut stream) => {
                let mut buf = [0u8; 512];
                let n = stream.read(&mut buf).unwrap_or(0);
                return (stream, String::from_utf8_lossy(&buf[..n]).to_string());
            }
            Err(_) if attempts > 0 => {
                thread::sleep(Duration::from_millis(50));
                attempts -= 1;
            }
            Err(e) => panic!("failed to connect: {e}"),
        }
    }
}

fn send_command(stream: &mut TcpStream, command: &str) -> String {
    stream.write_all(format!("{command}\r\n").as_bytes()).unwrap();
    stream.flush().unwrap();
    let mut buffer = [0u8; 4096];
    let n = stream.read(&mut buffer).unwrap();
    String::from_utf8_lossy(&buffer[..n]).to_string()
}

fn login(stream: &mut TcpStream) {
    let r = send_command(stream, "USER user");
    assert_eq!(r.trim(), "331 Password required");
    let r = send_command(stream, "PASS pass");
    assert_eq!(r.trim(), "230 Login successful");
}

#[test]
fn greets_with_220_on_connect() {
    let (control_port, data_start) = next_port_pair();
    start_test_server(control_port, data_start);
    let (_stream, greeting) = connect(control_port);
    assert!(greeting.starts_with("220 "), "unexpected greeting: {greeting}");
}

#[test]
fn user_then_pass_logs_in() {
    let (control_port, data_start) = next_port_pair();
    start_test_server(control_port, data_start);
    let (mut stream, _) = connect(control_port);
    login(&mut stream);
}

#[test]
fn commands_before_login_are_rejected() {
    let (control_port, data_start) = next_port_pair();
    start_test_server(control_port, data_start);
    let (mut stream, _) = connect(control_port);
    let r = send_command(&mut stream, "PWD");
    assert_eq!(r.trim(), "530 Not logged in");
}

#[test]
fn pwd_reports_root_after_login() {
    let (control_port, data_start) = next_port_pair();
    start_test_server(control_port, data_start);
    let (mut stream, _) = connect(control_port);
    login(&mut stream);
    let r = send_command(&mut stream, "PWD");
    assert!(r.starts_with("257 "));
    assert!(r.contains("\"/\""));
}

#[test]
fn cwd_into_existing_directory_then_back_out() {
    let (control_port, data_start) = next_port_pair();
    start_test_server(control_port, data_start);
    let (mut stream, _) = connect(control_port);
    login(&mut stream);
    let r = send_command(&mut stream, "CWD dir1");
    assert!(r.starts_with("250 "));
    let r = send_command(&mut stream, "CWD nonexistent");
    assert!(r.starts_with("550 "));
    let r = send_command(&mut stream, "CDUP");
    assert!(r.starts_with("250 "));
}

#[test]
fn retr_downloads_file_contents_over_pasv() {
    let (control_port, data_start) = next_port_pair();
    start_test_server(control_port, data_start);
    let (mut stream, _) = connect(control_port);
    login(&mut stream);

    let pasv_reply = send_command(&mut stream, "PASV");
    let data_port = parse_pasv_port(&pasv_reply);
    let mut data_stream = TcpStream::connect(("127.0.0.1", data_port)).unwrap();

    let r = send_command(&mut stream, "RETR test.txt");
    assert!(r.starts_with("150 "));

    let mut received = Vec::new();
    data_stream.read_to_end(&mut received).unwrap();
    assert_eq!(received, b"hello world");

    let mut buf = [0u8; 512];
    let n = stream.read(&mut buf).unwrap();
    let completion = String::from_utf8_lossy(&buf[..n]);
    assert!(completion.starts_with("226 "), "unexpected completion reply: {completion}");
}

#[test]
fn stor_uploads_file_contents_over_pasv() {
    let (control_port, data_start) = next_port_pair();
    let root = start_test_server(control_port, data_start);
    let (mut stream, _) = connect(control_port);
    login(&mut stream);

    let pasv_reply = send_command(&mut stream, "PASV");
    let data_port = parse_pasv_port(&pasv_reply);
    let mut data_stream = TcpStream::connect(("127.0.0.1", data_port)).unwrap();

    let r = send_command(&mut stream, "STOR uploaded.txt");
    assert!(r.starts_with("150 "));
    data_stream.write_all(b"uploaded contents").unwrap();
    drop(data_stream);

    let mut buf = [0u8; 512];
    let n = stream.read(&mut buf).unwrap();
    let completion = String::from_utf8_lossy(&buf[..n]);
    assert!(completion.starts_with("226 "), "unexpected completion reply: {completion}");

    let uploaded = fs::read(root.join("uploaded.txt")).unwrap();
    assert_eq!(uploaded, b"uploaded contents");
}

#[test]
fn quit_closes_the_connection() {
    let (control_port, data_start) = next_port_pair();
    start_test_server(control_port, data_start);
    let (mut stream, _) = connect(control_port);
    login(&mut stream);
    let r = send_command(&mut stream, "QUIT");
    assert_eq!(r.trim(), "221 Goodbye");

    let result = stream.write_all(b"NOOP\r\n").and_then(|_| stream.flush()).and_then(|_| {
        let mut buf = [0u8; 16];
        stream.read(&mut buf)
    });
    assert!(result.map(|n| n == 0).unwrap_or(true), "expected the connection to be closed after QUIT");
}

#[test]
fn unknown_command_replies_500() {
    let (control_port, data_start) = next_port_pair();
    start_test_server(control_port, data_start);
    let (mut stream, _) = connect(control_port);
    login(&mut stream);
    let r = send_command(&mut stream, "FROBNICATE");
    assert!(r.starts_with("500 "));
}

fn parse_pasv_port(reply: &str) -> u16 {
    let start = reply.find('(').expect("PASV reply missing '('");
    let end = reply.find(')').expect("PASV reply missing ')'");
    let nums: Vec<u16> = reply[start + 1..end].split(',').map(|s| s.trim().parse().unwrap()).collect();
    assert_eq!(nums.len(), 6, "unexpected PASV reply: {reply}");
    nums[4] * 256 + nums[5]
}
