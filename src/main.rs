// main.rs
// Entry point for the hdfs-ftpd application.
// Loads configuration, initializes logging, and starts the FTP engine.

use hdfs_ftpd::config::ServerConfig;
use hdfs_ftpd::start_server;

fn main() {
    env_logger::init();

    let config = match ServerConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = start_server(config) {
        eprintln!("server exited with error: {e}");
        std::process::exit(1);
    }
}
