//! CLI definitions for the `configsample` binary.

use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Default root directory holding one subdirectory per scope.
pub const DEFAULT_CONFIG_DIR: &str = "/etc/configs";

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 8000;

/// Serve the live configuration of one scope over HTTP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Root directory of the scopes
    #[arg(short, long, env = "CONFIG_MANAGER_DIR", default_value = DEFAULT_CONFIG_DIR)]
    pub dir: PathBuf,

    /// Scope to serve; its file is <dir>/<scope>/configs.json
    #[arg(short, long, default_value = "configsample")]
    pub scope: String,

    /// Port to listen on (all interfaces)
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2")]
    pub log: String,
}

impl Cli {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.port)
    }
}
