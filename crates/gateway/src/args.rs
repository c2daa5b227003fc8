use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Command-line configuration for the `cc-gw` binary. Every flag doubles as
/// an environment variable so the gateway can run unchanged in a container.
#[derive(Debug, Parser)]
#[command(name = "cc-gw", version, about = "Local reverse-proxy gateway for LLM traffic")]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "CC_GW_CONFIG", default_value = "cc-gw.toml")]
    pub config: PathBuf,

    /// Address to bind the HTTP listener to.
    #[arg(long, env = "CC_GW_LISTEN_ADDRESS", default_value = "127.0.0.1:8011")]
    pub listen_address: SocketAddr,

    /// `log` crate filter string, e.g. "info" or "cc_gw=debug".
    #[arg(long, env = "CC_GW_LOG", default_value = "info")]
    pub log_filter: String,
}
