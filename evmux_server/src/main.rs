//! Demo server: answers every request with a fixed hello-world page.
//!
//! Usage: `evmux_server [config-file]`. Without a config file the defaults of
//! `ServerConfig` apply (127.0.0.1:3000, edge-triggered).

mod server;
mod signals;

use std::env;
use std::process;

use evmux_core::config::ServerConfig;
use evmux_core::logger::{self, LogLevel};
use tracing::{error, info};

use server::{HelloServer, ServerError};

fn load_config() -> Result<ServerConfig, ServerError> {
    match env::args().nth(1) {
        Some(path) => Ok(ServerConfig::load_from_file(path)?),
        None => Ok(ServerConfig::default()),
    }
}

fn run(cfg: &ServerConfig) -> Result<(), ServerError> {
    signals::init_term_signals()?;
    let mut server = HelloServer::bind(cfg)?;
    server.serve(cfg.wait_timeout(), signals::should_terminate)?;
    info!("termination signal received, shutting down");
    Ok(())
}

fn main() {
    let cfg = match load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            logger::init(LogLevel::Info);
            error!(error = %e, "config load failure");
            process::exit(1);
        }
    };
    logger::init(cfg.log_level);
    info!(log_level = %cfg.log_level, batch_policy = ?cfg.batch_policy, "configuration loaded");

    if let Err(e) = run(&cfg) {
        error!(error = %e, "server terminated");
        process::exit(1);
    }
}
