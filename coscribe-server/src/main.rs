//! coscribe collaboration server binary.
//!
//! Configuration via environment:
//! - `COSCRIBE_BIND` — listen address (default `127.0.0.1:9090`)
//! - `COSCRIBE_DATA` — RocksDB directory; unset runs in-memory only
//! - `COSCRIBE_SAVE_INTERVAL_SECS` — periodic flush interval (default 10)
//!
//! Runs with the open admission policy: any token is accepted and becomes
//! the username. Production deployments embed `coscribe-collab` behind
//! their own `AccessPolicy` instead.

use std::sync::Arc;

use coscribe_collab::{CollabServer, OpenDoor, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = ServerConfig::default();
    if let Ok(bind) = std::env::var("COSCRIBE_BIND") {
        config.bind_addr = bind;
    }
    if let Ok(path) = std::env::var("COSCRIBE_DATA") {
        config.storage_path = Some(path.into());
    }
    if let Ok(interval) = std::env::var("COSCRIBE_SAVE_INTERVAL_SECS") {
        config.save_interval_secs = interval.parse()?;
    }

    if config.storage_path.is_none() {
        log::warn!("COSCRIBE_DATA not set; documents will not survive restarts");
    }
    log::warn!("open admission policy active; any token is accepted");

    let server = CollabServer::new(config, Arc::new(OpenDoor));
    server.run().await
}
