//! `weft-relay`: standalone document relay.
//!
//! Configuration comes from the environment:
//! - `WEFT_BIND` (default `127.0.0.1:1234`)
//! - `WEFT_MAX_PEERS` (default 100)
//! - `RUST_LOG` for log filtering

use log::info;
use weft_collab::{ServerConfig, SyncServer};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = ServerConfig::from_env();
    info!(
        "weft-relay starting on {} (max {} peers per document)",
        config.bind_addr, config.max_peers_per_room
    );

    let server = SyncServer::new(config);
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                log::error!("Relay stopped: {e}");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }
}
