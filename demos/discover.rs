//! Discover Roon Cores on the local network.
//!
//! Usage:
//!   cargo run --example discover

use roon_client::discovery::{discover, DiscoveryConfig};
use std::time::Duration;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = DiscoveryConfig {
        timeout: Duration::from_secs(10),
        query_interval: Duration::from_secs(2),
        stop_on_first: false,
    };

    println!("Searching for Roon Cores (10s)...");
    match discover(config).await {
        Ok(cores) => {
            for core in cores {
                println!(
                    "{}:{}  {}  {}",
                    core.host,
                    core.port,
                    core.display_name.as_deref().unwrap_or("-"),
                    core.core_id.as_deref().unwrap_or("-"),
                );
            }
        }
        Err(e) => eprintln!("discovery failed: {e}"),
    }
}
