//! Connect to a Roon Core, register, and watch zone events.
//!
//! Usage:
//!   cargo run --example register -- <ip> <port>
//!
//! Example:
//!   cargo run --example register -- 192.168.1.100 9100
//!
//! On first run, approve the extension under Settings → Extensions in
//! Roon; the token is remembered for the rest of the process lifetime.

use futures::StreamExt;
use roon_client::{
    ConnectionConfig, MemoryTokenStore, RegistrationRecord, RoonConnection, TransportService,
    ZoneEvent,
};
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> roon_client::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <ip> <port>", args[0]);
        eprintln!("Example: {} 192.168.1.100 9100", args[0]);
        std::process::exit(1);
    }
    let url = format!("ws://{}:{}/api", args[1], args[2]);

    let registration = RegistrationRecord::new(
        "com.roonlabs.rust-client-demo",
        "rust roon-client demo",
        "1.0.0",
        "roon-client",
        "dev@example.com",
    );
    let tokens = Arc::new(MemoryTokenStore::new());
    let connection =
        RoonConnection::with_url(&url, ConnectionConfig::new(registration), tokens)?;

    let mut states = connection.state_stream();
    tokio::spawn(async move {
        while let Some(state) = states.next().await {
            println!("state: {state:?}");
        }
    });

    println!("Connecting to {url} ...");
    connection.connect().await?;
    println!("Registered.");

    let transport = TransportService::new(connection.clone());
    let mut zones = transport.subscribe_zones().await?;

    println!("Watching zones; press Ctrl-C to exit.\n");
    while let Some(event) = zones.next().await {
        match event {
            ZoneEvent::Subscribed { zones } => {
                println!("=== {} zone(s) ===", zones.len());
                for zone in &zones {
                    println!("  {} ({:?})", zone.display_name, zone.state);
                }
                if let Some(zone) = zones.first() {
                    transport.select_zone(&zone.zone_id);
                    println!("selected zone: {}", zone.display_name);
                }
            }
            ZoneEvent::ZonesChanged { zones } => {
                for zone in zones {
                    let line = zone
                        .now_playing
                        .as_ref()
                        .and_then(|np| np.one_line.as_ref())
                        .map(|l| l.line1.clone())
                        .unwrap_or_default();
                    println!("{}: {:?} {line}", zone.display_name, zone.state);
                }
            }
            ZoneEvent::ZonesAdded { zones } => {
                for zone in zones {
                    println!("added: {}", zone.display_name);
                }
            }
            ZoneEvent::ZonesRemoved { zone_ids } => {
                println!("removed: {zone_ids:?}");
            }
            ZoneEvent::ZonesSeekChanged { .. } => {}
        }
    }

    Ok(())
}
