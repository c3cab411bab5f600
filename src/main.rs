//! Orbital relay binary
//!
//! Run with: orbital [--host ADDR] [--http-port PORT] [--udp-port PORT] [--sample-rate RATE]
//!
//! Examples:
//!   orbital                                   # UDP 127.0.0.1:5556, HTTP 127.0.0.1:7000
//!   orbital --host 0.0.0.0 --sample-rate 1.0  # forward everything, all interfaces
//!   orbital --test                            # send synthetic events to the UDP port
//!
//! Open http://127.0.0.1:7000/ to watch the live feed, or stream it directly:
//!   curl -N http://127.0.0.1:7000/stream

use std::net::SocketAddr;

use clap::Parser;

use orbital::cli::Cli;
use orbital::{generator, OrbitalServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("orbital=info".parse()?),
        )
        .init();

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "Fatal error");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> orbital::Result<()> {
    if cli.test {
        let target = SocketAddr::new(cli.host, cli.udp_port);
        let sent = tokio::select! {
            result = generator::run(target, cli.test_interval(), cli.test_count) => result?,
            _ = tokio::signal::ctrl_c() => {
                println!("...shutting down");
                return Ok(());
            }
        };
        println!("Sent {} test events to {}", sent, target);
        return Ok(());
    }

    let server = OrbitalServer::new(cli.server_config())?;

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
