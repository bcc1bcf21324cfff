//! Service gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌────────────────────────────────────────────────────┐
//!                      │                     GATEWAY                         │
//!   Client Request     │  ┌─────────┐   ┌──────────┐   ┌──────────────────┐ │
//!   ───────────────────┼─▶│  http   │──▶│ routing  │──▶│    dispatch      │ │
//!                      │  │ server  │   │path→svc  │   │                  │ │
//!                      │  └─────────┘   └──────────┘   │ breaker check    │ │
//!                      │                               │ healthy set      │ │
//!                      │  ┌──────────┐                 │ load balancer    │ │
//!                      │  │ registry │◀────────────────│ upstream call    │─┼──▶ Instance
//!                      │  └────▲─────┘                 └──────────────────┘ │
//!                      │       │ set_health                                 │
//!                      │  ┌────┴─────┐   ┌──────────┐   ┌────────────────┐  │
//!                      │  │  health  │   │  admin   │   │ observability  │  │
//!                      │  │ monitor  │   │   API    │   │ logs / metrics │  │
//!                      │  └──────────┘   └──────────┘   └────────────────┘  │
//!                      └────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use service_gateway::config::loader::load_config;
use service_gateway::lifecycle::signals::spawn_signal_handler;
use service_gateway::observability::{logging, metrics};
use service_gateway::{Gateway, Shutdown};

#[derive(Parser)]
#[command(name = "service-gateway", version, about = "API gateway request-dispatch core")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    logging::init(&config.observability)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "service-gateway starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let gateway = Gateway::build(config)?;
    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    gateway.run(shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
