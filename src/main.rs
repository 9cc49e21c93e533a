//! Edge reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────────────┐
//!                        │                       EDGE PROXY                          │
//!                        │                                                           │
//!   Client Request       │  ┌────────────┐   ┌───────────┐   ┌──────────────────┐   │
//!   ─────────────────────┼─▶│ entrypoint │──▶│  routing  │──▶│ middleware chain │   │
//!                        │  │ (http/tls) │   │ snapshot  │   │ auth, rate limit │   │
//!                        │  └────────────┘   └───────────┘   └────────┬─────────┘   │
//!                        │                                            │             │
//!                        │                                            ▼             │
//!                        │                   ┌───────────┐   ┌──────────────────┐   │
//!                        │                   │  breaker  │◀──│  retry policy    │   │
//!                        │                   └─────┬─────┘   └──────────────────┘   │
//!                        │                         ▼                                │
//!   Client Response      │                   ┌───────────┐                          │
//!   ◀────────────────────┼───────────────────│ backend   │◀─────────────────────────┼── Backend
//!                        │                   │ pool      │                          │
//!                        │                   └───────────┘                          │
//!                        │                                                          │
//!                        │  config store/watcher · health · collector · autoscaler  │
//!                        └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use edge_proxy::lifecycle::startup;

#[derive(Parser)]
#[command(name = "edge-proxy", version)]
#[command(about = "Edge reverse proxy with hot-reloadable routing", long_about = None)]
struct Cli {
    /// Static configuration file (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the static and dynamic configuration, then exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (static_config, dynamic) = startup::check(cli.config.as_deref())?;
    if cli.check {
        let (routers, services) = dynamic
            .as_ref()
            .map_or((0, 0), |d| (d.routers.len(), d.services.len()));
        println!(
            "configuration ok: {} entrypoints, {} routers, {} services",
            static_config.entrypoints.len(),
            routers,
            services
        );
        return Ok(());
    }

    startup::run(static_config).await?;
    Ok(())
}
