use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Inspect a running edge-proxy through its dashboard API", long_about = None)]
struct Cli {
    /// Base URL of the entrypoint serving `api@internal`.
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    /// Bearer token accepted by the dashboard route.
    #[arg(short, long, env = "EDGE_PROXY_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration generation, uptime and totals
    Overview,
    /// Routers with rule, priority and middlewares
    Routers,
    /// Services with backend health and breaker state
    Services,
    /// One service in detail
    Service { name: String },
    /// Per-route request counts and latency percentiles
    Metrics,
    /// Liveness check against /ping
    Ping,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut headers = HeaderMap::new();
    if let Some(token) = &cli.token {
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
    }
    let client = reqwest::Client::builder().default_headers(headers).build()?;
    let base = cli.url.trim_end_matches('/');

    let path = match &cli.command {
        Commands::Overview => "/api/overview".to_string(),
        Commands::Routers => "/api/routers".to_string(),
        Commands::Services => "/api/services".to_string(),
        Commands::Service { name } => format!("/api/services/{name}"),
        Commands::Metrics => "/api/metrics".to_string(),
        Commands::Ping => {
            let res = client.get(format!("{base}/ping")).send().await?;
            println!("{} {}", res.status(), res.text().await?);
            return Ok(());
        }
    };

    let res = client.get(format!("{base}{path}")).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: dashboard API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
