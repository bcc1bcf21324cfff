use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the service gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "GATEWAY_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// Circuit breaker statistics per service
    Services,
    /// Instance health and active connections
    Instances,
    /// Load balancer counters and weight overrides
    Balancer,
    /// Override the weight of one instance
    SetWeight {
        service: String,
        instance: String,
        weight: u32,
    },
    /// Remove a weight override
    ClearWeight { service: String, instance: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let base = cli.url.trim_end_matches('/');
    let res = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::Services => client.get(format!("{}/admin/services", base)),
        Commands::Instances => client.get(format!("{}/admin/instances", base)),
        Commands::Balancer => client.get(format!("{}/admin/balancer", base)),
        Commands::SetWeight {
            service,
            instance,
            weight,
        } => client
            .put(format!("{}/admin/balancer/{}/weights/{}", base, service, instance))
            .json(&serde_json::json!({ "weight": weight })),
        Commands::ClearWeight { service, instance } => {
            client.delete(format!("{}/admin/balancer/{}/weights/{}", base, service, instance))
        }
    }
    .headers(headers)
    .send()
    .await?;

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let text = res.text().await?;
    if text.is_empty() {
        println!("OK ({})", status);
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
