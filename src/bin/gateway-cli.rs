use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the service gateway", long_about = None)]
struct Cli {
    #[arg(short, long, env = "GATEWAY_URL", default_value = "http://localhost:8000")]
    url: String,

    #[arg(short, long, env = "GATEWAY_ADMIN_API_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// List services and instance health
    Services,
    /// Register a service instance
    Register {
        service: String,
        host: String,
        port: u16,
        #[arg(long, default_value = "/health")]
        check_endpoint: String,
        #[arg(long, default_value_t = 30)]
        check_interval: u64,
    },
    /// Deregister a service instance
    Deregister {
        service: String,
        /// Instance id (`host:port`)
        instance_id: String,
    },
    /// List routes in match order
    Routes,
    /// Show circuit breaker state
    Circuits,
    /// Force a circuit breaker closed
    ResetCircuit { service: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let client = reqwest::Client::builder().default_headers(headers).build()?;
    let base = cli.url.trim_end_matches('/');

    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::Services => client.get(format!("{}/admin/services", base)),
        Commands::Register {
            service,
            host,
            port,
            check_endpoint,
            check_interval,
        } => client.post(format!("{}/admin/services", base)).json(&json!({
            "service_name": service,
            "host": host,
            "port": port,
            "check_endpoint": check_endpoint,
            "check_interval_secs": check_interval,
        })),
        Commands::Deregister {
            service,
            instance_id,
        } => client.delete(format!(
            "{}/admin/services/{}/instances/{}",
            base, service, instance_id
        )),
        Commands::Routes => client.get(format!("{}/admin/routes", base)),
        Commands::Circuits => client.get(format!("{}/admin/circuits", base)),
        Commands::ResetCircuit { service } => {
            client.post(format!("{}/admin/circuits/{}/reset", base, service))
        }
    };

    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    if status == reqwest::StatusCode::NO_CONTENT {
        println!("OK");
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
