//! `hostlm-client`: call a running service from the command line and print JSON.

use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hostlm::api::{DEFAULT_MAX_LENGTH, DEFAULT_PORT};
use hostlm::client::InferenceClient;

#[derive(Debug, Parser)]
#[command(name = "hostlm-client", version, about = "Query a hostlm inference service")]
struct Cli {
    /// Service host.
    #[arg(long, env = "HOSTLM_CLIENT_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Service port.
    #[arg(long, env = "HOSTLM_CLIENT_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Per-request timeout in seconds.
    #[arg(long, env = "HOSTLM_CLIENT_TIMEOUT", default_value_t = 5)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check service liveness.
    Health,
    /// Show host, accelerator, and model.
    Info,
    /// Generate a continuation of PROMPT.
    Generate {
        prompt: String,
        #[arg(long, default_value_t = DEFAULT_MAX_LENGTH)]
        max_length: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let client = InferenceClient::with_timeout(&cli.host, cli.port, Duration::from_secs(cli.timeout))?;

    let (output, failed) = match cli.command {
        Command::Health => {
            let status = client.health_check().await;
            let failed = !status.is_healthy();
            (serde_json::to_string_pretty(&status)?, failed)
        }
        Command::Info => {
            let info = client.get_info().await;
            let failed = info.is_error();
            (serde_json::to_string_pretty(&info)?, failed)
        }
        Command::Generate { prompt, max_length } => {
            let result = client.generate_text(&prompt, max_length).await;
            let failed = result.is_error();
            (serde_json::to_string_pretty(&result)?, failed)
        }
    };

    println!("{output}");
    if failed {
        std::process::exit(1);
    }
    Ok(())
}
