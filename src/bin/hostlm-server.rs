//! `hostlm-server`: load a model, then serve it until Ctrl-C.
//!
//! Startup is strictly sequential and any failure exits non-zero.

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hostlm::config::ServiceConfig;
use hostlm::model::ModelHandle;
use hostlm::server::Server;
use hostlm::service::{self, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let model_id = config.resolved_model_id();
    info!(model = %model_id, dir = %config.model_dir.display(), "loading model");
    let model = ModelHandle::load(model_id, &config.model_dir, config.cpu)?;
    info!(model = %model.id(), accelerator = %model.accelerator(), "model ready");

    let server = Server::bind(config.listen_addr()).await?;
    let state = AppState::from_config(model, &config);

    service::serve(server, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    })
    .await?;

    info!("server stopped");
    Ok(())
}
