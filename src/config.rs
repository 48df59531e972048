//! Service configuration, read once at process start.
//!
//! Every option is a command-line flag with an environment-variable fallback.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::api::DEFAULT_PORT;

/// Largest `max_length` honoured unless configured otherwise.
pub const DEFAULT_MAX_LENGTH_LIMIT: usize = 1024;

#[derive(Debug, Clone, Parser)]
#[command(name = "hostlm-server", version, about = "Serve a local language model over HTTP")]
pub struct ServiceConfig {
    /// Address to listen on.
    #[arg(long, env = "HOSTLM_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, env = "HOSTLM_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory holding config.json, tokenizer.json and *.safetensors.
    #[arg(long, env = "HOSTLM_MODEL_DIR")]
    pub model_dir: PathBuf,

    /// Identifier reported by /info. Defaults to the model directory's name.
    #[arg(long, env = "HOSTLM_MODEL_ID")]
    pub model_id: Option<String>,

    /// Upper bound applied to a request's max_length.
    #[arg(long, env = "HOSTLM_MAX_LENGTH_LIMIT", default_value_t = DEFAULT_MAX_LENGTH_LIMIT)]
    pub max_length_limit: usize,

    /// Fail a generation that runs longer than this many seconds.
    #[arg(long, env = "HOSTLM_GENERATION_TIMEOUT")]
    pub generation_timeout: Option<u64>,

    /// Fixed sampling seed; a fresh random seed is used per request when unset.
    #[arg(long, env = "HOSTLM_SEED")]
    pub seed: Option<u64>,

    /// Run on the CPU even when an accelerator is present.
    #[arg(long, env = "HOSTLM_CPU")]
    pub cpu: bool,
}

impl ServiceConfig {
    /// `host:port` as accepted by the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The configured model id, or the last component of the model directory.
    pub fn resolved_model_id(&self) -> String {
        self.model_id.clone().unwrap_or_else(|| {
            self.model_dir
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.model_dir.display().to_string())
        })
    }

    pub fn generation_timeout(&self) -> Option<Duration> {
        self.generation_timeout.map(Duration::from_secs)
    }
}
