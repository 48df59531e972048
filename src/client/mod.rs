//! Typed client for the inference service.
//!
//! Every operation returns a value, never an error: transport failures,
//! timeouts, server-side 500s, and undecodable bodies all come back as the
//! error variant of the same result type used for success.
//!
//! # Examples
//!
//! ```rust,no_run
//! use hostlm::client::InferenceClient;
//!
//! # async fn demo() -> Result<(), hostlm::client::ClientError> {
//! let client = InferenceClient::new("127.0.0.1", 8000)?;
//! let result = client.generate_text("Hello", 20).await;
//! match result.text() {
//!     Some(text) => println!("{text}"),
//!     None => eprintln!("failed: {}", result.error().unwrap_or_default()),
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::api::{
    CONNECTION_FAILED, DEFAULT_MAX_LENGTH, DEFAULT_PORT, GenerationRequest, GenerationResult,
    HealthStatus, InfoResult,
};

/// Transport timeout applied to every call unless overridden.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Raised only while constructing a client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Client for one service address.
#[derive(Debug, Clone)]
pub struct InferenceClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl InferenceClient {
    /// A client for `host:port` with the [`DEFAULT_TIMEOUT`].
    pub fn new(host: &str, port: u16) -> Result<Self, ClientError> {
        Self::with_timeout(host, port, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(host: &str, port: u16, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: format!("http://{host}:{port}"),
            timeout,
        })
    }

    /// A client for the service's default local address.
    pub fn local() -> Result<Self, ClientError> {
        Self::new("127.0.0.1", DEFAULT_PORT)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `GET /health`. Any failure reads as unhealthy with "Connection failed".
    pub async fn health_check(&self) -> HealthStatus {
        match self.get_json::<HealthStatus>("/health").await {
            Ok(status) => status,
            Err(e) => {
                debug!(error = %e, url = %self.base_url, "health check failed");
                HealthStatus::unhealthy(CONNECTION_FAILED)
            }
        }
    }

    /// `GET /info`. Any failure reads as `{"error": "Connection failed"}`.
    pub async fn get_info(&self) -> InfoResult {
        match self.get_json::<InfoResult>("/info").await {
            Ok(info) => info,
            Err(e) => {
                debug!(error = %e, url = %self.base_url, "info request failed");
                InfoResult::Failed {
                    error: CONNECTION_FAILED.to_owned(),
                }
            }
        }
    }

    /// `POST /generate` with `max_length` new tokens at most.
    ///
    /// Server-side failures return the server's own error message; transport
    /// failures return the transport error's text.
    pub async fn generate_text(&self, prompt: &str, max_length: usize) -> GenerationResult {
        let body = GenerationRequest::new(prompt, max_length);
        let sent = self
            .http
            .post(format!("{}/generate", self.base_url))
            .json(&body)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, url = %self.base_url, "generate request failed");
                return GenerationResult::failed(e);
            }
        };

        let status = response.status();
        match response.json::<GenerationResult>().await {
            Ok(result) => result,
            Err(e) => GenerationResult::failed(format!("HTTP {status}: {e}")),
        }
    }

    /// [`generate_text`](Self::generate_text) with the default `max_length` of 100.
    pub async fn generate_text_default(&self, prompt: &str) -> GenerationResult {
        self.generate_text(prompt, DEFAULT_MAX_LENGTH).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, reqwest::Error> {
        self.http
            .get(format!("{}{path}", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json::<T>()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_and_timeout() {
        let client = InferenceClient::with_timeout("10.0.2.2", 9000, Duration::from_millis(250))
            .unwrap();
        assert_eq!(client.base_url(), "http://10.0.2.2:9000");
        assert_eq!(client.timeout(), Duration::from_millis(250));
    }

    #[test]
    fn local_defaults() {
        let client = InferenceClient::local().unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:8000");
        assert_eq!(client.timeout(), DEFAULT_TIMEOUT);
    }

    async fn closed_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn unreachable_service_is_normalized() {
        let port = closed_port().await;
        let client =
            InferenceClient::with_timeout("127.0.0.1", port, Duration::from_secs(2)).unwrap();

        assert_eq!(
            client.health_check().await,
            HealthStatus::unhealthy("Connection failed")
        );
        assert_eq!(
            client.get_info().await,
            InfoResult::Failed {
                error: "Connection failed".to_owned()
            }
        );

        let generated = client.generate_text_default("Hello").await;
        assert!(generated.is_error());
        assert!(!generated.error().unwrap().is_empty());
    }
}
