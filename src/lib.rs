//! # hostlm
//!
//! A host-side HTTP service that exposes one local language model, and the
//! typed client used to call it from a VM, notebook, or script.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use hostlm::model::ModelHandle;
//! use hostlm::server::Server;
//! use hostlm::service::{self, AppState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let model = ModelHandle::load("tinyllama", Path::new("/models/tinyllama"), false)?;
//!     let server = Server::bind("0.0.0.0:8000").await?;
//!     service::serve(server, AppState::new(model), async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```

// ── HTTP plumbing ─────────────────────────────────────────────────────────────
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;
pub mod server;

// ── Inference service and client ──────────────────────────────────────────────
pub mod api;
pub mod client;
pub mod config;
pub mod model;
pub mod service;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};
