//! The inference service: application state, route handlers, and the serve loop.
//!
//! Routes:
//!
//! | Method | Path        | Handler                  |
//! |--------|-------------|--------------------------|
//! | GET    | `/health`   | liveness, never touches the model |
//! | GET    | `/info`     | host, accelerator, model id |
//! | POST   | `/generate` | text generation          |
//!
//! Every response passes through [`LoggerMiddleware`] and [`CorsMiddleware`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::api::{GenerationRequest, GenerationResult, HealthStatus, ServiceInfoSnapshot};
use crate::config::{DEFAULT_MAX_LENGTH_LIMIT, ServiceConfig};
use crate::context::Context;
use crate::middleware::{CorsMiddleware, LoggerMiddleware, Pipeline};
use crate::model::{GenerationParams, ModelHandle};
use crate::router::Router;
use crate::server::{Server, ServerError};
use crate::{Response, StatusCode};

/// Shared, read-only state injected into every handler.
///
/// Owns the service's single [`ModelHandle`]; the one-permit semaphore makes
/// generation strictly serial no matter how many connections are open.
pub struct AppState {
    model: Arc<ModelHandle>,
    generation_slot: Arc<Semaphore>,
    max_length_limit: usize,
    generation_timeout: Option<Duration>,
    seed: Option<u64>,
}

impl AppState {
    pub fn new(model: ModelHandle) -> Self {
        Self {
            model: Arc::new(model),
            generation_slot: Arc::new(Semaphore::new(1)),
            max_length_limit: DEFAULT_MAX_LENGTH_LIMIT,
            generation_timeout: None,
            seed: None,
        }
    }

    /// State configured from the service's command-line/environment settings.
    pub fn from_config(model: ModelHandle, config: &ServiceConfig) -> Self {
        Self::new(model)
            .with_max_length_limit(config.max_length_limit)
            .with_generation_timeout(config.generation_timeout())
            .with_seed(config.seed)
    }

    #[must_use]
    pub fn with_max_length_limit(mut self, limit: usize) -> Self {
        self.max_length_limit = limit;
        self
    }

    #[must_use]
    pub fn with_generation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.generation_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    /// Builds a fresh `/info` snapshot.
    pub fn info(&self) -> ServiceInfoSnapshot {
        let accelerator = self.model.accelerator();
        ServiceInfoSnapshot {
            status: "running".to_owned(),
            host: hostname(),
            gpu: accelerator.to_string(),
            gpu_available: accelerator.is_available(),
            model: self.model.id().to_owned(),
        }
    }

    /// Runs one generation, waiting for the model if another request holds it.
    ///
    /// Never panics and never returns `Err`: every failure becomes
    /// [`GenerationResult::Failed`].
    pub async fn generate(&self, request: GenerationRequest) -> GenerationResult {
        let max_new_tokens = request.bounded_max_length(self.max_length_limit);
        let seed = self.seed.unwrap_or_else(rand::random);
        let params = GenerationParams::new(max_new_tokens, seed);

        let permit = match Arc::clone(&self.generation_slot).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => return GenerationResult::failed(e),
        };

        let model = Arc::clone(&self.model);
        let prompt = request.prompt;
        let task = tokio::task::spawn_blocking(move || {
            // The permit lives as long as the model call, even if the caller gave up.
            let _permit = permit;
            model.generate(&prompt, &params)
        });

        let joined = match self.generation_timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(timeout = ?limit, "generation timed out");
                    return GenerationResult::failed(format!(
                        "generation timed out after {}s",
                        limit.as_secs()
                    ));
                }
            },
            None => task.await,
        };

        match joined {
            Ok(Ok(generated_text)) => {
                debug!(chars = generated_text.len(), max_new_tokens, "generation finished");
                GenerationResult::Generated { generated_text }
            }
            Ok(Err(e)) => {
                error!(error = %e, "generation failed");
                GenerationResult::failed(e)
            }
            Err(e) => {
                error!(error = %e, "generation task aborted");
                GenerationResult::failed(format!("generation task failed: {e}"))
            }
        }
    }
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_owned())
}

async fn health(_ctx: Context) -> Response {
    Response::json(StatusCode::Ok, &HealthStatus::healthy())
}

async fn info(state: Arc<AppState>) -> Response {
    Response::json(StatusCode::Ok, &state.info())
}

async fn generate(state: Arc<AppState>, ctx: Context) -> Response {
    let request: GenerationRequest = match ctx.json_or_default() {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "rejecting malformed generation request");
            return Response::json(StatusCode::InternalServerError, &GenerationResult::failed(e));
        }
    };

    let result = state.generate(request).await;
    let status = if result.is_error() {
        StatusCode::InternalServerError
    } else {
        StatusCode::Ok
    };
    Response::json(status, &result)
}

/// Registers the service's routes against `state`.
pub fn router(state: Arc<AppState>) -> Router {
    let mut router = Router::new();
    router.get("/health", health);

    let info_state = Arc::clone(&state);
    router.get("/info", move |_ctx: Context| info(Arc::clone(&info_state)));

    router.post("/generate", move |ctx: Context| generate(Arc::clone(&state), ctx));
    router
}

/// The full request pipeline: logging, then CORS, then routing.
pub fn pipeline(state: Arc<AppState>) -> Pipeline {
    Pipeline::builder()
        .layer(LoggerMiddleware)
        .layer(CorsMiddleware::permissive())
        .build(router(state))
}

/// Serves `state` on an already-bound `server` until `shutdown` resolves.
///
/// # Errors
///
/// Returns [`ServerError::Io`] if the listener fails.
pub async fn serve<S>(server: Server, state: AppState, shutdown: S) -> Result<(), ServerError>
where
    S: Future<Output = ()>,
{
    let pipeline = Arc::new(pipeline(Arc::new(state)));
    server
        .run(
            move |request| {
                let pipeline = Arc::clone(&pipeline);
                async move { pipeline.handle(request).await }
            },
            shutdown,
        )
        .await
}
