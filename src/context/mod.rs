//! Per-request context handed to middleware and route handlers.

use serde::de::DeserializeOwned;

use crate::Request;

/// Per-request context wrapping the parsed [`Request`].
///
/// Shared application state is not stored here; handlers capture it when
/// they are registered, so every route sees the same injected state.
pub struct Context {
    request: Request,
}

impl Context {
    /// Create a new context from a request
    pub fn new(request: Request) -> Self {
        Self { request }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Deserializes the request body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(self.request.body())
    }

    /// Like [`json`](Self::json), but an empty or all-whitespace body yields
    /// `T::default()`.
    pub fn json_or_default<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned + Default,
    {
        if self.request.body().iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }
        self.json()
    }
}
