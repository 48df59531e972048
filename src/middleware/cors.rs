//! Cross-Origin Resource Sharing for browser and notebook clients.

use std::pin::Pin;

use super::{Middleware, Next};
use crate::{Method, Response, StatusCode, context::Context};

/// CORS middleware that stamps `Access-Control-*` headers on every response
/// and answers `OPTIONS` preflights itself.
///
/// # Behavior
///
/// - `OPTIONS` requests, for any path, are short-circuited with `200 OK`, an
///   empty body, the allow headers, and `Access-Control-Max-Age`. The
///   downstream handler is not called.
/// - Every other response, including 404s and 500s, gets
///   `Access-Control-Allow-Origin`, `Access-Control-Allow-Methods`, and
///   `Access-Control-Allow-Headers` appended, whether or not the request
///   carried an `Origin` header.
///
/// # Examples
///
/// ```rust
/// use hostlm::middleware::CorsMiddleware;
///
/// let cors = CorsMiddleware::permissive();
/// ```
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    allow_origin: String,
    allowed_methods: String,
    allowed_headers: String,
    max_age_secs: u32,
}

impl CorsMiddleware {
    /// Allows any origin, `GET, POST, OPTIONS`, and the `Content-Type` and
    /// `Authorization` request headers.
    pub fn permissive() -> Self {
        Self {
            allow_origin: "*".to_owned(),
            allowed_methods: ["GET", "POST", "OPTIONS"].join(", "),
            allowed_headers: ["Content-Type", "Authorization"].join(", "),
            max_age_secs: 3600,
        }
    }

    /// Stamps the allow-origin, allow-methods, and allow-headers headers on
    /// `response`.
    pub fn apply(&self, response: &mut Response) {
        response.add_header("Access-Control-Allow-Origin", self.allow_origin.as_str());
        response.add_header("Access-Control-Allow-Methods", self.allowed_methods.as_str());
        response.add_header("Access-Control-Allow-Headers", self.allowed_headers.as_str());
    }

    fn preflight(&self) -> Response {
        Response::new(StatusCode::Ok)
            .header("Access-Control-Allow-Origin", &self.allow_origin)
            .header("Access-Control-Allow-Methods", &self.allowed_methods)
            .header("Access-Control-Allow-Headers", &self.allowed_headers)
            .header("Access-Control-Max-Age", self.max_age_secs.to_string())
    }
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self::permissive()
    }
}

impl Middleware for CorsMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        if ctx.request().method() == &Method::Options {
            let response = self.preflight();
            return Box::pin(async move { response });
        }

        let cors = self.clone();

        Box::pin(async move {
            let mut response = next.run(ctx).await;
            cors.apply(&mut response);
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::Request;
    use crate::middleware::Pipeline;
    use crate::router::Router;

    fn request(method: &str, path: &str) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nOrigin: http://notebook:8888\r\n\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    fn pipeline(called: Arc<AtomicBool>) -> Pipeline {
        let mut router = Router::new();
        router.get("/health", move |_ctx: Context| {
            let called = Arc::clone(&called);
            async move {
                called.store(true, Ordering::SeqCst);
                Response::new(StatusCode::Ok).body("ok")
            }
        });
        Pipeline::builder()
            .layer(CorsMiddleware::permissive())
            .build(router)
    }

    #[tokio::test]
    async fn preflight_short_circuits_with_200() {
        let called = Arc::new(AtomicBool::new(false));
        let res = pipeline(Arc::clone(&called))
            .handle(request("OPTIONS", "/generate"))
            .await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert!(res.payload().is_empty());
        assert_eq!(res.headers().get("access-control-allow-origin"), Some("*"));
        assert_eq!(
            res.headers().get("access-control-allow-methods"),
            Some("GET, POST, OPTIONS")
        );
        assert_eq!(res.headers().get("access-control-max-age"), Some("3600"));
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn actual_requests_are_decorated() {
        let called = Arc::new(AtomicBool::new(false));
        let res = pipeline(Arc::clone(&called))
            .handle(request("GET", "/health"))
            .await;
        assert!(called.load(Ordering::SeqCst));
        assert_eq!(res.headers().get("access-control-allow-origin"), Some("*"));
        assert_eq!(
            res.headers().get("access-control-allow-headers"),
            Some("Content-Type, Authorization")
        );
    }

    #[test]
    fn apply_stamps_allow_headers() {
        let mut res = Response::new(StatusCode::BadRequest).body("bad");
        CorsMiddleware::permissive().apply(&mut res);
        assert_eq!(res.headers().get("access-control-allow-origin"), Some("*"));
        assert_eq!(
            res.headers().get("access-control-allow-methods"),
            Some("GET, POST, OPTIONS")
        );
        assert!(res.headers().get("access-control-max-age").is_none());
    }

    #[tokio::test]
    async fn not_found_is_decorated_too() {
        let res = pipeline(Arc::new(AtomicBool::new(false)))
            .handle(request("GET", "/nope"))
            .await;
        assert_eq!(res.status(), StatusCode::NotFound);
        assert_eq!(res.headers().get("access-control-allow-origin"), Some("*"));
    }
}
