//! End-to-end tests: a real server on a loopback port, driven by the real client.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

use hostlm::api::{GenerationResult, HealthStatus};
use hostlm::client::InferenceClient;
use hostlm::model::{Accelerator, GenerationParams, ModelError, ModelHandle, TextGenerator};
use hostlm::server::Server;
use hostlm::service::{self, AppState};

/// Returns the prompt followed by one `x` per requested token.
struct Scripted {
    active: AtomicUsize,
    peak: Arc<AtomicUsize>,
    delay: Duration,
}

impl Scripted {
    fn new(delay: Duration) -> (Self, Arc<AtomicUsize>) {
        let peak = Arc::new(AtomicUsize::new(0));
        let generator = Self {
            active: AtomicUsize::new(0),
            peak: Arc::clone(&peak),
            delay,
        };
        (generator, peak)
    }
}

impl TextGenerator for Scripted {
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, ModelError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(format!("{prompt} {}", "x".repeat(params.max_new_tokens)))
    }

    fn accelerator(&self) -> Accelerator {
        Accelerator::None
    }
}

struct Running {
    port: u16,
    stop: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl Running {
    fn client(&self) -> InferenceClient {
        InferenceClient::new("127.0.0.1", self.port).unwrap()
    }

    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.unwrap();
    }
}

async fn start(state: AppState) -> Running {
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let port = server.local_addr().port();
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        service::serve(server, state, async {
            let _ = stopped.await;
        })
        .await
        .unwrap();
    });
    Running {
        port,
        stop: Some(stop),
        task,
    }
}

async fn start_scripted(delay: Duration) -> (Running, Arc<AtomicUsize>) {
    let (generator, peak) = Scripted::new(delay);
    let running = start(AppState::new(ModelHandle::new("demo-model", generator))).await;
    (running, peak)
}

async fn raw_exchange(port: u16, request: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    String::from_utf8(buf).unwrap()
}

#[tokio::test]
async fn info_reports_the_loaded_model() {
    let (running, _) = start_scripted(Duration::ZERO).await;
    let client = running.client();

    assert_eq!(client.health_check().await, HealthStatus::healthy());

    let info = client.get_info().await;
    let snapshot = info.info().expect("info should succeed");
    assert_eq!(snapshot.status, "running");
    assert_eq!(snapshot.model, "demo-model");
    assert_eq!(snapshot.gpu, "none");
    assert!(!snapshot.gpu_available);

    running.shutdown().await;
}

#[tokio::test]
async fn generate_returns_text() {
    let (running, _) = start_scripted(Duration::ZERO).await;
    let result = running.client().generate_text("Hello", 20).await;

    let text = result.text().expect("generation should succeed");
    assert!(!text.is_empty());
    assert_eq!(text, format!("Hello {}", "x".repeat(20)));

    running.shutdown().await;
}

#[tokio::test]
async fn malformed_body_does_not_break_the_service() {
    let (running, _) = start_scripted(Duration::ZERO).await;

    let body = "{\"prompt\": ";
    let raw = raw_exchange(
        running.port,
        &format!(
            "POST /generate HTTP/1.1\r\nHost: x\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        ),
    )
    .await;
    assert!(raw.starts_with("HTTP/1.1 500"), "got: {raw}");
    assert!(raw.contains("\"error\""));

    let result = running.client().generate_text("still alive", 3).await;
    assert_eq!(result.text(), Some("still alive xxx"));

    running.shutdown().await;
}

#[tokio::test]
async fn health_and_info_are_stable_across_calls() {
    let (running, _) = start_scripted(Duration::ZERO).await;
    let client = running.client();

    for _ in 0..3 {
        assert!(client.health_check().await.is_healthy());
    }
    let first = client.get_info().await;
    let second = client.get_info().await;
    assert_eq!(
        first.info().map(|i| i.model.clone()),
        second.info().map(|i| i.model.clone())
    );

    running.shutdown().await;
}

#[tokio::test]
async fn concurrent_generations_run_one_at_a_time() {
    let (running, peak) = start_scripted(Duration::from_millis(50)).await;
    let client = running.client();

    let calls = (0..4).map(|i| {
        let client = client.clone();
        async move { client.generate_text(&format!("p{i}"), 2).await }
    });
    let results = futures_join_all(calls).await;

    assert!(results.iter().all(|r| !r.is_error()));
    assert_eq!(peak.load(Ordering::SeqCst), 1);

    running.shutdown().await;
}

async fn futures_join_all<F>(calls: impl Iterator<Item = F>) -> Vec<GenerationResult>
where
    F: Future<Output = GenerationResult> + Send + 'static,
{
    let handles: Vec<_> = calls.map(tokio::spawn).collect();
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

#[tokio::test]
async fn client_timeout_resolves_to_an_error() {
    let (running, _) = start_scripted(Duration::from_millis(1500)).await;
    let client =
        InferenceClient::with_timeout("127.0.0.1", running.port, Duration::from_millis(200))
            .unwrap();

    let result = client.generate_text("slow", 5).await;
    assert!(result.is_error());
    assert!(!result.error().unwrap().is_empty());

    running.shutdown().await;
}

#[tokio::test]
async fn server_timeout_reports_an_error() {
    let (generator, _) = Scripted::new(Duration::from_millis(800));
    let state = AppState::new(ModelHandle::new("slow", generator))
        .with_generation_timeout(Some(Duration::from_millis(100)));
    let running = start(state).await;

    let result = running.client().generate_text("slow", 5).await;
    assert!(
        result.error().unwrap().starts_with("generation timed out"),
        "got: {result:?}"
    );

    running.shutdown().await;
}

#[tokio::test]
async fn cors_headers_on_the_wire() {
    let (running, _) = start_scripted(Duration::ZERO).await;

    let raw = raw_exchange(
        running.port,
        "GET /health HTTP/1.1\r\nHost: x\r\nOrigin: http://vm.local\r\nConnection: close\r\n\r\n",
    )
    .await
    .to_ascii_lowercase();
    assert!(raw.starts_with("http/1.1 200"));
    assert!(raw.contains("access-control-allow-origin: *"));

    let raw = raw_exchange(
        running.port,
        "OPTIONS /generate HTTP/1.1\r\nHost: x\r\n\
         Access-Control-Request-Method: POST\r\nConnection: close\r\n\r\n",
    )
    .await
    .to_ascii_lowercase();
    assert!(raw.starts_with("http/1.1 200"), "got: {raw}");
    assert!(raw.contains("access-control-allow-methods:"));
    assert!(raw.contains("access-control-allow-headers:"));

    running.shutdown().await;
}

#[tokio::test]
async fn unknown_path_is_404() {
    let (running, _) = start_scripted(Duration::ZERO).await;

    let raw = raw_exchange(
        running.port,
        "GET /does-not-exist HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(raw.starts_with("HTTP/1.1 404"), "got: {raw}");

    running.shutdown().await;
}

#[tokio::test]
async fn stopped_service_reads_as_connection_failed() {
    let (running, _) = start_scripted(Duration::ZERO).await;
    let client = running.client();
    running.shutdown().await;

    assert_eq!(
        client.health_check().await,
        HealthStatus::unhealthy("Connection failed")
    );
    assert!(client.get_info().await.is_error());
}

#[tokio::test]
async fn pooled_connections_do_not_outlive_the_service() {
    let (running, _) = start_scripted(Duration::ZERO).await;
    let client = running.client();

    // Leaves a keep-alive connection in the client's pool.
    assert!(client.health_check().await.is_healthy());
    running.shutdown().await;

    assert_eq!(
        client.health_check().await,
        HealthStatus::unhealthy("Connection failed")
    );
    assert!(client.generate_text("after stop", 3).await.is_error());
}

#[tokio::test]
async fn bare_generate_post_uses_defaults() {
    let (running, _) = start_scripted(Duration::ZERO).await;

    let raw = raw_exchange(
        running.port,
        "POST /generate HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(raw.starts_with("HTTP/1.1 200"), "got: {raw}");
    assert!(raw.contains(&format!("\"generated_text\":\" {}\"", "x".repeat(100))));

    running.shutdown().await;
}
