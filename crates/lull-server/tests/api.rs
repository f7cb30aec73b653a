use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use lull_config::{Agent, Cache, Config, Gate, Generator, Limits, Server, Upstream};
use lull_contracts::{AgentOutput, Plan};
use lull_server::{
    build_app_with, AgentEngine, AgentError, BackendError, Operation, VideoBackend,
};
use serde_json::{json, Value};
use tower::util::ServiceExt;

fn test_config() -> Config {
    Config {
        server: Server {
            listen_addr: "127.0.0.1:0".to_string(),
        },
        limits: Limits {
            window_secs: 60,
            max_requests: 3,
        },
        cache: Cache { ttl_secs: 300 },
        gate: Gate { max_concurrent: 1 },
        generator: Generator {
            model: "veo-test".to_string(),
            poll_interval_secs: 2,
            retry_max_attempts: 3,
            retry_base_delay_secs: 5,
            retry_max_delay_secs: 60,
            chunk_size_bytes: 512 * 1024,
        },
        agent: Agent {
            endpoint: "http://127.0.0.1:1".to_string(),
            app_name: "my_agent".to_string(),
            user_id: "default".to_string(),
            timeout_ms: 1_000,
        },
        upstream: Upstream {
            endpoint: "http://127.0.0.1:1".to_string(),
            api_key_env: "UNUSED".to_string(),
            timeout_ms: 1_000,
        },
    }
}

/// Agent fake: always returns a state tree with a stringified plan under
/// `final_response`, the shape the real engine produces.
struct PlanAgent {
    calls: AtomicUsize,
    delay: Duration,
}

impl PlanAgent {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        })
    }

    fn slow() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(50),
        })
    }
}

#[async_trait]
impl AgentEngine for PlanAgent {
    async fn run(
        &self,
        _user_id: &str,
        _session_id: &str,
        _text: &str,
    ) -> Result<AgentOutput, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay > Duration::ZERO {
            tokio::time::sleep(self.delay).await;
        }
        let state = json!({
            "final_response": "{\"prompt\":\"ocean waves\",\"duration_sec\":6,\"aspect_ratio\":\"16:9\"}"
        });
        Ok(AgentOutput {
            state: state.as_object().cloned().unwrap_or_default(),
            events: vec![],
        })
    }
}

/// Agent fake with nothing extractable, to force the fallback plan.
struct EmptyAgent;

#[async_trait]
impl AgentEngine for EmptyAgent {
    async fn run(
        &self,
        _user_id: &str,
        _session_id: &str,
        _text: &str,
    ) -> Result<AgentOutput, AgentError> {
        Ok(AgentOutput::default())
    }
}

enum BackendMode {
    Succeed,
    AlwaysRateLimited,
    OperationFails,
}

struct FakeBackend {
    mode: BackendMode,
    payload: Vec<u8>,
    submits: AtomicUsize,
    prompts: std::sync::Mutex<Vec<String>>,
}

impl FakeBackend {
    fn succeeding(payload: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            mode: BackendMode::Succeed,
            payload,
            submits: AtomicUsize::new(0),
            prompts: std::sync::Mutex::new(vec![]),
        })
    }

    fn with_mode(mode: BackendMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            payload: vec![],
            submits: AtomicUsize::new(0),
            prompts: std::sync::Mutex::new(vec![]),
        })
    }
}

#[async_trait]
impl VideoBackend for FakeBackend {
    async fn submit(&self, prompt: &str) -> Result<Operation, BackendError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.mode {
            BackendMode::AlwaysRateLimited => {
                Err(BackendError::RateLimited("quota".to_string()))
            }
            _ => Ok(Operation {
                name: "operations/test".to_string(),
                done: false,
                error: false,
                video: None,
            }),
        }
    }

    async fn poll(&self, operation: &Operation) -> Result<Operation, BackendError> {
        let mut refreshed = operation.clone();
        refreshed.done = true;
        refreshed.error = matches!(self.mode, BackendMode::OperationFails);
        Ok(refreshed)
    }

    async fn fetch(&self, _operation: &Operation) -> Result<Vec<u8>, BackendError> {
        Ok(self.payload.clone())
    }
}

fn post_video(text: &str, identity: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/videos")
        .header("content-type", "application/json")
        .header("x-lull-user", identity)
        .body(Body::from(json!({"response": text}).to_string()))
        .expect("request build")
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json body")
}

#[tokio::test]
async fn healthz_ok() {
    let app = build_app_with(
        test_config(),
        PlanAgent::new(),
        FakeBackend::succeeding(vec![]),
    );
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/healthz")
                .body(Body::empty())
                .expect("request build"),
        )
        .await
        .expect("oneshot");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn returns_mp4_with_inline_disposition() {
    let payload = vec![42u8; 700 * 1024];
    let app = build_app_with(
        test_config(),
        PlanAgent::new(),
        FakeBackend::succeeding(payload.clone()),
    );
    let response = app
        .oneshot(post_video("gentle rain", "tester"))
        .await
        .expect("oneshot");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "video/mp4"
    );
    assert_eq!(
        response.headers().get("content-disposition").unwrap(),
        "inline; filename=\"generated.mp4\""
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    assert_eq!(body.as_ref(), payload.as_slice());
}

#[tokio::test(start_paused = true)]
async fn root_path_is_an_alias() {
    let app = build_app_with(
        test_config(),
        PlanAgent::new(),
        FakeBackend::succeeding(vec![1, 2, 3]),
    );
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
        .body(Body::from(json!({"response": "rain"}).to_string()))
        .expect("request build");
    let response = app.oneshot(request).await.expect("oneshot");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn empty_response_is_rejected() {
    let app = build_app_with(
        test_config(),
        PlanAgent::new(),
        FakeBackend::succeeding(vec![]),
    );
    let response = app
        .oneshot(post_video("   ", "tester"))
        .await
        .expect("oneshot");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = body_json(response).await;
    assert_eq!(payload["error"]["code"], "invalid_request");
}

#[tokio::test(start_paused = true)]
async fn fourth_request_in_window_is_throttled() {
    let app = build_app_with(
        test_config(),
        PlanAgent::new(),
        FakeBackend::succeeding(vec![0u8; 8]),
    );
    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(post_video("rain", "tester"))
            .await
            .expect("oneshot");
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = app
        .oneshot(post_video("rain", "tester"))
        .await
        .expect("oneshot");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let payload = body_json(response).await;
    assert_eq!(payload["error"]["code"], "throttled");
    assert_eq!(payload["error"]["message"], "Too many requests");
}

#[tokio::test(start_paused = true)]
async fn cache_hit_skips_agent_and_backend() {
    let agent = PlanAgent::new();
    let backend = FakeBackend::succeeding(vec![5u8; 32]);
    let app = build_app_with(test_config(), agent.clone(), backend.clone());

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(post_video("soft rain", "tester"))
            .await
            .expect("oneshot");
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
    assert_eq!(backend.submits.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn semantically_identical_inputs_share_a_cache_entry() {
    let agent = PlanAgent::new();
    let backend = FakeBackend::succeeding(vec![5u8; 32]);
    let app = build_app_with(test_config(), agent.clone(), backend.clone());

    for text in ["soft rain", "  soft rain ASMR  "] {
        let response = app
            .clone()
            .oneshot(post_video(text, "tester"))
            .await
            .expect("oneshot");
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn operation_failure_maps_to_500() {
    let app = build_app_with(
        test_config(),
        PlanAgent::new(),
        FakeBackend::with_mode(BackendMode::OperationFails),
    );
    let response = app
        .oneshot(post_video("rain", "tester"))
        .await
        .expect("oneshot");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let payload = body_json(response).await;
    assert_eq!(payload["error"]["code"], "operation_failed");
    assert_eq!(payload["error"]["message"], "operation failed to load");
}

#[tokio::test(start_paused = true)]
async fn exhausted_upstream_retries_map_to_429() {
    let backend = FakeBackend::with_mode(BackendMode::AlwaysRateLimited);
    let app = build_app_with(test_config(), PlanAgent::new(), backend.clone());
    let response = app
        .oneshot(post_video("rain", "tester"))
        .await
        .expect("oneshot");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    // initial attempt plus three retries
    assert_eq!(backend.submits.load(Ordering::SeqCst), 4);
    let payload = body_json(response).await;
    assert_eq!(payload["error"]["code"], "rate_limited");
    assert_eq!(
        payload["error"]["message"],
        "Rate limit hit. Try again shortly."
    );
}

#[tokio::test(start_paused = true)]
async fn missing_plan_falls_back_to_raw_text() {
    let backend = FakeBackend::succeeding(vec![1u8; 4]);
    let app = build_app_with(test_config(), Arc::new(EmptyAgent), backend.clone());
    let response = app
        .oneshot(post_video("crackling fire", "tester"))
        .await
        .expect("oneshot");
    assert_eq!(response.status(), StatusCode::OK);

    let expected = lull_kernel::compose_generation_prompt(&Plan::fallback("crackling fire ASMR"));
    let prompts = backend.prompts.lock().unwrap();
    assert_eq!(*prompts, vec![expected]);
}

#[tokio::test(start_paused = true)]
async fn concurrent_duplicate_requests_generate_once() {
    let agent = PlanAgent::slow();
    let backend = FakeBackend::succeeding(vec![3u8; 64]);
    let app = build_app_with(test_config(), agent.clone(), backend.clone());

    let (first, second) = tokio::join!(
        app.clone().oneshot(post_video("rain", "tester")),
        app.clone().oneshot(post_video("rain", "tester")),
    );
    let first = first.expect("oneshot");
    let second = second.expect("oneshot");
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
    assert_eq!(backend.submits.load(Ordering::SeqCst), 1);
}
