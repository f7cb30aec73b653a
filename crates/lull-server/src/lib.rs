use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::stream;
use lull_config::Config;
use lull_contracts::{
    AgentEvent, AgentOutput, ErrorBody, ErrorResponse, EventPart, Plan, VideoRequest,
};
use lull_kernel::{compose_generation_prompt, extract_plan, normalize_request_text};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

pub async fn serve(cfg: Config) -> Result<(), String> {
    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|e| format!("invalid listen_addr: {e}"))?;

    let app = build_app(cfg)?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| format!("serve failed: {e}"))
}

pub fn build_app(cfg: Config) -> Result<Router, String> {
    let agent = Arc::new(HttpAgentEngine::new(&cfg.agent)?);
    let backend = Arc::new(HttpVideoBackend::new(&cfg.upstream, &cfg.generator.model)?);
    Ok(build_app_with(cfg, agent, backend))
}

/// Builds the router with injected collaborators. Tests use this to swap in
/// scripted agent and backend implementations.
pub fn build_app_with(
    cfg: Config,
    agent: Arc<dyn AgentEngine>,
    backend: Arc<dyn VideoBackend>,
) -> Router {
    let state = AppState::new(cfg, agent, backend);
    Router::new()
        .route("/v1/healthz", get(healthz))
        .route("/v1/videos", post(videos))
        .route("/", post(videos))
        .with_state(state)
}

#[derive(Clone)]
struct AppState {
    limiter: Arc<RateLimiter>,
    cache: Arc<ResultCache>,
    gate: Arc<Semaphore>,
    flights: Arc<SingleFlight>,
    generator: Arc<RetryingGenerator>,
    agent: Arc<dyn AgentEngine>,
    agent_user: String,
    chunk_size: usize,
}

impl AppState {
    fn new(cfg: Config, agent: Arc<dyn AgentEngine>, backend: Arc<dyn VideoBackend>) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::new(
                Duration::from_secs(cfg.limits.window_secs),
                cfg.limits.max_requests,
            )),
            cache: Arc::new(ResultCache::new(Duration::from_secs(cfg.cache.ttl_secs))),
            gate: Arc::new(Semaphore::new(cfg.gate.max_concurrent)),
            flights: SingleFlight::new(),
            generator: Arc::new(RetryingGenerator::new(backend, &cfg.generator)),
            agent,
            agent_user: cfg.agent.user_id.clone(),
            chunk_size: cfg.generator.chunk_size_bytes,
        }
    }

    /// End-to-end flow for one request: normalize, admit, consult the cache,
    /// then generate behind the per-key single-flight claim.
    async fn handle_video(
        &self,
        identity: &str,
        raw_text: &str,
    ) -> Result<Arc<Vec<u8>>, ApiError> {
        let normalized = normalize_request_text(raw_text);

        if !self.limiter.admit(identity).await {
            info!(identity, "request throttled");
            return Err(ApiError::Throttled);
        }

        loop {
            if let Some(hit) = self.cache.get(&normalized).await {
                debug!(key = %normalized, "cache hit");
                return Ok(hit);
            }
            match self.flights.claim(&normalized) {
                FlightClaim::Follower(done) => {
                    debug!(key = %normalized, "waiting on in-flight generation");
                    // Wakes when the leader's claim guard closes the
                    // semaphore; the cache is re-checked on the next pass.
                    let _ = done.acquire().await;
                }
                FlightClaim::Leader(guard) => {
                    let result = self.run_generation(identity, &normalized).await;
                    drop(guard);
                    return result;
                }
            }
        }
    }

    async fn run_generation(
        &self,
        identity: &str,
        normalized: &str,
    ) -> Result<Arc<Vec<u8>>, ApiError> {
        let session_id = format!("lull-{identity}");
        let output = self
            .agent
            .run(&self.agent_user, &session_id, normalized)
            .await
            .map_err(|e| {
                warn!(error = %e, "agent invocation failed");
                ApiError::Upstream(e.to_string())
            })?;

        let plan = match extract_plan(&output) {
            Some(plan) => plan,
            None => {
                debug!("no plan in agent output, substituting fallback");
                Plan::fallback(normalized)
            }
        };
        let prompt = compose_generation_prompt(&plan);

        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| ApiError::Upstream("generation gate closed".to_string()))?;
        let payload = Arc::new(self.generator.generate(&prompt).await?);

        self.cache.put(normalized, payload.clone()).await;
        Ok(payload)
    }
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn videos(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<VideoRequest>,
) -> Result<Response, ApiError> {
    let identity = headers
        .get("x-lull-user")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .unwrap_or("anonymous");
    if req.response.trim().is_empty() {
        return Err(ApiError::InvalidRequest(
            "response must not be empty".to_string(),
        ));
    }

    let request_id = uuid::Uuid::new_v4().simple().to_string();
    info!(%request_id, identity, "video request received");
    let payload = state.handle_video(identity, &req.response).await?;
    info!(%request_id, bytes = payload.len(), "video request served");
    Ok(video_response(payload, state.chunk_size))
}

/// Streams the artifact in fixed-size chunks with the inline mp4 headers.
fn video_response(payload: Arc<Vec<u8>>, chunk_size: usize) -> Response {
    let chunk_size = chunk_size.max(1);
    let bytes = Bytes::copy_from_slice(&payload);
    let chunks: Vec<Result<Bytes, Infallible>> = (0..bytes.len())
        .step_by(chunk_size)
        .map(|start| {
            let end = (start + chunk_size).min(bytes.len());
            Ok(bytes.slice(start..end))
        })
        .collect();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(
            header::CONTENT_DISPOSITION,
            "inline; filename=\"generated.mp4\"",
        )
        .body(Body::from_stream(stream::iter(chunks)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("Too many requests")]
    Throttled,
    #[error("Rate limit hit. Try again shortly.")]
    RateLimited,
    #[error("operation failed to load")]
    OperationFailed,
    #[error("video generation failed")]
    Upstream(String),
}

impl From<GenerateError> for ApiError {
    fn from(err: GenerateError) -> Self {
        match err {
            GenerateError::RateLimited => ApiError::RateLimited,
            GenerateError::OperationFailed => ApiError::OperationFailed,
            GenerateError::Upstream(detail) => ApiError::Upstream(detail),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Upstream(detail) = &self {
            warn!(detail = %detail, "upstream failure surfaced to client");
        }
        let (status, code) = match &self {
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            ApiError::Throttled => (StatusCode::TOO_MANY_REQUESTS, "throttled"),
            ApiError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            ApiError::OperationFailed => (StatusCode::INTERNAL_SERVER_ERROR, "operation_failed"),
            ApiError::Upstream(_) => (StatusCode::INTERNAL_SERVER_ERROR, "upstream_error"),
        };
        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: self.to_string(),
                details: None,
            },
        };
        (status, Json(body)).into_response()
    }
}

/// Sliding-window admission control. The evict/check/append sequence runs
/// with the map lock held and no await points, so concurrent admissions for
/// one identity cannot interleave and overshoot the limit.
struct RateLimiter {
    window: Duration,
    max_requests: usize,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            window,
            max_requests,
            windows: Mutex::new(HashMap::new()),
        }
    }

    async fn admit(&self, identity: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let timestamps = windows.entry(identity.to_string()).or_default();
        while timestamps
            .front()
            .is_some_and(|t| now.duration_since(*t) > self.window)
        {
            timestamps.pop_front();
        }
        if timestamps.len() < self.max_requests {
            timestamps.push_back(now);
            true
        } else {
            false
        }
    }
}

struct CacheEntry {
    payload: Arc<Vec<u8>>,
    stored_at: Instant,
}

/// Time-bounded memoization keyed by normalized request text. Expiry is
/// checked lazily at read time; an expired entry is removed and reported
/// absent.
struct ResultCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResultCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    async fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => Some(entry.payload.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn put(&self, key: &str, payload: Arc<Vec<u8>>) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            CacheEntry {
                payload,
                stored_at: Instant::now(),
            },
        );
    }
}

/// Per-key in-flight deduplication. The first caller for a key becomes the
/// leader; later callers get the leader's zero-permit semaphore and wait for
/// it to close. Closing happens in the guard's Drop, so followers are woken
/// even when the leader errors or is cancelled, and a follower that arrives
/// after the close wakes immediately.
struct SingleFlight {
    inner: StdMutex<HashMap<String, Arc<Semaphore>>>,
}

enum FlightClaim {
    Leader(FlightGuard),
    Follower(Arc<Semaphore>),
}

struct FlightGuard {
    key: String,
    flights: Arc<SingleFlight>,
}

impl SingleFlight {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: StdMutex::new(HashMap::new()),
        })
    }

    fn claim(self: &Arc<Self>, key: &str) -> FlightClaim {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = inner.get(key) {
            FlightClaim::Follower(existing.clone())
        } else {
            inner.insert(key.to_string(), Arc::new(Semaphore::new(0)));
            FlightClaim::Leader(FlightGuard {
                key: key.to_string(),
                flights: Arc::clone(self),
            })
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let done = {
            let mut inner = self.flights.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.remove(&self.key)
        };
        if let Some(done) = done {
            done.close();
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("rate limit exhausted after retries")]
    RateLimited,
    #[error("operation reported an error")]
    OperationFailed,
    #[error("upstream failure: {0}")]
    Upstream(String),
}

/// Submits a generation request, retrying rate-limited submissions with
/// exponential backoff, then polls the returned operation to a terminal
/// state. Polling errors are terminal and never retried.
struct RetryingGenerator {
    backend: Arc<dyn VideoBackend>,
    poll_interval: Duration,
    retry_max_attempts: usize,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
}

impl RetryingGenerator {
    fn new(backend: Arc<dyn VideoBackend>, cfg: &lull_config::Generator) -> Self {
        Self {
            backend,
            poll_interval: Duration::from_secs(cfg.poll_interval_secs),
            retry_max_attempts: cfg.retry_max_attempts,
            retry_base_delay: Duration::from_secs(cfg.retry_base_delay_secs),
            retry_max_delay: Duration::from_secs(cfg.retry_max_delay_secs),
        }
    }

    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, GenerateError> {
        let mut attempt = 0usize;
        let mut delay = self.retry_base_delay;
        let mut operation = loop {
            match self.backend.submit(prompt).await {
                Ok(op) => break op,
                Err(BackendError::RateLimited(detail)) => {
                    if attempt >= self.retry_max_attempts {
                        warn!(detail = %detail, "submission rate limited, retries exhausted");
                        return Err(GenerateError::RateLimited);
                    }
                    attempt += 1;
                    info!(
                        attempt,
                        delay_secs = delay.as_secs(),
                        "submission rate limited, backing off"
                    );
                    sleep(delay).await;
                    delay = std::cmp::min(delay * 2, self.retry_max_delay);
                }
                Err(err) => return Err(GenerateError::Upstream(err.to_string())),
            }
        };

        while !operation.done {
            sleep(self.poll_interval).await;
            operation = self
                .backend
                .poll(&operation)
                .await
                .map_err(|e| GenerateError::Upstream(e.to_string()))?;
            if operation.error {
                return Err(GenerateError::OperationFailed);
            }
        }
        if operation.error {
            return Err(GenerateError::OperationFailed);
        }
        debug!(operation = %operation.name, "operation complete, fetching artifact");
        self.backend
            .fetch(&operation)
            .await
            .map_err(|e| GenerateError::Upstream(e.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("http error: {0}")]
    Http(String),
    #[error("unexpected status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("decode error: {0}")]
    Decode(String),
}

/// The multi-agent conversation engine, treated as an opaque collaborator
/// that turns a text request into a state tree plus an event transcript.
#[async_trait]
pub trait AgentEngine: Send + Sync {
    async fn run(
        &self,
        user_id: &str,
        session_id: &str,
        text: &str,
    ) -> Result<AgentOutput, AgentError>;
}

pub struct HttpAgentEngine {
    client: Client,
    endpoint: String,
    app_name: String,
}

impl HttpAgentEngine {
    pub fn new(cfg: &lull_config::Agent) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            client,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            app_name: cfg.app_name.clone(),
        })
    }

    fn session_url(&self, user_id: &str, session_id: &str) -> String {
        format!(
            "{}/apps/{}/users/{}/sessions/{}",
            self.endpoint, self.app_name, user_id, session_id
        )
    }

    async fn ensure_session(&self, user_id: &str, session_id: &str) -> Result<(), AgentError> {
        let response = self
            .client
            .post(self.session_url(user_id, session_id))
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| AgentError::Http(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        // Session creation is idempotent: a session left over from an
        // earlier request for the same identity is reused.
        if detail.to_lowercase().contains("already exists") {
            return Ok(());
        }
        Err(AgentError::Status {
            status: status.as_u16(),
            detail,
        })
    }

    async fn run_turn(
        &self,
        user_id: &str,
        session_id: &str,
        text: &str,
    ) -> Result<Vec<AgentEvent>, AgentError> {
        let body = json!({
            "app_name": self.app_name,
            "user_id": user_id,
            "session_id": session_id,
            "new_message": {"role": "user", "parts": [{"text": text}]},
        });
        let response = self
            .client
            .post(format!("{}/run", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Http(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AgentError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(AgentError::Status {
                status: status.as_u16(),
                detail: text,
            });
        }
        let wire: Vec<WireEvent> =
            serde_json::from_str(&text).map_err(|e| AgentError::Decode(e.to_string()))?;
        Ok(wire.into_iter().map(WireEvent::into_event).collect())
    }

    async fn session_state(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Map<String, Value>, AgentError> {
        let response = self
            .client
            .get(self.session_url(user_id, session_id))
            .send()
            .await
            .map_err(|e| AgentError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AgentError::Status {
                status: status.as_u16(),
                detail,
            });
        }
        let session: WireSession = response
            .json()
            .await
            .map_err(|e| AgentError::Decode(e.to_string()))?;
        Ok(session.state)
    }
}

#[async_trait]
impl AgentEngine for HttpAgentEngine {
    async fn run(
        &self,
        user_id: &str,
        session_id: &str,
        text: &str,
    ) -> Result<AgentOutput, AgentError> {
        self.ensure_session(user_id, session_id).await?;
        let events = self.run_turn(user_id, session_id, text).await?;
        let state = self.session_state(user_id, session_id).await?;
        Ok(AgentOutput { state, events })
    }
}

#[derive(Deserialize)]
struct WireEvent {
    #[serde(default)]
    content: Option<WireContent>,
    #[serde(default)]
    actions: Option<WireActions>,
}

#[derive(Deserialize)]
struct WireContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<WireFunctionCall>,
}

#[derive(Deserialize)]
struct WireFunctionCall {
    #[serde(default)]
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireActions {
    #[serde(default)]
    state_delta: Option<Value>,
}

#[derive(Deserialize)]
struct WireSession {
    #[serde(default)]
    state: Map<String, Value>,
}

impl WireEvent {
    fn into_event(self) -> AgentEvent {
        let parts = self
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| {
                        if let Some(text) = p.text {
                            Some(EventPart::Text(text))
                        } else {
                            p.function_call.map(|fc| EventPart::FunctionCall {
                                name: fc.name,
                                args: fc.args,
                            })
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        AgentEvent {
            state_delta: self.actions.and_then(|a| a.state_delta),
            parts,
        }
    }
}

/// Handle to one asynchronous upstream generation job.
#[derive(Debug, Clone)]
pub struct Operation {
    pub name: String,
    pub done: bool,
    pub error: bool,
    pub video: Option<VideoSource>,
}

#[derive(Debug, Clone)]
pub enum VideoSource {
    /// Base64-encoded bytes returned inline with the operation.
    Inline(String),
    /// Download location for the finished artifact.
    Uri(String),
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("unexpected status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("decode error: {0}")]
    Decode(String),
}

/// The long-running generation API: submit a prompt, poll the operation,
/// fetch the finished artifact.
#[async_trait]
pub trait VideoBackend: Send + Sync {
    async fn submit(&self, prompt: &str) -> Result<Operation, BackendError>;
    async fn poll(&self, operation: &Operation) -> Result<Operation, BackendError>;
    async fn fetch(&self, operation: &Operation) -> Result<Vec<u8>, BackendError>;
}

pub struct HttpVideoBackend {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl HttpVideoBackend {
    pub fn new(cfg: &lull_config::Upstream, model: &str) -> Result<Self, String> {
        let api_key = std::env::var(&cfg.api_key_env)
            .map_err(|_| format!("environment variable {} is not set", cfg.api_key_env))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            client,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    fn decode_operation(status: u16, text: &str) -> Result<Operation, BackendError> {
        if status == 429 {
            return Err(BackendError::RateLimited(text.to_string()));
        }
        if !(200..300).contains(&status) {
            if text.contains("RESOURCE_EXHAUSTED") {
                return Err(BackendError::RateLimited(text.to_string()));
            }
            return Err(BackendError::Status {
                status,
                detail: text.to_string(),
            });
        }
        let body: WireOperation =
            serde_json::from_str(text).map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(body.into_operation())
    }
}

#[async_trait]
impl VideoBackend for HttpVideoBackend {
    async fn submit(&self, prompt: &str) -> Result<Operation, BackendError> {
        let url = format!(
            "{}/v1beta/models/{}:predictLongRunning",
            self.endpoint, self.model
        );
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&json!({"instances": [{"prompt": prompt}]}))
            .send()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))?;
        Self::decode_operation(status, &text)
    }

    async fn poll(&self, operation: &Operation) -> Result<Operation, BackendError> {
        let url = format!("{}/v1beta/{}", self.endpoint, operation.name);
        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))?;
        Self::decode_operation(status, &text)
    }

    async fn fetch(&self, operation: &Operation) -> Result<Vec<u8>, BackendError> {
        match &operation.video {
            Some(VideoSource::Inline(encoded)) => BASE64
                .decode(encoded)
                .map_err(|e| BackendError::Decode(e.to_string())),
            Some(VideoSource::Uri(uri)) => {
                let response = self
                    .client
                    .get(uri)
                    .header("x-goog-api-key", &self.api_key)
                    .send()
                    .await
                    .map_err(|e| BackendError::Http(e.to_string()))?;
                let status = response.status();
                if !status.is_success() {
                    let detail = response.text().await.unwrap_or_default();
                    return Err(BackendError::Status {
                        status: status.as_u16(),
                        detail,
                    });
                }
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| BackendError::Http(e.to_string()))?;
                Ok(bytes.to_vec())
            }
            None => Err(BackendError::Decode(
                "completed operation carried no video".to_string(),
            )),
        }
    }
}

#[derive(Deserialize)]
struct WireOperation {
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    response: Option<WireOperationResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOperationResponse {
    #[serde(default)]
    generate_video_response: Option<WireGenerateVideoResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerateVideoResponse {
    #[serde(default)]
    generated_samples: Vec<WireGeneratedSample>,
}

#[derive(Deserialize)]
struct WireGeneratedSample {
    #[serde(default)]
    video: Option<WireVideoPayload>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireVideoPayload {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    bytes_base64_encoded: Option<String>,
}

impl WireOperation {
    fn into_operation(self) -> Operation {
        let video = self
            .response
            .and_then(|r| r.generate_video_response)
            .and_then(|r| r.generated_samples.into_iter().next())
            .and_then(|s| s.video)
            .and_then(|v| {
                v.bytes_base64_encoded
                    .map(VideoSource::Inline)
                    .or(v.uri.map(VideoSource::Uri))
            });
        Operation {
            name: self.name,
            done: self.done,
            error: self.error.is_some(),
            video,
        }
    }
}
