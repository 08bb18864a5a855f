//! The HTTP ingress: two translation endpoints over the admission/batching
//! core, plus health and metrics for operators.

mod cjsfy;
mod error;
mod hcfy;

use axum::extract::{Query, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use error::ApiError;
use gateway_common::GatewayError;
use gateway_core::{AdaptiveTokenBucket, ConcurrencyLimiter, MergeScheduler, SplitScheduler};
use gateway_llm::TextGenerator;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

/// How often the token-bucket-level gauge is refreshed; cheap enough to run
/// often without materially affecting admission throughput.
const METRICS_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct AppState {
    split: SplitScheduler,
    merge: Arc<MergeScheduler>,
    password: Option<String>,
}

/// Everything needed to wire up one gateway instance. The caller (normally
/// `gateway-cli`) owns constructing the LLM client and reading the config.
pub struct GatewayArgs {
    pub llm: Arc<dyn TextGenerator>,
    pub api_key: String,
    pub model_name: Option<String>,
    pub password: Option<String>,
}

/// Builds the complete router: both translation endpoints (password-gated
/// when `args.password` is set), health/readiness, and metrics.
pub fn app(args: GatewayArgs) -> Router {
    gateway_obs::init();

    let bucket = AdaptiveTokenBucket::with_defaults();
    let limiter = ConcurrencyLimiter::with_default_capacity();
    gateway_obs::spawn_token_bucket_sampler(METRICS_SAMPLE_INTERVAL, {
        let bucket = bucket.clone();
        move || bucket.current_tokens()
    });

    let split = SplitScheduler::new(args.llm.clone(), bucket.clone(), limiter.clone(), args.api_key.clone(), args.model_name.clone());
    let merge = MergeScheduler::spawn(args.llm, bucket, limiter, args.api_key, args.model_name);

    let state = AppState { split, merge, password: args.password };

    let translate_routes = Router::new()
        .route("/api/hcfy", post(hcfy::handle))
        .route("/api/cjsfy", post(cjsfy::handle))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_password));

    Router::new()
        .merge(translate_routes)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

/// Optional shared-secret auth: when `password` is configured, every
/// translate-flow request must present a matching `?pass=` query parameter.
async fn require_password(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = &state.password {
        match params.get("pass") {
            Some(given) if given == expected => {}
            _ => return ApiError(GatewayError::AuthFailure).into_response(),
        }
    }
    next.run(request).await
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz() -> &'static str {
    "ready"
}

async fn metrics() -> impl IntoResponse {
    let (content_type, buffer) = gateway_obs::render();
    ([(CONTENT_TYPE, content_type)], buffer)
}

/// Dropped when the owning handler future is dropped, whether by normal
/// return or by the client disconnecting mid-request — axum tears down an
/// in-flight handler's future on disconnect, which runs this `Drop` exactly
/// where the original `context.Context` cancellation would have fired.
struct CancelGuard(CancellationToken);

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
