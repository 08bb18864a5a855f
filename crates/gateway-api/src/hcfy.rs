//! Endpoint A: the split-flow, line-oriented ingress used by the browser
//! translation extension.

use crate::error::ApiError;
use crate::{AppState, CancelGuard};
use axum::extract::State;
use axum::Json;
use gateway_core::TranslateRequest;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
pub struct HcfyRequest {
    text: String,
    destination: Vec<String>,
    #[serde(default)]
    source: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HcfyResponse {
    from: String,
    to: String,
    text: String,
    result: Vec<String>,
}

/// Dropping the cancellation guard when this future is dropped (client
/// disconnect, or normal return) is what lets in-flight sub-requests
/// observe "context done", matching the upstream `http.Request.Context()`
/// cancellation the split scheduler was designed against.
pub async fn handle(
    State(state): State<AppState>,
    Json(body): Json<HcfyRequest>,
) -> Result<Json<HcfyResponse>, ApiError> {
    gateway_obs::record_request("hcfy");
    let req = TranslateRequest::new(body.text, body.destination, body.source)?;
    let cancel = CancellationToken::new();
    let _guard = CancelGuard(cancel.clone());

    let resp = state.split.translate(&req, &cancel).await?;
    Ok(Json(HcfyResponse { from: resp.from, to: resp.to, text: resp.text, result: resp.result }))
}
