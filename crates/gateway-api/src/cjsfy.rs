//! Endpoint B: the merge-flow, Gemini-API-shaped ingress used by clients
//! that speak the `generateContent` wire format.

use crate::error::ApiError;
use crate::{AppState, CancelGuard};
use axum::extract::State;
use axum::Json;
use gateway_common::GatewayError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Separates the destination-language hint from the body in a request's
/// single text part: `"<to>-----splitter-----<body>"`.
const INGRESS_SPLITTER: &str = "-----splitter-----";

/// Every merge-flow request gets a 90s deadline, independent of how long
/// the batch it lands in takes to dispatch.
const REQUEST_DEADLINE: Duration = Duration::from_secs(90);

#[derive(Debug, Deserialize)]
pub struct GeminiContent {
    #[serde(default)]
    #[allow(dead_code)]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GeminiPart {
    text: String,
}

#[derive(Debug, Deserialize)]
pub struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Serialize)]
pub struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Serialize)]
pub struct GeminiCandidate {
    content: GeminiContentOut,
}

#[derive(Debug, Serialize)]
pub struct GeminiContentOut {
    parts: Vec<GeminiPart>,
}

pub async fn handle(
    State(state): State<AppState>,
    Json(body): Json<GeminiRequest>,
) -> Result<Json<GeminiResponse>, ApiError> {
    gateway_obs::record_request("cjsfy");
    if body.contents.len() != 1 || body.contents[0].parts.len() != 1 {
        return Err(GatewayError::BadRequest(
            "expect contents and contents[0].parts has only one element".into(),
        )
        .into());
    }
    let input = &body.contents[0].parts[0].text;
    let segments: Vec<&str> = input.split(INGRESS_SPLITTER).collect();
    if segments.len() != 2 {
        return Err(GatewayError::BadRequest("expect text to have two parts".into()).into());
    }
    let to = segments[0].trim().to_string();
    let text = segments[1].trim().to_string();

    let cancel = CancellationToken::new();
    let _guard = CancelGuard(cancel.clone());
    let deadline_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(REQUEST_DEADLINE).await;
        deadline_cancel.cancel();
    });

    let translated = state.merge.translate(text, to, cancel).await?;
    Ok(Json(GeminiResponse {
        candidates: vec![GeminiCandidate { content: GeminiContentOut { parts: vec![GeminiPart { text: translated }] } }],
    }))
}
