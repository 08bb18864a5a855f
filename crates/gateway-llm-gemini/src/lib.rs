//! Concrete [`TextGenerator`] backed by the Gemini `generateContent` REST
//! API, over an HTTP/2 client tuned with a ping/read-idle interval so long
//! replies don't stall undetected.

use async_trait::async_trait;
use gateway_common::{GatewayError, Result};
use gateway_llm::{GenerateTextConfig, TextGenerator};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const PING_INTERVAL: Duration = Duration::from_secs(15);

pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
}

impl GeminiClient {
    pub fn new() -> Self {
        Self::with_base_url(API_BASE.to_string())
    }

    /// Used by tests to point the client at a local mock server.
    pub fn with_base_url(base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .http2_keep_alive_interval(PING_INTERVAL)
            .http2_keep_alive_timeout(PING_INTERVAL)
            .http2_keep_alive_while_idle(true)
            .build()
            .expect("failed to build gemini http client");
        Self { http, base_url }
    }
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: [ContentReq<'a>; 1],
}

#[derive(Serialize)]
struct ContentReq<'a> {
    parts: [PartReq<'a>; 1],
}

#[derive(Serialize)]
struct PartReq<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ContentResp>,
}

#[derive(Debug, Deserialize)]
struct ContentResp {
    #[serde(default)]
    parts: Vec<PartResp>,
}

#[derive(Debug, Deserialize)]
struct PartResp {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate_text(&self, cfg: GenerateTextConfig) -> Result<String> {
        let model = cfg.model_name().to_string();
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let body = GenerateContentRequest {
            contents: [ContentReq {
                parts: [PartReq { text: &cfg.prompt }],
            }],
        };

        let resp = self
            .http
            .post(&url)
            .query(&[("key", cfg.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamTransient(format!("gemini request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(GatewayError::UpstreamTransient(format!(
                "gemini returned {status}: {text}"
            )));
        }

        let parsed: GenerateContentResponse = resp.json().await.map_err(|e| {
            GatewayError::UpstreamTransient(format!("failed to decode gemini response: {e}"))
        })?;

        let candidate = parsed.candidates.into_iter().next().ok_or_else(|| {
            GatewayError::UpstreamTransient("no candidate in gemini response".into())
        })?;
        let content = candidate.content.ok_or_else(|| {
            GatewayError::UpstreamTransient("no content in the first candidate".into())
        })?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        tracing::debug!(target: "gateway_llm_gemini", "gemini reply: {} bytes", text.len());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_used_when_unset() {
        let cfg = GenerateTextConfig {
            api_key: "k".into(),
            model_name: None,
            prompt: "hi".into(),
        };
        assert_eq!(cfg.model_name(), gateway_llm::DEFAULT_MODEL_NAME);
    }
}
