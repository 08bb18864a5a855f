//! Shared request/response types for both ingress flows.

/// Immutable once built. `text` is trimmed and non-empty; `destinations` is
/// non-empty (one or two language names, rendered into the prompt).
#[derive(Debug, Clone)]
pub struct TranslateRequest {
    pub text: String,
    pub destinations: Vec<String>,
    pub source: Option<String>,
}

impl TranslateRequest {
    /// Builds a request, trimming `text` and rejecting anything that would
    /// violate this type's invariants (non-empty text, at least one
    /// destination).
    pub fn new(
        text: impl Into<String>,
        destinations: Vec<String>,
        source: Option<String>,
    ) -> Result<Self, gateway_common::GatewayError> {
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return Err(gateway_common::GatewayError::BadRequest("empty text".into()));
        }
        if destinations.is_empty() {
            return Err(gateway_common::GatewayError::BadRequest(
                "destination list is empty".into(),
            ));
        }
        Ok(Self {
            text,
            destinations,
            source,
        })
    }

    pub fn lines(&self) -> Vec<&str> {
        self.text.split('\n').collect()
    }
}

/// `result` holds exactly one translated paragraph per input paragraph, in
/// input order.
#[derive(Debug, Clone)]
pub struct TranslateResponse {
    pub from: String,
    pub to: String,
    pub text: String,
    pub result: Vec<String>,
}
