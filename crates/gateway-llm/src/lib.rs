//! The upstream LLM text-generation capability: `GenerateText(prompt, apiKey)
//! -> text | error`, abstracted behind a trait so the admission/batching core
//! (`gateway-core`) never depends on a concrete HTTP client.

use async_trait::async_trait;
use gateway_common::Result;

pub const DEFAULT_MODEL_NAME: &str = "gemini-pro";

#[derive(Debug, Clone)]
pub struct GenerateTextConfig {
    pub api_key: String,
    /// Empty/`None` means [`DEFAULT_MODEL_NAME`].
    pub model_name: Option<String>,
    pub prompt: String,
}

impl GenerateTextConfig {
    pub fn model_name(&self) -> &str {
        self.model_name.as_deref().unwrap_or(DEFAULT_MODEL_NAME)
    }
}

/// One upstream text-generation call. Implementations own their own
/// transport (HTTP/2 client, connection pool, ping interval, ...); callers
/// only ever see `prompt in, text out`.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, cfg: GenerateTextConfig) -> Result<String>;
}

#[cfg(feature = "mock")]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Deterministic stand-in for the upstream LLM, used by tests. Replies
    /// are handed out in order from a fixed script; once exhausted it
    /// repeats the last one. Also counts invocations so tests can assert on
    /// retry counts.
    pub struct MockGenerator {
        script: Mutex<Vec<Result<String>>>,
        calls: AtomicUsize,
    }

    impl MockGenerator {
        pub fn new(script: Vec<Result<String>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            }
        }

        /// A generator that always echoes back a canned reply.
        pub fn always(reply: impl Into<String>) -> Self {
            Self::new(vec![Ok(reply.into())])
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextGenerator for MockGenerator {
        async fn generate_text(&self, _cfg: GenerateTextConfig) -> Result<String> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            let script = self.script.lock().unwrap();
            let last = script.len() - 1;
            match &script[idx.min(last)] {
                Ok(text) => Ok(text.clone()),
                Err(err) => Err(gateway_common::GatewayError::UpstreamTransient(err.to_string())),
            }
        }
    }
}
