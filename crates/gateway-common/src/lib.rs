//! Shared error type, result alias, and configuration loading.

pub type Result<T> = core::result::Result<T, GatewayError>;

#[derive(thiserror::Error, Debug, Clone)]
pub enum GatewayError {
    #[error("admission cancelled: {0}")]
    AdmissionCancelled(String),
    #[error("token bucket stopped")]
    Stopped,
    #[error("upstream error: {0}")]
    UpstreamTransient(String),
    #[error("failed to parse translation result from upstream reply")]
    ParseFailure,
    #[error("translation result count mismatch: expected {expected}, got {got}")]
    CountMismatch { expected: usize, got: usize },
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("bad password")]
    AuthFailure,
    #[error("internal error: {0}")]
    Internal(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Whether a session-layer caller (the split/merge schedulers) should
    /// retry after seeing this error, per the error-kind table in the
    /// error-handling design.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::UpstreamTransient(_)
                | GatewayError::ParseFailure
                | GatewayError::CountMismatch { .. }
        )
    }
}

pub mod config {
    use serde::Deserialize;
    use std::env;
    use std::path::PathBuf;

    #[derive(Debug, Clone, Deserialize)]
    pub struct GatewayConfig {
        #[serde(default)]
        pub api_key: String,
        #[serde(default)]
        pub model_name: Option<String>,
        #[serde(default = "default_log_level")]
        pub log_level: String,
        #[serde(default)]
        pub password: Option<String>,
    }

    fn default_log_level() -> String {
        "info".to_string()
    }

    impl Default for GatewayConfig {
        fn default() -> Self {
            Self {
                api_key: String::new(),
                model_name: None,
                log_level: default_log_level(),
                password: None,
            }
        }
    }

    impl GatewayConfig {
        pub fn config_path() -> Option<PathBuf> {
            env::var("GATEWAY_CONFIG").ok().map(PathBuf::from)
        }

        /// Loads a YAML file if `GATEWAY_CONFIG` points at one (skipped
        /// entirely when `NO_CONFIG_FILE` is set), overlaid with
        /// environment variables.
        pub fn load() -> Self {
            if env::var("NO_CONFIG_FILE").is_ok() {
                return Self::from_env();
            }
            let Some(path) = Self::config_path() else {
                return Self::from_env();
            };
            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!("failed to read config file {}: {}", path.display(), err);
                    return Self::from_env();
                }
            };
            match serde_yaml::from_str::<GatewayConfig>(&text) {
                Ok(mut cfg) => {
                    cfg.apply_env_overrides();
                    cfg
                }
                Err(err) => {
                    tracing::warn!("failed to parse config file {}: {}", path.display(), err);
                    Self::from_env()
                }
            }
        }

        fn from_env() -> Self {
            let mut cfg = Self::default();
            cfg.apply_env_overrides();
            cfg
        }

        fn apply_env_overrides(&mut self) {
            if let Ok(key) = env::var("GEMINI_API_KEY") {
                self.api_key = key;
            }
            if let Ok(level) = env::var("GATEWAY_LOG_LEVEL") {
                self.log_level = level;
            }
            if let Ok(pass) = env::var("PASSWORD") {
                self.password = Some(pass);
            }
        }
    }

    /// Watches the config file named by `GATEWAY_CONFIG` (if any) and calls
    /// `on_change` with the freshly reloaded config whenever it's modified
    /// on disk. This is the live-reload path for the log level; the
    /// returned watcher must be kept alive for as long as reload should
    /// keep working.
    pub fn watch<F>(mut on_change: F) -> Option<notify::RecommendedWatcher>
    where
        F: FnMut(GatewayConfig) + Send + 'static,
    {
        let path = GatewayConfig::config_path()?;
        use notify::{Event, RecursiveMode, Watcher};

        let (tx, rx) = std::sync::mpsc::channel::<notify::Result<Event>>();
        let mut watcher = match notify::recommended_watcher(tx) {
            Ok(w) => w,
            Err(err) => {
                tracing::warn!("failed to start config watcher: {}", err);
                return None;
            }
        };
        if let Err(err) = watcher.watch(&path, RecursiveMode::NonRecursive) {
            tracing::warn!("failed to watch config file {}: {}", path.display(), err);
            return None;
        }
        std::thread::spawn(move || {
            for res in rx {
                if let Ok(event) = res {
                    if event.kind.is_modify() {
                        on_change(GatewayConfig::load());
                    }
                }
            }
        });
        Some(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds_match_error_table() {
        assert!(GatewayError::UpstreamTransient("x".into()).is_retryable());
        assert!(GatewayError::ParseFailure.is_retryable());
        assert!(GatewayError::CountMismatch { expected: 2, got: 1 }.is_retryable());
        assert!(!GatewayError::BadRequest("x".into()).is_retryable());
        assert!(!GatewayError::AuthFailure.is_retryable());
        assert!(!GatewayError::AdmissionCancelled("x".into()).is_retryable());
    }

    #[test]
    fn config_defaults_to_info_log_level() {
        let cfg = config::GatewayConfig::default();
        assert_eq!(cfg.log_level, "info");
    }
}
