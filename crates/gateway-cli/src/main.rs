use clap::{Parser, Subcommand};
use gateway_api::{app, GatewayArgs};
use gateway_common::config::GatewayConfig;
use gateway_llm_gemini::GeminiClient;
use std::sync::Arc;
use tracing_subscriber::reload;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_PORT: u16 = 7458;

#[derive(Parser, Debug)]
#[command(name = "gateway", version, about = "Adaptive-admission translation gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs the HTTP server.
    Serve,
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve => serve().await,
        Commands::Version => println!("{}", env!("CARGO_PKG_VERSION")),
    }
}

async fn serve() {
    let cfg = GatewayConfig::load();
    let reload_handle = init_tracing(&cfg.log_level);

    // Keep the watcher alive for the whole process so reload keeps firing.
    let _watcher = gateway_common::config::watch(move |cfg| {
        reload_log_level(&reload_handle, &cfg.log_level);
    });

    let llm = Arc::new(GeminiClient::new());
    let app = app(GatewayArgs {
        llm,
        api_key: cfg.api_key,
        model_name: cfg.model_name,
        password: cfg.password,
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", DEFAULT_PORT)).await.unwrap();
    tracing::info!("listening on http://0.0.0.0:{}", DEFAULT_PORT);
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .unwrap();
}

/// Builds the initial filter behind a `reload::Layer` and returns its
/// `Handle` so a later config-file change can swap the filter live without
/// tearing down the process-wide subscriber.
fn init_tracing(log_level: &str) -> reload::Handle<EnvFilter, tracing_subscriber::Registry> {
    let env_filter = EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string()));
    let (filter_layer, reload_handle) = reload::Layer::new(env_filter);
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer())
        .init();
    reload_handle
}

/// Called from the config-file watcher: swaps the active `EnvFilter` for one
/// built from the freshly reloaded log level, taking effect immediately with
/// no restart.
fn reload_log_level(handle: &reload::Handle<EnvFilter, tracing_subscriber::Registry>, log_level: &str) {
    if std::env::var("RUST_LOG").is_ok() {
        tracing::debug!("RUST_LOG is set; ignoring config file log_level change");
        return;
    }
    match handle.reload(EnvFilter::new(log_level)) {
        Ok(()) => tracing::info!("log level reloaded to {}", log_level),
        Err(err) => tracing::warn!("failed to reload log level: {}", err),
    }
}
