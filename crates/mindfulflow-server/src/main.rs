//! MindfulFlow server binary.
//!
//! Starts the axum HTTP server with structured logging, the practice store
//! (SQLite when configured, the local JSON store otherwise), and graceful
//! shutdown on SIGTERM/SIGINT.

use mindfulflow_db::{AuthService, DbRuntimeSettings, LocalStore, PracticeStore};
use mindfulflow_genai::{Assistant, GeminiClient};
use mindfulflow_server::config;
use mindfulflow_server::middleware::SessionTokens;
use mindfulflow_server::{app, AppState};
use mindfulflow_voice::GeminiLiveConnector;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("MINDFULFLOW_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration: the server cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let local = LocalStore::open(&config.storage.local_dir)
        .expect("failed to open local store: check storage.local_dir in config");

    let pool = if config.database.is_configured() {
        let pool = mindfulflow_db::create_pool(
            &config.database.path,
            DbRuntimeSettings {
                busy_timeout_ms: config.database.busy_timeout_ms,
                pool_max_size: config.database.pool_max_size,
            },
        )
        .expect("failed to create database pool: check database.path in config");

        {
            let conn = pool
                .get()
                .expect("failed to get database connection for migrations");
            let applied =
                mindfulflow_db::run_migrations(&conn).expect("failed to run database migrations");
            if applied > 0 {
                tracing::info!(count = applied, "applied database migrations");
            }
        }
        Some(pool)
    } else {
        tracing::warn!("no database configured, practice records stay in the local store");
        None
    };

    let store = match &pool {
        Some(pool) => PracticeStore::Remote(pool.clone()),
        None => PracticeStore::Local(local.clone()),
    };

    let assistant = if config.genai.is_configured() {
        let client = GeminiClient::new(config.genai.clone())
            .expect("failed to build text generation client");
        Assistant::new(Arc::new(client))
    } else {
        tracing::warn!("no text generation key configured, co-pilot features are disabled");
        Assistant::unconfigured()
    };

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.calendar.timeout_secs))
        .build()
        .expect("failed to build HTTP client");

    let state = AppState {
        store,
        auth: AuthService::new(pool, local),
        assistant,
        tokens: SessionTokens::new(&config.auth.session_secret, config.auth.token_ttl_secs),
        http,
        calendar: config.calendar.clone(),
        calendar_tokens: Arc::new(RwLock::new(HashMap::new())),
        live: Arc::new(GeminiLiveConnector::new(&config.voice)),
        voice: config.voice.clone(),
    };

    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting mindfulflow server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address: is another process using this port?");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("mindfulflow server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
