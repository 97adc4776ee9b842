// Account Steward - HTTP Messaging Gateway
// Operators post messages, the router replies; read-only views for accounts and links.

use account_steward::{
    db, generate_export, open_store, Account, CooldownController, HttpAccountProvider, LinkQueue,
    LinkStatus, Reply, Router, StewardConfig,
};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router as HttpRouter,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "steward-server", version, about = "HTTP gateway for account-steward")]
struct Args {
    #[arg(long, env = "STEWARD_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    #[arg(long, env = "STEWARD_PROVIDER_URL", default_value = "http://127.0.0.1:8081")]
    provider_url: String,

    #[arg(
        long,
        env = "STEWARD_DEFAULT_COOLDOWN",
        default_value_t = account_steward::DEFAULT_COOLDOWN,
        value_parser = account_steward::config::parse_positive_seconds
    )]
    default_cooldown: f64,

    #[arg(long, env = "STEWARD_BIND", default_value = "0.0.0.0:3000")]
    bind: String,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    router: Arc<Router<HttpAccountProvider>>,
    cooldown: CooldownController,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    fn err(data: T, error: String) -> Self {
        Self {
            success: false,
            data,
            error: Some(error),
        }
    }
}

/// Inbound operator message
#[derive(Deserialize)]
struct MessageRequest {
    operator_id: i64,
    text: String,
}

#[derive(Serialize)]
struct LinkResponse {
    url: String,
    kind: String,
    status: String,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/messages - Deliver one operator message, return the replies
async fn post_message(
    State(state): State<AppState>,
    Json(request): Json<MessageRequest>,
) -> impl IntoResponse {
    let replies: Vec<Reply> = state.router.handle(request.operator_id, &request.text).await;
    (StatusCode::OK, Json(ApiResponse::ok(replies)))
}

/// GET /api/accounts - Accounts with their cooldown estimates
async fn get_accounts(State(state): State<AppState>) -> impl IntoResponse {
    let result = db::lock(state.router.store()).and_then(|conn| db::get_all_accounts(&conn));

    match result {
        Ok(accounts) => (StatusCode::OK, Json(ApiResponse::ok(accounts))),
        Err(e) => {
            error!(error = %e, "failed to list accounts");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err(Vec::<Account>::new(), e.to_string())),
            )
        }
    }
}

/// GET /api/links - Pending links
async fn get_links(State(state): State<AppState>) -> impl IntoResponse {
    let result = db::lock(state.router.store())
        .and_then(|conn| db::get_links_by_status(&conn, LinkStatus::Pending));

    match result {
        Ok(links) => {
            let response: Vec<LinkResponse> = links
                .into_iter()
                .map(|entry| LinkResponse {
                    url: entry.url,
                    kind: entry.kind.as_str().to_string(),
                    status: entry.status.as_str().to_string(),
                })
                .collect();
            (StatusCode::OK, Json(ApiResponse::ok(response)))
        }
        Err(e) => {
            error!(error = %e, "failed to list links");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err(Vec::new(), e.to_string())),
            )
        }
    }
}

/// GET /api/export/:session - Join-assist artifact as plain text
async fn get_export(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> impl IntoResponse {
    // Decode URL-encoded session name
    let session = urlencoding::decode(&session)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| session.clone());

    match generate_export(state.router.store(), &LinkQueue::default(), &state.cooldown, &session) {
        Ok(Some(artifact)) => (StatusCode::OK, artifact.render()),
        Ok(None) => (StatusCode::NOT_FOUND, "No pending group links.\n".to_string()),
        Err(e) => {
            error!(session = %session, error = %e, "export failed");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{}\n", e))
        }
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,account_steward=debug,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = StewardConfig::from_data_dir(&args.data_dir)
        .with_default_cooldown(args.default_cooldown)
        .with_provider_url(args.provider_url);

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data dir {:?}", config.data_dir))?;
    let store = open_store(&config.db_file)
        .with_context(|| format!("Failed to open database {:?}", config.db_file))?;
    info!(db = ?config.db_file, "database opened");

    // Create shared state
    let cooldown = CooldownController::with_alpha(config.default_cooldown, config.ema_alpha);
    let provider = Arc::new(HttpAccountProvider::new(config.provider_url.clone()));
    let state = AppState {
        router: Arc::new(Router::new(config, store, provider)),
        cooldown,
    };

    // Build API routes
    let api_routes = HttpRouter::new()
        .route("/health", get(health_check))
        .route("/messages", post(post_message))
        .route("/accounts", get(get_accounts))
        .route("/links", get(get_links))
        .route("/export/:session", get(get_export))
        .with_state(state);

    let app = HttpRouter::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", args.bind))?;

    info!(addr = %args.bind, "gateway listening");

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
