use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use sprout_api::auth::{self, AppState, AppStateInner};
use sprout_api::engine::ToggleEngine;
use sprout_api::middleware::require_auth;
use sprout_api::{chat, comments, notifications, posts, toggles};
use sprout_gateway::connection;
use sprout_gateway::dispatcher::Dispatcher;
use sprout_gateway::presence::PresenceDirectory;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sprout=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("SPROUT_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("SPROUT_DB_PATH").unwrap_or_else(|_| "sprout.db".into());
    let host = std::env::var("SPROUT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("SPROUT_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = Arc::new(sprout_db::Database::open(&PathBuf::from(&db_path))?);

    // Presence and delivery, then the engine on top of them
    let directory = PresenceDirectory::new();
    let dispatcher = Dispatcher::new(directory.clone());
    let engine = ToggleEngine::new(db.clone(), dispatcher.clone(), directory.clone());

    let state: AppState = Arc::new(AppStateInner {
        db,
        engine,
        dispatcher,
        directory: directory.clone(),
        jwt_secret,
    });

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/toggle/{kind}/{target_id}", post(toggles::toggle))
        .route("/notifications", get(notifications::list))
        .route("/notifications/read", post(notifications::mark_read))
        .route("/posts", post(posts::create_post))
        .route("/posts/{post_id}/comments", post(comments::add_comment))
        .route("/conversations", post(chat::create_conversation))
        .route("/conversations/{conversation_id}/messages", post(chat::send_message))
        .layer(middleware::from_fn(require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Sprout server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // Drop every live gateway sender so connection loops wind down.
    directory.shutdown();

    Ok(())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let directory = state.directory.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, directory))
}
