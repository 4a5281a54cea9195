//! Control server: WebSocket protocol endpoint plus a small REST surface.

pub mod api;
pub mod dispatch;
pub mod state;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::engine::Engine;
use state::{ClientRegistry, WebState};

pub use state::ClientInfo;

/// Start the control server. Runs until the listener fails.
pub async fn start_web_server(
    listen_addr: SocketAddr,
    engine: Arc<Engine>,
    clients: Arc<ClientRegistry>,
) -> Result<(), Box<dyn std::error::Error>> {
    let web_state = Arc::new(WebState { engine, clients });

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(api::get_health))
        .route("/api/channels", get(api::get_channels))
        .route("/api/channels", post(api::create_channel))
        .route("/api/channel/:id", post(api::update_channel))
        .route("/api/channel/:id", delete(api::delete_channel))
        .route("/api/channel/:id/start", post(api::start_channel))
        .route("/api/channel/:id/stop", post(api::stop_channel))
        .route("/api/clients", get(api::get_clients))
        .route("/api/files", get(api::get_files))
        .with_state(web_state)
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    log::info!("Control server listening on http://{}", listen_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
