use axum::{routing::{get, post}, Router};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::api::{routes, websocket};
use crate::state::ServiceContext;

pub fn build_router(ctx: ServiceContext) -> Router {
    Router::new()
        // Call lifecycle & manual signaling
        .route("/api/v1/call/offer", post(routes::call::create_offer))
        .route("/api/v1/call/answer", post(routes::call::create_answer))
        .route("/api/v1/call/accept", post(routes::call::accept_answer))
        .route("/api/v1/call/hangup", post(routes::call::hang_up))
        .route("/api/v1/call/state", get(routes::call::get_state))
        .route("/api/v1/call/invite", get(routes::call::get_invite))
        // Local media
        .route("/api/v1/media/mute", post(routes::media::toggle_mute))
        .route("/api/v1/media/video", post(routes::media::toggle_video))
        .route("/api/v1/media/screen", post(routes::media::toggle_screen_share))
        // Control protocol
        .route("/api/v1/chat", get(routes::chat::get_messages).post(routes::chat::send_message))
        .route("/api/v1/hand", post(routes::chat::toggle_hand))
        // Recording
        .route("/api/v1/recording/start", post(routes::recording::start_recording))
        .route("/api/v1/recording/stop", post(routes::recording::stop_recording))
        // WebSocket
        .route("/ws", get(websocket::ws_handler))
        // Middleware
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

pub async fn start_api_server(ctx: ServiceContext, port: u16) -> std::io::Result<()> {
    let router = build_router(ctx);
    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        error!("Failed to bind API server on {}: {}", addr, e);
        e
    })?;
    info!("API server listening on http://{}", addr);
    axum::serve(listener, router).await
}
