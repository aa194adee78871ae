use axum::{extract::State, Json};

use super::{api_error, ApiResult};
use crate::state::ServiceContext;

pub async fn toggle_mute(State(ctx): State<ServiceContext>) -> ApiResult<Json<serde_json::Value>> {
    let muted = ctx.session.toggle_mute().await.map_err(api_error)?;
    Ok(Json(serde_json::json!({ "muted": muted })))
}

pub async fn toggle_video(State(ctx): State<ServiceContext>) -> ApiResult<Json<serde_json::Value>> {
    let enabled = ctx.session.toggle_video().await.map_err(api_error)?;
    Ok(Json(serde_json::json!({ "video_enabled": enabled })))
}

pub async fn toggle_screen_share(
    State(ctx): State<ServiceContext>,
) -> ApiResult<Json<serde_json::Value>> {
    let sharing = ctx.session.toggle_screen_share().await.map_err(api_error)?;
    Ok(Json(serde_json::json!({ "screen_sharing": sharing })))
}
