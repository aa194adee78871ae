use axum::{extract::State, Json};

use super::{api_error, ApiResult};
use crate::state::ServiceContext;

pub async fn start_recording(State(ctx): State<ServiceContext>) -> ApiResult<Json<serde_json::Value>> {
    ctx.session.start_recording().await.map_err(api_error)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Stop and save. `path` is null when nothing was being recorded.
pub async fn stop_recording(State(ctx): State<ServiceContext>) -> ApiResult<Json<serde_json::Value>> {
    let path = ctx.session.stop_recording().await.map_err(api_error)?;
    Ok(Json(serde_json::json!({
        "path": path.map(|p| p.display().to_string()),
    })))
}
