use axum::{extract::State, Json};
use serde::Deserialize;

use super::{api_error, ApiResult};
use crate::models::CallState;
use crate::state::ServiceContext;

#[derive(Deserialize)]
pub struct AcceptOfferRequest {
    pub offer: String,
}

#[derive(Deserialize)]
pub struct ApplyAnswerRequest {
    pub answer: String,
}

/// Start a call as the caller. The returned blob is pasted to the other side.
pub async fn create_offer(State(ctx): State<ServiceContext>) -> ApiResult<Json<serde_json::Value>> {
    let blob = ctx.session.start_call().await.map_err(api_error)?;
    let text = blob.to_json().map_err(api_error)?;
    Ok(Json(serde_json::json!({ "blob": text })))
}

/// Join a call from a pasted offer; returns the answer blob to send back.
pub async fn create_answer(
    State(ctx): State<ServiceContext>,
    Json(body): Json<AcceptOfferRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let blob = ctx.session.accept_offer(body.offer).await.map_err(api_error)?;
    let text = blob.to_json().map_err(api_error)?;
    Ok(Json(serde_json::json!({ "blob": text })))
}

pub async fn accept_answer(
    State(ctx): State<ServiceContext>,
    Json(body): Json<ApplyAnswerRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let outcome = ctx.session.apply_answer(body.answer).await.map_err(api_error)?;
    Ok(Json(serde_json::json!({ "outcome": outcome })))
}

pub async fn hang_up(State(ctx): State<ServiceContext>) -> ApiResult<Json<serde_json::Value>> {
    ctx.session.hang_up().await.map_err(api_error)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn get_state(State(ctx): State<ServiceContext>) -> Json<CallState> {
    Json(ctx.session.state())
}

/// Page URL for the QR code. The handshake blobs still travel by hand.
pub async fn get_invite(State(ctx): State<ServiceContext>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "url": ctx.config.invite_url() }))
}
