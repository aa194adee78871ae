use axum::{extract::State, Json};
use serde::Deserialize;

use super::{api_error, ApiResult};
use crate::models::ChatMessage;
use crate::state::ServiceContext;

#[derive(Deserialize)]
pub struct SendChatRequest {
    pub text: String,
}

pub async fn get_messages(State(ctx): State<ServiceContext>) -> ApiResult<Json<Vec<ChatMessage>>> {
    ctx.session.chat_history().await.map(Json).map_err(api_error)
}

pub async fn send_message(
    State(ctx): State<ServiceContext>,
    Json(body): Json<SendChatRequest>,
) -> ApiResult<Json<ChatMessage>> {
    ctx.session.send_chat(body.text).await.map(Json).map_err(api_error)
}

pub async fn toggle_hand(State(ctx): State<ServiceContext>) -> ApiResult<Json<serde_json::Value>> {
    let raised = ctx.session.toggle_hand().await.map_err(api_error)?;
    Ok(Json(serde_json::json!({ "hand_raised": raised })))
}
