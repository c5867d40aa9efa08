//! Device token registration.

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::registry;
use crate::scope::RecipientScope;

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(register).delete(unregister))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequest {
    pub scope: RecipientScope,
    pub token: String,
}

async fn register(
    State(state): State<AppState>,
    Json(request): Json<TokenRequest>,
) -> ApiResult<StatusCode> {
    registry::register_token(state.ctx.store(), &request.scope, &request.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unregister(
    State(state): State<AppState>,
    Json(request): Json<TokenRequest>,
) -> ApiResult<StatusCode> {
    registry::unregister_token(state.ctx.store(), &request.scope, &request.token).await?;
    Ok(StatusCode::NO_CONTENT)
}
