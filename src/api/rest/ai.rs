use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::engine::assignment::suggest_partner;
use crate::engine::suggest::Suggestion;
use crate::error::AppError;
use crate::models::order::Order;
use crate::models::partner::Partner;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/ai/suggest-assignment", post(suggest_assignment))
}

#[derive(Deserialize)]
pub struct SuggestRequest {
    pub order: Order,
    pub partners: Vec<Partner>,
}

async fn suggest_assignment(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SuggestRequest>, JsonRejection>,
) -> Result<Json<Suggestion>, AppError> {
    let Json(payload) = payload?;

    if payload.order.area.trim().is_empty() {
        return Err(AppError::Validation("order.area cannot be empty".to_string()));
    }

    let suggestion = suggest_partner(&state, &payload.order, &payload.partners).await?;
    Ok(Json(suggestion))
}
