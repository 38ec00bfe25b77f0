use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::assignment::{assign_order, update_order_status, AssignOutcome};
use crate::error::AppError;
use crate::models::order::{Order, OrderItem, OrderStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/orders", get(list_orders).post(create_order))
        .route("/api/orders/assign", post(assign))
        .route("/api/orders/:id", get(get_order))
        .route("/api/orders/:id/status", put(set_status))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub customer_name: String,
    pub customer_phone: String,
    pub items: Vec<OrderItem>,
    pub area: String,
    pub address: String,
    pub value: f64,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub message: String,
    pub new_status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    pub order_id: Uuid,
    #[serde(default)]
    pub partner_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct AssignResponse {
    pub message: String,
    pub details: AssignOutcome,
}

async fn list_orders(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.store.list_orders().await?))
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let Json(payload) = payload?;

    if payload.customer_name.trim().is_empty() {
        return Err(AppError::Validation("customerName cannot be empty".to_string()));
    }
    if payload.area.trim().is_empty() {
        return Err(AppError::Validation("area cannot be empty".to_string()));
    }
    if payload.address.trim().is_empty() {
        return Err(AppError::Validation("address cannot be empty".to_string()));
    }
    if payload.items.is_empty() {
        return Err(AppError::Validation("an order needs at least one item".to_string()));
    }
    if payload
        .items
        .iter()
        .any(|item| item.name.trim().is_empty() || item.quantity == 0)
    {
        return Err(AppError::Validation(
            "items need a name and a quantity > 0".to_string(),
        ));
    }
    if !payload.value.is_finite() || payload.value < 0.0 {
        return Err(AppError::Validation("value must be >= 0".to_string()));
    }

    let order = Order {
        id: Uuid::new_v4(),
        customer_name: payload.customer_name.trim().to_string(),
        customer_phone: payload.customer_phone.trim().to_string(),
        items: payload.items,
        area: payload.area.trim().to_string(),
        address: payload.address.trim().to_string(),
        value: payload.value,
        status: OrderStatus::Pending,
        assigned_partner_id: None,
        created_at: Utc::now(),
    };

    let order = state.store.insert_order(order).await?;
    tracing::info!(order_id = %order.id, area = %order.area, "order created");

    Ok((StatusCode::CREATED, Json(order)))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.store.get_order(id).await?))
}

async fn set_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, AppError> {
    let Json(payload) = payload?;
    let change = update_order_status(&state, id, payload.status).await?;

    Ok(Json(StatusResponse {
        message: format!("Order {id} is now {}.", change.order.status),
        new_status: change.order.status,
        warning: change.warning,
    }))
}

async fn assign(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AssignRequest>, JsonRejection>,
) -> Result<Json<AssignResponse>, AppError> {
    let Json(payload) = payload?;
    let outcome = assign_order(&state, payload.order_id, payload.partner_id).await?;

    let message = if outcome.assigned {
        format!("Order {} assigned.", outcome.order_id)
    } else {
        format!("No partner available for order {}.", outcome.order_id)
    };

    Ok(Json(AssignResponse {
        message,
        details: outcome,
    }))
}
