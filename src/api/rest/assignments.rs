use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::failure::{report_failure, FailureReport};
use crate::error::AppError;
use crate::models::assignment::{AssignmentStatus, AssignmentView};
use crate::models::order::Order;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/assignments", get(list_assignments))
        .route("/api/assignments/report-failure", post(report))
}

#[derive(Deserialize)]
pub struct AssignmentQuery {
    pub status: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportFailureRequest {
    pub order_id: Uuid,
    pub reason: String,
}

async fn list_assignments(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AssignmentQuery>,
) -> Result<Json<Vec<AssignmentView>>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<AssignmentStatus>)
        .transpose()
        .map_err(AppError::Validation)?;

    let assignments = state.store.list_assignments(status).await?;
    let orders: HashMap<Uuid, Order> = state
        .store
        .list_orders()
        .await?
        .into_iter()
        .map(|order| (order.id, order))
        .collect();

    let views = assignments
        .into_iter()
        .map(|assignment| {
            let order = orders.get(&assignment.order_id);
            AssignmentView {
                assignment_id: assignment.id,
                order_id: assignment.order_id,
                partner_id: assignment.partner_id,
                status: assignment.status,
                customer_name: order.map(|o| o.customer_name.clone()),
                area: order.map(|o| o.area.clone()),
                failure_reason: assignment.failure_reason,
                reported_at: assignment.created_at,
            }
        })
        .collect();

    Ok(Json(views))
}

async fn report(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ReportFailureRequest>, JsonRejection>,
) -> Result<Json<FailureReport>, AppError> {
    let Json(payload) = payload?;
    let report = report_failure(&state, payload.order_id, &payload.reason).await?;
    Ok(Json(report))
}
