use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Json;
use axum::Router;
use chrono::{NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::partner::{shift_time, Partner, PartnerStatus, MAX_RATING, MIN_RATING};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/partners", get(list_partners).post(create_partner))
        .route(
            "/api/partners/:id",
            get(get_partner).put(update_partner).delete(delete_partner),
        )
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePartnerRequest {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub status: Option<PartnerStatus>,
    pub assigned_areas: Vec<String>,
    pub shift_start: String,
    pub shift_end: String,
    #[serde(default)]
    pub rating: Option<f32>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePartnerRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub status: Option<PartnerStatus>,
    pub assigned_areas: Option<Vec<String>>,
    pub shift_start: Option<String>,
    pub shift_end: Option<String>,
    pub rating: Option<f32>,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn parse_shift(field: &str, raw: &str) -> Result<NaiveTime, AppError> {
    shift_time::parse(raw)
        .map_err(|_| AppError::Validation(format!("{field} must be HH:MM, got {raw}")))
}

fn clean_areas(areas: Vec<String>) -> Result<Vec<String>, AppError> {
    let mut cleaned: Vec<String> = Vec::with_capacity(areas.len());
    for area in areas {
        let area = area.trim().to_string();
        if !area.is_empty() && !cleaned.iter().any(|a| a.eq_ignore_ascii_case(&area)) {
            cleaned.push(area);
        }
    }

    if cleaned.is_empty() {
        return Err(AppError::Validation(
            "assignedAreas needs at least one area".to_string(),
        ));
    }
    Ok(cleaned)
}

fn clamp_rating(rating: f32) -> Result<f32, AppError> {
    if !rating.is_finite() {
        return Err(AppError::Validation("rating must be a number".to_string()));
    }
    Ok(rating.clamp(MIN_RATING, MAX_RATING))
}

fn non_empty(field: &str, value: String) -> Result<String, AppError> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(AppError::Validation(format!("{field} cannot be empty")));
    }
    Ok(value)
}

async fn list_partners(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Partner>>, AppError> {
    Ok(Json(state.store.list_partners().await?))
}

async fn create_partner(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreatePartnerRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Partner>), AppError> {
    let Json(payload) = payload?;

    let partner = Partner {
        id: Uuid::new_v4(),
        name: non_empty("name", payload.name)?,
        phone: non_empty("phone", payload.phone)?,
        email: payload.email.filter(|e| !e.trim().is_empty()),
        status: payload.status.unwrap_or(PartnerStatus::Active),
        assigned_areas: clean_areas(payload.assigned_areas)?,
        shift_start: parse_shift("shiftStart", &payload.shift_start)?,
        shift_end: parse_shift("shiftEnd", &payload.shift_end)?,
        current_load: 0,
        rating: clamp_rating(payload.rating.unwrap_or(MIN_RATING))?,
        created_at: Utc::now(),
    };

    let partner = state.store.insert_partner(partner).await?;
    tracing::info!(partner_id = %partner.id, areas = ?partner.assigned_areas, "partner created");

    Ok((StatusCode::CREATED, Json(partner)))
}

async fn get_partner(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Partner>, AppError> {
    Ok(Json(state.store.get_partner(id).await?))
}

async fn update_partner(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    payload: Result<Json<UpdatePartnerRequest>, JsonRejection>,
) -> Result<Json<Partner>, AppError> {
    let Json(payload) = payload?;
    let mut partner = state.store.get_partner(id).await?;

    if let Some(name) = payload.name {
        partner.name = non_empty("name", name)?;
    }
    if let Some(phone) = payload.phone {
        partner.phone = non_empty("phone", phone)?;
    }
    if let Some(email) = payload.email {
        partner.email = Some(email.trim().to_string()).filter(|e| !e.is_empty());
    }
    if let Some(status) = payload.status {
        partner.status = status;
    }
    if let Some(areas) = payload.assigned_areas {
        partner.assigned_areas = clean_areas(areas)?;
    }
    if let Some(start) = payload.shift_start {
        partner.shift_start = parse_shift("shiftStart", &start)?;
    }
    if let Some(end) = payload.shift_end {
        partner.shift_end = parse_shift("shiftEnd", &end)?;
    }
    if let Some(rating) = payload.rating {
        partner.rating = clamp_rating(rating)?;
    }

    let partner = state.store.update_partner(partner).await?;
    tracing::info!(partner_id = %id, status = partner.status.as_str(), "partner updated");

    Ok(Json(partner))
}

async fn delete_partner(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    let partner = state.store.get_partner(id).await?;
    if partner.current_load > 0 {
        return Err(AppError::Conflict(format!(
            "partner {id} still has {} open deliveries",
            partner.current_load
        )));
    }

    state.store.delete_partner(id).await?;
    tracing::info!(partner_id = %id, "partner deleted");

    Ok(Json(MessageResponse {
        message: format!("Partner {id} deleted."),
    }))
}
