use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{CreateScheduleRequest, ScheduleError, ScheduleRangeQuery};
use crate::services::{availability::AvailabilityService, schedule::ScheduleService};

fn schedule_error(e: ScheduleError) -> AppError {
    let status = match &e {
        ScheduleError::NotFound => StatusCode::NOT_FOUND,
        ScheduleError::InvalidTimeRange | ScheduleError::Validation(_) => StatusCode::BAD_REQUEST,
        ScheduleError::PastOrTooSoon { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ScheduleError::DuplicateWindow | ScheduleError::ScheduleInUse => StatusCode::CONFLICT,
        ScheduleError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    AppError::domain(status, e.code(), e.to_string())
}

// ==============================================================================
// PATIENT-FACING AVAILABILITY HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_available_schedules(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<ScheduleRangeQuery>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if query.date_to < query.date_from {
        return Err(AppError::BadRequest(
            "date_to must not be before date_from".to_string(),
        ));
    }

    let availability = AvailabilityService::new(&state);
    let schedules = availability
        .list_available_schedules(doctor_id, query.date_from, query.date_to, token)
        .await
        .map_err(schedule_error)?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "schedules": schedules,
        "total": schedules.len()
    })))
}

#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let availability = AvailabilityService::new(&state);
    let listing = availability
        .list_available_slots(schedule_id, token)
        .await
        .map_err(schedule_error)?;

    Ok(Json(json!({
        "schedule_id": schedule_id,
        "availability": listing
    })))
}

// ==============================================================================
// STAFF SCHEDULE MANAGEMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_schedule(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    // Doctors manage their own calendar; admins manage anyone's.
    if !user.is_admin() && !(user.is_doctor() && user.id == doctor_id.to_string()) {
        return Err(AppError::Auth(
            "Only the doctor or an administrator can manage this schedule".to_string(),
        ));
    }

    let service = ScheduleService::new(&state);
    let window = service
        .create_schedule(doctor_id, request, token)
        .await
        .map_err(schedule_error)?;

    Ok(Json(json!(window)))
}

#[axum::debug_handler]
pub async fn list_doctor_schedules(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if !user.is_admin() && !(user.is_doctor() && user.id == doctor_id.to_string()) {
        return Err(AppError::Auth(
            "Only the doctor or an administrator can view this calendar".to_string(),
        ));
    }

    let service = ScheduleService::new(&state);
    let schedules = service
        .list_doctor_schedules(doctor_id, token)
        .await
        .map_err(schedule_error)?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "schedules": schedules,
        "total": schedules.len()
    })))
}

#[axum::debug_handler]
pub async fn deactivate_schedule(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if !user.is_admin() && !user.is_doctor() {
        return Err(AppError::Auth(
            "Only staff can deactivate schedules".to_string(),
        ));
    }

    let service = ScheduleService::new(&state);
    let window = service
        .deactivate_schedule(schedule_id, token)
        .await
        .map_err(schedule_error)?;

    Ok(Json(json!(window)))
}

#[axum::debug_handler]
pub async fn delete_schedule(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if !user.is_admin() && !user.is_doctor() {
        return Err(AppError::Auth(
            "Only staff can delete schedules".to_string(),
        ));
    }

    let service = ScheduleService::new(&state);
    service
        .delete_schedule(schedule_id, token)
        .await
        .map_err(schedule_error)?;

    Ok(Json(json!({
        "deleted": true,
        "schedule_id": schedule_id
    })))
}
