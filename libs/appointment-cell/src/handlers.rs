use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
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

use crate::models::{BookAppointmentRequest, BookingError, CancelError};
use crate::services::booking::AppointmentBookingService;
use crate::services::lifecycle::AppointmentLifecycleService;

fn booking_error(e: BookingError) -> AppError {
    let status = match &e {
        BookingError::ScheduleNotFound | BookingError::SlotNotFound => StatusCode::NOT_FOUND,
        BookingError::TimeOutOfBounds => StatusCode::BAD_REQUEST,
        BookingError::ScheduleInactive
        | BookingError::SlotTaken
        | BookingError::CapacityExhausted
        | BookingError::OverlappingAppointment { .. }
        | BookingError::DuplicateExactTime => StatusCode::CONFLICT,
        BookingError::PastOrTooSoon { .. } | BookingError::DailyCapReached { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        BookingError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    AppError::domain(status, e.code(), e.to_string())
}

fn cancel_error(e: CancelError) -> AppError {
    let status = match &e {
        CancelError::AppointmentNotFound => StatusCode::NOT_FOUND,
        CancelError::NotOwner => StatusCode::FORBIDDEN,
        CancelError::NotCancelable => StatusCode::CONFLICT,
        CancelError::TooLateToCancel { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        CancelError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    AppError::domain(status, e.code(), e.to_string())
}

fn parse_user_id(user: &User) -> Result<Uuid, AppError> {
    Uuid::parse_str(&user.id)
        .map_err(|_| AppError::Auth("Token subject is not a valid user id".to_string()))
}

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let patient_id = parse_user_id(&user)?;

    let service = AppointmentBookingService::new(&state);
    let appointment = service
        .book_appointment(patient_id, request, token)
        .await
        .map_err(booking_error)?;

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn list_my_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let patient_id = parse_user_id(&user)?;

    let service = AppointmentBookingService::new(&state);
    let appointments = service
        .list_patient_appointments(patient_id, token)
        .await
        .map_err(booking_error)?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let service = AppointmentLifecycleService::new(&state);
    let appointment = service
        .cancel_appointment(appointment_id, &user, token)
        .await
        .map_err(cancel_error)?;

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn mark_no_show(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if !user.is_admin() && !user.is_doctor() {
        return Err(AppError::Auth(
            "Only staff can mark appointments as no-show".to_string(),
        ));
    }

    let service = AppointmentLifecycleService::new(&state);
    let appointment = service
        .mark_no_show(appointment_id, token)
        .await
        .map_err(cancel_error)?;

    Ok(Json(json!(appointment)))
}

/// Entry point for the external scheduler (cron). The sweep itself is
/// idempotent, so overlapping triggers are harmless.
#[axum::debug_handler]
pub async fn reconcile_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if !user.is_admin() {
        return Err(AppError::Auth(
            "Only administrators can trigger reconciliation".to_string(),
        ));
    }

    let service = AppointmentLifecycleService::new(&state);
    let completed = service
        .reconcile_past_appointments(token)
        .await
        .map_err(cancel_error)?;

    Ok(Json(json!({ "completed": completed })))
}
